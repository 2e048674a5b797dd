use serde::{Deserialize, Serialize};

use super::session::MessageStatus;

/// Conversation mode selected by the user. Each mode maps to a different
/// gateway-side configuration: prompt addendum, live-search tool access,
/// and reasoning budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    #[default]
    Standard,
    Search,
    Research,
    Thinking,
    Shopping,
}

impl ChatMode {
    /// Modes that may ground replies in live web results.
    pub fn uses_search(self) -> bool {
        matches!(self, ChatMode::Search | ChatMode::Research | ChatMode::Shopping)
    }

    /// Reasoning-effort budget in tokens. The chat model rejects a zero
    /// budget, so even Standard keeps a small one.
    pub fn thinking_budget(self) -> u32 {
        match self {
            ChatMode::Thinking | ChatMode::Research => 32_768,
            ChatMode::Standard | ChatMode::Search | ChatMode::Shopping => 8_192,
        }
    }

    /// Status shown on the reply placeholder before any content arrives.
    pub fn initial_status(self) -> MessageStatus {
        match self {
            ChatMode::Search | ChatMode::Research => MessageStatus::Searching,
            ChatMode::Thinking => MessageStatus::Thinking,
            ChatMode::Standard | ChatMode::Shopping => MessageStatus::None,
        }
    }

    /// Addendum appended to the base system instruction.
    pub fn prompt_addendum(self) -> &'static str {
        match self {
            ChatMode::Standard => "",
            ChatMode::Search => {
                "Ground answers in current web results and cite the pages you relied on."
            }
            ChatMode::Research => {
                "Work like a researcher: consult multiple sources, compare them, and cite each claim."
            }
            ChatMode::Thinking => {
                "Take as much time as needed to reason carefully before answering."
            }
            ChatMode::Shopping => {
                "Help compare products and prices; prefer recent listings and cite where each offer was found."
            }
        }
    }
}
