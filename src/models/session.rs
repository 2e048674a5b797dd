use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Title shown until the first user message provides a better one.
pub const PLACEHOLDER_TITLE: &str = "New Discussion";

/// Titles derived from the first message are cut to this many characters.
const TITLE_MAX_CHARS: usize = 30;

/// Who authored a message. `System` is reserved and never produced by
/// active flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    System,
}

/// Transient indicator explaining why a model message has no visible
/// content yet. Always resolves to `None` once text arrives or the turn
/// settles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Thinking,
    Searching,
    #[default]
    None,
}

impl MessageStatus {
    pub fn is_none(&self) -> bool {
        matches!(self, MessageStatus::None)
    }
}

/// A single citation attached to a model reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub uri: String,
    pub title: String,
}

/// Inline binary attachment (base64 payload plus MIME type). Immutable
/// once set on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub data: String,
    pub mime_type: String,
}

impl MediaAttachment {
    /// Encode raw bytes into an attachment.
    pub fn from_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        use base64::Engine as _;
        Self {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            mime_type: mime_type.into(),
        }
    }
}

/// One entry in a session's chronological message list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Creation time, epoch milliseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaAttachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceRef>,
    #[serde(default, skip_serializing_if = "MessageStatus::is_none")]
    pub status: MessageStatus,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>, media: Option<MediaAttachment>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            timestamp: now_millis(),
            media,
            sources: Vec::new(),
            status: MessageStatus::None,
        }
    }

    /// Empty model message inserted before the reply arrives; filled
    /// in place while the stream is consumed.
    pub fn model_placeholder(status: MessageStatus) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Model,
            content: String::new(),
            timestamp: now_millis(),
            media: None,
            sources: Vec::new(),
            status,
        }
    }
}

/// Partial update applied to exactly one message. Absent fields leave
/// the message untouched; `media` is only honoured while still unset.
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub status: Option<MessageStatus>,
    pub sources: Option<Vec<SourceRef>>,
    pub media: Option<MediaAttachment>,
}

impl MessagePatch {
    pub fn apply(self, message: &mut ChatMessage) {
        if let Some(content) = self.content {
            message.content = content;
        }
        if let Some(status) = self.status {
            message.status = status;
        }
        if let Some(sources) = self.sources {
            message.sources = sources;
        }
        if message.media.is_none() {
            message.media = self.media;
        }
    }
}

/// A single conversation thread with its own message history and
/// metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    /// Epoch milliseconds of the last message or title mutation.
    pub last_updated: i64,
    #[serde(default)]
    pub is_archived: bool,
    /// Id of the message currently being streamed into, if any. Set when
    /// a turn starts and cleared on completion or failure; never persisted.
    #[serde(skip)]
    pub in_flight_message_id: Option<String>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: PLACEHOLDER_TITLE.to_string(),
            messages: Vec::new(),
            last_updated: now_millis(),
            is_archived: false,
            in_flight_message_id: None,
        }
    }

    /// Append a message. The first message also names the session when the
    /// title is still the placeholder.
    pub fn push_message(&mut self, message: ChatMessage) {
        if self.messages.is_empty() && self.title == PLACEHOLDER_TITLE {
            self.title = derive_title(&message.content);
        }
        self.messages.push(message);
        self.last_updated = now_millis();
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.last_updated = now_millis();
    }

    pub fn message_mut(&mut self, message_id: &str) -> Option<&mut ChatMessage> {
        // The streamed message is almost always the newest one.
        self.messages.iter_mut().rev().find(|m| m.id == message_id)
    }

    pub fn message(&self, message_id: &str) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.id == message_id)
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Title for a session from its first message: a bounded prefix of the
/// text, or the placeholder for attachment-only messages.
pub fn derive_title(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return PLACEHOLDER_TITLE.to_string();
    }
    let truncated: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        format!("{truncated}...")
    } else {
        truncated
    }
}

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
