pub mod mode;
pub mod session;
pub mod session_store;
pub mod turn_manager;
pub mod user_directory;

pub use mode::ChatMode;
pub use session::{
    ChatMessage, ChatSession, MediaAttachment, MessagePatch, MessageStatus, Role, SourceRef,
    PLACEHOLDER_TITLE,
};
pub use session_store::{PendingWrite, SessionStore};
pub use turn_manager::{TurnEvent, TurnManager, TurnStatus};
pub use user_directory::{User, UserDirectory};
