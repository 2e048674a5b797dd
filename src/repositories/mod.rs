pub mod error;
pub mod in_memory_repository;
pub mod json_file_repository;
pub mod preferences_repository;
pub mod session_repository;
pub mod sqlite_repository;
pub mod vault;

pub use error::{StorageError, StorageResult};
pub use in_memory_repository::InMemorySessionRepository;
pub use json_file_repository::JsonFileSessionRepository;
pub use preferences_repository::{PreferencesRepository, UiPreferences};
pub use session_repository::{MemoryNoteStore, SessionRepository, VaultBackend};
pub use sqlite_repository::SqliteSessionRepository;
pub use vault::{MemoryVault, PermissionState};
