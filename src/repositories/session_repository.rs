use std::future::Future;
use std::pin::Pin;

use crate::models::ChatSession;

use super::error::StorageResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Storage key for a session record. Both durable tiers use the same
/// scheme so records can migrate between them unchanged.
pub fn session_record_key(id: &str) -> String {
    format!("{id}.json")
}

/// Storage key for a memory note.
pub fn note_record_key(name: &str) -> String {
    format!("{name}.md")
}

/// Durable persistence of session snapshots, keyed by session id.
///
/// Implementations hold serialized snapshots only; live session objects
/// belong to the in-memory store. Loads skip individual unreadable
/// records rather than failing the whole enumeration.
pub trait SessionRepository: Send + Sync + 'static {
    /// Every persisted session, most recently updated first.
    fn load_all(&self) -> BoxFuture<'static, StorageResult<Vec<ChatSession>>>;

    /// Idempotent upsert of a full session snapshot.
    fn save(&self, session: &ChatSession) -> BoxFuture<'static, StorageResult<()>>;

    /// Remove the record for `id`. Absence is not an error.
    fn delete(&self, id: &str) -> BoxFuture<'static, StorageResult<()>>;
}

/// Free-form markdown notes living next to the session records.
pub trait MemoryNoteStore: Send + Sync + 'static {
    fn save_note(&self, name: &str, content: &str) -> BoxFuture<'static, StorageResult<()>>;

    /// Note names (without extension), unordered.
    fn list_notes(&self) -> BoxFuture<'static, StorageResult<Vec<String>>>;
}

/// A storage tier the vault can activate: session records plus notes.
pub trait VaultBackend: SessionRepository + MemoryNoteStore {}

impl<T: SessionRepository + MemoryNoteStore> VaultBackend for T {}
