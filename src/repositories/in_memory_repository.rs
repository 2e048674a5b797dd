use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::ChatSession;

use super::error::StorageResult;
use super::session_repository::{BoxFuture, MemoryNoteStore, SessionRepository};

/// Map-backed storage tier for tests and for running with no durable
/// storage at all (everything is lost when the process exits).
#[derive(Clone, Default)]
pub struct InMemorySessionRepository {
    sessions: Arc<Mutex<HashMap<String, ChatSession>>>,
    notes: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionRepository for InMemorySessionRepository {
    fn load_all(&self) -> BoxFuture<'static, StorageResult<Vec<ChatSession>>> {
        let sessions = self.sessions.clone();

        Box::pin(async move {
            let mut result: Vec<ChatSession> = sessions.lock().values().cloned().collect();
            result.sort_by_key(|s| std::cmp::Reverse(s.last_updated));
            Ok(result)
        })
    }

    fn save(&self, session: &ChatSession) -> BoxFuture<'static, StorageResult<()>> {
        let sessions = self.sessions.clone();
        let session = session.clone();

        Box::pin(async move {
            sessions.lock().insert(session.id.clone(), session);
            Ok(())
        })
    }

    fn delete(&self, id: &str) -> BoxFuture<'static, StorageResult<()>> {
        let sessions = self.sessions.clone();
        let id = id.to_string();

        Box::pin(async move {
            sessions.lock().remove(&id);
            Ok(())
        })
    }
}

impl MemoryNoteStore for InMemorySessionRepository {
    fn save_note(&self, name: &str, content: &str) -> BoxFuture<'static, StorageResult<()>> {
        let notes = self.notes.clone();
        let name = name.to_string();
        let content = content.to_string();

        Box::pin(async move {
            notes.lock().insert(name, content);
            Ok(())
        })
    }

    fn list_notes(&self) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let notes = self.notes.clone();

        Box::pin(async move { Ok(notes.lock().keys().cloned().collect()) })
    }
}
