use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, warn};

use super::session::{ChatMessage, ChatSession, MessagePatch, now_millis};

/// Persistence work queued by a mutation and drained by whoever owns the
/// storage connection. Keeps "mutate local state" separate from "persist"
/// so pending-but-unflushed writes are observable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingWrite {
    Sync(String),
    Delete(String),
}

/// Authoritative in-memory registry of sessions.
///
/// Sessions are held behind `Arc` and mutated copy-on-write, so touching
/// one session never moves or clones any other; readers holding an `Arc`
/// to an unrelated session keep an identical pointer across mutations.
pub struct SessionStore {
    sessions: Vec<Arc<ChatSession>>,
    active_session_id: Option<String>,
    pending_writes: VecDeque<PendingWrite>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Vec::new(),
            active_session_id: None,
            pending_writes: VecDeque::new(),
        }
    }

    /// Allocate a new empty session, prepend it, and make it active.
    pub fn create_session(&mut self) -> String {
        let session = ChatSession::new();
        let id = session.id.clone();
        self.sessions.insert(0, Arc::new(session));
        self.active_session_id = Some(id.clone());
        id
    }

    /// Replace the whole registry with sessions restored from storage.
    /// The most recently updated session becomes active.
    pub fn replace_all(&mut self, sessions: Vec<ChatSession>) {
        self.sessions = sessions.into_iter().map(Arc::new).collect();
        self.sessions
            .sort_by_key(|s| std::cmp::Reverse(s.last_updated));
        self.active_session_id = self.sessions.first().map(|s| s.id.clone());
    }

    /// Point the active-session marker at `id`. Unknown ids are ignored.
    pub fn select_session(&mut self, id: &str) {
        if self.sessions.iter().any(|s| s.id == id) {
            self.active_session_id = Some(id.to_string());
        } else {
            debug!(session_id = %id, "select_session ignored unknown id");
        }
    }

    pub fn clear_active(&mut self) {
        self.active_session_id = None;
    }

    pub fn active_session_id(&self) -> Option<&str> {
        self.active_session_id.as_deref()
    }

    pub fn session(&self, id: &str) -> Option<&Arc<ChatSession>> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn active_session(&self) -> Option<&Arc<ChatSession>> {
        self.active_session_id
            .as_deref()
            .and_then(|id| self.session(id))
    }

    /// All sessions, most recently updated first.
    pub fn list_all(&self) -> Vec<Arc<ChatSession>> {
        let mut sessions = self.sessions.clone();
        sessions.sort_by_key(|s| std::cmp::Reverse(s.last_updated));
        sessions
    }

    /// Unarchived sessions, most recently updated first.
    pub fn list_active(&self) -> Vec<Arc<ChatSession>> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .filter(|s| !s.is_archived)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| std::cmp::Reverse(s.last_updated));
        sessions
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn append_message(&mut self, session_id: &str, message: ChatMessage) {
        match self.session_arc_mut(session_id) {
            Some(session) => Arc::make_mut(session).push_message(message),
            None => warn!(session_id = %session_id, "append_message on unknown session"),
        }
    }

    /// Apply a partial update to exactly one message. Every other session
    /// keeps its existing `Arc`, so change detection stays cheap.
    pub fn mutate_message(&mut self, session_id: &str, message_id: &str, patch: MessagePatch) -> bool {
        let Some(session) = self.session_arc_mut(session_id) else {
            warn!(session_id = %session_id, "mutate_message on unknown session");
            return false;
        };
        let session = Arc::make_mut(session);
        match session.message_mut(message_id) {
            Some(message) => {
                patch.apply(message);
                session.last_updated = now_millis();
                true
            }
            None => {
                warn!(session_id = %session_id, message_id = %message_id, "mutate_message on unknown message");
                false
            }
        }
    }

    pub fn rename_session(&mut self, session_id: &str, title: impl Into<String>) -> bool {
        let Some(session) = self.session_arc_mut(session_id) else {
            warn!(session_id = %session_id, "rename_session on unknown session");
            return false;
        };
        Arc::make_mut(session).set_title(title);
        self.queue_sync(session_id);
        true
    }

    /// Flip the archive flag. Archived sessions disappear from the active
    /// list but stay in storage; `last_updated` is left alone since no
    /// message or title changed.
    pub fn toggle_archived(&mut self, session_id: &str) -> bool {
        let Some(session) = self.session_arc_mut(session_id) else {
            warn!(session_id = %session_id, "toggle_archived on unknown session");
            return false;
        };
        let session = Arc::make_mut(session);
        session.is_archived = !session.is_archived;
        self.queue_sync(session_id);
        true
    }

    /// Drop a session and queue its backend deletion. The active marker
    /// moves to the most recent remaining session.
    pub fn delete_session(&mut self, session_id: &str) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != session_id);
        if self.sessions.len() == before {
            return false;
        }
        if self.active_session_id.as_deref() == Some(session_id) {
            self.active_session_id = self
                .list_all()
                .first()
                .map(|s| s.id.clone());
        }
        self.pending_writes
            .push_back(PendingWrite::Delete(session_id.to_string()));
        true
    }

    /// Mark a turn as started: exactly one message per session may be in
    /// flight. Returns false if another turn already owns the session.
    pub fn begin_turn(&mut self, session_id: &str, message_id: &str) -> bool {
        let Some(session) = self.session_arc_mut(session_id) else {
            warn!(session_id = %session_id, "begin_turn on unknown session");
            return false;
        };
        let session = Arc::make_mut(session);
        if session.in_flight_message_id.is_some() {
            return false;
        }
        session.in_flight_message_id = Some(message_id.to_string());
        true
    }

    /// Clear the in-flight marker, but only if `message_id` still owns
    /// it; a superseding turn's marker is left alone.
    pub fn end_turn(&mut self, session_id: &str, message_id: &str) {
        if let Some(session) = self.session_arc_mut(session_id)
            && session.in_flight_message_id.as_deref() == Some(message_id)
        {
            Arc::make_mut(session).in_flight_message_id = None;
        }
    }

    pub fn queue_sync(&mut self, session_id: &str) {
        self.pending_writes
            .push_back(PendingWrite::Sync(session_id.to_string()));
    }

    pub fn pending_writes(&self) -> &VecDeque<PendingWrite> {
        &self.pending_writes
    }

    pub fn drain_pending_writes(&mut self) -> Vec<PendingWrite> {
        self.pending_writes.drain(..).collect()
    }

    fn session_arc_mut(&mut self, id: &str) -> Option<&mut Arc<ChatSession>> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
