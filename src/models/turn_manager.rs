use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::debug;

/// How a turn ended (or that it has not yet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    Active,
    Completed,
    Cancelled,
    Failed(String),
}

/// Events emitted while turns run, tagged with the owning session id so
/// observers can filter. Delivery is best effort: if nobody listens the
/// events are dropped.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    TurnStarted { session_id: String },
    Delta { session_id: String, text: String },
    TurnEnded { session_id: String, status: TurnStatus },
}

struct TurnState {
    cancel_flag: Arc<AtomicBool>,
}

/// Tracks the lifecycle of in-flight turns, one at most per session.
///
/// Owns only lifecycle state (cancellation flags); accumulating reply text
/// is the session store's job. Starting a turn for a session that already
/// has one cancels the old turn first.
pub struct TurnManager {
    turns: HashMap<String, TurnState>,
    events: UnboundedSender<TurnEvent>,
    receiver: Option<UnboundedReceiver<TurnEvent>>,
}

impl TurnManager {
    pub fn new() -> Self {
        let (events, receiver) = unbounded_channel();
        Self {
            turns: HashMap::new(),
            events,
            receiver: Some(receiver),
        }
    }

    /// Take the event stream. Yields `None` after the first call.
    pub fn take_events(&mut self) -> Option<UnboundedReceiver<TurnEvent>> {
        self.receiver.take()
    }

    /// Register a turn for a session and hand back its cancel flag. Any
    /// existing turn on the same session is cancelled first.
    pub fn begin_turn(&mut self, session_id: &str) -> Arc<AtomicBool> {
        if let Some(existing) = self.turns.remove(session_id) {
            existing.cancel_flag.store(true, Ordering::Relaxed);
            debug!(session_id = %session_id, "cancelled existing turn before starting a new one");
        }

        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.turns.insert(
            session_id.to_string(),
            TurnState {
                cancel_flag: cancel_flag.clone(),
            },
        );
        let _ = self.events.send(TurnEvent::TurnStarted {
            session_id: session_id.to_string(),
        });
        cancel_flag
    }

    pub fn is_turn_active(&self, session_id: &str) -> bool {
        self.turns.contains_key(session_id)
    }

    pub fn has_active_turns(&self) -> bool {
        !self.turns.is_empty()
    }

    pub fn emit_delta(&self, session_id: &str, text: String) {
        let _ = self.events.send(TurnEvent::Delta {
            session_id: session_id.to_string(),
            text,
        });
    }

    /// Raise the cancel flag for a session's turn, if one is running. The
    /// turn loop observes the flag cooperatively and settles on its own.
    pub fn cancel_turn(&mut self, session_id: &str) {
        if let Some(state) = self.turns.get(session_id) {
            state.cancel_flag.store(true, Ordering::Relaxed);
            debug!(session_id = %session_id, "turn cancellation requested");
        }
    }

    /// Raise every cancel flag (app shutdown).
    pub fn cancel_all(&mut self) {
        for state in self.turns.values() {
            state.cancel_flag.store(true, Ordering::Relaxed);
        }
    }

    /// Remove a turn and announce how it ended.
    pub fn finish_turn(&mut self, session_id: &str, status: TurnStatus) {
        self.turns.remove(session_id);
        let _ = self.events.send(TurnEvent::TurnEnded {
            session_id: session_id.to_string(),
            status,
        });
    }
}

impl Default for TurnManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_manager_has_no_turns() {
        let manager = TurnManager::new();
        assert!(!manager.has_active_turns());
        assert!(!manager.is_turn_active("s-1"));
    }

    #[test]
    fn begin_turn_cancels_the_previous_one() {
        let mut manager = TurnManager::new();
        let first = manager.begin_turn("s-1");
        let second = manager.begin_turn("s-1");

        assert!(first.load(Ordering::Relaxed));
        assert!(!second.load(Ordering::Relaxed));
        assert!(manager.is_turn_active("s-1"));
    }

    #[test]
    fn cancel_turn_raises_the_flag_without_removing() {
        let mut manager = TurnManager::new();
        let flag = manager.begin_turn("s-1");
        manager.cancel_turn("s-1");

        assert!(flag.load(Ordering::Relaxed));
        assert!(manager.is_turn_active("s-1"));

        manager.finish_turn("s-1", TurnStatus::Cancelled);
        assert!(!manager.is_turn_active("s-1"));
    }

    #[tokio::test]
    async fn lifecycle_events_reach_the_subscriber() {
        let mut manager = TurnManager::new();
        let mut events = manager.take_events().unwrap();

        manager.begin_turn("s-1");
        manager.emit_delta("s-1", "Hi".to_string());
        manager.finish_turn("s-1", TurnStatus::Completed);

        assert!(matches!(
            events.recv().await,
            Some(TurnEvent::TurnStarted { session_id }) if session_id == "s-1"
        ));
        assert!(matches!(
            events.recv().await,
            Some(TurnEvent::Delta { text, .. }) if text == "Hi"
        ));
        assert!(matches!(
            events.recv().await,
            Some(TurnEvent::TurnEnded { status: TurnStatus::Completed, .. })
        ));
    }
}
