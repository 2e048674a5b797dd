use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::bail;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, warn};

use crate::models::{
    ChatMessage, ChatMode, MediaAttachment, MessagePatch, MessageStatus, PendingWrite,
    SessionStore, SourceRef, TurnEvent, TurnManager, TurnStatus,
};
use crate::repositories::MemoryVault;
use crate::services::ModelGateway;

/// Shown in place of a reply when a turn dies for any non-quota reason.
pub const GENERIC_TURN_ERROR: &str = "Neural link interrupted. Please retry the communication.";

/// Shown when the upstream rejects the turn for quota reasons.
pub const QUOTA_TURN_ERROR: &str = "The shared neural link is out of capacity right now. \
    Add your own Gemini API key in settings to keep communicating without limits.";

/// Drives chat turns end-to-end: resolves the target session, mirrors the
/// user's message immediately, folds the gateway's fragment stream into
/// the reply placeholder, and flushes settled sessions to the vault.
///
/// All gateway failures are converted into visible conversation text
/// here; nothing propagates to the presentation layer as a fault.
pub struct ChatController {
    store: Arc<RwLock<SessionStore>>,
    turns: Arc<Mutex<TurnManager>>,
    gateway: Arc<dyn ModelGateway>,
    vault: Arc<MemoryVault>,
}

impl ChatController {
    pub fn new(gateway: Arc<dyn ModelGateway>, vault: Arc<MemoryVault>) -> Self {
        Self {
            store: Arc::new(RwLock::new(SessionStore::new())),
            turns: Arc::new(Mutex::new(TurnManager::new())),
            gateway,
            vault,
        }
    }

    /// The session registry the presentation layer reads from.
    pub fn store(&self) -> Arc<RwLock<SessionStore>> {
        self.store.clone()
    }

    pub fn vault(&self) -> Arc<MemoryVault> {
        self.vault.clone()
    }

    /// Take the turn lifecycle event stream. Yields `None` after the
    /// first call.
    pub fn take_turn_events(&self) -> Option<UnboundedReceiver<TurnEvent>> {
        self.turns.lock().take_events()
    }

    /// Populate the store from the vault at startup.
    pub async fn restore_sessions(&self) {
        let sessions = self.vault.load_all_sessions().await;
        debug!(count = sessions.len(), "Restored sessions from the vault");
        self.store.write().replace_all(sessions);
    }

    /// Start a fresh discussion and make it active. Any turn still
    /// streaming into the previously active session is cancelled.
    pub fn new_session(&self) -> String {
        self.cancel_active_turn();
        self.store.write().create_session()
    }

    /// Make `id` the active session, cancelling the outgoing session's
    /// in-flight turn so abandoned fragments stop costing work upstream.
    pub fn select_session(&self, id: &str) {
        let previous = self.store.read().active_session_id().map(str::to_string);
        if let Some(previous) = previous
            && previous != id
        {
            self.turns.lock().cancel_turn(&previous);
        }
        self.store.write().select_session(id);
    }

    /// Run one chat turn. The user's message is visible in the store
    /// before any network call starts; the reply streams into a
    /// placeholder message until the turn settles.
    pub async fn send_message(
        &self,
        text: String,
        media: Option<MediaAttachment>,
        mode: ChatMode,
    ) -> anyhow::Result<String> {
        debug!(len = text.len(), ?mode, "send_message called");

        let (session_id, placeholder_id, history, cancel_flag) = {
            let mut store = self.store.write();
            let session_id = match store.active_session_id() {
                Some(id) => id.to_string(),
                None => store.create_session(),
            };

            let busy = store
                .session(&session_id)
                .is_some_and(|s| s.in_flight_message_id.is_some());
            if busy {
                warn!(session_id = %session_id, "Rejecting send: a reply is already streaming");
                bail!("a reply is already streaming into this session");
            }

            store.append_message(&session_id, ChatMessage::user(text, media));

            // Snapshot the history the model sees: everything up to and
            // including the user's message, never the empty placeholder.
            let history = store
                .session(&session_id)
                .map(|s| s.messages.clone())
                .unwrap_or_default();

            let placeholder = ChatMessage::model_placeholder(mode.initial_status());
            let placeholder_id = placeholder.id.clone();
            store.append_message(&session_id, placeholder);
            store.begin_turn(&session_id, &placeholder_id);

            let cancel_flag = self.turns.lock().begin_turn(&session_id);
            (session_id, placeholder_id, history, cancel_flag)
        };

        let mut stream = self.gateway.stream_reply(history, mode);

        let mut content = String::new();
        let mut sources: Vec<SourceRef> = Vec::new();
        let mut seen_uris: HashSet<String> = HashSet::new();
        let mut status = mode.initial_status();
        let mut outcome = TurnStatus::Completed;

        while let Some(item) = stream.next().await {
            if cancel_flag.load(Ordering::Relaxed) {
                outcome = TurnStatus::Cancelled;
                break;
            }

            match item {
                Ok(fragment) => {
                    if let Some(delta) = &fragment.text_delta {
                        content.push_str(delta);
                        self.turns.lock().emit_delta(&session_id, delta.clone());
                    }
                    for source in fragment.sources {
                        if seen_uris.insert(source.uri.clone()) {
                            sources.push(source);
                        }
                    }
                    status = match fragment.status_hint {
                        Some(hint) => hint,
                        None if !content.is_empty() => MessageStatus::None,
                        None => status,
                    };

                    self.store.write().mutate_message(
                        &session_id,
                        &placeholder_id,
                        MessagePatch {
                            content: Some(content.clone()),
                            status: Some(status),
                            sources: Some(sources.clone()),
                            media: None,
                        },
                    );
                }
                Err(e) => {
                    error!(session_id = %session_id, error = %e, "Turn failed");
                    content = if e.is_rate_limited() {
                        QUOTA_TURN_ERROR.to_string()
                    } else {
                        GENERIC_TURN_ERROR.to_string()
                    };
                    outcome = TurnStatus::Failed(e.to_string());
                    break;
                }
            }
        }

        if matches!(outcome, TurnStatus::Completed) && cancel_flag.load(Ordering::Relaxed) {
            outcome = TurnStatus::Cancelled;
        }

        {
            let mut store = self.store.write();
            store.mutate_message(
                &session_id,
                &placeholder_id,
                MessagePatch {
                    content: Some(content),
                    status: Some(MessageStatus::None),
                    sources: Some(sources),
                    media: None,
                },
            );
            store.end_turn(&session_id, &placeholder_id);
            store.queue_sync(&session_id);
        }
        self.turns.lock().finish_turn(&session_id, outcome);

        self.flush_pending_writes().await;
        Ok(session_id)
    }

    /// Run the vision action: one prompt in, one image-plus-caption
    /// message out. Shares the chat turns' failure treatment.
    pub async fn generate_image(
        &self,
        prompt: String,
        source: Option<MediaAttachment>,
    ) -> String {
        let session_id = {
            let mut store = self.store.write();
            let session_id = match store.active_session_id() {
                Some(id) => id.to_string(),
                None => store.create_session(),
            };
            store.append_message(&session_id, ChatMessage::user(prompt.clone(), source.clone()));
            session_id
        };

        let reply = match self.gateway.generate_image(prompt, source).await {
            Ok(generated) => {
                let mut message = ChatMessage::model_placeholder(MessageStatus::None);
                message.content = generated.caption;
                message.media = Some(generated.image);
                message
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Image generation failed");
                let mut message = ChatMessage::model_placeholder(MessageStatus::None);
                message.content = if e.is_rate_limited() {
                    QUOTA_TURN_ERROR.to_string()
                } else {
                    GENERIC_TURN_ERROR.to_string()
                };
                message
            }
        };

        {
            let mut store = self.store.write();
            store.append_message(&session_id, reply);
            store.queue_sync(&session_id);
        }
        self.flush_pending_writes().await;
        session_id
    }

    pub async fn rename_session(&self, id: &str, title: &str) {
        if self.store.write().rename_session(id, title) {
            self.flush_pending_writes().await;
        }
    }

    pub async fn toggle_archived(&self, id: &str) {
        if self.store.write().toggle_archived(id) {
            self.flush_pending_writes().await;
        }
    }

    /// Destroy a session locally and in storage. A turn still streaming
    /// into it is cancelled.
    pub async fn delete_session(&self, id: &str) {
        self.turns.lock().cancel_turn(id);
        if self.store.write().delete_session(id) {
            self.flush_pending_writes().await;
        }
    }

    /// Drain the store's write-behind queue into the vault. Storage
    /// failures are logged; local state is already updated either way.
    pub async fn flush_pending_writes(&self) {
        let writes = self.store.write().drain_pending_writes();
        for write in writes {
            match write {
                PendingWrite::Sync(id) => {
                    let snapshot = self.store.read().session(&id).cloned();
                    let Some(session) = snapshot else { continue };
                    // Never persist mid-stream; the settled snapshot
                    // queues its own sync.
                    if session.in_flight_message_id.is_some() {
                        debug!(session_id = %id, "Skipping sync while a turn is in flight");
                        continue;
                    }
                    if let Err(e) = self.vault.sync_session(&session).await {
                        warn!(session_id = %id, error = %e, "Session sync failed");
                    }
                }
                PendingWrite::Delete(id) => {
                    self.vault.delete_session(&id).await;
                }
            }
        }
    }

    fn cancel_active_turn(&self) {
        let active = self.store.read().active_session_id().map(str::to_string);
        if let Some(active) = active {
            self.turns.lock().cancel_turn(&active);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

    use crate::models::Role;
    use crate::repositories::{InMemorySessionRepository, SessionRepository};
    use crate::services::gateway::{GatewayError, GeneratedImage, ReplyFragment, ReplyStream};

    /// Gateway double. Replies either from a pre-scripted fragment list
    /// or from a live channel the test feeds fragment by fragment.
    struct MockGateway {
        scripts: Mutex<VecDeque<Vec<Result<ReplyFragment, GatewayError>>>>,
        live: Mutex<Option<UnboundedReceiver<Result<ReplyFragment, GatewayError>>>>,
        image_result: Mutex<Option<Result<GeneratedImage, GatewayError>>>,
    }

    impl MockGateway {
        fn scripted(script: Vec<Result<ReplyFragment, GatewayError>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(VecDeque::from([script])),
                live: Mutex::new(None),
                image_result: Mutex::new(None),
            })
        }

        fn live() -> (Arc<Self>, UnboundedSender<Result<ReplyFragment, GatewayError>>) {
            let (tx, rx) = unbounded_channel();
            let gateway = Arc::new(Self {
                scripts: Mutex::new(VecDeque::new()),
                live: Mutex::new(Some(rx)),
                image_result: Mutex::new(None),
            });
            (gateway, tx)
        }

        fn with_image(result: Result<GeneratedImage, GatewayError>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(VecDeque::new()),
                live: Mutex::new(None),
                image_result: Mutex::new(Some(result)),
            })
        }
    }

    #[async_trait::async_trait]
    impl ModelGateway for MockGateway {
        fn stream_reply(&self, _history: Vec<ChatMessage>, _mode: ChatMode) -> ReplyStream {
            if let Some(mut rx) = self.live.lock().take() {
                return Box::pin(async_stream::stream! {
                    while let Some(item) = rx.recv().await {
                        yield item;
                    }
                });
            }
            let script = self.scripts.lock().pop_front().unwrap_or_default();
            Box::pin(futures::stream::iter(script))
        }

        async fn generate_image(
            &self,
            _prompt: String,
            _source: Option<MediaAttachment>,
        ) -> Result<GeneratedImage, GatewayError> {
            self.image_result
                .lock()
                .take()
                .unwrap_or_else(|| Err(GatewayError::Parse("no scripted image".to_string())))
        }
    }

    fn text_fragment(text: &str) -> Result<ReplyFragment, GatewayError> {
        Ok(ReplyFragment {
            text_delta: Some(text.to_string()),
            ..Default::default()
        })
    }

    fn source(uri: &str, title: &str) -> SourceRef {
        SourceRef {
            uri: uri.to_string(),
            title: title.to_string(),
        }
    }

    fn controller_with(
        gateway: Arc<MockGateway>,
    ) -> (Arc<ChatController>, Arc<InMemorySessionRepository>) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
        let fallback = Arc::new(InMemorySessionRepository::new());
        let vault = Arc::new(MemoryVault::with_backend(
            fallback.clone(),
            std::env::temp_dir().join(format!("ultrawan-grant-{}.json", uuid::Uuid::new_v4())),
        ));
        (
            Arc::new(ChatController::new(gateway, vault)),
            fallback,
        )
    }

    #[tokio::test]
    async fn streamed_fragments_settle_into_the_placeholder() {
        let gateway = MockGateway::scripted(vec![text_fragment("Hi"), text_fragment(" there")]);
        let (controller, fallback) = controller_with(gateway);

        let session_id = controller
            .send_message("Hello".to_string(), None, ChatMode::Standard)
            .await
            .unwrap();

        let store = controller.store();
        let store = store.read();
        let session = store.session(&session_id).unwrap();

        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, Role::User);
        assert_eq!(session.messages[0].content, "Hello");
        assert_eq!(session.messages[1].role, Role::Model);
        assert_eq!(session.messages[1].content, "Hi there");
        assert_eq!(session.messages[1].status, MessageStatus::None);
        assert_eq!(session.in_flight_message_id, None);
        assert!(store.pending_writes().is_empty());
        drop(store);

        // The settled session was flushed to storage.
        let persisted = fallback.load_all().await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].messages[1].content, "Hi there");
    }

    #[tokio::test]
    async fn sending_without_a_session_creates_exactly_one() {
        let gateway = MockGateway::scripted(vec![text_fragment("Hi")]);
        let (controller, _) = controller_with(gateway);

        assert_eq!(controller.store().read().count(), 0);

        let session_id = controller
            .send_message("Hello".to_string(), None, ChatMode::Standard)
            .await
            .unwrap();

        let store = controller.store();
        let store = store.read();
        assert_eq!(store.count(), 1);
        let session = store.session(&session_id).unwrap();
        assert_eq!(session.messages[0].role, Role::User);
        assert_eq!(session.messages[0].content, "Hello");
        assert_eq!(session.title, "Hello");
    }

    #[tokio::test]
    async fn quota_failure_renders_the_remediation_text() {
        let gateway = MockGateway::scripted(vec![Err(GatewayError::RateLimited {
            message: "quota exceeded".to_string(),
        })]);
        let (controller, _) = controller_with(gateway);

        let session_id = controller
            .send_message("Hello".to_string(), None, ChatMode::Standard)
            .await
            .unwrap();

        let store = controller.store();
        let store = store.read();
        let session = store.session(&session_id).unwrap();
        assert_eq!(session.messages[1].content, QUOTA_TURN_ERROR);
        assert_eq!(session.messages[1].status, MessageStatus::None);
        assert_eq!(session.in_flight_message_id, None);
    }

    #[tokio::test]
    async fn generic_failure_replaces_partial_content() {
        let gateway = MockGateway::scripted(vec![
            text_fragment("Hal"),
            Err(GatewayError::Http {
                status: 500,
                body: "boom".to_string(),
            }),
        ]);
        let (controller, _) = controller_with(gateway);

        let session_id = controller
            .send_message("Hello".to_string(), None, ChatMode::Standard)
            .await
            .unwrap();

        let store = controller.store();
        let store = store.read();
        let session = store.session(&session_id).unwrap();
        assert_eq!(session.messages[1].content, GENERIC_TURN_ERROR);
        assert_eq!(session.messages[1].status, MessageStatus::None);
    }

    #[tokio::test]
    async fn sources_are_deduplicated_in_first_seen_order() {
        let gateway = MockGateway::scripted(vec![
            Ok(ReplyFragment {
                text_delta: Some("According to".to_string()),
                sources: vec![
                    source("https://a.example", "A"),
                    source("https://b.example", "B"),
                ],
                ..Default::default()
            }),
            Ok(ReplyFragment {
                text_delta: Some(" the docs".to_string()),
                sources: vec![
                    source("https://b.example", "B again"),
                    source("https://c.example", "C"),
                ],
                ..Default::default()
            }),
        ]);
        let (controller, _) = controller_with(gateway);

        let session_id = controller
            .send_message("cite things".to_string(), None, ChatMode::Search)
            .await
            .unwrap();

        let store = controller.store();
        let store = store.read();
        let session = store.session(&session_id).unwrap();
        let uris: Vec<&str> = session.messages[1]
            .sources
            .iter()
            .map(|s| s.uri.as_str())
            .collect();
        assert_eq!(uris, vec!["https://a.example", "https://b.example", "https://c.example"]);
    }

    #[tokio::test]
    async fn search_mode_placeholder_starts_as_searching() {
        let (gateway, tx) = MockGateway::live();
        let (controller, _) = controller_with(gateway);
        let mut events = controller.take_turn_events().unwrap();

        let task = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .send_message("find this".to_string(), None, ChatMode::Search)
                    .await
            })
        };

        // Once the turn has started, the placeholder is visible with its
        // mode-derived status and the user message precedes it.
        assert!(matches!(events.recv().await, Some(TurnEvent::TurnStarted { .. })));
        {
            let store = controller.store();
            let store = store.read();
            let session = store.active_session().unwrap();
            assert_eq!(session.messages.len(), 2);
            assert_eq!(session.messages[1].status, MessageStatus::Searching);
            assert!(session.in_flight_message_id.is_some());
        }

        drop(tx);
        task.await.unwrap().unwrap();

        let store = controller.store();
        let store = store.read();
        let session = store.active_session().unwrap();
        assert_eq!(session.messages[1].status, MessageStatus::None);
    }

    #[tokio::test]
    async fn renaming_another_session_leaves_the_streaming_one_alone() {
        let (gateway, tx) = MockGateway::live();
        let (controller, _) = controller_with(gateway);
        let mut events = controller.take_turn_events().unwrap();

        let other = controller.new_session();
        let streaming = controller.new_session();

        let task = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .send_message("Hello".to_string(), None, ChatMode::Standard)
                    .await
            })
        };

        tx.send(text_fragment("Hi")).unwrap();
        loop {
            match events.recv().await {
                Some(TurnEvent::Delta { .. }) => break,
                Some(_) => continue,
                None => panic!("event channel closed early"),
            }
        }

        controller.rename_session(&other, "Renamed while busy").await;

        {
            let store = controller.store();
            let store = store.read();
            assert_eq!(store.session(&other).unwrap().title, "Renamed while busy");
            let busy = store.session(&streaming).unwrap();
            assert_eq!(busy.messages[1].content, "Hi");
            assert!(busy.in_flight_message_id.is_some());
        }

        tx.send(text_fragment(" there")).unwrap();
        drop(tx);
        task.await.unwrap().unwrap();

        let store = controller.store();
        let store = store.read();
        assert_eq!(store.session(&streaming).unwrap().messages[1].content, "Hi there");
    }

    #[tokio::test]
    async fn switching_sessions_cancels_the_stream() {
        let (gateway, tx) = MockGateway::live();
        let (controller, _) = controller_with(gateway);
        let mut events = controller.take_turn_events().unwrap();

        let other = controller.new_session();
        let streaming = controller.new_session();

        let task = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .send_message("Hello".to_string(), None, ChatMode::Standard)
                    .await
            })
        };

        tx.send(text_fragment("Hi")).unwrap();
        loop {
            match events.recv().await {
                Some(TurnEvent::Delta { .. }) => break,
                Some(_) => continue,
                None => panic!("event channel closed early"),
            }
        }

        controller.select_session(&other);

        // Fragments arriving after the switch are discarded.
        tx.send(text_fragment(" there")).unwrap();
        drop(tx);
        task.await.unwrap().unwrap();

        let store = controller.store();
        let store = store.read();
        let session = store.session(&streaming).unwrap();
        assert_eq!(session.messages[1].content, "Hi");
        assert_eq!(session.messages[1].status, MessageStatus::None);
        assert_eq!(session.in_flight_message_id, None);
        assert!(store.session(&other).unwrap().messages.is_empty());
        drop(store);

        loop {
            match events.recv().await {
                Some(TurnEvent::TurnEnded { status, .. }) => {
                    assert_eq!(status, TurnStatus::Cancelled);
                    break;
                }
                Some(_) => continue,
                None => panic!("no TurnEnded event"),
            }
        }
    }

    #[tokio::test]
    async fn a_busy_session_rejects_a_second_send() {
        let (gateway, tx) = MockGateway::live();
        let (controller, _) = controller_with(gateway);
        let mut events = controller.take_turn_events().unwrap();

        let task = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .send_message("first".to_string(), None, ChatMode::Standard)
                    .await
            })
        };

        assert!(matches!(events.recv().await, Some(TurnEvent::TurnStarted { .. })));

        let second = controller
            .send_message("second".to_string(), None, ChatMode::Standard)
            .await;
        assert!(second.is_err());

        drop(tx);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn deleting_a_session_removes_it_from_storage() {
        let gateway = MockGateway::scripted(vec![text_fragment("Hi")]);
        let (controller, fallback) = controller_with(gateway);

        let session_id = controller
            .send_message("Hello".to_string(), None, ChatMode::Standard)
            .await
            .unwrap();
        assert_eq!(fallback.load_all().await.unwrap().len(), 1);

        controller.delete_session(&session_id).await;

        assert_eq!(controller.store().read().count(), 0);
        assert!(fallback.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn archive_toggle_persists_the_flag() {
        let gateway = MockGateway::scripted(vec![text_fragment("Hi")]);
        let (controller, fallback) = controller_with(gateway);

        let session_id = controller
            .send_message("Hello".to_string(), None, ChatMode::Standard)
            .await
            .unwrap();
        controller.toggle_archived(&session_id).await;

        let persisted = fallback.load_all().await.unwrap();
        assert!(persisted[0].is_archived);
    }

    #[tokio::test]
    async fn restore_populates_the_store_newest_first() {
        let gateway = MockGateway::scripted(vec![]);
        let (controller, fallback) = controller_with(gateway);

        let mut older = crate::models::ChatSession::new();
        older.push_message(ChatMessage::user("older", None));
        older.last_updated = 1_000;
        let mut newer = crate::models::ChatSession::new();
        newer.push_message(ChatMessage::user("newer", None));
        newer.last_updated = 2_000;
        fallback.save(&older).await.unwrap();
        fallback.save(&newer).await.unwrap();

        controller.restore_sessions().await;

        let store = controller.store();
        let store = store.read();
        assert_eq!(store.count(), 2);
        assert_eq!(store.active_session_id(), Some(newer.id.as_str()));
    }

    #[tokio::test]
    async fn image_generation_appends_a_media_reply() {
        let gateway = MockGateway::with_image(Ok(GeneratedImage {
            image: MediaAttachment {
                data: "aW1hZ2U=".to_string(),
                mime_type: "image/png".to_string(),
            },
            caption: "A robot gardener".to_string(),
        }));
        let (controller, fallback) = controller_with(gateway);

        let session_id = controller
            .generate_image("draw a robot gardener".to_string(), None)
            .await;

        let store = controller.store();
        let store = store.read();
        let session = store.session(&session_id).unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[1].content, "A robot gardener");
        assert_eq!(
            session.messages[1].media.as_ref().unwrap().mime_type,
            "image/png"
        );
        drop(store);

        assert_eq!(fallback.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn image_generation_failure_becomes_conversation_text() {
        let gateway = MockGateway::with_image(Err(GatewayError::RateLimited {
            message: "quota".to_string(),
        }));
        let (controller, _) = controller_with(gateway);

        let session_id = controller
            .generate_image("draw something".to_string(), None)
            .await;

        let store = controller.store();
        let store = store.read();
        let session = store.session(&session_id).unwrap();
        assert_eq!(session.messages[1].content, QUOTA_TURN_ERROR);
        assert!(session.messages[1].media.is_none());
    }
}
