//! Capability handlers
//!
//! Each handler calls into the store or the response source and converts the
//! outcome into an envelope. [`capabilities`] assembles them into the tree the
//! dispatcher serves.

pub mod chats;
pub mod messages;
pub mod ollama;

use crate::api;
use crate::bridge::{Caller, CapabilityTree};
use crate::envelope::{Envelope, INTERNAL, NOT_FOUND};
use crate::error::{BridgeError, StoreError};
use crate::state::CoreState;
use crate::store::Store;
use std::sync::Arc;

/// Run a store call on the blocking pool.
///
/// rusqlite is synchronous, so statements never run on the runtime thread.
pub(crate) async fn with_store<T, F>(state: &Arc<CoreState>, work: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
{
    let state = state.clone();
    match tokio::task::spawn_blocking(move || work(&state.store)).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(op = "store.task_failed", error = %e, "Blocking store task failed");
            Err(StoreError::Task(e.to_string()))
        }
    }
}

/// Map a store error to an ERROR envelope (missing chats are 404).
pub(crate) fn store_failure<T>(message: &str, error: &StoreError) -> Envelope<T> {
    match error {
        StoreError::ChatNotFound(_) => Envelope::failure(NOT_FOUND, message, error),
        _ => Envelope::failure(INTERNAL, message, error),
    }
}

/// Build the capability tree over `state`.
pub fn capabilities(state: Arc<CoreState>) -> Result<CapabilityTree, BridgeError> {
    let mut tree = CapabilityTree::new();

    let s = state.clone();
    tree.insert(api::CHATS_LIST, move |_, ()| {
        let s = s.clone();
        async move { chats::handle_list(&s).await }
    })?;

    let s = state.clone();
    tree.insert(api::CHATS_CREATE, move |caller: Caller, ()| {
        let s = s.clone();
        async move { chats::handle_create(&s, &caller).await }
    })?;

    let s = state.clone();
    tree.insert(api::CHATS_DELETE, move |caller: Caller, (id,)| {
        let s = s.clone();
        async move { chats::handle_delete(&s, &caller, &id).await }
    })?;

    let s = state.clone();
    tree.insert(api::MESSAGES_GET_HISTORY, move |_, (chat_id,)| {
        let s = s.clone();
        async move { messages::handle_get_history(&s, &chat_id).await }
    })?;

    let s = state.clone();
    tree.insert(api::MESSAGES_APPEND, move |caller: Caller, (message,)| {
        let s = s.clone();
        async move { messages::handle_append(&s, &caller, &message).await }
    })?;

    let s = state.clone();
    tree.insert(api::OLLAMA_GENERATE, move |caller: Caller, (chat_id, prompt)| {
        let s = s.clone();
        async move { ollama::handle_generate(&s, &caller, &chat_id, &prompt).await }
    })?;

    let s = state;
    tree.insert(api::OLLAMA_MODELS, move |_, ()| {
        let s = s.clone();
        async move { ollama::handle_models(&s).await }
    })?;

    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Api, Listeners, StreamChunk};
    use crate::bridge::client::DEFAULT_TIMEOUT;
    use crate::bridge::{Dispatcher, LocalTransport};
    use crate::error::InferenceError;
    use crate::events::{self, ChangeKind, ChangedEntity, DatabaseChange, Disposer};
    use crate::inference::{ChatChunk, ChatMessage, ChunkHandler, ResponseSource, StaticSource};
    use crate::server;
    use crate::store::{IdSource, NewMessage, Role, Store};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn chunk(model: &str, content: &str, done: bool) -> ChatChunk {
        ChatChunk {
            model: model.to_string(),
            created_at: "2025-01-01T00:00:00Z".to_string(),
            message: ChatMessage {
                role: "assistant".to_string(),
                content: content.to_string(),
            },
            done,
            done_reason: None,
        }
    }

    /// Streams fixed deltas, then an empty final chunk.
    struct ScriptedSource {
        deltas: Vec<&'static str>,
    }

    #[async_trait]
    impl ResponseSource for ScriptedSource {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn chat(&self, model: &str, _prompt: &str, on_chunk: ChunkHandler) -> Result<String, InferenceError> {
            for delta in &self.deltas {
                on_chunk(chunk(model, delta, false));
                tokio::task::yield_now().await;
            }
            on_chunk(chunk(model, "", true));
            Ok(self.deltas.concat())
        }

        async fn models(&self) -> Result<Vec<String>, InferenceError> {
            Ok(vec!["scripted".to_string()])
        }
    }

    /// Streams `count` one-word deltas with `pause` before each.
    struct PacedSource {
        count: usize,
        pause: Duration,
    }

    #[async_trait]
    impl ResponseSource for PacedSource {
        fn name(&self) -> &'static str {
            "paced"
        }

        async fn chat(&self, model: &str, _prompt: &str, on_chunk: ChunkHandler) -> Result<String, InferenceError> {
            for _ in 0..self.count {
                tokio::time::sleep(self.pause).await;
                on_chunk(chunk(model, "word ", false));
            }
            on_chunk(chunk(model, "", true));
            Ok("word ".repeat(self.count))
        }

        async fn models(&self) -> Result<Vec<String>, InferenceError> {
            Ok(vec!["paced".to_string()])
        }
    }

    /// Blocks the calling thread for a while before every id.
    struct SlowIds;

    impl IdSource for SlowIds {
        fn next_id(&self) -> String {
            std::thread::sleep(Duration::from_millis(300));
            uuid::Uuid::new_v4().to_string()
        }
    }

    struct FailingSource;

    #[async_trait]
    impl ResponseSource for FailingSource {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn chat(&self, _: &str, _: &str, _: ChunkHandler) -> Result<String, InferenceError> {
            Err(InferenceError::ServerNotRunning("http://localhost:11434".to_string()))
        }

        async fn models(&self) -> Result<Vec<String>, InferenceError> {
            Err(InferenceError::ServerNotRunning("http://localhost:11434".to_string()))
        }
    }

    struct Harness {
        api: Api,
        listeners: Listeners,
        state: Arc<CoreState>,
    }

    fn harness_with(store: Store, source: Arc<dyn ResponseSource>) -> Harness {
        harness_timed(store, source, DEFAULT_TIMEOUT)
    }

    fn harness_timed(store: Store, source: Arc<dyn ResponseSource>, timeout: Duration) -> Harness {
        let state = Arc::new(CoreState::new(store, source));
        let tree = capabilities(state.clone()).unwrap();
        let dispatcher = Arc::new(Dispatcher::from_tree(&tree).unwrap());
        let listeners = Listeners::default();
        let transport = Arc::new(LocalTransport::with_timeout(
            dispatcher,
            listeners.registry().clone(),
            timeout,
        ));
        Harness {
            api: Api::connect(transport),
            listeners,
            state,
        }
    }

    fn harness(source: Arc<dyn ResponseSource>) -> Harness {
        harness_with(Store::open_in_memory("gemma3:1b"), source)
    }

    fn record_stream(listeners: &Listeners) -> (Arc<Mutex<Vec<StreamChunk>>>, Disposer) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let disposer = listeners
            .stream()
            .on_response(move |chunk| sink.lock().unwrap().push(chunk))
            .data
            .unwrap();
        (seen, disposer)
    }

    fn record_changes(listeners: &Listeners) -> (Arc<Mutex<Vec<DatabaseChange>>>, Disposer) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let disposer = listeners
            .stream()
            .on_database_change(move |change| sink.lock().unwrap().push(change))
            .data
            .unwrap();
        (seen, disposer)
    }

    #[test]
    fn test_tree_matches_shared_shape() {
        let state = Arc::new(CoreState::new(
            Store::open_in_memory("m"),
            Arc::new(StaticSource::new()),
        ));
        let tree = capabilities(state).unwrap();
        assert_eq!(tree.shape(), api::shape());
    }

    #[tokio::test]
    async fn test_generate_into_new_chat() {
        let h = harness(Arc::new(StaticSource::with_response("Hi\n```py\nprint(1)\n```")));
        let (stream, _d1) = record_stream(&h.listeners);
        let (changes, _d2) = record_changes(&h.listeners);

        let env = h.api.ollama().generate("tmp", "hello").await;
        assert_eq!(env.code(), 200);
        let generated = env.data.unwrap();

        let chats = h.api.chats().list().await.data.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].id, generated.chat_id);
        assert_eq!(chats[0].model, "gemma3:1b");

        let history = h.api.messages().get_history(&generated.chat_id).await.data.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!((history[0].role, history[0].content.as_str()), (Role::User, "hello"));
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].id, generated.message_id);
        assert!(history[1].content.contains("<code class=\"py\">print(1)"));
        assert!(history[1].content.ends_with("</code></pre>"));

        let stream = stream.lock().unwrap();
        assert_eq!(stream.len(), 1);
        assert!(stream[0].data.done);
        assert_eq!(stream[0].chat_id, generated.chat_id);
        assert_eq!(stream[0].message_id, generated.message_id);
        assert_eq!(stream[0].data.message.content, history[1].content);

        assert_eq!(
            *changes.lock().unwrap(),
            vec![
                DatabaseChange::new(ChangedEntity::Chat, ChangeKind::Insert),
                DatabaseChange::new(ChangedEntity::Message, ChangeKind::Insert),
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_pushes_raw_deltas_then_rendered_whole() {
        let h = harness(Arc::new(ScriptedSource {
            deltas: vec!["Look:\n", "```rs\n", "let x = 1;\n", "```"],
        }));
        let (stream, _d) = record_stream(&h.listeners);
        let chat = h.api.chats().create().await.data.unwrap().id;

        let env = h.api.ollama().generate(&chat, "show me").await;
        assert_eq!(env.code(), 200);

        let stream = stream.lock().unwrap();
        let contents: Vec<&str> = stream.iter().map(|c| c.data.message.content.as_str()).collect();
        assert_eq!(&contents[..4], &["Look:\n", "```rs\n", "let x = 1;\n", "```"]);
        assert!(stream[..4].iter().all(|c| !c.data.done));

        let last = &stream[4];
        assert!(last.data.done);
        assert!(last.data.message.content.starts_with("Look:\n<pre class=\"rs\">"));
        assert!(last.data.message.content.contains("<code class=\"rs\">let x = 1;"));
    }

    #[tokio::test]
    async fn test_generation_runs_to_completion_after_listener_leaves() {
        // No cancellation: disposing mid-stream only stops delivery.
        let h = harness(Arc::new(ScriptedSource {
            deltas: vec!["one ", "two ", "three"],
        }));
        let delivered = Arc::new(Mutex::new(0usize));
        let slot: Arc<Mutex<Option<Disposer>>> = Arc::default();

        let counter = delivered.clone();
        let own = slot.clone();
        let env = h.listeners.stream().on_response(move |_| {
            *counter.lock().unwrap() += 1;
            if let Some(d) = own.lock().unwrap().take() {
                d.dispose();
            }
        });
        *slot.lock().unwrap() = env.data;

        let generated = h.api.ollama().generate("tmp", "count").await.data.unwrap();
        assert_eq!(*delivered.lock().unwrap(), 1);

        let history = h.state.store.history(&generated.chat_id).unwrap();
        assert_eq!(history[1].content, "one two three");
    }

    #[tokio::test]
    async fn test_generate_for_unknown_chat_is_404() {
        let h = harness(Arc::new(StaticSource::new()));
        let env = h.api.ollama().generate("missing", "hello").await;
        assert_eq!(env.code(), 404);
        assert!(h.api.chats().list().await.data.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inference_failure_is_500_and_stores_nothing() {
        let h = harness(Arc::new(FailingSource));
        let chat = h.api.chats().create().await.data.unwrap().id;

        let env = h.api.ollama().generate(&chat, "hello").await;
        assert_eq!(env.code(), 500);
        assert!(env.error_message().unwrap().contains("not running"));
        assert!(h.api.messages().get_history(&chat).await.data.unwrap().is_empty());

        assert_eq!(h.api.ollama().models().await.code(), 500);
    }

    #[tokio::test]
    async fn test_delete_cascades_and_notifies() {
        let h = harness(Arc::new(StaticSource::new()));
        let generated = h.api.ollama().generate("tmp", "hello").await.data.unwrap();
        let (changes, _d) = record_changes(&h.listeners);

        let env = h.api.chats().delete(&generated.chat_id).await;
        assert_eq!(env.code(), 200);
        assert_eq!(
            *changes.lock().unwrap(),
            vec![DatabaseChange::new(ChangedEntity::Chat, ChangeKind::Delete)]
        );

        assert_eq!(h.api.messages().get_history(&generated.chat_id).await.code(), 404);
        assert_eq!(h.api.chats().delete(&generated.chat_id).await.code(), 404);
    }

    #[tokio::test]
    async fn test_append_and_reject_bad_role() {
        let h = harness(Arc::new(StaticSource::new()));
        let chat = h.api.chats().create().await.data.unwrap().id;

        let env = h
            .api
            .messages()
            .append(NewMessage {
                chat_id: chat.clone(),
                role: Role::System,
                content: "be brief".to_string(),
            })
            .await;
        assert_eq!(env.code(), 200);

        let leaf = h.api.proxy().root().resolve("messages.append").unwrap();
        let env = leaf
            .call(vec![json!({"chat_id": chat.clone(), "role": "robot", "content": "x"})])
            .await;
        assert_eq!(env.code(), 400);

        let history = h.api.messages().get_history(&chat).await.data.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::System);
    }

    #[tokio::test]
    async fn test_models_from_source() {
        let h = harness(Arc::new(StaticSource::new()));
        assert_eq!(h.api.ollama().models().await.data, Some(vec!["static".to_string()]));
    }

    #[tokio::test]
    async fn test_unavailable_database_is_500() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let h = harness_with(
            Store::open(&blocker.join("chat.sqlite"), "m"),
            Arc::new(StaticSource::new()),
        );

        let env = h.api.chats().list().await;
        assert_eq!(env.code(), 500);
        assert!(env.error_message().unwrap().contains("unavailable"));
        assert_eq!(h.api.ollama().generate("tmp", "hi").await.code(), 500);
    }

    #[tokio::test]
    async fn test_generation_longer_than_timeout_succeeds_while_streaming() {
        // 6 x 40ms of streaming against a 100ms inactivity limit
        let h = harness_timed(
            Store::open_in_memory("m"),
            Arc::new(PacedSource {
                count: 6,
                pause: Duration::from_millis(40),
            }),
            Duration::from_millis(100),
        );
        let (stream, _d) = record_stream(&h.listeners);

        let env = h.api.ollama().generate("tmp", "take your time").await;
        assert_eq!(env.code(), 200);
        let generated = env.data.unwrap();

        assert_eq!(stream.lock().unwrap().len(), 7);
        let history = h.api.messages().get_history(&generated.chat_id).await.data.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emitted_generation_finishes_before_server_returns() {
        let state = Arc::new(CoreState::new(
            Store::open_in_memory("m"),
            Arc::new(PacedSource {
                count: 1,
                pause: Duration::from_secs(7),
            }),
        ));
        let dispatcher = Arc::new(Dispatcher::from_tree(&capabilities(state.clone()).unwrap()).unwrap());

        let input: &[u8] = b"{\"endpoint\":\"on-api:ollama.generate\",\"args\":[\"tmp\",\"hi\"]}\n";
        server::serve(dispatcher, input, tokio::io::sink(), "test").await.unwrap();

        let chats = state.store.list_chats().unwrap();
        assert_eq!(chats.len(), 1);
        let history = state.store.history(&chats[0].id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "word ");
    }

    #[tokio::test]
    async fn test_store_calls_leave_runtime_free() {
        let state = Arc::new(CoreState::new(
            Store::open_in_memory("m").with_id_source(Arc::new(SlowIds)),
            Arc::new(StaticSource::new()),
        ));
        let (publisher, _frames) = events::channel();
        let caller = Caller::new("test", publisher);

        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let ticker = tokio::spawn(async move {
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(20)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let env = chats::handle_create(&state, &caller).await;
        assert_eq!(env.code(), 200);
        assert!(ticks.load(Ordering::SeqCst) >= 3);
        ticker.await.unwrap();
    }
}
