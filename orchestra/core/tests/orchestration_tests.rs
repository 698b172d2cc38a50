//! Orchestration integration tests
//!
//! Drive the public API end to end with scripted responders and the
//! in-memory message store. Time-dependent tests run on a paused clock.
//! Covers:
//! - Partial failure across three responders
//! - Run-wide and per-session cancellation
//! - Timeouts against stalled backends
//! - Up-front rejection with zero side effects
//! - Network commands, enabled and disabled
//! - Store failures and panicking adapters

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use orchestra_core::{
    collect, AdapterError, ChannelReporter, ChunkSender, Classification, ConversationId,
    DirectOutcome, ErrorReport, FinalPayload, InMemoryMessageStore, MessageRef, MessageRole,
    MessageStore, NetworkCommandKind, OrchestrationHandle, Orchestrator, OrchestratorConfig,
    OrchestratorError, ProviderKind, Request, Responder, ResponderConfig, ResponderId,
    ResponderRegistry, ScriptOutcome, ScriptedResponder, SessionSnapshot, SessionState,
    StoreError, TokenUsage,
};
use orchestra_core::responder::OpenAiResponder;

// =============================================================================
// Fixtures
// =============================================================================

struct Fixture {
    orchestrator: Orchestrator,
    store: Arc<InMemoryMessageStore>,
    reports: mpsc::UnboundedReceiver<ErrorReport>,
}

fn shared(responder: impl Responder + 'static) -> Arc<dyn Responder> {
    Arc::new(responder)
}

fn model(id: &str) -> ResponderConfig {
    ResponderConfig::model(id, ProviderKind::Ollama, "llama3.2")
}

fn build(
    responders: Vec<(ResponderConfig, Arc<dyn Responder>)>,
    config: OrchestratorConfig,
    store: Arc<InMemoryMessageStore>,
    store_view: Arc<dyn MessageStore>,
) -> Fixture {
    let mut registry = ResponderRegistry::new();
    for (config, adapter) in responders {
        registry.insert(config, adapter);
    }
    let (reporter, reports) = ChannelReporter::new();
    Fixture {
        orchestrator: Orchestrator::new(registry, store_view, Arc::new(reporter), config),
        store,
        reports,
    }
}

fn fixture(responders: Vec<(ResponderConfig, Arc<dyn Responder>)>) -> Fixture {
    fixture_with(responders, OrchestratorConfig::default())
}

fn fixture_with(
    responders: Vec<(ResponderConfig, Arc<dyn Responder>)>,
    config: OrchestratorConfig,
) -> Fixture {
    let store = Arc::new(InMemoryMessageStore::new());
    let view: Arc<dyn MessageStore> = Arc::clone(&store) as Arc<dyn MessageStore>;
    build(responders, config, store, view)
}

fn conversation() -> ConversationId {
    ConversationId::new("conv")
}

fn ask(text: &str, ids: &[&str]) -> Request {
    ids.iter()
        .fold(Request::new(conversation(), text), |r, id| r.with_responder(*id))
}

async fn drain(handle: &mut OrchestrationHandle) -> Vec<SessionSnapshot> {
    let mut updates = Vec::new();
    while let Some(update) = handle.next_update().await {
        updates.push(update);
    }
    updates
}

/// Every session's terminal snapshot is its last, and revisions only grow
fn assert_well_ordered(updates: &[SessionSnapshot]) {
    let mut terminal = HashSet::new();
    let mut last_revision = 0;
    for update in updates {
        assert!(update.revision > last_revision, "revisions must increase");
        last_revision = update.revision;
        assert!(
            !terminal.contains(&update.session_id),
            "update after terminal state for {}",
            update.session_id
        );
        if update.is_terminal() {
            terminal.insert(update.session_id);
        }
    }
}

/// Echoes the (possibly rewritten) request text
struct EchoResponder;

#[async_trait]
impl Responder for EchoResponder {
    fn name(&self) -> &str {
        "echo"
    }

    async fn stream(
        &self,
        request: &Request,
        chunks: ChunkSender,
        _cancel: CancellationToken,
    ) -> Result<FinalPayload, AdapterError> {
        chunks.send(request.text.clone()).await?;
        Ok(FinalPayload::text(request.text.clone()))
    }
}

/// Store that refuses placeholders after a number of successful ones
struct FlakyStore {
    inner: Arc<InMemoryMessageStore>,
    allowed: usize,
    created: AtomicUsize,
}

impl MessageStore for FlakyStore {
    fn create_placeholder(
        &self,
        conversation_id: &ConversationId,
        responder: &ResponderId,
    ) -> Result<MessageRef, StoreError> {
        if self.created.fetch_add(1, Ordering::SeqCst) >= self.allowed {
            return Err(StoreError::Unavailable("disk full".to_string()));
        }
        self.inner.create_placeholder(conversation_id, responder)
    }

    fn patch_content(
        &self,
        message: &MessageRef,
        text: &str,
        in_progress: bool,
    ) -> Result<(), StoreError> {
        self.inner.patch_content(message, text, in_progress)
    }

    fn finalize(
        &self,
        message: &MessageRef,
        text: &str,
        token_count: u32,
        cost: f64,
    ) -> Result<(), StoreError> {
        self.inner.finalize(message, text, token_count, cost)
    }

    fn delete(&self, message: &MessageRef) -> Result<(), StoreError> {
        self.inner.delete(message)
    }
}

/// Store that accepts placeholders and patches but rejects every final write
struct RejectingFinalizeStore {
    inner: Arc<InMemoryMessageStore>,
}

impl MessageStore for RejectingFinalizeStore {
    fn create_placeholder(
        &self,
        conversation_id: &ConversationId,
        responder: &ResponderId,
    ) -> Result<MessageRef, StoreError> {
        self.inner.create_placeholder(conversation_id, responder)
    }

    fn patch_content(
        &self,
        message: &MessageRef,
        text: &str,
        in_progress: bool,
    ) -> Result<(), StoreError> {
        self.inner.patch_content(message, text, in_progress)
    }

    fn finalize(
        &self,
        _message: &MessageRef,
        _text: &str,
        _token_count: u32,
        _cost: f64,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disk full".to_string()))
    }

    fn delete(&self, message: &MessageRef) -> Result<(), StoreError> {
        self.inner.delete(message)
    }
}

// =============================================================================
// Model Path
// =============================================================================

#[tokio::test]
async fn test_single_responder_streams_and_finalizes() {
    let mut fx = fixture(vec![(
        model("a").with_cost_per_token(0.5),
        shared(ScriptedResponder::new("a", ["Hel", "lo"]).with_usage(TokenUsage {
            prompt_tokens: 3,
            completion_tokens: 7,
        })),
    )]);

    let mut handle = fx.orchestrator.submit(ask("hello", &["a"])).await.unwrap();
    let updates = drain(&mut handle).await;
    let summary = handle.wait().await;

    assert_well_ordered(&updates);
    let states: Vec<SessionState> = updates.iter().map(|u| u.state).collect();
    assert_eq!(
        states,
        vec![
            SessionState::Pending,
            SessionState::Streaming,
            SessionState::Streaming,
            SessionState::Completed,
        ]
    );
    let chunks: Vec<&str> = updates
        .iter()
        .filter_map(|u| u.latest_chunk.as_deref())
        .collect();
    assert_eq!(chunks, vec!["Hel", "lo"]);

    let session = &summary.sessions[0];
    assert_eq!(session.state(), SessionState::Completed);
    assert_eq!(session.content(), "Hello");
    assert_eq!(session.token_count(), Some(7));

    let messages = fx.store.messages(&conversation());
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "Hello");
    assert_eq!(messages[0].role, MessageRole::Assistant);
    assert!(!messages[0].in_progress);
    assert_eq!(messages[0].token_count, Some(7));
    assert_eq!(messages[0].cost, Some(3.5));
    assert!(fx.reports.try_recv().is_err());
}

#[tokio::test]
async fn test_partial_failure_three_responders() {
    let mut fx = fixture(vec![
        (model("a"), shared(ScriptedResponder::new("a", ["alpha"]))),
        (
            model("b"),
            shared(
                ScriptedResponder::new("b", ["partial"])
                    .with_outcome(ScriptOutcome::Fail(AdapterError::RateLimited)),
            ),
        ),
        (model("c"), shared(ScriptedResponder::new("c", ["gam", "ma"]))),
    ]);

    let mut handle = fx
        .orchestrator
        .submit(ask("compare", &["a", "b", "c"]))
        .await
        .unwrap();
    let updates = drain(&mut handle).await;
    let summary = handle.wait().await;

    assert_well_ordered(&updates);
    assert_eq!(summary.completed_count(), 2);
    assert_eq!(summary.failed_count(), 1);
    assert!(summary.is_partial_failure());

    let ids: Vec<&str> = summary
        .sessions
        .iter()
        .map(|s| s.responder().id.as_str())
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(summary.sessions[0].content(), "alpha");
    assert_eq!(summary.sessions[2].content(), "gamma");
    assert_eq!(summary.sessions[1].error(), Some(&AdapterError::RateLimited));
    // Failed sessions keep what they streamed for diagnostics
    assert_eq!(summary.sessions[1].content(), "partial");

    let messages = fx.store.messages(&conversation());
    let owners: Vec<Option<&str>> = messages
        .iter()
        .map(|m| m.responder_id.as_ref().map(ResponderId::as_str))
        .collect();
    assert_eq!(owners, vec![Some("a"), Some("c")]);

    assert_eq!(
        fx.reports.try_recv().ok(),
        Some(ErrorReport {
            responder: ResponderId::from("b"),
            error: AdapterError::RateLimited,
        })
    );
    assert!(fx.reports.try_recv().is_err());
}

#[tokio::test]
async fn test_final_payload_overrides_streamed_text() {
    let fx = fixture(vec![(
        model("a"),
        shared(
            ScriptedResponder::new("a", ["draft ", "text"])
                .with_outcome(ScriptOutcome::CompleteWith("final text".to_string())),
        ),
    )]);

    let handle = fx.orchestrator.submit(ask("hi", &["a"])).await.unwrap();
    let summary = handle.wait().await;

    assert_eq!(summary.sessions[0].content(), "final text");
    assert_eq!(summary.sessions[0].chunk_count(), 2);
    // No usage reported, so the token count stays unknown
    assert_eq!(summary.sessions[0].token_count(), None);
    assert_eq!(fx.store.messages(&conversation())[0].content, "final text");
}

#[tokio::test]
async fn test_non_streaming_responder_starts_streaming_immediately() {
    let fx = fixture(vec![(
        model("svc"),
        shared(ScriptedResponder::new("svc", ["whole answer"]).non_streaming()),
    )]);

    let mut handle = fx.orchestrator.submit(ask("hi", &["svc"])).await.unwrap();
    let updates = drain(&mut handle).await;

    assert_eq!(updates[0].state, SessionState::Pending);
    assert_eq!(updates[1].state, SessionState::Streaming);
    assert_eq!(updates[1].latest_chunk, None);
    assert_eq!(updates.last().map(|u| u.state), Some(SessionState::Completed));
}

#[tokio::test]
async fn test_empty_response_completes_through_streaming() {
    let fx = fixture(vec![(
        model("quiet"),
        shared(ScriptedResponder::new("quiet", Vec::<String>::new())),
    )]);

    let handle = fx.orchestrator.submit(ask("hi", &["quiet"])).await.unwrap();
    let summary = handle.wait().await;

    assert_eq!(summary.sessions[0].state(), SessionState::Completed);
    assert_eq!(summary.sessions[0].content(), "");
    assert_eq!(summary.sessions[0].token_count(), None);
}

#[tokio::test]
async fn test_slash_command_is_expanded() {
    let fx = fixture(vec![(model("echo"), shared(EchoResponder))]);

    let handle = fx
        .orchestrator
        .submit(ask("/summarize please", &["echo"]))
        .await
        .unwrap();
    assert!(matches!(
        handle.classification(),
        Classification::SlashCommand { .. }
    ));
    let summary = handle.wait().await;

    let content = summary.sessions[0].content();
    assert!(content.starts_with("Summarize"));
    assert!(content.ends_with("please"));
}

#[tokio::test]
async fn test_slash_command_passthrough_when_disabled() {
    let mut config = OrchestratorConfig::default();
    config.features.slash_commands = false;
    let fx = fixture_with(vec![(model("echo"), shared(EchoResponder))], config);

    let summary = fx
        .orchestrator
        .submit(ask("/summarize please", &["echo"]))
        .await
        .unwrap()
        .wait()
        .await;

    assert_eq!(summary.sessions[0].content(), "/summarize please");
}

#[tokio::test]
async fn test_unknown_slash_command_goes_to_model() {
    let fx = fixture(vec![(model("echo"), shared(EchoResponder))]);

    let handle = fx
        .orchestrator
        .submit(ask("/unknownCmd foo", &["echo"]))
        .await
        .unwrap();
    assert_eq!(
        handle.classification(),
        &Classification::ModelQuery {
            text: "/unknownCmd foo".to_string()
        }
    );
    assert_eq!(handle.wait().await.sessions[0].content(), "/unknownCmd foo");
}

// =============================================================================
// Cancellation and Timeouts
// =============================================================================

fn slow(id: &str) -> Arc<dyn Responder> {
    let chunks: Vec<String> = (0..100).map(|i| format!("{id}{i} ")).collect();
    Arc::new(ScriptedResponder::new(id, chunks).with_delay(Duration::from_millis(10)))
}

#[tokio::test(start_paused = true)]
async fn test_cancel_run_cancels_every_session() {
    let mut fx = fixture(vec![(model("a"), slow("a")), (model("b"), slow("b"))]);

    let mut handle = fx.orchestrator.submit(ask("race", &["a", "b"])).await.unwrap();

    let mut streaming = HashSet::new();
    let mut updates = Vec::new();
    while streaming.len() < 2 {
        let update = handle.next_update().await.unwrap();
        if update.state == SessionState::Streaming {
            streaming.insert(update.session_id);
        }
        updates.push(update);
    }

    let cancelled_at = tokio::time::Instant::now();
    handle.cancel();
    updates.extend(drain(&mut handle).await);
    let summary = handle.wait().await;

    assert!(cancelled_at.elapsed() <= OrchestratorConfig::default().cancel_grace);
    assert_well_ordered(&updates);
    assert_eq!(summary.cancelled_count(), 2);
    assert!(summary.sessions.iter().all(|s| s.chunk_count() < 100));
    assert!(fx.store.is_empty());
    // Cancellation is silent
    assert!(fx.reports.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_one_session_leaves_sibling_running() {
    let fx = fixture(vec![
        (model("a"), slow("a")),
        (
            model("b"),
            shared(ScriptedResponder::new("b", ["fast"]).with_delay(Duration::from_millis(50))),
        ),
    ]);

    let handle = fx.orchestrator.submit(ask("race", &["a", "b"])).await.unwrap();
    let ids = handle.session_ids();
    assert!(handle.cancel_session(&ids[0]));
    assert!(!handle.cancel_session(&orchestra_core::SessionId::new()));

    let summary = handle.wait().await;
    assert_eq!(summary.sessions[0].state(), SessionState::Cancelled);
    assert_eq!(summary.sessions[1].state(), SessionState::Completed);

    let messages = fx.store.messages(&conversation());
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "fast");
}

#[tokio::test(start_paused = true)]
async fn test_cancel_grace_drops_unresponsive_adapter() {
    let config = OrchestratorConfig {
        cancel_grace: Duration::from_millis(200),
        ..OrchestratorConfig::default()
    };
    let stalled = ScriptedResponder::new("stuck", ["first"]).with_outcome(ScriptOutcome::Stall);
    let fx = fixture_with(vec![(model("stuck"), shared(stalled))], config);

    let mut handle = fx.orchestrator.submit(ask("hi", &["stuck"])).await.unwrap();
    while let Some(update) = handle.next_update().await {
        if update.latest_chunk.is_some() {
            break;
        }
    }

    let started = tokio::time::Instant::now();
    handle.cancel();
    let summary = handle.wait().await;

    assert_eq!(summary.sessions[0].state(), SessionState::Cancelled);
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(started.elapsed() < Duration::from_millis(300));
    assert!(fx.store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_against_stalled_backend() {
    let stalled = ScriptedResponder::new("stuck", Vec::<String>::new())
        .with_outcome(ScriptOutcome::Stall);
    let mut fx = fixture(vec![(
        model("stuck").with_timeout(Duration::from_secs(1)),
        shared(stalled),
    )]);

    let started = tokio::time::Instant::now();
    let mut handle = fx.orchestrator.submit(ask("hi", &["stuck"])).await.unwrap();
    let updates = drain(&mut handle).await;
    let summary = handle.wait().await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1100));

    // Pending → Failed without passing through Streaming
    let states: Vec<SessionState> = updates.iter().map(|u| u.state).collect();
    assert_eq!(states, vec![SessionState::Pending, SessionState::Failed]);
    assert_eq!(summary.sessions[0].error(), Some(&AdapterError::Timeout));
    assert!(fx.store.is_empty());
    assert_eq!(
        fx.reports.try_recv().ok().map(|r| r.error),
        Some(AdapterError::Timeout)
    );

    let metrics = fx
        .orchestrator
        .metrics()
        .summary(&ResponderId::from("stuck"))
        .unwrap();
    assert_eq!(metrics.failed, 1);
    assert_eq!(metrics.timeouts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout_takes_priority() {
    let stalled = ScriptedResponder::new("stuck", Vec::<String>::new())
        .with_outcome(ScriptOutcome::Stall);
    let fx = fixture(vec![(
        model("stuck").with_timeout(Duration::from_secs(30)),
        shared(stalled),
    )]);

    let started = tokio::time::Instant::now();
    let summary = fx
        .orchestrator
        .submit(ask("hi", &["stuck"]).with_timeout(Duration::from_millis(250)))
        .await
        .unwrap()
        .wait()
        .await;

    assert_eq!(summary.sessions[0].error(), Some(&AdapterError::Timeout));
    assert!(started.elapsed() < Duration::from_secs(1));
}

// =============================================================================
// Up-front Rejection
// =============================================================================

#[tokio::test]
async fn test_config_missing_has_no_side_effects() {
    let known = ScriptedResponder::new("a", ["x"]);
    let calls = known.call_counter();
    let fx = fixture(vec![(model("a"), shared(known))]);

    let result = fx.orchestrator.submit(ask("hi", &["a", "ghost"])).await;

    assert!(matches!(result, Err(OrchestratorError::ConfigMissing(_))));
    assert!(fx.store.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_store_failure_rolls_back_placeholders() {
    let known = ScriptedResponder::new("a", ["x"]);
    let calls = known.call_counter();
    let store = Arc::new(InMemoryMessageStore::new());
    let flaky: Arc<dyn MessageStore> = Arc::new(FlakyStore {
        inner: Arc::clone(&store),
        allowed: 1,
        created: AtomicUsize::new(0),
    });
    let fx = build(
        vec![
            (model("a"), shared(known)),
            (model("b"), shared(ScriptedResponder::new("b", ["y"]))),
        ],
        OrchestratorConfig::default(),
        store,
        flaky,
    );

    let result = fx.orchestrator.submit(ask("hi", &["a", "b"])).await;

    assert!(matches!(
        result,
        Err(OrchestratorError::Store(StoreError::Unavailable(_)))
    ));
    assert!(fx.store.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rejected_final_write_fails_the_session() {
    let store = Arc::new(InMemoryMessageStore::new());
    let rejecting: Arc<dyn MessageStore> = Arc::new(RejectingFinalizeStore {
        inner: Arc::clone(&store),
    });
    let mut fx = build(
        vec![(model("a"), shared(ScriptedResponder::new("a", ["Hel", "lo"])))],
        OrchestratorConfig::default(),
        store,
        rejecting,
    );

    let mut handle = fx.orchestrator.submit(ask("hi", &["a"])).await.unwrap();
    let updates = drain(&mut handle).await;
    let summary = handle.wait().await;

    assert_well_ordered(&updates);
    assert_eq!(summary.sessions[0].state(), SessionState::Failed);
    assert!(matches!(
        summary.sessions[0].error(),
        Some(AdapterError::Unknown(detail)) if detail.contains("disk full")
    ));
    assert_eq!(
        updates.last().map(|u| u.state),
        Some(SessionState::Failed)
    );
    assert_eq!(summary.failed_count(), 1);

    // Placeholder is removed rather than left half-written
    assert!(fx.store.is_empty());
    assert_eq!(
        fx.reports.try_recv().ok().map(|r| r.responder),
        Some(ResponderId::from("a"))
    );

    let failed: HashMap<String, u64> = fx
        .orchestrator
        .metrics()
        .summaries()
        .into_iter()
        .map(|s| (s.responder_id.0, s.failed))
        .collect();
    assert_eq!(failed.get("a"), Some(&1));
}

#[tokio::test]
async fn test_provider_error_mid_stream_fails_the_session() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"error\":{\"message\":\"overloaded\"}}\n\n",
        ))
        .create_async()
        .await;

    let mut fx = fixture(vec![(
        ResponderConfig::model("gpt", ProviderKind::OpenAi, "gpt-4o"),
        shared(OpenAiResponder::new(server.url(), "sk", "gpt-4o").unwrap()),
    )]);

    let mut handle = fx.orchestrator.submit(ask("hi", &["gpt"])).await.unwrap();
    let updates = drain(&mut handle).await;
    let summary = handle.wait().await;

    assert_well_ordered(&updates);
    assert!(updates
        .iter()
        .any(|u| u.latest_chunk.as_deref() == Some("Hel")));
    assert_eq!(summary.sessions[0].state(), SessionState::Failed);
    assert_eq!(
        summary.sessions[0].error(),
        Some(&AdapterError::ProviderUnavailable("overloaded".to_string()))
    );
    assert!(fx.store.is_empty());
    assert_eq!(
        fx.reports.try_recv().ok().map(|r| r.responder),
        Some(ResponderId::from("gpt"))
    );
}

// =============================================================================
// Panic Isolation
// =============================================================================

#[tokio::test]
async fn test_panicking_adapter_fails_only_its_session() {
    let mut fx = fixture(vec![
        (
            model("boom"),
            shared(ScriptedResponder::new("boom", ["x"]).with_outcome(ScriptOutcome::Panic)),
        ),
        (model("ok"), shared(ScriptedResponder::new("ok", ["fine"]))),
    ]);

    let mut handle = fx
        .orchestrator
        .submit(ask("hi", &["boom", "ok"]))
        .await
        .unwrap();
    let updates = drain(&mut handle).await;
    let summary = handle.wait().await;

    assert_well_ordered(&updates);
    assert_eq!(summary.sessions[0].state(), SessionState::Failed);
    assert!(matches!(
        summary.sessions[0].error(),
        Some(AdapterError::Unknown(detail)) if detail.contains("panicked")
    ));
    assert_eq!(summary.sessions[1].state(), SessionState::Completed);

    let messages = fx.store.messages(&conversation());
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "fine");
    assert_eq!(
        fx.reports.try_recv().ok().map(|r| r.responder),
        Some(ResponderId::from("boom"))
    );
}

// =============================================================================
// Network Commands
// =============================================================================

fn weather_service(adapter: ScriptedResponder) -> (ResponderConfig, Arc<dyn Responder>) {
    (
        ResponderConfig::network_service(
            "weather",
            NetworkCommandKind::Weather,
            "http://weather.invalid",
        ),
        shared(adapter.non_streaming()),
    )
}

#[tokio::test]
async fn test_network_command_writes_one_message() {
    let fx = fixture(vec![weather_service(ScriptedResponder::new(
        "weather",
        ["Beijing: sunny, 21°C"],
    ))]);

    let mut handle = fx
        .orchestrator
        .submit(Request::new(conversation(), "天气 北京"))
        .await
        .unwrap();

    assert!(handle.session_ids().is_empty());
    assert!(handle.next_update().await.is_none());
    let summary = handle.wait().await;
    assert_eq!(
        summary.classification,
        Classification::NetworkCommand {
            kind: NetworkCommandKind::Weather,
            query: "北京".to_string(),
        }
    );

    let (text, message) = match summary.direct {
        Some(DirectOutcome::Answered { text, message, .. }) => (text, message),
        other => panic!("expected an answer, got {other:?}"),
    };
    assert_eq!(text, "Beijing: sunny, 21°C");
    let stored = fx.store.get(&message).unwrap();
    assert_eq!(stored.content, text);
    assert!(!stored.in_progress);
    assert_eq!(fx.store.len(), 1);
}

#[tokio::test]
async fn test_network_command_disabled_writes_notice() {
    let service = ScriptedResponder::new("weather", ["never"]);
    let calls = service.call_counter();
    let mut config = OrchestratorConfig::default();
    config.features.weather = false;
    let fx = fixture_with(vec![weather_service(service)], config);

    let summary = fx
        .orchestrator
        .submit(Request::new(conversation(), "weather Paris"))
        .await
        .unwrap()
        .wait()
        .await;

    assert!(matches!(
        summary.direct,
        Some(DirectOutcome::Disabled {
            kind: NetworkCommandKind::Weather,
            ..
        })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let messages = fx.store.messages(&conversation());
    assert_eq!(messages.len(), 1);
    assert!(messages[0].content.contains("disabled"));
}

#[tokio::test]
async fn test_network_command_failure_is_reported() {
    let mut fx = fixture(vec![weather_service(
        ScriptedResponder::new("weather", Vec::<String>::new()).with_outcome(ScriptOutcome::Fail(
            AdapterError::ProviderUnavailable("503".to_string()),
        )),
    )]);

    let summary = fx
        .orchestrator
        .submit(Request::new(conversation(), "weather Paris"))
        .await
        .unwrap()
        .wait()
        .await;

    assert!(matches!(summary.direct, Some(DirectOutcome::Failed { .. })));
    assert!(fx.store.is_empty());
    assert_eq!(
        fx.reports.try_recv().ok().map(|r| r.responder),
        Some(ResponderId::from("weather"))
    );
}

// =============================================================================
// Metrics
// =============================================================================

#[tokio::test]
async fn test_metrics_are_idempotent_and_aggregated() {
    let fx = fixture(vec![(
        model("a").with_cost_per_token(0.25),
        shared(
            ScriptedResponder::new("a", ["one ", "two"])
                .with_usage(TokenUsage {
                    prompt_tokens: 1,
                    completion_tokens: 4,
                }),
        ),
    )]);

    let summary = fx
        .orchestrator
        .submit(ask("hi", &["a"]))
        .await
        .unwrap()
        .wait()
        .await;

    let session = &summary.sessions[0];
    let first = collect(session).unwrap();
    let second = collect(session).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.token_count, 4);
    assert!((first.cost - 1.0).abs() < f64::EPSILON);

    let by_responder: HashMap<String, u64> = fx
        .orchestrator
        .metrics()
        .summaries()
        .into_iter()
        .map(|s| (s.responder_id.0, s.completed))
        .collect();
    assert_eq!(by_responder.get("a"), Some(&1));
}
