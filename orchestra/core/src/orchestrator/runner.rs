//! Session Runner
//!
//! Drives one [`StreamSession`] from Pending to a terminal state: launches
//! the adapter call, applies fragments in order, patches the placeholder
//! message, and enforces the timeout and cancellation grace.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::metrics::MetricsRegistry;
use crate::report::ErrorReporter;
use crate::request::Request;
use crate::responder::{AdapterError, ChunkSender, FinalPayload, Responder};
use crate::session::{SessionSnapshot, SessionState, StreamSession};
use crate::store::{MessageRef, MessageStore};

// ============================================================================
// Update Publishing
// ============================================================================

struct PublisherState {
    revision: u64,
    tx: mpsc::UnboundedSender<SessionSnapshot>,
}

/// Stamps snapshots with the run-wide revision and sends them in that order
pub(crate) struct Publisher {
    state: Mutex<PublisherState>,
}

impl Publisher {
    pub(crate) fn new(tx: mpsc::UnboundedSender<SessionSnapshot>) -> Self {
        Self {
            state: Mutex::new(PublisherState { revision: 0, tx }),
        }
    }

    pub(crate) fn publish(&self, session: &StreamSession, latest_chunk: Option<String>) {
        let mut state = self.state.lock();
        state.revision += 1;
        let snapshot = session.snapshot(state.revision, latest_chunk);
        // Observers may stop listening at any time
        let _ = state.tx.send(snapshot);
    }
}

// ============================================================================
// Run Context
// ============================================================================

/// State shared by every session of one run
pub(crate) struct RunContext {
    pub(crate) run_id: Uuid,
    pub(crate) store: Arc<dyn MessageStore>,
    pub(crate) reporter: Arc<dyn ErrorReporter>,
    pub(crate) metrics: Arc<MetricsRegistry>,
    pub(crate) publisher: Publisher,
    pub(crate) chunk_buffer: usize,
    pub(crate) cancel_grace: Duration,
    pub(crate) patch_throttle: Duration,
}

/// Everything one session task owns
pub(crate) struct SessionJob {
    pub(crate) session: StreamSession,
    pub(crate) message: MessageRef,
    pub(crate) adapter: Arc<dyn Responder>,
    pub(crate) request: Arc<Request>,
    pub(crate) timeout: Duration,
    pub(crate) cancel: CancellationToken,
}

enum Outcome {
    Completed(FinalPayload),
    Failed(AdapterError),
    Cancelled,
}

/// Coalesces in-progress store patches to one per interval
struct PatchThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl PatchThrottle {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    fn ready(&mut self) -> bool {
        if self.interval.is_zero() {
            return true;
        }
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

// ============================================================================
// Session Task
// ============================================================================

fn apply_chunk(
    ctx: &RunContext,
    session: &mut StreamSession,
    message: &MessageRef,
    throttle: &mut PatchThrottle,
    chunk: String,
) {
    if let Err(e) = session.append_chunk(&chunk) {
        tracing::warn!(session_id = %session.id(), error = %e, "Dropping fragment");
        return;
    }

    if throttle.ready() {
        if let Err(e) = ctx.store.patch_content(message, session.content(), true) {
            tracing::warn!(
                session_id = %session.id(),
                message = %message,
                error = %e,
                "Failed to patch placeholder message"
            );
        }
    }
    ctx.publisher.publish(session, Some(chunk));
}

/// Run one session to its terminal state and return it
pub(crate) async fn drive_session(ctx: Arc<RunContext>, job: SessionJob) -> StreamSession {
    let SessionJob {
        mut session,
        message,
        adapter,
        request,
        timeout,
        cancel,
    } = job;

    ctx.metrics.record_start(&session.responder().id);

    if !adapter.is_streaming() && session.begin_streaming().is_ok() {
        ctx.publisher.publish(&session, None);
    }

    let (tx, mut chunk_rx) = mpsc::channel::<String>(ctx.chunk_buffer);
    let adapter_cancel = cancel.child_token();
    let call = tokio::time::timeout(
        timeout,
        adapter.stream(&request, ChunkSender::new(tx), adapter_cancel.clone()),
    );
    tokio::pin!(call);

    let mut throttle = PatchThrottle::new(ctx.patch_throttle);

    let (outcome, call_pending) = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break (Outcome::Cancelled, true),

            Some(chunk) = chunk_rx.recv() => {
                apply_chunk(&ctx, &mut session, &message, &mut throttle, chunk);
            }

            result = &mut call => {
                while let Ok(chunk) = chunk_rx.try_recv() {
                    apply_chunk(&ctx, &mut session, &message, &mut throttle, chunk);
                }
                let outcome = match result {
                    Ok(Ok(payload)) => Outcome::Completed(payload),
                    Ok(Err(AdapterError::Cancelled)) => Outcome::Cancelled,
                    Ok(Err(e)) => Outcome::Failed(e),
                    Err(_) => {
                        tracing::debug!(
                            session_id = %session.id(),
                            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                            "Adapter call timed out"
                        );
                        adapter_cancel.cancel();
                        Outcome::Failed(AdapterError::Timeout)
                    }
                };
                break (outcome, false);
            }
        }
    };

    if call_pending {
        // Fragments still in flight are never applied
        drop(chunk_rx);
        if tokio::time::timeout(ctx.cancel_grace, &mut call)
            .await
            .is_err()
        {
            tracing::debug!(
                session_id = %session.id(),
                "Adapter ignored cancellation, dropping call"
            );
        }
    }

    finish(&ctx, &mut session, &message, outcome);
    session
}

fn finish(ctx: &RunContext, session: &mut StreamSession, message: &MessageRef, outcome: Outcome) {
    let outcome = match outcome {
        Outcome::Completed(payload) => complete(ctx, session, message, payload),
        other => other,
    };

    match outcome {
        Outcome::Completed(_) => {}
        Outcome::Failed(error) => {
            tracing::warn!(
                run_id = %ctx.run_id,
                session_id = %session.id(),
                responder = %session.responder().id,
                kind = error.kind(),
                "Session failed: {error}"
            );
            ctx.reporter.report(&session.responder().id, &error);
            if let Err(e) = session.fail(error) {
                tracing::warn!(session_id = %session.id(), error = %e, "Cannot fail session");
            }
            remove_placeholder(ctx, session, message);
        }
        Outcome::Cancelled => {
            if let Err(e) = session.cancel() {
                tracing::warn!(session_id = %session.id(), error = %e, "Cannot cancel session");
            }
            remove_placeholder(ctx, session, message);
        }
    }

    ctx.metrics.record_session(session);
    ctx.publisher.publish(session, None);
}

/// Complete the session only once the final text is durably written
///
/// A rejected final write turns the outcome into a failure, so the
/// placeholder is removed instead of left half-written.
fn complete(
    ctx: &RunContext,
    session: &mut StreamSession,
    message: &MessageRef,
    payload: FinalPayload,
) -> Outcome {
    let mut completed = session.clone();
    if completed.state() == SessionState::Pending {
        let _ = completed.begin_streaming();
    }
    if let Err(e) = completed.complete(&payload) {
        tracing::warn!(session_id = %session.id(), error = %e, "Cannot complete session");
        return Outcome::Failed(AdapterError::Unknown(e.to_string()));
    }

    match ctx.store.finalize(
        message,
        completed.content(),
        completed.token_count().unwrap_or(0),
        completed.estimated_cost().unwrap_or(0.0),
    ) {
        Ok(()) => {
            *session = completed;
            Outcome::Completed(payload)
        }
        Err(e) => {
            tracing::warn!(
                session_id = %session.id(),
                message = %message,
                error = %e,
                "Failed to finalize message"
            );
            Outcome::Failed(AdapterError::Unknown(format!(
                "message store rejected final write: {e}"
            )))
        }
    }
}

fn remove_placeholder(ctx: &RunContext, session: &StreamSession, message: &MessageRef) {
    if let Err(e) = ctx.store.delete(message) {
        tracing::warn!(
            session_id = %session.id(),
            message = %message,
            error = %e,
            "Failed to remove placeholder message"
        );
    }
}

// ============================================================================
// Fan-out / Fan-in
// ============================================================================

/// Spawn every job and collect the terminal sessions in job order
///
/// A panicking session task is recorded as Failed and its placeholder
/// removed; siblings are unaffected.
pub(crate) async fn run_all(ctx: Arc<RunContext>, jobs: Vec<SessionJob>) -> Vec<StreamSession> {
    let mut set = JoinSet::new();
    let mut shadows = Vec::with_capacity(jobs.len());

    for (index, job) in jobs.into_iter().enumerate() {
        shadows.push((job.session.clone(), job.message.clone()));
        let task = AssertUnwindSafe(drive_session(Arc::clone(&ctx), job)).catch_unwind();
        set.spawn(async move { (index, task.await) });
    }

    let mut finished: Vec<Option<StreamSession>> = vec![None; shadows.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, Ok(session))) => finished[index] = Some(session),
            Ok((index, Err(_panic))) => {
                tracing::error!(
                    run_id = %ctx.run_id,
                    session_id = %shadows[index].0.id(),
                    "Session task panicked"
                );
            }
            Err(e) => tracing::error!(run_id = %ctx.run_id, error = %e, "Session task aborted"),
        }
    }

    finished
        .into_iter()
        .zip(shadows)
        .map(|(session, (shadow, message))| {
            session.unwrap_or_else(|| {
                let mut session = shadow;
                finish(
                    &ctx,
                    &mut session,
                    &message,
                    Outcome::Failed(AdapterError::Unknown("session task panicked".to_string())),
                );
                session
            })
        })
        .collect()
}
