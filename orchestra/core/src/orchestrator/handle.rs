//! Orchestration Handle
//!
//! Returned by [`Orchestrator::run`](super::Orchestrator::run). Streams
//! session snapshots while the run is live, cancels it, and yields the
//! [`RunSummary`] once every session is terminal.

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::summary::RunSummary;
use crate::classifier::Classification;
use crate::session::{SessionId, SessionSnapshot};

/// Caller's view of a running orchestration
#[derive(Debug)]
pub struct OrchestrationHandle {
    run_id: Uuid,
    classification: Classification,
    updates: UnboundedReceiverStream<SessionSnapshot>,
    cancel: CancellationToken,
    sessions: Vec<(SessionId, CancellationToken)>,
    done: oneshot::Receiver<RunSummary>,
}

impl OrchestrationHandle {
    pub(crate) fn new(
        run_id: Uuid,
        classification: Classification,
        updates: mpsc::UnboundedReceiver<SessionSnapshot>,
        cancel: CancellationToken,
        sessions: Vec<(SessionId, CancellationToken)>,
        done: oneshot::Receiver<RunSummary>,
    ) -> Self {
        Self {
            run_id,
            classification,
            updates: UnboundedReceiverStream::new(updates),
            cancel,
            sessions,
            done,
        }
    }

    /// Handle for a run that finished before it was returned
    pub(crate) fn finished(summary: RunSummary) -> Self {
        let (_, updates) = mpsc::unbounded_channel();
        let (done_tx, done) = oneshot::channel();
        let run_id = summary.run_id;
        let classification = summary.classification.clone();
        // Receiver is alive until this handle is dropped
        let _ = done_tx.send(summary);
        Self::new(
            run_id,
            classification,
            updates,
            CancellationToken::new(),
            Vec::new(),
            done,
        )
    }

    /// Run id
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// How the request was routed
    #[must_use]
    pub fn classification(&self) -> &Classification {
        &self.classification
    }

    /// Sessions of this run, in request order
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|(id, _)| *id).collect()
    }

    /// Next snapshot; `None` once every session is terminal and all updates
    /// have been consumed
    pub async fn next_update(&mut self) -> Option<SessionSnapshot> {
        self.updates.next().await
    }

    /// Snapshots as a stream
    pub fn updates(&mut self) -> &mut UnboundedReceiverStream<SessionSnapshot> {
        &mut self.updates
    }

    /// Cancel every outstanding session
    pub fn cancel(&self) {
        tracing::debug!(run_id = %self.run_id, "Run cancellation requested");
        self.cancel.cancel();
    }

    /// Cancel one session; siblings keep running
    ///
    /// Returns `false` when the session is not part of this run.
    pub fn cancel_session(&self, id: &SessionId) -> bool {
        match self.sessions.iter().find(|(session, _)| session == id) {
            Some((_, token)) => {
                tracing::debug!(run_id = %self.run_id, session_id = %id, "Session cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether [`cancel`](Self::cancel) was called
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until every session is terminal
    pub async fn wait(self) -> RunSummary {
        let Self {
            run_id,
            classification,
            done,
            ..
        } = self;

        done.await.unwrap_or_else(|_| {
            tracing::error!(%run_id, "Run supervisor ended without a summary");
            RunSummary {
                run_id,
                classification,
                sessions: Vec::new(),
                direct: None,
            }
        })
    }
}
