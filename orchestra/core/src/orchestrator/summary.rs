//! Run Summary
//!
//! What a caller gets once every session of a run is terminal.

use serde::Serialize;
use uuid::Uuid;

use crate::classifier::{Classification, NetworkCommandKind};
use crate::metrics::{self, SessionMetrics};
use crate::responder::{AdapterError, ResponderId};
use crate::session::{SessionState, StreamSession};
use crate::store::MessageRef;

/// Result of a network command, answered without stream sessions
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DirectOutcome {
    /// The service answered; the answer was written as one finalized message
    Answered {
        /// Service that answered
        responder: ResponderId,
        /// Finalized message
        message: MessageRef,
        /// Answer text
        text: String,
    },
    /// The feature is switched off; a notice was written instead
    Disabled {
        /// Disabled command kind
        kind: NetworkCommandKind,
        /// Notice message
        message: MessageRef,
    },
    /// The service call failed; nothing was written
    Failed {
        /// Service that failed
        responder: ResponderId,
        /// Cause
        error: AdapterError,
    },
}

/// Terminal result of one orchestration run
#[derive(Clone, Debug)]
pub struct RunSummary {
    /// Run id
    pub run_id: Uuid,
    /// How the request was routed
    pub classification: Classification,
    /// Terminal sessions, in the order the responders were requested
    pub sessions: Vec<StreamSession>,
    /// Outcome of a network command (no sessions in that case)
    pub direct: Option<DirectOutcome>,
}

impl RunSummary {
    fn count(&self, state: SessionState) -> usize {
        self.sessions.iter().filter(|s| s.state() == state).count()
    }

    /// Sessions that Completed
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.count(SessionState::Completed)
    }

    /// Sessions that Failed
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.count(SessionState::Failed)
    }

    /// Sessions that were Cancelled
    #[must_use]
    pub fn cancelled_count(&self) -> usize {
        self.count(SessionState::Cancelled)
    }

    /// Some sessions Completed while others Failed
    ///
    /// A valid outcome, reported per session rather than as a run error.
    #[must_use]
    pub fn is_partial_failure(&self) -> bool {
        self.completed_count() > 0 && self.failed_count() > 0
    }

    /// Session for a responder
    #[must_use]
    pub fn session(&self, responder: &ResponderId) -> Option<&StreamSession> {
        self.sessions.iter().find(|s| &s.responder().id == responder)
    }

    /// Metrics of every Completed session
    #[must_use]
    pub fn metrics(&self) -> Vec<SessionMetrics> {
        self.sessions.iter().filter_map(metrics::collect).collect()
    }
}
