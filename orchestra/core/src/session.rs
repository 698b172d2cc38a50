//! Stream Sessions
//!
//! A [`StreamSession`] tracks one responder's response from launch to its
//! terminal state:
//!
//! ```text
//! Pending ──first chunk / non-streaming──▶ Streaming ──▶ Completed
//!    │                                        │
//!    ├──────────────▶ Failed ◀────────────────┤
//!    └──────────────▶ Cancelled ◀─────────────┘
//! ```
//!
//! Every mutator checks the transition and returns a
//! [`SessionTransitionError`] instead of applying an illegal one, so a
//! terminal session can never change again.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::responder::{AdapterError, FinalPayload, ResponderConfig, ResponderId};

/// Unique session identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a new random ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell sessions apart in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Lifecycle state of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Launched, nothing received yet
    Pending,
    /// Receiving fragments
    Streaming,
    /// Finished successfully (terminal)
    Completed,
    /// Finished with an adapter error (terminal)
    Failed,
    /// Stopped by a cancellation signal (terminal)
    Cancelled,
}

impl SessionState {
    /// Whether no further transition is possible
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// An illegal state transition was attempted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("session cannot move from {from} to {to}")]
pub struct SessionTransitionError {
    /// State the session was in
    pub from: SessionState,
    /// State that was requested
    pub to: SessionState,
}

/// One responder's response lifecycle
///
/// Owned by the orchestrator task that drives it; observers only ever see
/// [`SessionSnapshot`]s.
#[derive(Clone, Debug)]
pub struct StreamSession {
    id: SessionId,
    responder: ResponderConfig,
    state: SessionState,
    content: String,
    chunk_count: u32,
    started_at: DateTime<Utc>,
    first_chunk_at: Option<DateTime<Utc>>,
    last_chunk_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    token_count: Option<u32>,
    estimated_cost: Option<f64>,
    error: Option<AdapterError>,
}

impl StreamSession {
    /// Create a Pending session for a responder
    #[must_use]
    pub fn new(responder: ResponderConfig) -> Self {
        Self {
            id: SessionId::new(),
            responder,
            state: SessionState::Pending,
            content: String::new(),
            chunk_count: 0,
            started_at: Utc::now(),
            first_chunk_at: None,
            last_chunk_at: None,
            ended_at: None,
            token_count: None,
            estimated_cost: None,
            error: None,
        }
    }

    fn transition(&mut self, to: SessionState) -> Result<(), SessionTransitionError> {
        let allowed = matches!(
            (self.state, to),
            (SessionState::Pending, SessionState::Streaming)
                | (SessionState::Streaming, SessionState::Completed)
                | (
                    SessionState::Pending | SessionState::Streaming,
                    SessionState::Failed | SessionState::Cancelled
                )
        );

        if !allowed {
            return Err(SessionTransitionError {
                from: self.state,
                to,
            });
        }

        tracing::debug!(
            session_id = %self.id,
            responder = %self.responder.id,
            from = %self.state,
            to = %to,
            "Session transition"
        );
        self.state = to;
        if to.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Pending → Streaming without a fragment (non-streaming responders)
    ///
    /// # Errors
    ///
    /// Fails unless the session is Pending.
    pub fn begin_streaming(&mut self) -> Result<(), SessionTransitionError> {
        self.transition(SessionState::Streaming)
    }

    /// Append one fragment
    ///
    /// The first fragment moves a Pending session to Streaming.
    ///
    /// # Errors
    ///
    /// Fails once the session is terminal.
    pub fn append_chunk(&mut self, chunk: &str) -> Result<(), SessionTransitionError> {
        match self.state {
            SessionState::Pending => self.transition(SessionState::Streaming)?,
            SessionState::Streaming => {}
            from => {
                return Err(SessionTransitionError {
                    from,
                    to: SessionState::Streaming,
                })
            }
        }

        let now = Utc::now();
        if self.chunk_count == 0 {
            self.first_chunk_at = Some(now);
        }
        self.last_chunk_at = Some(now);
        self.chunk_count += 1;
        self.content.push_str(chunk);
        Ok(())
    }

    /// Streaming → Completed, reconciling content with the final payload
    ///
    /// Token count is the provider's usage figure; without one it stays
    /// unknown (`None`). Cost comes from the payload when present, otherwise
    /// from the reported tokens at the responder's per-token price.
    ///
    /// # Errors
    ///
    /// Fails unless the session is Streaming.
    pub fn complete(&mut self, payload: &FinalPayload) -> Result<(), SessionTransitionError> {
        self.transition(SessionState::Completed)?;

        if payload.text != self.content {
            tracing::trace!(
                session_id = %self.id,
                streamed = self.content.len(),
                final_len = payload.text.len(),
                "Final text differs from streamed content"
            );
        }
        self.content.clone_from(&payload.text);

        self.token_count = payload.usage.map(|usage| usage.completion_tokens);
        self.estimated_cost = payload.cost.or_else(|| {
            self.token_count
                .map(|tokens| f64::from(tokens) * self.responder.cost_per_token())
        });
        Ok(())
    }

    /// Pending|Streaming → Failed
    ///
    /// Streamed content is kept for diagnostics.
    ///
    /// # Errors
    ///
    /// Fails once the session is terminal.
    pub fn fail(&mut self, error: AdapterError) -> Result<(), SessionTransitionError> {
        self.transition(SessionState::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    /// Pending|Streaming → Cancelled
    ///
    /// # Errors
    ///
    /// Fails once the session is terminal.
    pub fn cancel(&mut self) -> Result<(), SessionTransitionError> {
        self.transition(SessionState::Cancelled)
    }

    /// Session id
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Targeted responder
    #[must_use]
    pub fn responder(&self) -> &ResponderConfig {
        &self.responder
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session reached a terminal state
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Accumulated content (final text once Completed)
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Number of fragments received
    #[must_use]
    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// When the session was created
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the first fragment arrived
    #[must_use]
    pub fn first_chunk_at(&self) -> Option<DateTime<Utc>> {
        self.first_chunk_at
    }

    /// When the latest fragment arrived
    #[must_use]
    pub fn last_chunk_at(&self) -> Option<DateTime<Utc>> {
        self.last_chunk_at
    }

    /// When the session became terminal
    #[must_use]
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Generated tokens (Completed only)
    #[must_use]
    pub fn token_count(&self) -> Option<u32> {
        self.token_count
    }

    /// Estimated cost (Completed only)
    #[must_use]
    pub fn estimated_cost(&self) -> Option<f64> {
        self.estimated_cost
    }

    /// Error (Failed only)
    #[must_use]
    pub fn error(&self) -> Option<&AdapterError> {
        self.error.as_ref()
    }

    /// Immutable view for observers
    #[must_use]
    pub fn snapshot(&self, revision: u64, latest_chunk: Option<String>) -> SessionSnapshot {
        SessionSnapshot {
            revision,
            session_id: self.id,
            responder_id: self.responder.id.clone(),
            responder_label: self.responder.label().to_string(),
            state: self.state,
            content: self.content.clone(),
            latest_chunk,
            chunk_count: self.chunk_count,
            started_at: self.started_at,
            ended_at: self.ended_at,
            token_count: self.token_count,
            estimated_cost: self.estimated_cost,
            error: self.error.clone(),
        }
    }
}

/// Point-in-time view of a session, published on every update
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Run-wide update counter; strictly increasing across all snapshots of a run
    pub revision: u64,
    /// Session id
    pub session_id: SessionId,
    /// Targeted responder
    pub responder_id: ResponderId,
    /// Responder label for display
    pub responder_label: String,
    /// State at the time of the snapshot
    pub state: SessionState,
    /// Accumulated content
    pub content: String,
    /// Fragment that caused this update, if any
    pub latest_chunk: Option<String>,
    /// Fragments received so far
    pub chunk_count: u32,
    /// Session start
    pub started_at: DateTime<Utc>,
    /// Session end (terminal only)
    pub ended_at: Option<DateTime<Utc>>,
    /// Generated tokens (Completed only)
    pub token_count: Option<u32>,
    /// Estimated cost (Completed only)
    pub estimated_cost: Option<f64>,
    /// Error (Failed only)
    pub error: Option<AdapterError>,
}

impl SessionSnapshot {
    /// Whether this is the session's final snapshot
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
