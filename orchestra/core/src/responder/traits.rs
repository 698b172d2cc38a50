//! Responder Traits
//!
//! Trait definitions for responders. This abstraction lets the orchestrator
//! drive language-model providers and auxiliary network services through one
//! streaming contract without knowing their protocols.
//!
//! # Contract
//!
//! [`Responder::stream`] pushes text fragments into a [`ChunkSender`] in
//! emission order and resolves with a [`FinalPayload`] or an
//! [`AdapterError`]. The sender is moved into the call, so no fragment can be
//! delivered after the call resolves. The [`CancellationToken`] is observed
//! cooperatively: once it fires, the adapter stops sending and returns
//! [`AdapterError::Cancelled`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::request::Request;

/// Errors a responder call can end with
#[derive(Clone, Debug, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AdapterError {
    /// Credentials were missing or rejected
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The provider is throttling requests
    #[error("rate limited by provider")]
    RateLimited,

    /// The call exceeded its time bound
    #[error("request timed out")]
    Timeout,

    /// The provider could not be reached or is failing
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The responder is misconfigured (bad model, bad endpoint, bad request)
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The call was cancelled
    #[error("cancelled")]
    Cancelled,

    /// Anything else
    #[error("unexpected error: {0}")]
    Unknown(String),
}

impl AdapterError {
    /// Map an unsuccessful HTTP status onto the taxonomy
    #[must_use]
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let detail = if body.trim().is_empty() {
            status.to_string()
        } else {
            format!("{status}: {}", body.trim())
        };

        match status.as_u16() {
            401 | 403 => Self::Auth(detail),
            429 => Self::RateLimited,
            408 | 504 => Self::Timeout,
            400 | 404 | 422 => Self::InvalidConfig(detail),
            500..=599 => Self::ProviderUnavailable(detail),
            _ => Self::Unknown(detail),
        }
    }

    /// Short machine-friendly name of the variant
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Cancelled => "cancelled",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::ProviderUnavailable(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status, "")
        } else if err.is_builder() {
            Self::InvalidConfig(err.to_string())
        } else {
            Self::Unknown(err.to_string())
        }
    }
}

/// Token usage reported by a provider
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt
    pub prompt_tokens: u32,
    /// Tokens generated in the response
    pub completion_tokens: u32,
}

/// Authoritative result of a successful responder call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinalPayload {
    /// Full response text (may differ trivially from the streamed fragments)
    pub text: String,
    /// Usage, when the provider reports it
    pub usage: Option<TokenUsage>,
    /// Cost, when known to the adapter
    pub cost: Option<f64>,
}

impl FinalPayload {
    /// Payload with text only
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
            cost: None,
        }
    }

    /// Attach usage
    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Attach cost
    #[must_use]
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }
}

/// Sending half of a session's chunk channel
///
/// Empty fragments are dropped. A closed channel means the session stopped
/// listening, which the adapter must treat as cancellation.
#[derive(Debug)]
pub struct ChunkSender {
    tx: mpsc::Sender<String>,
}

impl ChunkSender {
    /// Wrap a channel sender
    #[must_use]
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// Deliver one fragment
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Cancelled`] when the receiving session is gone.
    pub async fn send(&self, chunk: impl Into<String>) -> Result<(), AdapterError> {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx
            .send(chunk)
            .await
            .map_err(|_| AdapterError::Cancelled)
    }
}

/// Responder trait
///
/// Implement this trait to add a backend family.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Backend family name (e.g., "Ollama", "OpenAI")
    fn name(&self) -> &str;

    /// Whether fragments arrive incrementally
    ///
    /// Non-streaming responders enter the Streaming state as soon as the
    /// call is launched and usually send exactly one fragment.
    fn is_streaming(&self) -> bool {
        true
    }

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool {
        true
    }

    /// Run one call, streaming fragments into `chunks`
    async fn stream(
        &self,
        request: &Request,
        chunks: ChunkSender,
        cancel: CancellationToken,
    ) -> Result<FinalPayload, AdapterError>;
}
