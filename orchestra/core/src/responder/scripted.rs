//! Scripted Responder
//!
//! Deterministic in-process responder that replays a fixed list of fragments.
//! Used by tests and demos to drive the orchestrator without a network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::traits::{AdapterError, ChunkSender, FinalPayload, Responder, TokenUsage};
use crate::request::Request;

/// How a scripted call ends once its fragments are sent
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptOutcome {
    /// Resolve with the concatenated fragments
    Complete,
    /// Resolve with this text instead of the fragments
    CompleteWith(String),
    /// Fail with this error
    Fail(AdapterError),
    /// Never resolve and ignore cancellation
    Stall,
    /// Panic inside the call
    Panic,
}

/// Replays fragments with optional pacing
#[derive(Debug)]
pub struct ScriptedResponder {
    name: String,
    chunks: Vec<String>,
    delay: Duration,
    outcome: ScriptOutcome,
    usage: Option<TokenUsage>,
    streaming: bool,
    calls: Arc<AtomicUsize>,
}

impl ScriptedResponder {
    /// Responder that sends `chunks` and completes
    pub fn new<I, S>(name: impl Into<String>, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            chunks: chunks.into_iter().map(Into::into).collect(),
            delay: Duration::ZERO,
            outcome: ScriptOutcome::Complete,
            usage: None,
            streaming: true,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait this long before each fragment
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set how the call ends
    #[must_use]
    pub fn with_outcome(mut self, outcome: ScriptOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Report usage in the final payload
    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Behave like a single-shot service
    #[must_use]
    pub fn non_streaming(mut self) -> Self {
        self.streaming = false;
        self
    }

    /// Shared counter of started calls
    #[must_use]
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Number of calls started so far
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Wait out the pacing delay; `true` if cancelled meanwhile
    async fn pace(&self, cancel: &CancellationToken) -> bool {
        if self.delay.is_zero() {
            return cancel.is_cancelled();
        }
        tokio::time::timeout(self.delay, cancel.cancelled())
            .await
            .is_ok()
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }

    async fn stream(
        &self,
        _request: &Request,
        chunks: ChunkSender,
        cancel: CancellationToken,
    ) -> Result<FinalPayload, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut text = String::new();
        for chunk in &self.chunks {
            if self.pace(&cancel).await {
                return Err(AdapterError::Cancelled);
            }
            text.push_str(chunk);
            chunks.send(chunk.clone()).await?;
        }

        match &self.outcome {
            ScriptOutcome::Complete => {}
            ScriptOutcome::CompleteWith(final_text) => text.clone_from(final_text),
            ScriptOutcome::Fail(error) => return Err(error.clone()),
            ScriptOutcome::Stall => std::future::pending::<()>().await,
            ScriptOutcome::Panic => panic!("scripted responder `{}` panicked", self.name),
        }

        let mut payload = FinalPayload::text(text);
        payload.usage = self.usage;
        Ok(payload)
    }
}
