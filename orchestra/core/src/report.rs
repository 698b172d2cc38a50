//! Error Reporting
//!
//! Failed sessions are surfaced to the user through an [`ErrorReporter`]:
//! fire-and-forget, one call per failure, naming the responder and the cause.
//! Cancelled sessions are never reported.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::responder::{AdapterError, ResponderId};

/// Receives user-visible failures
pub trait ErrorReporter: Send + Sync {
    /// Report one failure; must not block
    fn report(&self, responder: &ResponderId, error: &AdapterError);
}

/// Logs failures through `tracing`
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, responder: &ResponderId, error: &AdapterError) {
        tracing::warn!(responder = %responder, kind = error.kind(), "{error}");
    }
}

/// One reported failure
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorReport {
    /// Responder that failed
    pub responder: ResponderId,
    /// Cause
    pub error: AdapterError,
}

/// Forwards failures into an unbounded channel
#[derive(Clone, Debug)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<ErrorReport>,
}

impl ChannelReporter {
    /// Create a reporter and the receiver its reports arrive on
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ErrorReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ErrorReporter for ChannelReporter {
    fn report(&self, responder: &ResponderId, error: &AdapterError) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(ErrorReport {
            responder: responder.clone(),
            error: error.clone(),
        });
    }
}
