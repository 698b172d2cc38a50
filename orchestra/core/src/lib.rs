//! Orchestra Core - Streaming Response Orchestration
//!
//! Takes one user query, decides where it goes, fans it out to one or more
//! responders (language-model providers or network-data services), streams
//! their output back fragment by fragment, and keeps the conversation's
//! message store consistent whatever each responder does.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       Application / CLI                          │
//! │        Request ─┐                          ▲ SessionSnapshot     │
//! └─────────────────┼──────────────────────────┼─────────────────────┘
//!                   │                          │
//! ┌─────────────────┼──────────────────────────┼─────────────────────┐
//! │                 ▼        ORCHESTRA CORE    │                     │
//! │  ┌────────────────────┐   ┌────────────────┴───────────────┐     │
//! │  │ Command Classifier │──►│          Orchestrator          │     │
//! │  └────────────────────┘   │  StreamSession × N  (JoinSet)  │     │
//! │                           └──────┬──────────────────┬──────┘     │
//! │                                  │                  │            │
//! │                    ┌─────────────▼───┐      ┌───────▼────────┐   │
//! │                    │   Responders    │      │  MessageStore  │   │
//! │                    │ Ollama / OpenAI │      │  (placeholder, │   │
//! │                    │ network service │      │ patch, final)  │   │
//! │                    └─────────────────┘      └────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Overview
//!
//! - [`classifier`]: routes raw text to a model query, network command, or slash command
//! - [`responder`]: the [`Responder`] trait, concrete adapters, and the registry
//! - [`session`]: the per-responder [`StreamSession`] state machine
//! - [`orchestrator`]: fan-out, fan-in, cancellation and timeouts
//! - [`store`]: the [`MessageStore`] interface and an in-memory implementation
//! - [`metrics`]: per-session metrics and per-responder aggregates
//! - [`report`]: user-facing error reporting
//! - [`request`]: the immutable [`Request`] value
//! - [`config`]: TOML/env configuration
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use orchestra_core::{
//!     load_config, ConversationId, EnvCredentials, InMemoryMessageStore, Orchestrator,
//!     Request, ResponderRegistry, TracingReporter,
//! };
//!
//! let config = load_config()?;
//! let registry = ResponderRegistry::from_configs(&config.responders, &EnvCredentials);
//! let orchestrator = Orchestrator::new(
//!     registry,
//!     Arc::new(InMemoryMessageStore::new()),
//!     Arc::new(TracingReporter),
//!     config.orchestrator,
//! );
//!
//! let request = Request::new(ConversationId::new("demo"), "hello").with_responder("local");
//! let mut handle = orchestrator.submit(request).await?;
//! while let Some(update) = handle.next_update().await {
//!     print!("{}", update.latest_chunk.unwrap_or_default());
//! }
//! let summary = handle.wait().await;
//! ```
//!
//! # No UI Dependencies
//!
//! Nothing here renders anything. Surfaces consume snapshots and the store.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod classifier;
pub mod config;
pub mod metrics;
pub mod orchestrator;
pub mod report;
pub mod request;
pub mod responder;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use classifier::{classify, Classification, NetworkCommandKind, SlashCommandName};
pub use metrics::{collect, MetricsRegistry, ResponderMetricsSummary, SessionMetrics};
pub use orchestrator::{
    DirectOutcome, OrchestrationHandle, Orchestrator, OrchestratorError, RunSummary,
};
pub use report::{ChannelReporter, ErrorReport, ErrorReporter, TracingReporter};
pub use request::{Attachment, ConversationId, GenerationParams, Request};
pub use responder::{
    AdapterError, ChunkSender, CredentialSource, EnvCredentials, FinalPayload, ProviderKind,
    Responder, ResponderConfig, ResponderId, ResponderKind, ResponderRegistry, ScriptOutcome,
    ScriptedResponder, StaticCredentials, TokenUsage,
};
pub use session::{SessionId, SessionSnapshot, SessionState, SessionTransitionError, StreamSession};
pub use store::{InMemoryMessageStore, MessageRef, MessageRole, MessageStore, StoreError, StoredMessage};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, FeatureFlags, OrchestraConfig, OrchestraToml, OrchestratorConfig,
};
