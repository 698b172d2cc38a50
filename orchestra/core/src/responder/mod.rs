//! Responder Integration
//!
//! Uniform access to every backend that can answer a request, through the
//! [`Responder`] trait.
//!
//! # Available Responders
//!
//! - **Ollama**: local LLM server, NDJSON streaming
//! - **OpenAI-compatible**: chat completions over SSE
//! - **Network service**: single-shot weather/stock/news/search lookups
//! - **Scripted**: offline replay for tests and demos
//!
//! # Usage
//!
//! ```ignore
//! use orchestra_core::responder::{OllamaResponder, Responder, ChunkSender};
//!
//! let backend = OllamaResponder::new("http://localhost:11434", "llama3.2")?;
//! let (tx, mut rx) = tokio::sync::mpsc::channel(64);
//! let payload = backend.stream(&request, ChunkSender::new(tx), cancel).await?;
//! ```

mod config;
mod credentials;
mod lines;
mod network;
mod ollama;
mod openai;
mod registry;
mod scripted;
mod traits;

pub use config::{ProviderKind, ResponderConfig, ResponderId, ResponderKind};
pub use credentials::{
    CredentialError, CredentialSource, EnvCredentials, ProviderCredentials, StaticCredentials,
    DEFAULT_OLLAMA_URL, DEFAULT_OPENAI_URL,
};
pub use network::NetworkServiceResponder;
pub use ollama::OllamaResponder;
pub use openai::OpenAiResponder;
pub use registry::{
    build_adapter, RegisteredResponder, RegistryError, ResponderHealth, ResponderRegistry,
};
pub use scripted::{ScriptOutcome, ScriptedResponder};
pub use traits::{AdapterError, ChunkSender, FinalPayload, Responder, TokenUsage};
