//! Orchestrator
//!
//! Turns one [`Request`] into either a single network-service call or a set
//! of concurrently streamed sessions.
//!
//! # Architecture
//!
//! ```text
//!  Request ──► classify ──┬── NetworkCommand ──► service adapter ──► 1 finalized message
//!                         │
//!                         └── ModelQuery / SlashCommand
//!                                  │
//!                   validate + create placeholders (all or nothing)
//!                                  │
//!              ┌───────────────────┼───────────────────┐
//!              ▼                   ▼                   ▼
//!         session task        session task        session task     (JoinSet)
//!         adapter.stream      adapter.stream      adapter.stream
//!              │ chunks            │                   │
//!              ▼                   ▼                   ▼
//!        patch / finalize / delete placeholder, publish snapshots
//!                                  │
//!                                  ▼
//!                     OrchestrationHandle ──► RunSummary
//! ```
//!
//! One failing or cancelled session never affects its siblings. Errors that
//! make a request impossible are returned before any message is written.

mod handle;
mod runner;
mod summary;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use handle::OrchestrationHandle;
pub use summary::{DirectOutcome, RunSummary};

use crate::classifier::{classify, Classification, NetworkCommandKind};
use crate::config::OrchestratorConfig;
use crate::metrics::MetricsRegistry;
use crate::report::ErrorReporter;
use crate::request::Request;
use crate::responder::{
    AdapterError, ChunkSender, RegisteredResponder, ResponderConfig, ResponderId,
    ResponderRegistry,
};
use crate::session::StreamSession;
use crate::store::{MessageRef, MessageStore, StoreError};
use runner::{Publisher, RunContext, SessionJob};

/// Errors that reject a request before any session starts
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No responder was selected
    #[error("no responders selected")]
    NoResponders,

    /// The same responder was selected twice
    #[error("responder `{0}` selected more than once")]
    DuplicateResponder(ResponderId),

    /// More responders than one run may drive
    #[error("{requested} responders requested, at most {max} allowed")]
    TooManyResponders {
        /// Responders in the request
        requested: usize,
        /// Configured limit
        max: usize,
    },

    /// A requested responder or network service is not configured, disabled,
    /// or has no working adapter
    #[error("not configured: {0}")]
    ConfigMissing(String),

    /// The message store refused the initial writes
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Dispatches requests to responders
pub struct Orchestrator {
    registry: Arc<ResponderRegistry>,
    store: Arc<dyn MessageStore>,
    reporter: Arc<dyn ErrorReporter>,
    metrics: Arc<MetricsRegistry>,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("responders", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator
    #[must_use]
    pub fn new(
        registry: ResponderRegistry,
        store: Arc<dyn MessageStore>,
        reporter: Arc<dyn ErrorReporter>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
            reporter,
            metrics: Arc::new(MetricsRegistry::new()),
            config,
        }
    }

    /// Responder registry
    #[must_use]
    pub fn registry(&self) -> &ResponderRegistry {
        &self.registry
    }

    /// Per-responder aggregate metrics
    #[must_use]
    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Orchestrator settings
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Preview how a text would be routed
    #[must_use]
    pub fn classify(&self, text: &str) -> Classification {
        classify(text)
    }

    /// Run a request against the responders it names
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run). Unknown ids are reported as
    /// [`OrchestratorError::ConfigMissing`].
    pub async fn submit(&self, request: Request) -> Result<OrchestrationHandle, OrchestratorError> {
        let responders = match classify(&request.text) {
            Classification::NetworkCommand { .. } => Vec::new(),
            _ => request
                .responder_ids
                .iter()
                .map(|id| {
                    self.registry
                        .config(id)
                        .cloned()
                        .ok_or_else(|| OrchestratorError::ConfigMissing(format!("responder `{id}`")))
                })
                .collect::<Result<Vec<_>, _>>()?,
        };
        self.run(request, &responders).await
    }

    /// Classify and dispatch a request
    ///
    /// Network commands are answered before this returns; the handle is
    /// already finished. Everything else starts one session per responder
    /// and returns while they stream.
    ///
    /// # Errors
    ///
    /// Returns an error, without writing anything, when no responder is
    /// given, one is repeated, too many are given, or one is not configured.
    /// A store failure while creating placeholders removes the ones already
    /// created.
    pub async fn run(
        &self,
        request: Request,
        responders: &[ResponderConfig],
    ) -> Result<OrchestrationHandle, OrchestratorError> {
        let classification = classify(&request.text);

        match classification.clone() {
            Classification::NetworkCommand { kind, query } => {
                self.run_network(request, classification, kind, &query)
                    .await
            }
            Classification::SlashCommand { name, args } => {
                let request = if self.config.features.slash_commands {
                    request.derive_with_text(name.expand(&args))
                } else {
                    request
                };
                self.run_sessions(request, classification, responders)
            }
            Classification::ModelQuery { .. } => {
                self.run_sessions(request, classification, responders)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Model path
    // ------------------------------------------------------------------------

    fn resolve<'a>(
        &'a self,
        responders: &[ResponderConfig],
    ) -> Result<Vec<&'a RegisteredResponder>, OrchestratorError> {
        if responders.is_empty() {
            return Err(OrchestratorError::NoResponders);
        }

        let mut seen = HashSet::new();
        for config in responders {
            if !seen.insert(&config.id) {
                return Err(OrchestratorError::DuplicateResponder(config.id.clone()));
            }
        }

        let max = self.config.max_concurrent_sessions;
        if responders.len() > max {
            return Err(OrchestratorError::TooManyResponders {
                requested: responders.len(),
                max,
            });
        }

        responders
            .iter()
            .map(|config| {
                let registered = self
                    .registry
                    .get(&config.id)
                    .filter(|r| r.config.enabled && config.enabled)
                    .ok_or_else(|| {
                        OrchestratorError::ConfigMissing(format!("responder `{}`", config.id))
                    })?;
                Ok(registered)
            })
            .collect()
    }

    fn create_placeholders(
        &self,
        request: &Request,
        responders: &[ResponderConfig],
    ) -> Result<Vec<MessageRef>, OrchestratorError> {
        let mut created = Vec::with_capacity(responders.len());
        for config in responders {
            match self
                .store
                .create_placeholder(&request.conversation_id, &config.id)
            {
                Ok(message) => created.push(message),
                Err(e) => {
                    for message in &created {
                        if let Err(cleanup) = self.store.delete(message) {
                            tracing::warn!(message = %message, error = %cleanup, "Failed to roll back placeholder");
                        }
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(created)
    }

    fn effective_timeout(&self, request: &Request, config: &ResponderConfig) -> Duration {
        request
            .timeout
            .or_else(|| config.timeout())
            .unwrap_or(self.config.default_timeout)
    }

    fn run_sessions(
        &self,
        request: Request,
        classification: Classification,
        responders: &[ResponderConfig],
    ) -> Result<OrchestrationHandle, OrchestratorError> {
        let adapters: Vec<_> = self
            .resolve(responders)?
            .into_iter()
            .map(|r| Arc::clone(&r.adapter))
            .collect();
        let messages = self.create_placeholders(&request, responders)?;

        let run_id = Uuid::new_v4();
        let run_cancel = CancellationToken::new();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(RunContext {
            run_id,
            store: Arc::clone(&self.store),
            reporter: Arc::clone(&self.reporter),
            metrics: Arc::clone(&self.metrics),
            publisher: Publisher::new(updates_tx),
            chunk_buffer: self.config.chunk_buffer.max(1),
            cancel_grace: self.config.cancel_grace,
            patch_throttle: self.config.patch_throttle,
        });

        let request = Arc::new(request);
        let mut tokens = Vec::with_capacity(responders.len());
        let mut jobs = Vec::with_capacity(responders.len());
        for ((config, adapter), message) in responders.iter().zip(adapters).zip(messages) {
            let session = StreamSession::new(config.clone());
            let cancel = run_cancel.child_token();
            ctx.publisher.publish(&session, None);
            tokens.push((session.id(), cancel.clone()));
            jobs.push(SessionJob {
                timeout: self.effective_timeout(&request, config),
                session,
                message,
                adapter,
                request: Arc::clone(&request),
                cancel,
            });
        }

        tracing::info!(
            %run_id,
            sessions = jobs.len(),
            conversation = %request.conversation_id,
            "Orchestration run started"
        );

        let (done_tx, done_rx) = oneshot::channel();
        let summary_classification = classification.clone();
        tokio::spawn(async move {
            let sessions = runner::run_all(Arc::clone(&ctx), jobs).await;
            let summary = RunSummary {
                run_id,
                classification: summary_classification,
                sessions,
                direct: None,
            };
            tracing::info!(
                %run_id,
                completed = summary.completed_count(),
                failed = summary.failed_count(),
                cancelled = summary.cancelled_count(),
                "Orchestration run finished"
            );
            // Closing the update stream before the summary is available
            drop(ctx);
            let _ = done_tx.send(summary);
        });

        Ok(OrchestrationHandle::new(
            run_id,
            classification,
            updates_rx,
            run_cancel,
            tokens,
            done_rx,
        ))
    }

    // ------------------------------------------------------------------------
    // Network-command path
    // ------------------------------------------------------------------------

    async fn run_network(
        &self,
        request: Request,
        classification: Classification,
        kind: NetworkCommandKind,
        query: &str,
    ) -> Result<OrchestrationHandle, OrchestratorError> {
        let run_id = Uuid::new_v4();

        let direct = if self.config.features.network_enabled(kind) {
            let service = self.registry.network_service(kind).ok_or_else(|| {
                OrchestratorError::ConfigMissing(format!("{kind} service"))
            })?;
            self.call_network_service(&request.derive_with_text(query), service)
                .await?
        } else {
            tracing::info!(%run_id, %kind, "Network command disabled");
            let responder = self
                .registry
                .network_service(kind)
                .map_or_else(|| ResponderId::from(kind.as_str()), |s| s.config.id.clone());
            let notice = format!("The {kind} feature is currently disabled.");
            let message = self.write_finalized(&request, &responder, &notice, 0, 0.0)?;
            DirectOutcome::Disabled { kind, message }
        };

        Ok(OrchestrationHandle::finished(RunSummary {
            run_id,
            classification,
            sessions: Vec::new(),
            direct: Some(direct),
        }))
    }

    async fn call_network_service(
        &self,
        request: &Request,
        service: &RegisteredResponder,
    ) -> Result<DirectOutcome, OrchestratorError> {
        let responder = service.config.id.clone();
        let limit = self.effective_timeout(request, &service.config);
        let (tx, mut rx) = mpsc::channel::<String>(self.config.chunk_buffer.max(1));

        let call = tokio::time::timeout(
            limit,
            service
                .adapter
                .stream(request, ChunkSender::new(tx), CancellationToken::new()),
        );
        let collect = async {
            let mut streamed = String::new();
            while let Some(chunk) = rx.recv().await {
                streamed.push_str(&chunk);
            }
            streamed
        };
        let (result, streamed) = tokio::join!(call, collect);

        let payload = match result {
            Ok(Ok(payload)) => payload,
            Ok(Err(error)) => return Ok(self.network_failed(responder, error)),
            Err(_) => return Ok(self.network_failed(responder, AdapterError::Timeout)),
        };

        let text = if payload.text.is_empty() {
            streamed
        } else {
            payload.text
        };
        let tokens = payload.usage.map_or(0, |u| u.completion_tokens);
        let cost = payload
            .cost
            .unwrap_or_else(|| f64::from(tokens) * service.config.cost_per_token());
        let message = self.write_finalized(request, &responder, &text, tokens, cost)?;

        tracing::debug!(responder = %responder, message = %message, "Network command answered");
        Ok(DirectOutcome::Answered {
            responder,
            message,
            text,
        })
    }

    fn network_failed(&self, responder: ResponderId, error: AdapterError) -> DirectOutcome {
        tracing::warn!(responder = %responder, kind = error.kind(), "Network command failed: {error}");
        self.reporter.report(&responder, &error);
        DirectOutcome::Failed { responder, error }
    }

    fn write_finalized(
        &self,
        request: &Request,
        responder: &ResponderId,
        text: &str,
        tokens: u32,
        cost: f64,
    ) -> Result<MessageRef, OrchestratorError> {
        let message = self
            .store
            .create_placeholder(&request.conversation_id, responder)?;
        if let Err(e) = self.store.finalize(&message, text, tokens, cost) {
            if let Err(cleanup) = self.store.delete(&message) {
                tracing::warn!(message = %message, error = %cleanup, "Failed to remove unfinalized message");
            }
            return Err(e.into());
        }
        Ok(message)
    }
}
