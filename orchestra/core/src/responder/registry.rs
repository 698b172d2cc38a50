//! Responder Registry
//!
//! Maps responder ids to their configuration and a live adapter. Built once
//! from configuration and read-only while requests run.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;

use super::config::{ProviderKind, ResponderConfig, ResponderId, ResponderKind};
use super::credentials::{CredentialError, CredentialSource};
use super::network::NetworkServiceResponder;
use super::ollama::OllamaResponder;
use super::openai::OpenAiResponder;
use super::traits::{AdapterError, Responder};
use crate::classifier::NetworkCommandKind;

/// Errors building an adapter from configuration
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Credentials could not be resolved
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    /// The adapter rejected its configuration
    #[error("adapter setup failed: {0}")]
    Adapter(#[from] AdapterError),
}

/// A configured responder with its adapter
#[derive(Clone)]
pub struct RegisteredResponder {
    /// Configuration
    pub config: ResponderConfig,
    /// Live adapter
    pub adapter: Arc<dyn Responder>,
}

impl std::fmt::Debug for RegisteredResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredResponder")
            .field("id", &self.config.id)
            .field("adapter", &self.adapter.name())
            .finish()
    }
}

/// Health of one responder
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResponderHealth {
    /// Responder id
    pub id: ResponderId,
    /// Display label
    pub label: String,
    /// Adapter family
    pub backend: String,
    /// Whether the responder is enabled
    pub enabled: bool,
    /// Result of the health check
    pub healthy: bool,
}

/// Build the adapter a configuration describes
///
/// # Errors
///
/// Fails when credentials are missing or the HTTP client cannot be built.
pub fn build_adapter(
    config: &ResponderConfig,
    credentials: &dyn CredentialSource,
) -> Result<Arc<dyn Responder>, RegistryError> {
    let resolved = credentials.resolve(config)?;

    let adapter: Arc<dyn Responder> = match &config.kind {
        ResponderKind::Model {
            provider: ProviderKind::Ollama,
            model,
            ..
        } => Arc::new(OllamaResponder::new(resolved.endpoint, model.clone())?),
        ResponderKind::Model {
            provider: ProviderKind::OpenAi,
            model,
            ..
        } => Arc::new(OpenAiResponder::new(
            resolved.endpoint,
            resolved.api_key.unwrap_or_default(),
            model.clone(),
        )?),
        ResponderKind::NetworkService { command, .. } => Arc::new(NetworkServiceResponder::new(
            *command,
            resolved.endpoint,
            resolved.api_key,
        )?),
    };
    Ok(adapter)
}

/// Configured responders, keyed by id
#[derive(Debug, Default)]
pub struct ResponderRegistry {
    entries: BTreeMap<ResponderId, RegisteredResponder>,
    unavailable: BTreeMap<ResponderId, String>,
}

impl ResponderRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters for every configuration
    ///
    /// Responders whose adapter cannot be built are skipped and listed as
    /// unavailable.
    pub fn from_configs(configs: &[ResponderConfig], credentials: &dyn CredentialSource) -> Self {
        let mut registry = Self::new();

        for config in configs {
            match build_adapter(config, credentials) {
                Ok(adapter) => registry.insert(config.clone(), adapter),
                Err(e) => {
                    tracing::warn!(responder = %config.id, error = %e, "Responder unavailable");
                    registry.unavailable.insert(config.id.clone(), e.to_string());
                }
            }
        }

        tracing::debug!(
            available = registry.entries.len(),
            unavailable = registry.unavailable.len(),
            "Responder registry built"
        );
        registry
    }

    /// Register a responder with an explicit adapter
    pub fn insert(&mut self, config: ResponderConfig, adapter: Arc<dyn Responder>) {
        self.unavailable.remove(&config.id);
        self.entries
            .insert(config.id.clone(), RegisteredResponder { config, adapter });
    }

    /// Look up a responder
    #[must_use]
    pub fn get(&self, id: &ResponderId) -> Option<&RegisteredResponder> {
        self.entries.get(id)
    }

    /// Configuration of a responder
    #[must_use]
    pub fn config(&self, id: &ResponderId) -> Option<&ResponderConfig> {
        self.entries.get(id).map(|entry| &entry.config)
    }

    /// First enabled network service answering `kind`
    #[must_use]
    pub fn network_service(&self, kind: NetworkCommandKind) -> Option<&RegisteredResponder> {
        self.entries
            .values()
            .find(|entry| entry.config.enabled && entry.config.network_command() == Some(kind))
    }

    /// All registered responders, ordered by id
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredResponder> {
        self.entries.values()
    }

    /// Responders that were configured but could not be built, with the reason
    #[must_use]
    pub fn unavailable(&self) -> &BTreeMap<ResponderId, String> {
        &self.unavailable
    }

    /// Number of registered responders
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no responder is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check every responder concurrently
    pub async fn health_report(&self) -> Vec<ResponderHealth> {
        let checks = self.entries.values().map(|entry| async move {
            let healthy = entry.config.enabled && entry.adapter.health_check().await;
            ResponderHealth {
                id: entry.config.id.clone(),
                label: entry.config.label().to_string(),
                backend: entry.adapter.name().to_string(),
                enabled: entry.config.enabled,
                healthy,
            }
        });
        join_all(checks).await
    }
}
