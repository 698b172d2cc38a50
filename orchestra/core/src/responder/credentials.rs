//! Provider Credentials
//!
//! Resolves a [`ResponderConfig`] to the secret and endpoint its adapter
//! needs. Read-only and synchronous.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use super::config::{ProviderKind, ResponderConfig, ResponderKind};

/// Default Ollama endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default OpenAI-compatible endpoint
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Errors resolving credentials
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    /// The referenced secret does not exist
    #[error("credential `{reference}` for responder `{responder}` is not set")]
    Missing {
        /// Responder id
        responder: String,
        /// Credentials reference
        reference: String,
    },

    /// The provider needs a key but none is referenced
    #[error("responder `{0}` requires credentials but none are configured")]
    NotConfigured(String),
}

/// Secret and endpoint for one responder
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProviderCredentials {
    /// API key, if the backend uses one
    pub api_key: Option<String>,
    /// Resolved endpoint
    pub endpoint: String,
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Source of provider secrets
pub trait CredentialSource: Send + Sync {
    /// Look up a secret by reference
    fn secret(&self, reference: &str) -> Option<String>;

    /// Resolve everything a responder needs
    ///
    /// # Errors
    ///
    /// Fails when a referenced secret is missing, or when an OpenAI-compatible
    /// provider has no reference at all.
    fn resolve(&self, config: &ResponderConfig) -> Result<ProviderCredentials, CredentialError> {
        let api_key = match config.credentials_ref() {
            Some(reference) => Some(self.secret(reference).ok_or_else(|| {
                CredentialError::Missing {
                    responder: config.id.to_string(),
                    reference: reference.to_string(),
                }
            })?),
            None => None,
        };

        let endpoint = match &config.kind {
            ResponderKind::Model {
                provider, base_url, ..
            } => {
                if *provider == ProviderKind::OpenAi && api_key.is_none() {
                    return Err(CredentialError::NotConfigured(config.id.to_string()));
                }
                base_url.clone().unwrap_or_else(|| match provider {
                    ProviderKind::Ollama => DEFAULT_OLLAMA_URL.to_string(),
                    ProviderKind::OpenAi => DEFAULT_OPENAI_URL.to_string(),
                })
            }
            ResponderKind::NetworkService { endpoint, .. } => endpoint.clone(),
        };

        Ok(ProviderCredentials { api_key, endpoint })
    }
}

/// Secrets from environment variables named by the reference
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn secret(&self, reference: &str) -> Option<String> {
        std::env::var(reference).ok().filter(|v| !v.trim().is_empty())
    }
}

/// Secrets from an in-memory map
#[derive(Clone, Default)]
pub struct StaticCredentials {
    secrets: HashMap<String, String>,
}

impl StaticCredentials {
    /// Empty source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a secret
    #[must_use]
    pub fn with(mut self, reference: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets.insert(reference.into(), secret.into());
        self
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("references", &self.secrets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CredentialSource for StaticCredentials {
    fn secret(&self, reference: &str) -> Option<String> {
        self.secrets.get(reference).cloned()
    }
}
