//! Responder Configuration
//!
//! Describes each callable backend. Loaded before any request and read-only
//! while a request runs.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classifier::NetworkCommandKind;

/// Responder identifier (unique within a registry)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponderId(pub String);

impl ResponderId {
    /// Borrow as `&str`
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResponderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResponderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ResponderId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Language-model provider families
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Ollama (local server, NDJSON streaming)
    Ollama,
    /// OpenAI-compatible chat completions (SSE streaming)
    #[serde(alias = "openai-compatible")]
    OpenAi,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::OpenAi => write!(f, "openai"),
        }
    }
}

/// What kind of backend a responder is
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResponderKind {
    /// Language-model provider
    Model {
        /// Provider family
        provider: ProviderKind,
        /// Concrete model id
        model: String,
        /// Credentials reference (env var name or key in a static source)
        #[serde(default)]
        credentials: Option<String>,
        /// Endpoint override
        #[serde(default)]
        base_url: Option<String>,
        /// Price of one generated token
        #[serde(default)]
        cost_per_token: f64,
    },
    /// Auxiliary network-data service
    NetworkService {
        /// Sub-command this service answers
        command: NetworkCommandKind,
        /// Service endpoint
        endpoint: String,
        /// Credentials reference
        #[serde(default)]
        credentials: Option<String>,
    },
}

/// One callable backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponderConfig {
    /// Unique id
    pub id: ResponderId,
    /// Name shown to users
    #[serde(default)]
    pub display_name: Option<String>,
    /// Disabled responders are never called
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Per-responder call bound (milliseconds)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Backend description
    #[serde(flatten)]
    pub kind: ResponderKind,
}

fn default_enabled() -> bool {
    true
}

impl ResponderConfig {
    /// Model responder
    pub fn model(
        id: impl Into<ResponderId>,
        provider: ProviderKind,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            enabled: true,
            timeout_ms: None,
            kind: ResponderKind::Model {
                provider,
                model: model.into(),
                credentials: None,
                base_url: None,
                cost_per_token: 0.0,
            },
        }
    }

    /// Network-service responder
    pub fn network_service(
        id: impl Into<ResponderId>,
        command: NetworkCommandKind,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            enabled: true,
            timeout_ms: None,
            kind: ResponderKind::NetworkService {
                command,
                endpoint: endpoint.into(),
                credentials: None,
            },
        }
    }

    /// Set the credentials reference
    #[must_use]
    pub fn with_credentials(mut self, reference: impl Into<String>) -> Self {
        match &mut self.kind {
            ResponderKind::Model { credentials, .. }
            | ResponderKind::NetworkService { credentials, .. } => {
                *credentials = Some(reference.into());
            }
        }
        self
    }

    /// Set the endpoint override (model responders only)
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        if let ResponderKind::Model { base_url, .. } = &mut self.kind {
            *base_url = Some(url.into());
        }
        self
    }

    /// Set the per-token cost (model responders only)
    #[must_use]
    pub fn with_cost_per_token(mut self, cost: f64) -> Self {
        if let ResponderKind::Model { cost_per_token, .. } = &mut self.kind {
            *cost_per_token = cost;
        }
        self
    }

    /// Set the per-responder timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Enable or disable
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Name to show users
    #[must_use]
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(self.id.as_str())
    }

    /// Per-token cost (0 for network services)
    #[must_use]
    pub fn cost_per_token(&self) -> f64 {
        match &self.kind {
            ResponderKind::Model { cost_per_token, .. } => *cost_per_token,
            ResponderKind::NetworkService { .. } => 0.0,
        }
    }

    /// Per-responder timeout
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Credentials reference
    #[must_use]
    pub fn credentials_ref(&self) -> Option<&str> {
        match &self.kind {
            ResponderKind::Model { credentials, .. }
            | ResponderKind::NetworkService { credentials, .. } => credentials.as_deref(),
        }
    }

    /// Network command answered, if this is a network service
    #[must_use]
    pub fn network_command(&self) -> Option<NetworkCommandKind> {
        match &self.kind {
            ResponderKind::NetworkService { command, .. } => Some(*command),
            ResponderKind::Model { .. } => None,
        }
    }

    /// Whether this is a model responder
    #[must_use]
    pub fn is_model(&self) -> bool {
        matches!(self.kind, ResponderKind::Model { .. })
    }
}
