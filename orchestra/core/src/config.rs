//! Orchestra Configuration
//!
//! Configuration is read from `~/.config/orchestra/orchestra.toml`.
//!
//! # Configuration Priority
//!
//! Values are applied with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [orchestrator]
//! default_timeout_ms = 60000
//! cancel_grace_ms = 2000
//! patch_throttle_ms = 0
//! chunk_buffer = 64
//! max_concurrent_sessions = 16
//!
//! [features]
//! weather = true
//! stock = false
//! slash_commands = true
//!
//! [[responders]]
//! id = "local"
//! kind = "model"
//! provider = "ollama"
//! model = "llama3.2"
//!
//! [[responders]]
//! id = "gpt"
//! kind = "model"
//! provider = "openai"
//! model = "gpt-4o-mini"
//! credentials = "OPENAI_API_KEY"
//! cost_per_token = 0.0000006
//!
//! [[responders]]
//! id = "weather"
//! kind = "network-service"
//! command = "weather"
//! endpoint = "https://weather.example/api"
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classifier::NetworkCommandKind;
use crate::responder::{ResponderConfig, ResponderKind};

// =============================================================================
// Error Types
// =============================================================================

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("cannot read {path}: {source}")]
    ReadError {
        /// File that could not be read
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("malformed configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Values parsed but are not usable
    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the effective configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Command-line flag
    Cli,
    /// `ORCHESTRA_*` environment variable
    Env,
    /// `orchestra.toml`
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Effective Configuration
// =============================================================================

/// Feature switches
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Weather lookups
    pub weather: bool,
    /// Stock quotes
    pub stock: bool,
    /// News headlines
    pub news: bool,
    /// Web search
    pub search: bool,
    /// Slash-command expansion
    pub slash_commands: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            weather: true,
            stock: true,
            news: true,
            search: true,
            slash_commands: true,
        }
    }
}

impl FeatureFlags {
    /// Whether a network command kind is enabled
    #[must_use]
    pub fn network_enabled(&self, kind: NetworkCommandKind) -> bool {
        match kind {
            NetworkCommandKind::Weather => self.weather,
            NetworkCommandKind::Stock => self.stock,
            NetworkCommandKind::News => self.news,
            NetworkCommandKind::Search => self.search,
        }
    }

    /// Switch a feature off by name; returns `false` for unknown names
    pub fn disable(&mut self, name: &str) -> bool {
        let flag = match name.trim().to_ascii_lowercase().as_str() {
            "weather" => &mut self.weather,
            "stock" => &mut self.stock,
            "news" => &mut self.news,
            "search" => &mut self.search,
            "slash_commands" | "slash-commands" => &mut self.slash_commands,
            _ => return false,
        };
        *flag = false;
        true
    }
}

/// Orchestrator limits and timings
#[derive(Clone, Debug, PartialEq)]
pub struct OrchestratorConfig {
    /// Bound on each adapter call when neither the request nor the responder sets one
    pub default_timeout: Duration,
    /// Time an adapter gets to return after cancellation before it is dropped
    pub cancel_grace: Duration,
    /// Minimum interval between in-progress store patches (zero = every fragment)
    pub patch_throttle: Duration,
    /// Per-session fragment channel capacity
    pub chunk_buffer: usize,
    /// Maximum sessions in one run
    pub max_concurrent_sessions: usize,
    /// Feature switches
    pub features: FeatureFlags,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(60),
            cancel_grace: Duration::from_secs(2),
            patch_throttle: Duration::ZERO,
            chunk_buffer: 64,
            max_concurrent_sessions: 16,
            features: FeatureFlags::default(),
        }
    }
}

/// Complete configuration: orchestrator settings plus responders
#[derive(Clone, Debug)]
pub struct OrchestraConfig {
    /// Orchestrator settings
    pub orchestrator: OrchestratorConfig,

    /// Configured responders
    pub responders: Vec<ResponderConfig>,

    /// File the values were read from, when one existed
    pub config_file_path: Option<PathBuf>,

    /// Highest-priority layer that changed a value
    source: ConfigSource,
}

impl Default for OrchestraConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            responders: Vec::new(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl OrchestraConfig {
    /// Built-in defaults, no responders
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest-priority layer that changed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Record which layer changed a value
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check values that would make the orchestrator misbehave
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.chunk_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.chunk_buffer must be at least 1".to_string(),
            ));
        }
        if self.orchestrator.max_concurrent_sessions == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_concurrent_sessions must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for responder in &self.responders {
            if responder.id.as_str().trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "responder id must not be empty".to_string(),
                ));
            }
            if !seen.insert(responder.id.clone()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate responder id `{}`",
                    responder.id
                )));
            }
            match &responder.kind {
                ResponderKind::Model {
                    model,
                    cost_per_token,
                    ..
                } => {
                    if model.trim().is_empty() {
                        return Err(ConfigError::ValidationError(format!(
                            "responder `{}` has an empty model name",
                            responder.id
                        )));
                    }
                    if *cost_per_token < 0.0 || !cost_per_token.is_finite() {
                        return Err(ConfigError::ValidationError(format!(
                            "responder `{}` has an invalid cost_per_token",
                            responder.id
                        )));
                    }
                }
                ResponderKind::NetworkService { endpoint, .. } => {
                    if endpoint.trim().is_empty() {
                        return Err(ConfigError::ValidationError(format!(
                            "responder `{}` has an empty endpoint",
                            responder.id
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Orchestrator section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorToml {
    /// Default adapter call bound in milliseconds
    pub default_timeout_ms: Option<u64>,

    /// Cancellation grace period in milliseconds
    pub cancel_grace_ms: Option<u64>,

    /// Store patch throttle in milliseconds
    pub patch_throttle_ms: Option<u64>,

    /// Fragment channel capacity
    pub chunk_buffer: Option<usize>,

    /// Maximum sessions per run
    pub max_concurrent_sessions: Option<usize>,
}

/// Features section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesToml {
    /// Weather lookups
    pub weather: Option<bool>,
    /// Stock quotes
    pub stock: Option<bool>,
    /// News headlines
    pub news: Option<bool>,
    /// Web search
    pub search: Option<bool>,
    /// Slash-command expansion
    pub slash_commands: Option<bool>,
}

/// `orchestra.toml` as written on disk
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestraToml {
    /// Orchestrator section
    pub orchestrator: OrchestratorToml,

    /// Features section
    pub features: FeaturesToml,

    /// Responder list
    pub responders: Vec<ResponderConfig>,
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// `$XDG_CONFIG_HOME/orchestra/orchestra.toml`
///
/// Returns `$XDG_CONFIG_HOME/orchestra/orchestra.toml` or
/// `~/.config/orchestra/orchestra.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("orchestra").join("orchestra.toml"))
}

/// Load the default file, then apply environment overrides
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if the
/// result fails validation. A missing config file is not an error.
pub fn load_config() -> Result<OrchestraConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load `path` (if it exists), then apply environment overrides
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read, parsed, or
/// validated.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<OrchestraConfig, ConfigError> {
    let mut config = OrchestraConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: OrchestraToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                responders = config.responders.len(),
                "Configuration file loaded"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "No configuration file, using built-in defaults"
            );
        }
    }

    apply_env_config(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Overlay file values onto `config`
fn apply_toml_config(config: &mut OrchestraConfig, toml: OrchestraToml) {
    let orchestrator = &mut config.orchestrator;
    if let Some(ms) = toml.orchestrator.default_timeout_ms {
        orchestrator.default_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.orchestrator.cancel_grace_ms {
        orchestrator.cancel_grace = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.orchestrator.patch_throttle_ms {
        orchestrator.patch_throttle = Duration::from_millis(ms);
    }
    if let Some(buffer) = toml.orchestrator.chunk_buffer {
        orchestrator.chunk_buffer = buffer;
    }
    if let Some(max) = toml.orchestrator.max_concurrent_sessions {
        orchestrator.max_concurrent_sessions = max;
    }

    let features = &mut orchestrator.features;
    if let Some(enabled) = toml.features.weather {
        features.weather = enabled;
    }
    if let Some(enabled) = toml.features.stock {
        features.stock = enabled;
    }
    if let Some(enabled) = toml.features.news {
        features.news = enabled;
    }
    if let Some(enabled) = toml.features.search {
        features.search = enabled;
    }
    if let Some(enabled) = toml.features.slash_commands {
        features.slash_commands = enabled;
    }

    config.responders = toml.responders;
}

/// Overlay `ORCHESTRA_*` variables, read through `env`
fn apply_env_config(config: &mut OrchestraConfig, env: impl Fn(&str) -> Option<String>) {
    let millis = |key: &str| env(key).and_then(|v| v.trim().parse::<u64>().ok());

    if let Some(ms) = millis("ORCHESTRA_TIMEOUT_MS") {
        config.orchestrator.default_timeout = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = millis("ORCHESTRA_CANCEL_GRACE_MS") {
        config.orchestrator.cancel_grace = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = millis("ORCHESTRA_PATCH_THROTTLE_MS") {
        config.orchestrator.patch_throttle = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(max) = env("ORCHESTRA_MAX_SESSIONS").and_then(|v| v.trim().parse::<usize>().ok()) {
        config.orchestrator.max_concurrent_sessions = max;
        config.source = ConfigSource::Env;
    }
    if let Some(disabled) = env("ORCHESTRA_DISABLED_FEATURES") {
        for name in disabled.split(',').filter(|n| !n.trim().is_empty()) {
            if config.orchestrator.features.disable(name) {
                config.source = ConfigSource::Env;
            } else {
                tracing::warn!(feature = name.trim(), "Ignoring unknown feature name");
            }
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, the highest-priority layer
///
/// Applied after [`load_config`] by the CLI.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Default timeout override (milliseconds)
    pub default_timeout_ms: Option<u64>,

    /// Cancellation grace override (milliseconds)
    pub cancel_grace_ms: Option<u64>,

    /// Patch throttle override (milliseconds)
    pub patch_throttle_ms: Option<u64>,

    /// Session limit override
    pub max_concurrent_sessions: Option<usize>,

    /// Features to switch off
    pub disabled_features: Vec<String>,
}

impl ConfigOverrides {
    /// No overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set default timeout override
    #[must_use]
    pub fn with_default_timeout_ms(mut self, ms: u64) -> Self {
        self.default_timeout_ms = Some(ms);
        self
    }

    /// Set cancellation grace override
    #[must_use]
    pub fn with_cancel_grace_ms(mut self, ms: u64) -> Self {
        self.cancel_grace_ms = Some(ms);
        self
    }

    /// Set patch throttle override
    #[must_use]
    pub fn with_patch_throttle_ms(mut self, ms: u64) -> Self {
        self.patch_throttle_ms = Some(ms);
        self
    }

    /// Set session limit override
    #[must_use]
    pub fn with_max_concurrent_sessions(mut self, max: usize) -> Self {
        self.max_concurrent_sessions = Some(max);
        self
    }

    /// Disable a feature
    #[must_use]
    pub fn with_disabled_feature(mut self, name: impl Into<String>) -> Self {
        self.disabled_features.push(name.into());
        self
    }

    /// Overlay onto `config`
    pub fn apply(&self, config: &mut OrchestraConfig) {
        if self.default_timeout_ms.is_some()
            || self.cancel_grace_ms.is_some()
            || self.patch_throttle_ms.is_some()
            || self.max_concurrent_sessions.is_some()
            || !self.disabled_features.is_empty()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ms) = self.default_timeout_ms {
            config.orchestrator.default_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.cancel_grace_ms {
            config.orchestrator.cancel_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = self.patch_throttle_ms {
            config.orchestrator.patch_throttle = Duration::from_millis(ms);
        }
        if let Some(max) = self.max_concurrent_sessions {
            config.orchestrator.max_concurrent_sessions = max;
        }
        for name in &self.disabled_features {
            if !config.orchestrator.features.disable(name) {
                tracing::warn!(feature = %name, "Ignoring unknown feature name");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
