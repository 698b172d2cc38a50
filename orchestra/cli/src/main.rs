//! Orchestra CLI
//!
//! Command-line surface over `orchestra-core`: classify text, send a query to
//! one or more responders and watch them stream, or list what is configured.
//!
//! # Usage
//!
//! ```bash
//! # How would this be routed?
//! orchestra classify "天气 北京"
//!
//! # Compare two models side by side
//! orchestra ask -r local -r gpt "Explain borrow checking in one paragraph"
//!
//! # Check every configured responder
//! orchestra responders --health
//! ```
//!
//! # Environment Variables
//!
//! - `ORCHESTRA_CONFIG`: Path to the TOML configuration file
//! - `ORCHESTRA_LOG_LEVEL`: Log level (default: info)
//! - `RUST_LOG`: Full tracing filter, takes precedence over the log level

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio::io::{AsyncWriteExt, Stdout};
use tracing_subscriber::EnvFilter;

use orchestra_core::{
    classify, default_config_path, load_config_from_path, Attachment, ConfigOverrides,
    ConversationId, DirectOutcome, EnvCredentials, InMemoryMessageStore, OrchestraConfig,
    Orchestrator, Request, ResponderKind, ResponderRegistry, RunSummary, SessionSnapshot,
    SessionState, TracingReporter,
};

/// Orchestra - fan one query out to many responders and stream the answers
#[derive(Parser, Debug)]
#[command(name = "orchestra")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, env = "ORCHESTRA_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "ORCHESTRA_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Default per-session timeout in milliseconds
    #[arg(long, value_name = "MS", global = true)]
    default_timeout_ms: Option<u64>,

    /// How long a cancelled adapter may take to stop, in milliseconds
    #[arg(long, value_name = "MS", global = true)]
    cancel_grace_ms: Option<u64>,

    /// Minimum interval between store patches, in milliseconds
    #[arg(long, value_name = "MS", global = true)]
    patch_throttle_ms: Option<u64>,

    /// Maximum responders per request
    #[arg(long, value_name = "N", global = true)]
    max_sessions: Option<usize>,

    /// Switch a feature off (weather, stock, news, search, slash-commands)
    #[arg(long = "disable", value_name = "FEATURE", global = true)]
    disabled_features: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show how a piece of text would be routed
    Classify {
        /// Text to classify
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Send a query and stream the responses
    Ask(AskArgs),

    /// List configured responders
    Responders {
        /// Check each responder's backend
        #[arg(long)]
        health: bool,
    },
}

#[derive(ClapArgs, Debug)]
struct AskArgs {
    /// Responder to ask (repeat to compare several)
    #[arg(short, long = "responder", value_name = "ID")]
    responders: Vec<String>,

    /// System prompt
    #[arg(long)]
    system: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Maximum tokens to generate
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Timeout for this request in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Text file to attach (repeatable)
    #[arg(short, long = "attach", value_name = "FILE")]
    attachments: Vec<PathBuf>,

    /// Conversation the messages belong to
    #[arg(long, default_value = "cli")]
    conversation: String,

    /// Query text
    #[arg(required = true, num_args = 1..)]
    text: Vec<String>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ms) = self.default_timeout_ms {
            overrides = overrides.with_default_timeout_ms(ms);
        }
        if let Some(ms) = self.cancel_grace_ms {
            overrides = overrides.with_cancel_grace_ms(ms);
        }
        if let Some(ms) = self.patch_throttle_ms {
            overrides = overrides.with_patch_throttle_ms(ms);
        }
        if let Some(max) = self.max_sessions {
            overrides = overrides.with_max_concurrent_sessions(max);
        }
        for feature in &self.disabled_features {
            overrides = overrides.with_disabled_feature(feature.clone());
        }
        overrides
    }
}

/// Initialize logging
///
/// Logs go to stderr so stdout carries only responder output.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("orchestra_cli={level},orchestra_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

/// Resolve configuration before the runtime starts
fn resolve_config(args: &Args) -> Result<OrchestraConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config
        .validate()
        .context("Invalid configuration after command-line overrides")?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = resolve_config(&args)?;
    tracing::debug!(
        source = %config.source(),
        responders = config.responders.len(),
        "Configuration resolved"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(run(args.command, config))
}

async fn run(command: Command, config: OrchestraConfig) -> Result<()> {
    let mut out = tokio::io::stdout();

    match command {
        Command::Classify { text } => {
            let classification = classify(&text.join(" "));
            let json = serde_json::to_string_pretty(&classification)?;
            emit_line(&mut out, &json).await
        }
        Command::Responders { health } => {
            let registry = ResponderRegistry::from_configs(&config.responders, &EnvCredentials);
            list_responders(&mut out, &registry, health).await
        }
        Command::Ask(ask) => {
            let registry = ResponderRegistry::from_configs(&config.responders, &EnvCredentials);
            run_ask(&mut out, registry, config, ask).await
        }
    }
}

async fn emit(out: &mut Stdout, text: &str) -> Result<()> {
    out.write_all(text.as_bytes()).await?;
    out.flush().await?;
    Ok(())
}

async fn emit_line(out: &mut Stdout, text: &str) -> Result<()> {
    emit(out, &format!("{text}\n")).await
}

/// Build the request, reading attachments from disk
async fn build_request(ask: &AskArgs) -> Result<Request> {
    let mut request = Request::new(ConversationId::new(ask.conversation.clone()), ask.text.join(" "));

    for id in &ask.responders {
        request = request.with_responder(id.as_str());
    }
    if let Some(system) = &ask.system {
        request = request.with_system(system.clone());
    }
    if let Some(temperature) = ask.temperature {
        request = request.with_temperature(temperature);
    }
    if let Some(max_tokens) = ask.max_tokens {
        request = request.with_max_tokens(max_tokens);
    }
    if let Some(ms) = ask.timeout_ms {
        request = request.with_timeout(Duration::from_millis(ms));
    }

    for path in &ask.attachments {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read attachment {}", path.display()))?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        request = request.with_attachment(Attachment::new(name, content));
    }

    Ok(request)
}

async fn run_ask(
    out: &mut Stdout,
    registry: ResponderRegistry,
    config: OrchestraConfig,
    ask: AskArgs,
) -> Result<()> {
    let request = build_request(&ask).await?;

    let store = Arc::new(InMemoryMessageStore::new());
    store.push_user(&request.conversation_id, &request.text);

    let orchestrator = Orchestrator::new(
        registry,
        store.clone(),
        Arc::new(TracingReporter),
        config.orchestrator,
    );

    let mut handle = orchestrator
        .submit(request)
        .await
        .context("Request was rejected")?;
    let side_by_side = handle.session_ids().len() > 1;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            update = handle.next_update() => match update {
                Some(snapshot) => render(out, &snapshot, side_by_side).await?,
                None => break,
            },
            _ = &mut ctrl_c, if !interrupted => {
                tracing::warn!("Interrupted, cancelling outstanding sessions");
                interrupted = true;
                handle.cancel();
            }
        }
    }

    let summary = handle.wait().await;
    report(out, &summary).await?;

    if let Some(DirectOutcome::Failed { responder, error }) = &summary.direct {
        bail!("{responder} failed: {error}");
    }
    if !summary.sessions.is_empty()
        && summary.completed_count() == 0
        && summary.cancelled_count() == 0
    {
        bail!("every responder failed");
    }
    Ok(())
}

/// Render one snapshot
///
/// A single session streams straight to stdout. With several sessions the
/// chunks would interleave, so each response is printed once it is terminal.
async fn render(out: &mut Stdout, snapshot: &SessionSnapshot, side_by_side: bool) -> Result<()> {
    if !side_by_side {
        if let Some(chunk) = &snapshot.latest_chunk {
            emit(out, chunk).await?;
        }
    }

    if !snapshot.is_terminal() {
        return Ok(());
    }

    match snapshot.state {
        SessionState::Completed if side_by_side => {
            emit_line(out, &format!("── {} ──", snapshot.responder_label)).await?;
            emit_line(out, &snapshot.content).await?;
        }
        SessionState::Completed => emit_line(out, "").await?,
        SessionState::Failed => {
            let error = snapshot
                .error
                .as_ref()
                .map_or_else(|| "unknown error".to_string(), ToString::to_string);
            emit_line(out, &format!("[{}] failed: {error}", snapshot.responder_label)).await?;
        }
        SessionState::Cancelled => {
            emit_line(out, &format!("[{}] cancelled", snapshot.responder_label)).await?;
        }
        SessionState::Pending | SessionState::Streaming => {}
    }
    Ok(())
}

/// Print the direct answer (network commands) or per-session metrics
async fn report(out: &mut Stdout, summary: &RunSummary) -> Result<()> {
    match &summary.direct {
        Some(DirectOutcome::Answered { text, .. }) => emit_line(out, text).await?,
        Some(DirectOutcome::Disabled { kind, .. }) => {
            emit_line(out, &format!("The {kind} feature is currently disabled.")).await?;
        }
        Some(DirectOutcome::Failed { .. }) | None => {}
    }

    if summary.sessions.is_empty() {
        return Ok(());
    }

    emit_line(out, "").await?;
    for metrics in summary.metrics() {
        let ttft = metrics
            .time_to_first_chunk
            .map_or_else(|| "-".to_string(), |d| format!("{}ms", d.as_millis()));
        emit_line(
            out,
            &format!(
                "{:<16} {:>7}ms  ttft {:>7}  {:>5} tokens  {:>7.1} tok/s  ${:.6}",
                metrics.responder_id.to_string(),
                metrics.latency.as_millis(),
                ttft,
                metrics.token_count,
                metrics.tokens_per_second,
                metrics.cost,
            ),
        )
        .await?;
    }

    emit_line(
        out,
        &format!(
            "{} sessions: {} completed, {} failed, {} cancelled",
            summary.sessions.len(),
            summary.completed_count(),
            summary.failed_count(),
            summary.cancelled_count(),
        ),
    )
    .await
}

async fn list_responders(out: &mut Stdout, registry: &ResponderRegistry, health: bool) -> Result<()> {
    if registry.is_empty() && registry.unavailable().is_empty() {
        return emit_line(out, "No responders configured").await;
    }

    if health {
        for check in registry.health_report().await {
            let status = match (check.enabled, check.healthy) {
                (false, _) => "disabled",
                (true, true) => "healthy",
                (true, false) => "unreachable",
            };
            emit_line(
                out,
                &format!(
                    "{:<16} {:<24} {:<10} {status}",
                    check.id.to_string(),
                    check.label,
                    check.backend
                ),
            )
            .await?;
        }
    } else {
        for entry in registry.iter() {
            let backend = match &entry.config.kind {
                ResponderKind::Model { provider, model, .. } => format!("{provider}/{model}"),
                ResponderKind::NetworkService { command, .. } => format!("network:{command}"),
            };
            let enabled = if entry.config.enabled { "" } else { " (disabled)" };
            emit_line(
                out,
                &format!("{:<16} {backend}{enabled}", entry.config.id.to_string()),
            )
            .await?;
        }
    }

    for (id, reason) in registry.unavailable() {
        emit_line(out, &format!("{:<16} unavailable: {reason}", id.to_string())).await?;
    }
    Ok(())
}
