//! Response Metrics
//!
//! Two layers:
//! - [`collect`]: pure function deriving latency, throughput and cost from
//!   one Completed [`StreamSession`]
//! - [`MetricsRegistry`]: per-responder aggregates (counters and latency
//!   histograms) recorded by the orchestrator as sessions end

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::responder::{AdapterError, ResponderId};
use crate::session::{SessionId, SessionState, StreamSession};

// ============================================================================
// Per-session Metrics
// ============================================================================

/// Metrics of one Completed session
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionMetrics {
    /// Session
    pub session_id: SessionId,
    /// Responder
    pub responder_id: ResponderId,
    /// Wall-clock time from start to completion
    pub latency: Duration,
    /// Time until the first fragment arrived
    pub time_to_first_chunk: Option<Duration>,
    /// Generated tokens
    pub token_count: u32,
    /// Generated tokens per second of latency
    pub tokens_per_second: f64,
    /// Cost recorded at completion (provider figure, else tokens × price)
    pub cost: f64,
}

/// Derive metrics from a Completed session
///
/// Returns `None` for any other state. Depends only on the session's terminal
/// fields, so repeated calls give identical results.
#[must_use]
pub fn collect(session: &StreamSession) -> Option<SessionMetrics> {
    if session.state() != SessionState::Completed {
        return None;
    }
    let ended_at = session.ended_at()?;
    let token_count = session.token_count().unwrap_or(0);

    let latency = (ended_at - session.started_at())
        .to_std()
        .unwrap_or(Duration::ZERO);
    let time_to_first_chunk = session
        .first_chunk_at()
        .and_then(|first| (first - session.started_at()).to_std().ok());

    let seconds = latency.as_secs_f64();
    let tokens_per_second = if seconds > 0.0 {
        f64::from(token_count) / seconds
    } else {
        0.0
    };

    Some(SessionMetrics {
        session_id: session.id(),
        responder_id: session.responder().id.clone(),
        latency,
        time_to_first_chunk,
        token_count,
        tokens_per_second,
        cost: session.estimated_cost().unwrap_or(0.0),
    })
}

// ============================================================================
// Histogram for Latency Tracking
// ============================================================================

/// A histogram for tracking latency distributions
#[derive(Debug)]
pub struct Histogram {
    /// Bucket upper bounds (milliseconds)
    buckets: Vec<u64>,
    /// Count per bucket
    counts: Vec<AtomicU64>,
    total_count: AtomicU64,
    sum: AtomicU64,
    max: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with the given bucket upper bounds
    #[must_use]
    pub fn new(buckets: Vec<u64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            total_count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    /// Create with default latency buckets (in milliseconds)
    #[must_use]
    pub fn latency_default() -> Self {
        Self::new(vec![
            10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000, 60_000, 120_000,
        ])
    }

    /// Record a value
    pub fn record(&self, value: u64) {
        let last = self.buckets.len().saturating_sub(1);
        let bucket_idx = self
            .buckets
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(last);

        if let Some(count) = self.counts.get(bucket_idx) {
            count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
    }

    /// Get histogram snapshot
    #[must_use]
    pub fn snapshot(&self) -> HistogramSnapshot {
        let total = self.total_count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);
        HistogramSnapshot {
            buckets: self.buckets.clone(),
            counts: self
                .counts
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
            total,
            sum,
            max: self.max.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of histogram data
#[derive(Clone, Debug, Serialize)]
pub struct HistogramSnapshot {
    /// Bucket upper bounds
    pub buckets: Vec<u64>,
    /// Count per bucket
    pub counts: Vec<u64>,
    /// Number of samples
    pub total: u64,
    /// Sum of samples
    pub sum: u64,
    /// Largest sample
    pub max: u64,
}

impl HistogramSnapshot {
    /// Upper bound of the bucket holding the `p` quantile
    #[must_use]
    pub fn percentile(&self, p: f64) -> u64 {
        if self.total == 0 {
            return 0;
        }

        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let target = ((self.total as f64 * p).ceil() as u64).max(1);
        let mut cumulative = 0u64;

        for (bound, &count) in self.buckets.iter().zip(&self.counts) {
            cumulative += count;
            if cumulative >= target {
                return (*bound).min(self.max);
            }
        }
        self.max
    }

    /// Mean sample
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.sum as f64 / self.total as f64
        }
    }

    /// Get p50
    #[must_use]
    pub fn p50(&self) -> u64 {
        self.percentile(0.5)
    }

    /// Get p90
    #[must_use]
    pub fn p90(&self) -> u64 {
        self.percentile(0.9)
    }

    /// Get p99
    #[must_use]
    pub fn p99(&self) -> u64 {
        self.percentile(0.99)
    }
}

// ============================================================================
// Counter
// ============================================================================

/// A simple atomic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Increment by one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by `n`
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Per-Responder Metrics
// ============================================================================

/// Aggregates for a single responder
#[derive(Debug)]
pub struct ResponderMetrics {
    /// Responder
    pub responder_id: ResponderId,
    /// Sessions started
    pub requests: Counter,
    /// Sessions Completed
    pub completed: Counter,
    /// Sessions Failed
    pub failed: Counter,
    /// Sessions Cancelled
    pub cancelled: Counter,
    /// Failures caused by timeouts
    pub timeouts: Counter,
    /// Tokens generated by Completed sessions
    pub tokens_generated: Counter,
    /// Completed-session latency (ms)
    pub latency: Histogram,
    /// Time to first fragment (ms)
    pub ttft: Histogram,
}

impl ResponderMetrics {
    fn new(responder_id: ResponderId) -> Self {
        Self {
            responder_id,
            requests: Counter::default(),
            completed: Counter::default(),
            failed: Counter::default(),
            cancelled: Counter::default(),
            timeouts: Counter::default(),
            tokens_generated: Counter::default(),
            latency: Histogram::latency_default(),
            ttft: Histogram::latency_default(),
        }
    }

    /// Share of finished sessions that failed
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn error_rate(&self) -> f64 {
        let finished = self.completed.get() + self.failed.get();
        if finished == 0 {
            return 0.0;
        }
        self.failed.get() as f64 / finished as f64
    }

    /// Average tokens per second across Completed sessions
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_tokens_per_sec(&self) -> f64 {
        let latency = self.latency.snapshot();
        if latency.sum == 0 {
            return 0.0;
        }
        self.tokens_generated.get() as f64 / (latency.sum as f64 / 1000.0)
    }

    /// Get summary
    #[must_use]
    pub fn summary(&self) -> ResponderMetricsSummary {
        let latency = self.latency.snapshot();
        let ttft = self.ttft.snapshot();

        ResponderMetricsSummary {
            responder_id: self.responder_id.clone(),
            requests: self.requests.get(),
            completed: self.completed.get(),
            failed: self.failed.get(),
            cancelled: self.cancelled.get(),
            timeouts: self.timeouts.get(),
            error_rate: self.error_rate(),
            latency_p50_ms: latency.p50(),
            latency_p90_ms: latency.p90(),
            latency_p99_ms: latency.p99(),
            ttft_p50_ms: ttft.p50(),
            ttft_p90_ms: ttft.p90(),
            ttft_p99_ms: ttft.p99(),
            tokens_generated: self.tokens_generated.get(),
            tokens_per_second: self.avg_tokens_per_sec(),
        }
    }
}

/// Summary of responder metrics
#[derive(Clone, Debug, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct ResponderMetricsSummary {
    pub responder_id: ResponderId,
    pub requests: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timeouts: u64,
    pub error_rate: f64,
    pub latency_p50_ms: u64,
    pub latency_p90_ms: u64,
    pub latency_p99_ms: u64,
    pub ttft_p50_ms: u64,
    pub ttft_p90_ms: u64,
    pub ttft_p99_ms: u64,
    pub tokens_generated: u64,
    pub tokens_per_second: f64,
}

// ============================================================================
// Registry
// ============================================================================

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Per-responder aggregates, shared across runs
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    responders: DashMap<ResponderId, Arc<ResponderMetrics>>,
}

impl MetricsRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create metrics for a responder
    pub fn responder(&self, id: &ResponderId) -> Arc<ResponderMetrics> {
        if let Some(metrics) = self.responders.get(id) {
            return Arc::clone(metrics.value());
        }
        Arc::clone(
            self.responders
                .entry(id.clone())
                .or_insert_with(|| Arc::new(ResponderMetrics::new(id.clone())))
                .value(),
        )
    }

    /// Record a session launch
    pub fn record_start(&self, id: &ResponderId) {
        self.responder(id).requests.inc();
    }

    /// Record a terminal session
    pub fn record_session(&self, session: &StreamSession) {
        let metrics = self.responder(&session.responder().id);
        match session.state() {
            SessionState::Completed => {
                metrics.completed.inc();
                if let Some(collected) = collect(session) {
                    metrics.latency.record(millis(collected.latency));
                    if let Some(ttft) = collected.time_to_first_chunk {
                        metrics.ttft.record(millis(ttft));
                    }
                    metrics.tokens_generated.add(u64::from(collected.token_count));
                }
            }
            SessionState::Failed => {
                metrics.failed.inc();
                if session.error() == Some(&AdapterError::Timeout) {
                    metrics.timeouts.inc();
                }
            }
            SessionState::Cancelled => metrics.cancelled.inc(),
            SessionState::Pending | SessionState::Streaming => {}
        }
    }

    /// Summaries of every responder seen, ordered by id
    #[must_use]
    pub fn summaries(&self) -> Vec<ResponderMetricsSummary> {
        let mut summaries: Vec<_> = self
            .responders
            .iter()
            .map(|entry| entry.value().summary())
            .collect();
        summaries.sort_by(|a, b| a.responder_id.cmp(&b.responder_id));
        summaries
    }

    /// Summary for one responder
    #[must_use]
    pub fn summary(&self, id: &ResponderId) -> Option<ResponderMetricsSummary> {
        self.responders.get(id).map(|m| m.value().summary())
    }
}
