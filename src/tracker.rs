//! Performance metrics for batch runs.
//!
//! One [`MetricsTracker`] lives for the duration of a single orchestrator
//! call. Recording methods take `&self` and are safe to call from the
//! concurrent sub-tasks of that call; snapshots are cheap value copies.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{Level, debug, error, info, trace, warn};

/// Tracks API-call performance across one batch run.
#[derive(Debug)]
pub struct MetricsTracker {
    started_at: DateTime<Utc>,
    start: Instant,
    api_calls: AtomicU64,
    success_calls: AtomicU64,
    failed_calls: AtomicU64,
    retries: AtomicU64,
    entities_processed: AtomicU64,
    /// Total latency across successful calls, microseconds.
    total_latency_us: AtomicU64,
    min_latency_us: AtomicU64,
    max_latency_us: AtomicU64,
    batch_sizes: Mutex<Vec<usize>>,
    errors_by_type: Mutex<HashMap<&'static str, u64>>,
}

impl MetricsTracker {
    /// Start tracking; the wall clock starts now.
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            start: Instant::now(),
            api_calls: AtomicU64::new(0),
            success_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            entities_processed: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            min_latency_us: AtomicU64::new(u64::MAX),
            max_latency_us: AtomicU64::new(0),
            batch_sizes: Mutex::new(Vec::new()),
            errors_by_type: Mutex::new(HashMap::new()),
        }
    }

    /// Record one logical API call. Latency feeds the min/max/avg figures
    /// only when the call succeeded.
    pub fn record_call(&self, latency: Duration, success: bool, batch_size: Option<usize>) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);

        if success {
            self.success_calls.fetch_add(1, Ordering::Relaxed);
            let us = latency.as_micros() as u64;
            self.total_latency_us.fetch_add(us, Ordering::Relaxed);
            self.min_latency_us.fetch_min(us, Ordering::Relaxed);
            self.max_latency_us.fetch_max(us, Ordering::Relaxed);
        } else {
            self.failed_calls.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(size) = batch_size {
            if size > 0 {
                self.batch_sizes.lock().push(size);
            }
        }
    }

    /// Record an observed batch size without an accompanying call sample.
    pub fn record_batch_size(&self, size: usize) {
        if size > 0 {
            self.batch_sizes.lock().push(size);
        }
    }

    /// Record retry attempts that preceded a completed call.
    pub fn record_retries(&self, count: u64) {
        if count > 0 {
            self.retries.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Record entities (detection entries) processed.
    pub fn record_entities(&self, count: u64) {
        self.entities_processed.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a failure under its error-kind key.
    pub fn record_error(&self, kind: &'static str) {
        *self.errors_by_type.lock().entry(kind).or_insert(0) += 1;
    }

    /// Snapshot the current figures.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let elapsed = self.start.elapsed();
        let total = self.api_calls.load(Ordering::Relaxed);
        let success = self.success_calls.load(Ordering::Relaxed);
        let failed = self.failed_calls.load(Ordering::Relaxed);
        let entities = self.entities_processed.load(Ordering::Relaxed);
        let total_latency = self.total_latency_us.load(Ordering::Relaxed);
        let min_latency = self.min_latency_us.load(Ordering::Relaxed);
        let max_latency = self.max_latency_us.load(Ordering::Relaxed);

        let success_rate = if total > 0 {
            success as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let avg_call_time = if success > 0 {
            (total_latency as f64 / success as f64) / 1_000_000.0
        } else {
            0.0
        };
        let entities_per_second = if elapsed.as_secs_f64() > 0.0 {
            entities as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let batch_sizes = self.batch_sizes.lock();
        // The "optimal" size is a plain mean of what was observed.
        let optimal_batch_size = if batch_sizes.is_empty() {
            0
        } else {
            batch_sizes.iter().sum::<usize>() / batch_sizes.len()
        };
        let batch_count = batch_sizes.len();
        drop(batch_sizes);

        MetricsSnapshot {
            api_calls: ApiCallStats {
                total,
                success,
                failed,
                success_rate,
            },
            time: TimeStats {
                total_seconds: elapsed.as_secs_f64(),
                start: self.started_at,
                end: self.started_at
                    + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero()),
                avg_call_time,
                min_call_time: if min_latency == u64::MAX {
                    0.0
                } else {
                    min_latency as f64 / 1_000_000.0
                },
                max_call_time: max_latency as f64 / 1_000_000.0,
            },
            retries: self.retries.load(Ordering::Relaxed),
            throughput: ThroughputStats {
                entities_processed: entities,
                entities_per_second,
            },
            batching: BatchingStats {
                batch_count,
                optimal_batch_size,
            },
            errors: self
                .errors_by_type
                .lock()
                .iter()
                .map(|(k, v)| ((*k).to_string(), *v))
                .collect(),
        }
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Call-count figures.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ApiCallStats {
    /// Total logical API calls.
    pub total: u64,
    /// Calls that succeeded.
    pub success: u64,
    /// Calls that failed after exhausting retries.
    pub failed: u64,
    /// Success percentage over all calls.
    pub success_rate: f64,
}

/// Wall-clock and latency figures. Latency statistics cover successful
/// calls only.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TimeStats {
    /// Elapsed wall-clock seconds.
    pub total_seconds: f64,
    /// Run start time.
    pub start: DateTime<Utc>,
    /// Snapshot time.
    pub end: DateTime<Utc>,
    /// Average successful-call latency in seconds.
    pub avg_call_time: f64,
    /// Fastest successful call in seconds (0 when none).
    pub min_call_time: f64,
    /// Slowest successful call in seconds.
    pub max_call_time: f64,
}

/// Entity throughput figures.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ThroughputStats {
    /// Detection entries processed.
    pub entities_processed: u64,
    /// Entries per elapsed wall-clock second.
    pub entities_per_second: f64,
}

/// Batch-size observations.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BatchingStats {
    /// Number of batches observed.
    pub batch_count: usize,
    /// Arithmetic mean of observed batch sizes.
    pub optimal_batch_size: usize,
}

/// A point-in-time copy of all metrics, shaped for export.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Call counts and success rate.
    pub api_calls: ApiCallStats,
    /// Wall-clock and latency figures.
    pub time: TimeStats,
    /// Retry attempts across all calls.
    pub retries: u64,
    /// Entity throughput.
    pub throughput: ThroughputStats,
    /// Batch-size observations.
    pub batching: BatchingStats,
    /// Failure counts keyed by error kind.
    pub errors: HashMap<String, u64>,
}

macro_rules! log_at {
    ($level:expr, $($arg:tt)*) => {
        match $level {
            Level::ERROR => error!($($arg)*),
            Level::WARN => warn!($($arg)*),
            Level::INFO => info!($($arg)*),
            Level::DEBUG => debug!($($arg)*),
            _ => trace!($($arg)*),
        }
    };
}

impl MetricsSnapshot {
    /// Render a multi-line digest through `tracing` at the given level.
    pub fn log_summary(&self, level: Level) {
        log_at!(level, "Performance summary:");
        log_at!(
            level,
            "  API calls: {} total, {} success, {} failed ({:.1}% success rate)",
            self.api_calls.total,
            self.api_calls.success,
            self.api_calls.failed,
            self.api_calls.success_rate
        );
        log_at!(level, "  Total time: {:.2}s", self.time.total_seconds);

        if self.api_calls.success > 0 {
            log_at!(
                level,
                "  Call times: avg={:.2}s, min={:.2}s, max={:.2}s",
                self.time.avg_call_time,
                self.time.min_call_time,
                self.time.max_call_time
            );
        }
        if self.retries > 0 {
            log_at!(level, "  Retries: {}", self.retries);
        }
        if self.throughput.entities_processed > 0 {
            log_at!(
                level,
                "  Throughput: {} entities in {:.2}s ({:.2} entities/sec)",
                self.throughput.entities_processed,
                self.time.total_seconds,
                self.throughput.entities_per_second
            );
        }
        if self.batching.batch_count > 0 {
            log_at!(
                level,
                "  Batching: {} batches, optimal size={}",
                self.batching.batch_count,
                self.batching.optimal_batch_size
            );
        }
        for (kind, count) in &self.errors {
            log_at!(level, "  Errors[{kind}]: {count}");
        }
    }
}
