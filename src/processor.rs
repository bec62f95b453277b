//! Batch orchestration for detection submissions.
//!
//! The processor is the caller-facing entry point for submitting many
//! payload files (JSON or CSV) through one shared client and concurrency
//! ceiling. Per-payload failures are captured and attributed to their input
//! index; failures that invalidate the whole run (bad input files,
//! authentication) propagate instead.

use crate::client::ApiClient;
use crate::config::ProcessorConfig;
use crate::convert::{CsvConverter, wildcard_match};
use crate::error::{RelayError, Result};
use crate::payload::{Payload, Summary};
use crate::tracker::{MetricsSnapshot, MetricsTracker};
use futures::future;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{Level, debug, error, info, warn};

/// Orchestrates concurrent submission of many payloads.
pub struct BatchProcessor {
    config: ProcessorConfig,
    client: ApiClient,
}

impl BatchProcessor {
    /// Create a new processor.
    pub fn new(config: ProcessorConfig) -> Result<Self> {
        let client = ApiClient::new(config.client.clone())?;
        debug!(
            batch_size = config.batch_size,
            max_concurrent = config.client.max_concurrent,
            "BatchProcessor initialized"
        );
        Ok(Self { config, client })
    }

    /// The submission client backing this processor.
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Submit multiple JSON payload files concurrently.
    ///
    /// File-level problems (missing file, malformed JSON) propagate; they
    /// are caller bugs, not transient conditions. Per-payload submission
    /// failures are captured into the report instead, except
    /// authentication failures, which abort the run.
    pub async fn process_files(&self, paths: &[PathBuf], debug: bool) -> Result<BatchReport> {
        let mut items = Vec::with_capacity(paths.len());
        for path in paths {
            let value = load_json(path).await?;
            debug!(
                file = %path.display(),
                entries = value.get("data").and_then(|v| v.as_array()).map_or(0, Vec::len),
                "loaded payload"
            );
            items.push((Some(path.clone()), value));
        }

        info!(files = items.len(), "processing payload files");
        self.run_batch(items, debug).await
    }

    /// Convert CSV detection exports and submit the results concurrently.
    ///
    /// Conversion failures propagate (bad input file); submission failures
    /// are captured per item as in [`process_files`](Self::process_files).
    pub async fn process_csv_files(&self, paths: &[PathBuf], debug: bool) -> Result<BatchReport> {
        let converter = CsvConverter::new();
        let mut items = Vec::with_capacity(paths.len());
        for path in paths {
            let payload = converter.csv_to_payload(path)?;
            debug!(
                file = %path.display(),
                entries = payload.data.len(),
                "converted CSV file"
            );
            items.push((Some(path.clone()), serde_json::to_value(&payload)?));
        }

        info!(files = items.len(), "processing converted CSV files");
        self.run_batch(items, debug).await
    }

    /// Submit every file in `directory` matching `pattern`.
    ///
    /// A missing directory is an error; zero matches is not, and yields a
    /// zero-valued report.
    pub async fn process_directory(
        &self,
        directory: &Path,
        pattern: &str,
        recursive: bool,
        debug: bool,
    ) -> Result<BatchReport> {
        if !directory.is_dir() {
            return Err(RelayError::InputFileRead {
                path: directory.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "directory not found"),
            });
        }

        let mut matches = Vec::new();
        collect_matching(directory, pattern, recursive, &mut matches).map_err(|e| {
            RelayError::InputFileRead {
                path: directory.to_path_buf(),
                source: e,
            }
        })?;
        matches.sort();

        if matches.is_empty() {
            warn!(pattern, dir = %directory.display(), "no files matched");
            return Ok(BatchReport::empty());
        }

        info!(files = matches.len(), pattern, "found matching files");
        self.process_files(&matches, debug).await
    }

    /// Split one oversized payload into batches and submit them.
    pub async fn process_large_payload(
        &self,
        payload: &Payload,
        debug: bool,
    ) -> Result<BatchReport> {
        let tracker = MetricsTracker::new();
        let started = Instant::now();
        let batch_size = self.config.batch_size.max(1);

        let summary = self
            .client
            .submit_large(payload, batch_size, debug, true)
            .await?;

        let entries = payload.data.len();
        tracker.record_call(started.elapsed(), true, None);
        tracker.record_entities(entries as u64);
        for chunk in payload.data.chunks(batch_size) {
            tracker.record_batch_size(chunk.len());
        }

        Ok(BatchReport {
            summary,
            succeeded: entries.div_ceil(batch_size),
            failed: 0,
            failures: Vec::new(),
            metrics: tracker.snapshot(),
        })
    }

    /// Load one JSON file and submit its payload in batches.
    pub async fn process_large_file(&self, path: &Path, debug: bool) -> Result<BatchReport> {
        let value = load_json(path).await?;
        let payload = Payload::from_value(value)?;

        info!(
            file = %path.display(),
            entries = payload.data.len(),
            "processing large file"
        );
        self.process_large_payload(&payload, debug).await
    }

    /// Submit already-loaded payload values, capturing per-item failures.
    async fn run_batch(
        &self,
        items: Vec<(Option<PathBuf>, Value)>,
        debug: bool,
    ) -> Result<BatchReport> {
        if items.is_empty() {
            return Ok(BatchReport::empty());
        }

        let tracker = MetricsTracker::new();
        let progress = self.config.show_progress.then(|| {
            let pb = ProgressBar::new(items.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) | {msg}",
                    )
                    .unwrap()
                    .progress_chars("█▓▒░"),
            );
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        });

        let client = &self.client;
        let tracker_ref = &tracker;
        let progress_ref = &progress;

        let results = future::join_all(items.into_iter().enumerate().map(
            |(index, (source, value))| async move {
                let started = Instant::now();
                let outcome = async {
                    let payload = Payload::from_value(value)?;
                    let entries = payload.data.len();
                    let response = client.submit(&payload, debug, true).await?;
                    Ok::<_, RelayError>((entries, response))
                }
                .await;

                match &outcome {
                    Ok((entries, response)) => {
                        let latency = response
                            .meta
                            .as_ref()
                            .map(|m| Duration::from_millis(m.latency_ms))
                            .unwrap_or_else(|| started.elapsed());
                        tracker_ref.record_call(latency, true, Some(*entries));
                        tracker_ref.record_entities(*entries as u64);
                        if let Some(meta) = &response.meta {
                            tracker_ref.record_retries(u64::from(meta.attempts.saturating_sub(1)));
                        }
                    }
                    Err(failure) => {
                        tracker_ref.record_call(started.elapsed(), false, None);
                        tracker_ref.record_error(failure.kind());
                    }
                }

                if let Some(pb) = progress_ref {
                    pb.inc(1);
                }
                (index, source, outcome)
            },
        ))
        .await;

        if let Some(pb) = &progress {
            pb.finish_and_clear();
        }

        let mut summary = Summary::default();
        let mut succeeded = 0usize;
        let mut failures = Vec::new();
        for (index, source, outcome) in results {
            match outcome {
                Ok((_, response)) => {
                    succeeded += 1;
                    if let Some(s) = response.summary() {
                        summary += s;
                    }
                }
                // An invalid credential invalidates every remaining call;
                // surface it instead of counting it as a per-item failure.
                Err(failure @ RelayError::Authentication { .. }) => {
                    error!(source = ?source, "authentication failed, aborting run");
                    return Err(failure);
                }
                Err(failure) => {
                    error!(index, source = ?source, error = %failure, "submission failed");
                    failures.push(FailureRecord {
                        index,
                        source,
                        error: failure,
                    });
                }
            }
        }

        let failed = failures.len();
        info!(
            succeeded,
            failed,
            submitted = summary.submitted,
            processed = summary.processed,
            dropped = summary.dropped,
            "completed batch processing"
        );

        let metrics = tracker.snapshot();
        metrics.log_summary(Level::DEBUG);

        Ok(BatchReport {
            summary,
            succeeded,
            failed,
            failures,
            metrics,
        })
    }
}

/// A captured per-item failure, attributed to its originating input.
#[derive(Debug)]
pub struct FailureRecord {
    /// Position of the payload in the input order.
    pub index: usize,
    /// Originating file, when the payload came from one.
    pub source: Option<PathBuf>,
    /// The typed failure.
    pub error: RelayError,
}

/// Aggregated outcome of one batch operation.
#[derive(Debug)]
pub struct BatchReport {
    /// Merged per-indicator counters from all successful responses.
    pub summary: Summary,
    /// Payloads submitted without error.
    pub succeeded: usize,
    /// Payloads that failed after exhausting retries.
    pub failed: usize,
    /// Every captured failure, in input order.
    pub failures: Vec<FailureRecord>,
    /// Performance snapshot for the run.
    pub metrics: MetricsSnapshot,
}

impl BatchReport {
    /// A zero-valued report for runs with nothing to do.
    pub fn empty() -> Self {
        Self {
            summary: Summary::default(),
            succeeded: 0,
            failed: 0,
            failures: Vec::new(),
            metrics: MetricsTracker::new().snapshot(),
        }
    }

    /// Fraction of payloads that succeeded, as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.succeeded + self.failed;
        if total > 0 {
            self.succeeded as f64 / total as f64 * 100.0
        } else {
            100.0
        }
    }

    /// Print a human-readable summary to stdout.
    pub fn print_summary(&self) {
        println!("\n{}", "═".repeat(60));
        println!("                  SUBMISSION COMPLETE");
        println!("{}", "═".repeat(60));
        println!(
            "  Payloads:        {} ok, {} failed ({:.1}%)",
            self.succeeded,
            self.failed,
            self.success_rate()
        );
        println!("  Submitted:       {}", self.summary.submitted);
        println!("  Processed:       {}", self.summary.processed);
        println!("  Dropped:         {}", self.summary.dropped);
        println!("  Elapsed:         {:.2}s", self.metrics.time.total_seconds);
        println!(
            "  Throughput:      {:.1} entities/sec",
            self.metrics.throughput.entities_per_second
        );
        if !self.failures.is_empty() {
            println!("  Failures:");
            for failure in &self.failures {
                match &failure.source {
                    Some(path) => println!("    [{}] {}: {}", failure.index, path.display(), failure.error),
                    None => println!("    [{}] {}", failure.index, failure.error),
                }
            }
        }
        println!("{}", "═".repeat(60));
    }
}

/// Read and parse one JSON file.
async fn load_json(path: &Path) -> Result<Value> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RelayError::InputFileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
    serde_json::from_str(&text).map_err(|e| RelayError::JsonParse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Collect files under `dir` whose names match `pattern`.
fn collect_matching(
    dir: &Path,
    pattern: &str,
    recursive: bool,
    out: &mut Vec<PathBuf>,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if recursive {
                collect_matching(&path, pattern, recursive, out)?;
            }
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| wildcard_match(pattern, name))
        {
            out.push(path);
        }
    }
    Ok(())
}
