//! # ioc-relay
//!
//! Batch submission client for threat-intelligence detection APIs.
//!
//! ioc-relay converts security-detection records (CSV exports or JSON
//! payload files) into API payloads and submits them with bounded
//! concurrency, automatic retries with exponential backoff, and typed
//! error categorization.
//!
//! ## Features
//!
//! - **Contract validation**: payloads are checked against the API data
//!   contract before anything touches the network
//! - **Typed failures**: every failure is a distinct category, so callers
//!   can branch on retryable vs. fatal without string matching
//! - **Bounded concurrency**: one shared limiter per client; a request
//!   backing off between retries never holds a slot
//! - **Payload splitting**: oversized payloads are partitioned into bounded
//!   batches and their summaries merged
//! - **Run metrics**: latency distribution, throughput, and an error
//!   histogram for every batch run
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use ioc_relay::{BatchProcessor, ClientConfig, ProcessorConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ProcessorConfig::new(ClientConfig::new("your-api-token"));
//!     let processor = BatchProcessor::new(config)?;
//!
//!     let report = processor
//!         .process_files(&["detections.json".into()], false)
//!         .await?;
//!
//!     report.print_summary();
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Every construction parameter is a plain value on [`ClientConfig`] /
//! [`ProcessorConfig`]; the CLI additionally binds each flag to a
//! `RELAY_*` environment variable. See [`Args`] for the full set.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod convert;
pub mod error;
pub mod payload;
pub mod processor;
pub mod tracker;
pub mod validate;

// Re-exports for convenience
pub use client::ApiClient;
pub use config::{Args, ClientConfig, Command, ProcessorConfig};
pub use convert::CsvConverter;
pub use error::{RelayError, Result};
pub use payload::{ApiOptions, ApiResponse, DataEntry, Detection, Incident, Ioc, Payload, Summary};
pub use processor::{BatchProcessor, BatchReport, FailureRecord};
pub use tracker::{MetricsSnapshot, MetricsTracker};
pub use validate::validate_payload;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
