//! Configuration for the ioc-relay client and CLI.
//!
//! All settings are plain values passed into constructors — there is no
//! global configuration state. The CLI binds every flag to an environment
//! variable so the tool works unattended in pipelines.

use crate::error::{RelayError, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Default ingestion endpoint, overridable per client.
pub const DEFAULT_API_URL: &str = "https://api.intelrelay.io/v1/detections";

/// HTTP status codes retried by default.
pub const DEFAULT_RETRY_STATUS_CODES: &[u16] = &[429, 500, 502, 503, 504];

/// Default maximum entries per request when splitting large payloads.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// CLI arguments for the ioc-relay tool.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "iocrelay",
    version,
    about = "Submit security detections to a threat-intelligence ingestion API",
    long_about = "ioc-relay converts detection exports (CSV or JSON) into API payloads\n\
                  and submits them with bounded concurrency, automatic retries, and\n\
                  typed error reporting.",
    after_help = "EXAMPLES:\n    \
        iocrelay submit detections.json\n    \
        iocrelay submit --csv export_*.csv --debug\n    \
        iocrelay submit --large huge_payload.json --batch-size 250\n    \
        iocrelay dir ./payloads --pattern '*.json' --recursive\n    \
        iocrelay convert export.csv"
)]
pub struct Args {
    /// API token (bearer credential)
    #[arg(short, long, global = true, env = "RELAY_API_TOKEN", default_value = "")]
    pub token: String,

    /// API endpoint URL
    #[arg(short, long, global = true, env = "RELAY_API_URL", default_value = DEFAULT_API_URL)]
    pub url: String,

    /// Maximum concurrent in-flight requests
    #[arg(long, global = true, default_value = "5", env = "RELAY_MAX_CONCURRENT")]
    pub max_concurrent: usize,

    /// Maximum entries per request when splitting large payloads
    #[arg(long, global = true, default_value = "100", env = "RELAY_BATCH_SIZE")]
    pub batch_size: usize,

    /// Maximum retry attempts for retryable API errors
    #[arg(long, global = true, default_value = "3", env = "RELAY_MAX_RETRIES")]
    pub max_retries: u32,

    /// Base retry delay in seconds (exponential backoff)
    #[arg(long, global = true, default_value = "1.0", env = "RELAY_RETRY_DELAY")]
    pub retry_delay: f64,

    /// Request timeout in seconds
    #[arg(long, global = true, default_value = "30", env = "RELAY_TIMEOUT")]
    pub timeout: u64,

    /// Enable debug mode (submissions are not persisted server-side)
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true, env = "RELAY_VERBOSE")]
    pub verbose: bool,

    /// Output logs as JSON
    #[arg(long, global = true, env = "RELAY_JSON_LOGS")]
    pub json_logs: bool,

    /// Disable the progress bar
    #[arg(long, global = true, env = "RELAY_NO_PROGRESS")]
    pub no_progress: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands of the ioc-relay tool.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Submit payload files to the API
    Submit {
        /// JSON payload files (or CSV files with --csv)
        files: Vec<PathBuf>,

        /// Treat inputs as CSV detection exports and convert them first
        #[arg(long)]
        csv: bool,

        /// Split each file's payload into batches of --batch-size entries
        #[arg(long)]
        large: bool,
    },

    /// Submit every matching payload file in a directory
    Dir {
        /// Directory to scan
        directory: PathBuf,

        /// Glob pattern for matching files
        #[arg(long, default_value = "*.json")]
        pattern: String,

        /// Search subdirectories too
        #[arg(long)]
        recursive: bool,
    },

    /// Convert CSV detection exports to JSON payload files
    Convert {
        /// CSV files to convert
        files: Vec<PathBuf>,

        /// Output directory (defaults to each file's own directory)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

impl Args {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Settings for a single [`crate::client::ApiClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Ingestion endpoint URL.
    pub api_url: String,

    /// Bearer credential sent with every request.
    pub api_token: String,

    /// Maximum retry attempts for retryable errors.
    pub max_retries: u32,

    /// Base delay for exponential backoff (`retry_delay * 2^attempt`).
    pub retry_delay: Duration,

    /// Per-attempt request timeout.
    pub timeout: Duration,

    /// HTTP status codes that trigger a retry.
    pub retry_status_codes: Vec<u16>,

    /// Maximum concurrent in-flight requests through this client.
    pub max_concurrent: usize,
}

impl ClientConfig {
    /// Configuration with all defaults except the token.
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: api_token.into(),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
            retry_status_codes: DEFAULT_RETRY_STATUS_CODES.to_vec(),
            max_concurrent: 5,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.api_url.is_empty() {
            return Err(RelayError::InvalidConfig(
                "endpoint URL cannot be empty".to_string(),
            ));
        }
        if self.max_concurrent == 0 {
            return Err(RelayError::InvalidConfig(
                "max_concurrent must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(String::new())
    }
}

/// Settings for a [`crate::processor::BatchProcessor`].
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Client settings shared by every submission in a run.
    pub client: ClientConfig,

    /// Maximum entries per request when splitting large payloads.
    pub batch_size: usize,

    /// Whether to render a progress bar during batch runs.
    pub show_progress: bool,
}

impl ProcessorConfig {
    /// Processor configuration with default batching on top of `client`.
    pub fn new(client: ClientConfig) -> Self {
        Self {
            client,
            batch_size: DEFAULT_BATCH_SIZE,
            show_progress: false,
        }
    }

    /// Build the full configuration from parsed CLI arguments.
    pub fn from_args(args: &Args) -> Result<Self> {
        let client = ClientConfig {
            api_url: args.url.clone(),
            api_token: args.token.clone(),
            max_retries: args.max_retries,
            retry_delay: Duration::from_secs_f64(args.retry_delay.max(0.0)),
            timeout: Duration::from_secs(args.timeout),
            retry_status_codes: DEFAULT_RETRY_STATUS_CODES.to_vec(),
            max_concurrent: args.max_concurrent,
        };
        client.validate()?;

        if args.batch_size == 0 {
            return Err(RelayError::InvalidConfig(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            client,
            batch_size: args.batch_size,
            show_progress: !args.no_progress && !args.json_logs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = ClientConfig::new("token");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.retry_status_codes, vec![429, 500, 502, 503, 504]);
        assert_eq!(config.max_concurrent, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config = ClientConfig {
            max_concurrent: 0,
            ..ClientConfig::new("token")
        };
        assert!(matches!(
            config.validate(),
            Err(RelayError::InvalidConfig(_))
        ));
    }

    #[test]
    fn empty_url_is_rejected() {
        let config = ClientConfig {
            api_url: String::new(),
            ..ClientConfig::new("token")
        };
        assert!(config.validate().is_err());
    }
}
