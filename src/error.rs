//! Custom error types for ioc-relay.
//!
//! Every failure the pipeline can produce is a variant of [`RelayError`],
//! so callers can branch on the category (retryable vs. fatal, per-item vs.
//! run-aborting) with an exhaustive match instead of string inspection.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while validating, converting, or submitting
/// detection payloads.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Payload failed the API data contract; never sent over the wire.
    #[error("payload validation failed: {0}")]
    PayloadValidation(String),

    /// HTTP 401 — the token is invalid for every subsequent call too.
    #[error("authentication failed: {message}")]
    Authentication {
        /// Error message extracted from the response.
        message: String,
    },

    /// HTTP 403 — the token is valid but lacks permission.
    #[error("access denied: {message}")]
    AccessDenied {
        /// Error message extracted from the response.
        message: String,
    },

    /// HTTP 429 — rate limit exceeded.
    #[error("rate limit exceeded: {message}")]
    RateLimit {
        /// Error message extracted from the response.
        message: String,
        /// Server-provided `Retry-After` hint in seconds.
        retry_after: Option<u64>,
    },

    /// HTTP 5xx — server-side failure.
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP status code returned.
        status: u16,
        /// Error message extracted from the response.
        message: String,
    },

    /// Any other 4xx response.
    #[error("API error ({status}): {message}")]
    Client {
        /// HTTP status code returned.
        status: u16,
        /// Error message extracted from the response.
        message: String,
    },

    /// Transport-level connection failure.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The request exceeded its timeout.
    #[error("request timed out after {seconds:.1} seconds")]
    Timeout {
        /// Configured timeout that was exceeded.
        seconds: f64,
    },

    /// CSV-to-payload conversion failure. The message embeds the row number
    /// when one is known; `row` exposes it for programmatic handling.
    #[error("CSV conversion failed for '{path}': {message}")]
    CsvConversion {
        /// The offending CSV file.
        path: PathBuf,
        /// 1-based row number, when determinable.
        row: Option<usize>,
        /// What went wrong.
        message: String,
    },

    /// Failed to read an input file.
    #[error("failed to read input file '{path}': {source}")]
    InputFileRead {
        /// Path to the file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write an output file.
    #[error("failed to write output file '{path}': {source}")]
    OutputFileWrite {
        /// Path to the file that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An input file did not contain valid JSON.
    #[error("invalid JSON in '{path}': {source}")]
    JsonParse {
        /// Path to the malformed file.
        path: PathBuf,
        /// The underlying JSON parsing error.
        #[source]
        source: serde_json::Error,
    },

    /// Failed to serialize a payload for transmission.
    #[error("failed to serialize JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Anything that escaped the categories above.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl RelayError {
    /// Stable category key, used for the per-run error histogram.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PayloadValidation(_) => "validation",
            Self::Authentication { .. } => "authentication",
            Self::AccessDenied { .. } => "access_denied",
            Self::RateLimit { .. } => "rate_limit",
            Self::Server { .. } => "server",
            Self::Client { .. } => "client",
            Self::Connection(_) => "connection",
            Self::Timeout { .. } => "timeout",
            Self::CsvConversion { .. } => "csv_conversion",
            Self::InputFileRead { .. } => "file_read",
            Self::OutputFileWrite { .. } => "file_write",
            Self::JsonParse { .. } => "json_parse",
            Self::JsonSerialize(_) => "json_serialize",
            Self::InvalidConfig(_) => "config",
            Self::Unexpected(_) => "unexpected",
        }
    }

    /// HTTP status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { .. } => Some(401),
            Self::AccessDenied { .. } => Some(403),
            Self::RateLimit { .. } => Some(429),
            Self::Server { status, .. } | Self::Client { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the submission client may re-attempt after this failure.
    ///
    /// Transport failures are always retryable; HTTP failures are retryable
    /// when their status is in the configured retryable set. Authentication
    /// and authorization failures never are.
    pub fn is_retryable(&self, retry_status_codes: &[u16]) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout { .. } => true,
            Self::RateLimit { .. } => retry_status_codes.contains(&429),
            Self::Server { status, .. } | Self::Client { status, .. } => {
                retry_status_codes.contains(status)
            }
            _ => false,
        }
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
