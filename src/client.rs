//! Asynchronous submission client with typed failures and bounded retry.
//!
//! One [`ApiClient`] owns a connection pool and a concurrency limiter shared
//! by every submission issued through it. A permit is held only for the
//! duration of a single network round-trip — a request backing off between
//! retries never starves other pending requests.

use crate::config::ClientConfig;
use crate::error::{RelayError, Result};
use crate::payload::{ApiResponse, Payload, ResponseMeta, Summary};
use crate::validate::validate_payload;
use futures::future;
use reqwest::header;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

/// Client for submitting detection payloads to the ingestion API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    limiter: Arc<Semaphore>,
}

impl ApiClient {
    /// Create a new client from configuration.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_concurrent)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .default_headers(headers)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| RelayError::Connection(e.to_string()))?;

        let limiter = Arc::new(Semaphore::new(config.max_concurrent));
        debug!(url = %config.api_url, max_concurrent = config.max_concurrent, "ApiClient initialized");

        Ok(Self {
            http,
            config: Arc::new(config),
            limiter,
        })
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Submit one payload, retrying retryable failures up to the configured
    /// attempt budget.
    ///
    /// The payload is validated before anything touches the network; an
    /// invalid payload fails with [`RelayError::PayloadValidation`]. Default
    /// options are merged in, with a `debug = true` caller override always
    /// winning. When `retry` is false any failure is returned immediately
    /// without sleeping. Retry exhaustion returns the last typed failure,
    /// never a generic wrapper.
    pub async fn submit(&self, payload: &Payload, debug: bool, retry: bool) -> Result<ApiResponse> {
        let raw = serde_json::to_value(payload)?;
        if let Some(reason) = validate_payload(&raw) {
            return Err(RelayError::PayloadValidation(reason));
        }

        let merged = payload.with_default_options(debug);
        let debug_enabled = merged.options.map(|o| o.debug).unwrap_or(false);
        info!(
            entries = merged.data.len(),
            url = %self.config.api_url,
            debug = debug_enabled,
            "sending detections"
        );

        let mut attempts: u32 = 0;
        loop {
            if attempts > 0 {
                info!(
                    attempt = attempts,
                    max_retries = self.config.max_retries,
                    "retry attempt"
                );
            }

            let started = Instant::now();
            // Permit scope covers exactly one round-trip; it is released
            // before any backoff sleep.
            let outcome = {
                let _permit = self.limiter.acquire().await.map_err(|_| {
                    RelayError::Unexpected("concurrency limiter closed".to_string())
                })?;
                self.send_once(&merged).await
            };

            match outcome {
                Ok(response) => {
                    let latency = started.elapsed();
                    match response.summary() {
                        Some(summary) => info!(
                            submitted = summary.submitted,
                            processed = summary.processed,
                            dropped = summary.dropped,
                            "API call successful"
                        ),
                        None => info!("API call successful"),
                    }
                    return Ok(response.with_meta(ResponseMeta {
                        latency_ms: latency.as_millis() as u64,
                        attempts: attempts + 1,
                    }));
                }
                Err(failure) => {
                    let may_retry = retry
                        && attempts < self.config.max_retries
                        && failure.is_retryable(&self.config.retry_status_codes);
                    if !may_retry {
                        return Err(failure);
                    }

                    let delay = self.backoff_delay(attempts, &failure);
                    warn!(
                        error = %failure,
                        delay_secs = delay.as_secs_f64(),
                        "retryable failure, backing off"
                    );
                    sleep(delay).await;
                    attempts += 1;
                }
            }
        }
    }

    /// Submit many payloads concurrently; the first failure propagates and
    /// the remaining outcomes are discarded.
    pub async fn submit_many(
        &self,
        payloads: &[Payload],
        debug: bool,
        retry: bool,
    ) -> Result<Vec<ApiResponse>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }
        future::try_join_all(payloads.iter().map(|p| self.submit(p, debug, retry))).await
    }

    /// Submit many payloads concurrently, capturing per-item outcomes in
    /// input order instead of aborting on the first failure.
    pub async fn submit_many_settled(
        &self,
        payloads: &[Payload],
        debug: bool,
        retry: bool,
    ) -> Vec<Result<ApiResponse>> {
        future::join_all(payloads.iter().map(|p| self.submit(p, debug, retry))).await
    }

    /// Split an oversized payload into batches of at most `batch_size`
    /// entries, submit them concurrently, and merge the summaries.
    ///
    /// An empty payload yields a zero summary without touching the network.
    /// Responses without a `summary` block contribute zero to the totals.
    pub async fn submit_large(
        &self,
        payload: &Payload,
        batch_size: usize,
        debug: bool,
        retry: bool,
    ) -> Result<Summary> {
        if payload.data.is_empty() {
            return Ok(Summary::default());
        }

        let raw = serde_json::to_value(payload)?;
        if let Some(reason) = validate_payload(&raw) {
            return Err(RelayError::PayloadValidation(reason));
        }

        let chunks = payload.split(batch_size);
        info!(
            entries = payload.data.len(),
            chunks = chunks.len(),
            batch_size,
            "splitting payload into batches"
        );

        let responses = self.submit_many(&chunks, debug, retry).await?;
        let merged = responses
            .iter()
            .filter_map(|r| r.summary())
            .fold(Summary::default(), |acc, s| acc + s);

        info!(
            submitted = merged.submitted,
            processed = merged.processed,
            dropped = merged.dropped,
            "completed batch submission"
        );
        Ok(merged)
    }

    /// Issue a single POST attempt and classify the outcome.
    async fn send_once(&self, payload: &Payload) -> Result<ApiResponse> {
        trace!(url = %self.config.api_url, "sending request");

        let response = self
            .http
            .post(&self.config.api_url)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.config.api_token),
            )
            .timeout(self.config.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| self.classify_transport(e))?;

        let status = response.status();
        if status.is_success() {
            return match response.json::<Value>().await {
                Ok(body) => Ok(ApiResponse::new(body)),
                Err(err) => {
                    warn!(error = %err, "could not parse API response as JSON");
                    Ok(ApiResponse::empty())
                }
            };
        }

        let retry_after = if status.as_u16() == 429 {
            response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
        } else {
            None
        };
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), &body, retry_after))
    }

    /// Map a transport-level failure to its typed category.
    fn classify_transport(&self, err: reqwest::Error) -> RelayError {
        if err.is_timeout() {
            RelayError::Timeout {
                seconds: self.config.timeout.as_secs_f64(),
            }
        } else if err.is_connect() {
            RelayError::Connection(format!("cannot connect to API server: {err}"))
        } else {
            RelayError::Connection(err.to_string())
        }
    }

    /// Delay before the next attempt: the server's `Retry-After` hint when
    /// rate-limited, otherwise `retry_delay * 2^attempts`.
    fn backoff_delay(&self, attempts: u32, failure: &RelayError) -> Duration {
        if let RelayError::RateLimit {
            retry_after: Some(seconds),
            ..
        } = failure
        {
            return Duration::from_secs(*seconds);
        }
        self.config
            .retry_delay
            .saturating_mul(2u32.saturating_pow(attempts))
    }
}

/// Map an HTTP error status to its typed category.
fn classify_status(status: u16, body: &str, retry_after: Option<u64>) -> RelayError {
    let message = extract_error_message(body);
    match status {
        401 => {
            error!(message = %message, "authentication failed");
            RelayError::Authentication { message }
        }
        403 => {
            error!(message = %message, "access denied");
            RelayError::AccessDenied { message }
        }
        429 => {
            warn!(message = %message, retry_after = ?retry_after, "rate limit exceeded");
            RelayError::RateLimit {
                message,
                retry_after,
            }
        }
        500..=599 => {
            error!(status, message = %message, "server error");
            RelayError::Server { status, message }
        }
        _ => {
            error!(status, message = %message, "API error");
            RelayError::Client { status, message }
        }
    }
}

/// Pull a `message` field out of an error body, falling back to the
/// (truncated) raw text.
fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = value.get("message").and_then(Value::as_str) {
            return message.to_string();
        }
    }
    if body.chars().count() > 500 {
        let truncated: String = body.chars().take(500).collect();
        format!("{truncated}...")
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(retry_delay: Duration) -> ApiClient {
        ApiClient::new(ClientConfig {
            retry_delay,
            ..ClientConfig::new("test-token")
        })
        .unwrap()
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let client = test_client(Duration::from_secs(1));
        let failure = RelayError::Server {
            status: 500,
            message: String::new(),
        };

        assert_eq!(client.backoff_delay(0, &failure), Duration::from_secs(1));
        assert_eq!(client.backoff_delay(1, &failure), Duration::from_secs(2));
        assert_eq!(client.backoff_delay(2, &failure), Duration::from_secs(4));
    }

    #[test]
    fn retry_after_hint_overrides_backoff() {
        let client = test_client(Duration::from_secs(1));
        let failure = RelayError::RateLimit {
            message: String::new(),
            retry_after: Some(7),
        };
        assert_eq!(client.backoff_delay(3, &failure), Duration::from_secs(7));

        // Without the hint, rate limits fall back to exponential backoff.
        let no_hint = RelayError::RateLimit {
            message: String::new(),
            retry_after: None,
        };
        assert_eq!(client.backoff_delay(1, &no_hint), Duration::from_secs(2));
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let result = ApiClient::new(ClientConfig {
            max_concurrent: 0,
            ..ClientConfig::new("t")
        });
        assert!(matches!(result, Err(RelayError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn invalid_payload_is_never_sent() {
        let client = test_client(Duration::from_millis(1));
        let empty = Payload::new(Vec::new());

        // The configured endpoint is unreachable; reaching the network at
        // all would fail with a connection error rather than validation.
        let err = client.submit(&empty, false, true).await.unwrap_err();
        assert!(matches!(err, RelayError::PayloadValidation(_)));
    }

    #[test]
    fn error_message_extraction_prefers_json_message() {
        assert_eq!(
            extract_error_message(r#"{"message": "quota exceeded"}"#),
            "quota exceeded"
        );
        assert_eq!(extract_error_message("plain text"), "plain text");

        let long = "x".repeat(600);
        let extracted = extract_error_message(&long);
        assert!(extracted.ends_with("..."));
        assert_eq!(extracted.chars().count(), 503);
    }
}
