//! Retry configuration and S3 error classification.

use backon::ExponentialBuilder;
use std::time::Duration;

/// Macro to execute an S3 operation with retry and logging.
///
/// # Usage
/// ```ignore
/// s3_retry!(
///     operation = { client.put_object().bucket(b).key(k).send().await },
///     retry_config = self.retry_config,
///     context = format!("PUT {}", key),
/// )?;
/// ```
#[macro_export]
macro_rules! s3_retry {
    (
        operation = $op:expr,
        retry_config = $config:expr,
        context = $ctx:expr $(,)?
    ) => {{
        use backon::Retryable;
        use $crate::storage::retry::is_retryable_s3_error;

        let context = $ctx;
        (|| async { $op })
            .retry($config.backoff())
            .when(|e| is_retryable_s3_error(&e.to_string()))
            .notify(|err, dur| {
                tracing::warn!(
                    context = %context,
                    error = %err,
                    retry_in = ?dur,
                    "S3 operation failed, retrying"
                );
            })
            .await
            .map_err(|e| $crate::contracts::StorageError::S3(e.to_string()))
    }};
}

const S3_ENV_PREFIX: &str = "DIJERIA_S3";
const SEQUENCE_ENV_PREFIX: &str = "DIJERIA_SEQ";

/// Configuration for retry with jittered exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first one.
    pub max_retries: usize,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Defaults for counter transaction conflicts.
    pub fn sequence_defaults() -> Self {
        Self {
            max_retries: 8,
            initial_delay_ms: 5,
            max_delay_ms: 200,
        }
    }

    /// Creates the S3 RetryConfig from environment variables.
    ///
    /// Environment variables:
    /// - `DIJERIA_S3_MAX_RETRIES`: Maximum retry attempts (default: 5)
    /// - `DIJERIA_S3_RETRY_INITIAL_MS`: Initial backoff delay in ms (default: 100)
    /// - `DIJERIA_S3_RETRY_MAX_MS`: Maximum backoff delay in ms (default: 10000)
    pub fn from_env() -> Self {
        Self::from_env_with_prefix(S3_ENV_PREFIX, Self::default())
    }

    /// Creates the order number RetryConfig from environment variables.
    ///
    /// Environment variables:
    /// - `DIJERIA_SEQ_MAX_RETRIES` (default: 8)
    /// - `DIJERIA_SEQ_RETRY_INITIAL_MS` (default: 5)
    /// - `DIJERIA_SEQ_RETRY_MAX_MS` (default: 200)
    pub fn sequence_from_env() -> Self {
        Self::from_env_with_prefix(SEQUENCE_ENV_PREFIX, Self::sequence_defaults())
    }

    fn from_env_with_prefix(prefix: &str, default: Self) -> Self {
        Self {
            max_retries: env_parse(&format!("{}_MAX_RETRIES", prefix))
                .unwrap_or(default.max_retries),
            initial_delay_ms: env_parse(&format!("{}_RETRY_INITIAL_MS", prefix))
                .unwrap_or(default.initial_delay_ms),
            max_delay_ms: env_parse(&format!("{}_RETRY_MAX_MS", prefix))
                .unwrap_or(default.max_delay_ms),
        }
    }

    /// Creates an exponential backoff builder with jitter.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_times(self.max_retries)
            .with_jitter()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Classifies S3 errors as retryable or not.
///
/// Retryable errors include:
/// - Network issues (timeout, connection reset, connection refused, broken pipe)
/// - Service unavailability (503, ServiceUnavailable, InternalError)
/// - Throttling (429, SlowDown, ThrottlingException)
/// - Request timeout
pub fn is_retryable_s3_error(err: &str) -> bool {
    let retryable_patterns = [
        "timeout",
        "timed out",
        "connection reset",
        "serviceunavailable",
        "503",
        "slowdown",
        "429",
        "throttlingexception",
        "requesttimeout",
        "internalerror",
        "connection refused",
        "broken pipe",
        "dispatch failure",
    ];
    let err_lower = err.to_lowercase();
    retryable_patterns.iter().any(|p| err_lower.contains(p))
}
