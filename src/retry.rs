//! Retry logic with configurable backoff
//!
//! Part fetches are retried with a constant delay by default (see
//! [`RetryConfig`]); a multiplier above 1.0 gives exponential backoff and
//! `jitter` spreads simultaneous retries apart.
//!
//! # Example
//!
//! ```no_run
//! use tentacle::retry::{IsRetryable, RetryError, download_with_retry};
//! use tentacle::config::RetryConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), RetryError<MyError>> {
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! download_with_retry(&config, &cancel, |_attempt| async {
//!     Ok::<_, MyError>(())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network errors, bad statuses, I/O, timeouts) return `true`.
/// Lifecycle and configuration failures return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Anything the transport or the disk throws at a part is worth another attempt
            Error::Network(_) | Error::BadStatus { .. } | Error::TransientIo(_) => true,
            Error::Timeout { .. } => true,
            Error::Allocation { .. }
            | Error::Partition(_)
            | Error::MissingContentLength
            | Error::RetryExhausted { .. }
            | Error::NoClients
            | Error::Rpc(_)
            | Error::Cancelled
            | Error::InsufficientSpace { .. }
            | Error::Config { .. }
            | Error::InvalidSource(_)
            | Error::NotFound(_)
            | Error::ServerError(_)
            | Error::Serialization(_) => false,
        }
    }
}

/// Why [`download_with_retry`] gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error
    Exhausted {
        /// Attempts made (equals `max_attempts`)
        attempts: u32,
        /// Error from the final attempt
        last: E,
    },
    /// An attempt failed with a non-retryable error
    Permanent {
        /// Attempts made, including the failing one
        attempts: u32,
        /// The non-retryable error
        error: E,
    },
    /// The cancellation token fired before an attempt succeeded
    Cancelled,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "failed after {attempts} attempts: {last}")
            }
            RetryError::Permanent { error, .. } => write!(f, "{error}"),
            RetryError::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

/// Execute an async operation with retry and backoff
///
/// `operation` receives the 1-based attempt number. It is called at most
/// `config.max_attempts` times. Cancellation aborts both an in-flight attempt
/// and a pending backoff sleep.
pub async fn download_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            outcome = operation(attempt) => outcome,
        };

        match outcome {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if !e.is_retryable() => {
                tracing::error!(error = %e, attempts = attempt, "Operation failed with non-retryable error");
                return Err(RetryError::Permanent {
                    attempts: attempt,
                    error: e,
                });
            }
            Err(e) if attempt >= max_attempts => {
                tracing::error!(
                    error = %e,
                    attempts = attempt,
                    "Operation failed after all retry attempts exhausted"
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: e,
                });
            }
            Err(e) => {
                let wait = if config.jitter { add_jitter(delay) } else { delay };

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = wait.as_millis() as u64,
                    "Operation failed, retrying"
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(wait) => {}
                }

                let next = Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next.min(config.max_delay.max(config.initial_delay));
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
