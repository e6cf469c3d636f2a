/*!
 * Utility functions and helpers for Breezer.
 *
 * The centrepiece is the retry executor: every transport operation the
 * driver performs runs through [`with_retry`] with a [`RetryPolicy`].
 */
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// Bounded retry policy: `retries + 1` attempts with a fixed delay in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt
    pub retries: u32,
    /// Pause between two attempts
    pub delay: Duration,
}

impl RetryPolicy {
    /// Create a new policy
    pub const fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    /// Total number of attempts this policy allows
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Failure classification used by the retry executor to pick a log level
pub trait RetryableError: fmt::Display {
    /// Whether this is an expected disconnect/internal transport condition
    fn is_disconnect(&self) -> bool {
        false
    }
}

impl RetryableError for Error {}

/// All attempts of an operation failed
///
/// This is not a transport error; it wraps the text of the last one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation}: max tries exceeded after {attempts} attempts (last error: {last_error})")]
pub struct MaxTriesExceeded {
    /// Name of the operation that was retried
    pub operation: String,
    /// Number of attempts made
    pub attempts: u32,
    /// Text of the last failure
    pub last_error: String,
}

/// Run a future with a timeout
///
/// # Arguments
///
/// * `duration` - The timeout duration
/// * `future` - The future to run
///
/// # Returns
///
/// The output of the future, or a timeout error if the timeout is reached
pub async fn with_timeout<F>(duration: Duration, future: F) -> Result<F::Output>
where
    F: Future,
{
    timeout(duration, future)
        .await
        .map_err(|_| Error::timeout(format!("Operation timed out after {:?}", duration)))
}

/// Run an operation under a retry policy
///
/// # Arguments
///
/// * `policy` - Attempt budget and inter-attempt delay
/// * `operation` - Name used in logs and in the terminal error
/// * `factory` - Creates a fresh future for each attempt
///
/// # Returns
///
/// The first successful result, or [`MaxTriesExceeded`] once every attempt failed
pub async fn with_retry<F, Fut, T, E>(
    policy: RetryPolicy,
    operation: &str,
    mut factory: F,
) -> std::result::Result<T, MaxTriesExceeded>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: RetryableError,
{
    let attempts = policy.attempts();
    let start = Instant::now();
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match factory().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}/{}", operation, attempt, attempts);
                }
                return Ok(value);
            }
            Err(e) => {
                if e.is_disconnect() {
                    info!("{}: attempt {}/{} lost the link: {}", operation, attempt, attempts, e);
                } else {
                    warn!("{}: attempt {}/{} failed: {}", operation, attempt, attempts, e);
                }
                last_error = e.to_string();
            }
        }

        if attempt < attempts && !policy.delay.is_zero() {
            debug!("{}: waiting {:?} before next attempt", operation, policy.delay);
            tokio::time::sleep(policy.delay).await;
        }
    }

    error!(
        "{}: giving up after {} attempts in {:?}",
        operation,
        attempts,
        start.elapsed()
    );

    Err(MaxTriesExceeded {
        operation: operation.to_string(),
        attempts,
        last_error,
    })
}

/// Spawn a task that runs in the background and logs its outcome
///
/// # Arguments
///
/// * `name` - A name for the task (for logging)
/// * `fut` - The future to run
pub fn spawn_and_log<F, T, E>(name: &str, fut: F) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let task_name = name.to_string();
    tokio::spawn(async move {
        match fut.await {
            Ok(_) => {
                debug!("Task '{}' completed successfully", task_name);
            }
            Err(e) => {
                warn!("Task '{}' failed: {}", task_name, e);
            }
        }
    })
}
