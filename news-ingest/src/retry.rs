use crate::types::{IngestError, Result};
use backoff::{backoff::Backoff, exponential::ExponentialBackoff, SystemClock};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Bounded exponential backoff applied to every external call of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_elapsed: Duration::from_secs(16),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff<SystemClock> {
        let mut backoff = ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            randomization_factor: 0.0,
            multiplier: self.multiplier.max(1.0),
            max_interval: self.max_delay.max(self.base_delay),
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };
        backoff.reset();
        backoff
    }
}

/// Runs `call` until it succeeds, the error is not retryable, the attempt
/// budget is spent, or `max_elapsed` has passed. Errors are annotated with
/// `operation`; on exhaustion the last error is returned.
///
/// Cancellation of `cancel` aborts both the in-flight call and any pending
/// backoff wait and is never retried.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    run(policy, cancel, operation, None, call).await
}

/// [`retry`] under an overall deadline of `limit`. When the deadline passes
/// after at least one failed attempt, that attempt's error is returned;
/// otherwise the result is [`IngestError::Timeout`].
pub async fn retry_within<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    limit: Duration,
    call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    run(policy, cancel, operation, Some(limit), call).await
}

async fn run<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    limit: Option<Duration>,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let deadline = limit.map(|limit| Instant::now() + limit);
    let mut backoff = policy.backoff();
    let mut last_error: Option<IngestError> = None;
    let mut attempt = 0;

    let expired = |last_error: Option<IngestError>| {
        debug!(operation, "deadline passed");
        last_error.unwrap_or_else(|| {
            IngestError::Timeout(limit.unwrap_or_default()).with_operation(operation)
        })
    };

    loop {
        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IngestError::Cancelled),
            _ = wait_until(deadline) => return Err(expired(last_error)),
            result = call() => result,
        };

        let err = match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err.with_operation(operation),
        };

        if attempt >= max_attempts || !err.is_retryable() {
            return Err(err);
        }

        let Some(delay) = backoff.next_backoff() else {
            debug!(operation, attempt, "retry budget elapsed");
            return Err(err);
        };

        warn!(
            operation,
            attempt,
            ?delay,
            kind = %err.kind(),
            "Attempt {} failed: {}, retrying",
            attempt,
            err
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(IngestError::Cancelled.with_operation(operation));
            }
            _ = wait_until(deadline) => return Err(expired(Some(err))),
            _ = tokio::time::sleep(delay) => {}
        }
        last_error = Some(err);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
