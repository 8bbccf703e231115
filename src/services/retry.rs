use std::time::Duration;

use crate::errors::AppResult;

/// Retry schedule for transient gateway failures.
///
/// `max_retries` counts re-invocations, so an operation runs at most
/// `max_retries + 1` times. The wait before retry `n` is
/// `initial_delay * backoff_factor^(n-1)`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
        }
    }
}

/// Run `op`, retrying transient failures per `policy`.
///
/// Fatal errors (configuration, validation) are returned immediately
/// without consuming retry budget. After the final attempt fails, the
/// last error is returned.
pub async fn retry_with_backoff<T, F, Fut>(
    description: &str,
    policy: RetryPolicy,
    mut op: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = AppResult<T>>,
{
    let mut delay = policy.initial_delay;
    let mut attempt: u32 = 0;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    log::info!("{} succeeded after {} retries", description, attempt);
                }
                return Ok(value);
            }
            Err(e) if e.is_fatal() => {
                log::error!("{} failed with non-retryable error: {}", description, e);
                return Err(e);
            }
            Err(e) => {
                // A known provider restriction: retrying from the same
                // egress region will not help, but the schedule still runs
                // in case traffic is re-routed.
                if e.to_string().contains("location is not supported") {
                    log::warn!(
                        "{} rejected by provider region policy (attempt {}/{}): {}",
                        description,
                        attempt + 1,
                        policy.max_retries + 1,
                        e
                    );
                } else {
                    log::warn!(
                        "{} failed (attempt {}/{}): {}",
                        description,
                        attempt + 1,
                        policy.max_retries + 1,
                        e
                    );
                }

                if attempt >= policy.max_retries {
                    log::error!(
                        "{} exhausted {} attempts, giving up",
                        description,
                        policy.max_retries + 1
                    );
                    return Err(e);
                }

                tokio::time::sleep(delay).await;
                delay = delay.mul_f64(policy.backoff_factor);
                attempt += 1;
            }
        }
    }
}
