use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::errors::{AppError, AppResult};

/// Bounded-concurrency gate for one external dependency.
///
/// A plain gate is a permit pool sized to the dependency's concurrency
/// ceiling. A paced gate additionally holds each permit for a cooldown
/// derived from a requests-per-minute ceiling before releasing it, which
/// caps the sustained call rate (leaky-bucket: at most `permits` calls in
/// flight, at most `rpm` permit releases per minute).
pub struct RateGate {
    semaphore: Arc<Semaphore>,
    cooldown: Duration,
}

impl RateGate {
    /// Gate on concurrency only.
    pub fn concurrency(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            cooldown: Duration::ZERO,
        }
    }

    /// Gate on concurrency and sustained rate.
    pub fn paced(max_concurrent: usize, requests_per_minute: u32) -> Self {
        let cooldown = if requests_per_minute == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(60.0 / requests_per_minute as f64)
        };
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            cooldown,
        }
    }

    /// Run `op` under a permit. The permit is released unconditionally after
    /// the call (and after the cooldown for paced gates), whether `op`
    /// succeeded or failed.
    pub async fn run<T, F, Fut>(&self, op: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = AppResult<T>>,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| AppError::InternalError(format!("rate gate closed: {}", e)))?;

        let result = op().await;

        if !self.cooldown.is_zero() {
            tokio::time::sleep(self.cooldown).await;
        }
        drop(permit);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_runs_op_and_returns_result() {
        let gate = RateGate::concurrency(4);
        let result = gate.run(|| async { Ok::<_, AppError>(7) }).await.unwrap();
        assert_eq!(result, 7);
    }

    #[tokio::test]
    async fn test_releases_permit_on_error() {
        let gate = RateGate::concurrency(1);
        let failed: AppResult<()> = gate
            .run(|| async { Err(AppError::GatewayError("boom".into())) })
            .await;
        assert!(failed.is_err());

        // If the permit leaked, this second call would never complete.
        let ok = gate.run(|| async { Ok::<_, AppError>(1) }).await;
        assert!(ok.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_gate_delays_second_call_by_cooldown() {
        // 1 permit, 60 rpm => 1 s cooldown before the permit is released.
        let gate = Arc::new(RateGate::paced(1, 60));
        let start = Instant::now();

        let first = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.run(|| async { Ok::<_, AppError>(Instant::now()) })
                    .await
                    .unwrap()
            })
        };
        let second = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.run(|| async { Ok::<_, AppError>(Instant::now()) })
                    .await
                    .unwrap()
            })
        };

        let first_started = first.await.unwrap();
        let second_started = second.await.unwrap();

        // One of the two calls ran immediately; the other had to wait for
        // the first permit release, which includes the 1 s cooldown.
        let (early, late) = if first_started <= second_started {
            (first_started, second_started)
        } else {
            (second_started, first_started)
        };
        assert_eq!(early.duration_since(start), Duration::ZERO);
        assert!(late.duration_since(start) >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_zero_rpm_means_no_cooldown() {
        let gate = RateGate::paced(1, 0);
        assert!(gate.cooldown.is_zero());
    }
}
