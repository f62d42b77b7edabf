//! Call-rate control for external collaborators.
//!
//! Batch loops ask the limiter for a permit before each external unit of work.
//! `IntervalLimiter` enforces a maximum number of in-flight calls and a minimum
//! start-to-start spacing. The pipeline runs it with concurrency 1.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Held for the duration of one call; dropping it frees the concurrency slot.
pub struct RatePermit {
    _slot: Option<OwnedSemaphorePermit>,
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn acquire(&self) -> RatePermit;
}

pub struct IntervalLimiter {
    slots: Arc<Semaphore>,
    min_interval: Duration,
    next_start: Mutex<Option<Instant>>,
}

impl IntervalLimiter {
    pub fn new(max_concurrency: usize, min_interval: Duration) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_concurrency.max(1))),
            min_interval,
            next_start: Mutex::new(None),
        }
    }

    /// One call at a time, `min_interval` apart.
    pub fn sequential(min_interval: Duration) -> Self {
        Self::new(1, min_interval)
    }
}

#[async_trait]
impl RateLimiter for IntervalLimiter {
    async fn acquire(&self) -> RatePermit {
        // The semaphore is never closed, so acquisition only fails on shutdown.
        let slot = self.slots.clone().acquire_owned().await.ok();

        let mut next_start = self.next_start.lock().await;
        if let Some(at) = *next_start {
            tokio::time::sleep_until(at).await;
        }
        *next_start = Some(Instant::now() + self.min_interval);

        RatePermit { _slot: slot }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_call_is_immediate() {
        let limiter = IntervalLimiter::sequential(Duration::from_millis(500));
        let started = Instant::now();
        let _permit = limiter.acquire().await;
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_are_spaced_by_interval() {
        let limiter = IntervalLimiter::sequential(Duration::from_millis(500));
        let started = Instant::now();
        for _ in 0..3 {
            drop(limiter.acquire().await);
        }
        assert!(started.elapsed() >= Duration::from_millis(1000));
        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_work_consumes_the_interval() {
        let limiter = IntervalLimiter::sequential(Duration::from_millis(500));
        drop(limiter.acquire().await);
        tokio::time::sleep(Duration::from_millis(800)).await;

        let before = Instant::now();
        drop(limiter.acquire().await);
        assert_eq!(before.elapsed(), Duration::ZERO);
    }
}
