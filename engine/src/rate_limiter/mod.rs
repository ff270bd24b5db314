//! Rate limiting for connector calls
//!
//! Two independent constraints, both optional and composable:
//!
//! - `min_time`: successive dispatch starts are at least this far apart,
//!   enforced through a mutex-guarded next-slot instant so queued callers
//!   are serialized fairly
//! - `max_concurrent`: a semaphore bounds in-flight dispatches
//!
//! The limiter never drops work; callers wait for their slot.

use crate::config::RateLimitCaps;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;

pub struct RateLimiter {
    min_time: Option<Duration>,
    next_slot: Mutex<Instant>,
    semaphore: Option<Semaphore>,
}

impl RateLimiter {
    pub fn new(caps: &RateLimitCaps) -> Self {
        Self {
            min_time: caps.min_time_ms.map(Duration::from_millis),
            next_slot: Mutex::new(Instant::now()),
            semaphore: caps.max_concurrent.map(Semaphore::new),
        }
    }

    /// A limiter with no constraints
    pub fn unlimited() -> Self {
        Self::new(&RateLimitCaps::default())
    }

    async fn permit(&self) -> Option<SemaphorePermit<'_>> {
        match &self.semaphore {
            // The semaphore is never closed, acquire cannot fail
            Some(semaphore) => semaphore.acquire().await.ok(),
            None => None,
        }
    }

    /// Run `op` once its rate slot is available
    pub async fn run<F, Fut, T>(&self, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.permit().await;
        if let Some(min_time) = self.min_time {
            let now = Instant::now();
            let start = {
                let mut slot = self.next_slot.lock().await;
                let start = (*slot).max(now);
                *slot = start + min_time;
                start
            };
            tokio::time::sleep_until(start).await;
        }
        op().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_min_time_spaces_calls() {
        let limiter = Arc::new(RateLimiter::new(&RateLimitCaps {
            min_time_ms: Some(10),
            max_concurrent: None,
        }));

        let begin = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..50 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { limiter.run(|| async {}).await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // 50 calls, at least 49 gaps of 10ms
        assert!(begin.elapsed() >= Duration::from_millis(490));
    }

    #[tokio::test]
    async fn test_max_concurrent_bounds_in_flight() {
        let limiter = Arc::new(RateLimiter::new(&RateLimitCaps {
            min_time_ms: None,
            max_concurrent: Some(2),
        }));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                limiter
                    .run(|| async {
                        let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(current, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_unlimited_runs_immediately() {
        let limiter = RateLimiter::unlimited();
        let begin = Instant::now();
        let value = limiter.run(|| async { 42 }).await;
        assert_eq!(value, 42);
        assert!(begin.elapsed() < Duration::from_millis(50));
    }
}
