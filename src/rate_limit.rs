//! Generic rate-limited actuator wrapper (`spec.md` §4.B).
//!
//! Parameterised over the inner actuator so the same wrapper instruments
//! the shutter (Δ = 100 ms) and every flip mount (Δ = 500 ms) without
//! duplicating the timing logic per device class, per the re-architecture
//! note in `spec.md` §9. Directly grounded on
//! `original_source/states/operation_timer.py`'s `OperationTimer`.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Wraps an inner actuator `T` with a minimum inter-operation interval.
pub struct RateLimiter<T> {
    inner: T,
    interval: Duration,
    last_operation: Option<Instant>,
    marks: HashMap<String, Instant>,
}

impl<T> RateLimiter<T> {
    /// Create a rate limiter with the given minimum interval. The first
    /// operation is never rate-limited (no prior operation to measure
    /// against).
    pub fn new(inner: T, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            last_operation: None,
            marks: HashMap::new(),
        }
    }

    /// Non-blocking check: would an operation be allowed right now.
    pub fn can_operate(&self) -> bool {
        match self.last_operation {
            None => true,
            Some(last) => last.elapsed() >= self.interval,
        }
    }

    /// Block until the next slot opens, then return. No-op if already
    /// past the interval.
    pub async fn sleep_through_remaining(&self) {
        if let Some(last) = self.last_operation {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                tokio::time::sleep(self.interval - elapsed).await;
            }
        }
    }

    /// Record that an operation happened now.
    pub fn update_last_operation_time(&mut self) {
        self.last_operation = Some(Instant::now());
    }

    /// Record a named diagnostic timestamp.
    pub fn mark(&mut self, label: &str) {
        self.marks.insert(label.to_string(), Instant::now());
    }

    /// Elapsed time since a named mark, if one was recorded.
    pub fn elapsed_since(&self, label: &str) -> Option<Duration> {
        self.marks.get(label).map(|t| t.elapsed())
    }

    /// Borrow the wrapped actuator.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the wrapped actuator.
    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Run `op` against the wrapped actuator, enforcing the rate limit
    /// (sleeping through any remaining interval first) and recording the
    /// operation time on completion.
    pub async fn actuate<F, Fut, R>(&mut self, op: F) -> R
    where
        F: FnOnce(&mut T) -> Fut,
        Fut: std::future::Future<Output = R>,
    {
        self.sleep_through_remaining().await;
        let result = op(&mut self.inner).await;
        self.update_last_operation_time();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_operation_is_never_limited() {
        let limiter = RateLimiter::new((), Duration::from_millis(500));
        assert!(limiter.can_operate());
    }

    #[tokio::test(start_paused = true)]
    async fn second_operation_waits_out_the_interval() {
        let mut limiter = RateLimiter::new((), Duration::from_millis(100));
        limiter.update_last_operation_time();
        assert!(!limiter.can_operate());

        let start = Instant::now();
        limiter.sleep_through_remaining().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn marks_and_elapsed_since_round_trip() {
        let mut limiter = RateLimiter::new((), Duration::from_millis(100));
        limiter.mark("exposure_start");
        tokio::time::advance(Duration::from_millis(50)).await;
        let elapsed = limiter.elapsed_since("exposure_start").unwrap();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(limiter.elapsed_since("never_marked").is_none());
    }
}
