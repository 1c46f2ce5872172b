use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Rate limit exceeded, next slot in {0:?}")]
    LimitExceeded(Duration),
    #[error("Invalid rate limit configuration: {0}")]
    InvalidConfig(String),
}

/// At most `max_calls` calls in any trailing `window`.
///
/// Call instants are kept in a short `std::sync::Mutex`; the lock is never
/// held across an `.await`.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_calls: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_calls: u32, window: Duration) -> Result<Self, RateLimitError> {
        if max_calls == 0 {
            return Err(RateLimitError::InvalidConfig("max_calls must be > 0".into()));
        }
        if window.is_zero() {
            return Err(RateLimitError::InvalidConfig("window must be > 0".into()));
        }
        Ok(Self {
            max_calls: max_calls as usize,
            window,
            calls: Mutex::new(VecDeque::with_capacity(max_calls as usize)),
        })
    }

    /// `max_calls` per one-second window
    pub fn per_second(max_calls: u32) -> Result<Self, RateLimitError> {
        Self::new(max_calls, Duration::from_secs(1))
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn prune(&self, calls: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = calls.front() {
            if now.duration_since(*oldest) >= self.window {
                calls.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record a call if a slot is free, otherwise return how long until the
    /// oldest call leaves the window
    fn reserve(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut calls = self.lock();
        self.prune(&mut calls, now);

        if calls.len() < self.max_calls {
            calls.push_back(now);
            return Ok(());
        }

        let wait = calls
            .front()
            .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or_default();
        Err(wait)
    }

    pub fn try_acquire(&self) -> bool {
        self.reserve().is_ok()
    }

    /// Non-blocking acquire reporting the wait time on rejection
    pub fn check(&self) -> Result<(), RateLimitError> {
        self.reserve().map_err(RateLimitError::LimitExceeded)
    }

    /// Wait until a slot is free, then take it
    pub async fn acquire(&self) {
        loop {
            match self.reserve() {
                Ok(()) => return,
                Err(wait) => {
                    tracing::trace!(wait_ms = wait.as_millis() as u64, "rate limited, sleeping");
                    // Sleep at least 1ms so a zero wait cannot spin
                    tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
                }
            }
        }
    }

    /// Calls currently counted in the window
    pub fn in_window(&self) -> usize {
        let mut calls = self.lock();
        self.prune(&mut calls, Instant::now());
        calls.len()
    }

    pub fn remaining(&self) -> usize {
        self.max_calls.saturating_sub(self.in_window())
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_rejects_invalid_config() {
        assert!(SlidingWindowLimiter::new(0, Duration::from_secs(1)).is_err());
        assert!(SlidingWindowLimiter::new(10, Duration::ZERO).is_err());
    }

    #[test]
    fn test_limit_within_window() {
        let limiter = SlidingWindowLimiter::per_second(10).unwrap();
        assert_eq!(limiter.remaining(), 10);

        for _ in 0..10 {
            assert!(limiter.try_acquire());
        }
        assert_eq!(limiter.remaining(), 0);
        assert!(!limiter.try_acquire());

        match limiter.check() {
            Err(RateLimitError::LimitExceeded(wait)) => assert!(wait <= Duration::from_secs(1)),
            other => panic!("expected LimitExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_window_slides() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_millis(100)).unwrap();
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(limiter.in_window(), 0);
        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_acquire_sleeps_until_oldest_leaves() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_millis(100)).unwrap();
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        // Third call had to wait for the first to exit the window
        assert!(start.elapsed() >= Duration::from_millis(95));
        assert_eq!(limiter.in_window(), 2);
    }

    #[tokio::test]
    async fn test_shared_across_tasks() {
        let limiter = Arc::new(SlidingWindowLimiter::new(5, Duration::from_secs(10)).unwrap());
        let mut handles = vec![];
        for _ in 0..20 {
            let l = limiter.clone();
            handles.push(tokio::spawn(async move { l.try_acquire() }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 5);
    }
}
