use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open")]
    Open,
    #[error("Operation failed: {0}")]
    Operation(E),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,   // Normal operation
    Open,     // Failing, reject requests
    HalfOpen, // Cooldown elapsed, probing
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl From<CircuitState> for u8 {
    fn from(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Successes in half-open needed to close again
    pub success_threshold: u32,
    /// Cooldown before an open circuit lets a probe through
    pub timeout_duration: Duration,
    /// Concurrent probes allowed while half-open
    pub half_open_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 1,
            timeout_duration: Duration::from_secs(30),
            half_open_requests: 1,
        }
    }
}

pub struct CircuitBreaker {
    state: AtomicU8,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    /// Milliseconds since `epoch` when the circuit last opened, 0 when never
    opened_at: AtomicU64,
    half_open_attempts: AtomicU32,
    /// Milliseconds since `epoch` when the current half-open window began
    half_open_since: AtomicU64,
    epoch: Instant,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed.into()),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            opened_at: AtomicU64::new(0),
            half_open_attempts: AtomicU32::new(0),
            half_open_since: AtomicU64::new(0),
            epoch: Instant::now(),
            config,
        }
    }

    pub fn state(&self) -> CircuitState {
        let state_value = self.state.load(Ordering::Relaxed);
        CircuitState::from(state_value)
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn now_ms(&self) -> u64 {
        // +1 keeps 0 free as the "never opened" marker
        self.epoch.elapsed().as_millis() as u64 + 1
    }

    /// Time since the circuit opened, if it is open or half-open
    pub fn open_for(&self) -> Option<Duration> {
        if self.state() == CircuitState::Closed {
            return None;
        }
        let opened = self.opened_at.load(Ordering::Relaxed);
        (opened != 0).then(|| Duration::from_millis(self.now_ms().saturating_sub(opened)))
    }

    fn cooldown_elapsed(&self) -> bool {
        let opened = self.opened_at.load(Ordering::Relaxed);
        if opened == 0 {
            return false;
        }
        self.now_ms().saturating_sub(opened) >= self.config.timeout_duration.as_millis() as u64
    }

    fn try_transition_to_half_open(&self) -> bool {
        if !self.cooldown_elapsed() {
            return false;
        }
        let transitioned = self
            .state
            .compare_exchange(
                CircuitState::Open.into(),
                CircuitState::HalfOpen.into(),
                Ordering::SeqCst,
                Ordering::Relaxed,
            )
            .is_ok();
        if transitioned {
            self.half_open_attempts.store(0, Ordering::Relaxed);
            self.half_open_since.store(self.now_ms(), Ordering::SeqCst);
            tracing::info!("Circuit breaker transitioned to HALF_OPEN");
        }
        transitioned
    }

    /// Decide whether a call may proceed, moving OPEN to HALF_OPEN once the
    /// cooldown has elapsed. A permitted call must be followed by
    /// `record_success` or `record_failure`.
    pub fn try_permit(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if self.try_transition_to_half_open() {
                    self.half_open_attempts.fetch_add(1, Ordering::SeqCst);
                    true
                } else {
                    // Another caller may have just moved it to half-open
                    self.state() == CircuitState::HalfOpen && self.take_half_open_slot()
                }
            }
            CircuitState::HalfOpen => self.take_half_open_slot(),
        }
    }

    fn take_half_open_slot(&self) -> bool {
        let attempts = self.half_open_attempts.fetch_add(1, Ordering::SeqCst);
        if attempts < self.config.half_open_requests {
            return true;
        }
        self.reopen_stale_half_open_window()
    }

    /// Admit a new call once the half-open window has outlived the cooldown
    /// without being settled (the admitted call was dropped)
    fn reopen_stale_half_open_window(&self) -> bool {
        let since = self.half_open_since.load(Ordering::SeqCst);
        let now = self.now_ms();
        if now.saturating_sub(since) < self.config.timeout_duration.as_millis() as u64 {
            return false;
        }
        let reopened = self
            .half_open_since
            .compare_exchange(since, now, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok();
        if reopened {
            self.half_open_attempts.store(1, Ordering::SeqCst);
            tracing::warn!("Unsettled half-open call expired; admitting another");
        }
        reopened
    }

    fn half_open_window_stale(&self) -> bool {
        let since = self.half_open_since.load(Ordering::Relaxed);
        self.now_ms().saturating_sub(since) >= self.config.timeout_duration.as_millis() as u64
    }

    /// Same as `try_permit` without mutating state
    pub fn is_call_permitted(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => self.cooldown_elapsed(),
            CircuitState::HalfOpen => {
                self.half_open_attempts.load(Ordering::Relaxed) < self.config.half_open_requests
                    || self.half_open_window_stale()
            }
        }
    }

    pub fn record_success(&self) {
        match self.state() {
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    self.close();
                    tracing::info!("Circuit breaker transitioned to CLOSED");
                }
            }
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        match self.state() {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    self.open();
                    tracing::warn!(failures, "Circuit breaker transitioned to OPEN");
                }
            }
            CircuitState::HalfOpen => {
                self.failure_count.fetch_add(1, Ordering::SeqCst);
                self.open();
                tracing::warn!("Circuit breaker transitioned back to OPEN from HALF_OPEN");
            }
            CircuitState::Open => {}
        }
    }

    fn open(&self) {
        self.opened_at.store(self.now_ms(), Ordering::SeqCst);
        self.state.store(CircuitState::Open.into(), Ordering::SeqCst);
        self.success_count.store(0, Ordering::Relaxed);
        self.half_open_attempts.store(0, Ordering::Relaxed);
    }

    fn close(&self) {
        self.state.store(CircuitState::Closed.into(), Ordering::SeqCst);
        self.failure_count.store(0, Ordering::Relaxed);
        self.success_count.store(0, Ordering::Relaxed);
        self.half_open_attempts.store(0, Ordering::Relaxed);
        self.opened_at.store(0, Ordering::Relaxed);
    }

    /// Force the circuit closed
    pub fn reset(&self) {
        self.close();
    }

    pub fn call<F, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if !self.try_permit() {
            return Err(CircuitBreakerError::Open);
        }
        self.settle(f())
    }

    pub async fn call_async<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_permit() {
            return Err(CircuitBreakerError::Open);
        }
        self.settle(f().await)
    }

    fn settle<T, E>(&self, result: Result<T, E>) -> Result<T, CircuitBreakerError<E>> {
        match result {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitBreakerError::Operation(e))
            }
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn fast_config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            timeout_duration: Duration::from_millis(100),
            ..Default::default()
        }
    }

    #[test]
    fn test_circuit_breaker_starts_closed() {
        let cb = CircuitBreaker::default();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.config().failure_threshold, 3);
        assert_eq!(cb.config().timeout_duration, Duration::from_secs(30));
        assert!(cb.open_for().is_none());
    }

    #[test]
    fn test_circuit_breaker_opens_on_failures() {
        let cb = CircuitBreaker::new(fast_config(3));

        for i in 0..3 {
            let result = cb.call(|| -> Result<(), &str> { Err("error") });
            assert!(result.is_err());

            if i < 2 {
                assert_eq!(cb.state(), CircuitState::Closed);
            }
        }

        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.failure_count(), 3);
    }

    #[test]
    fn test_open_circuit_skips_operation() {
        let cb = CircuitBreaker::new(fast_config(3));
        for _ in 0..3 {
            cb.call(|| -> Result<(), &str> { Err("error") }).ok();
        }

        let invoked = AtomicBool::new(false);
        let result = cb.call(|| -> Result<(), &str> {
            invoked.store(true, Ordering::SeqCst);
            Ok(())
        });
        assert!(matches!(result, Err(CircuitBreakerError::Open)));
        assert!(!invoked.load(Ordering::SeqCst));
        assert!(!cb.is_call_permitted());
    }

    #[tokio::test]
    async fn test_cooldown_allows_probe_and_success_closes() {
        let cb = CircuitBreaker::new(fast_config(3));
        for _ in 0..3 {
            cb.call(|| -> Result<(), &str> { Err("error") }).ok();
        }
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cb.is_call_permitted());

        let invoked = AtomicBool::new(false);
        let result = cb.call(|| -> Result<i32, &str> {
            invoked.store(true, Ordering::SeqCst);
            Ok(42)
        });
        assert_eq!(result.ok(), Some(42));
        assert!(invoked.load(Ordering::SeqCst));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_circuit_breaker_half_open_failure() {
        let cb = CircuitBreaker::new(fast_config(2));

        cb.call(|| -> Result<(), &str> { Err("error") }).ok();
        cb.call(|| -> Result<(), &str> { Err("error") }).ok();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(150)).await;

        let result = cb.call(|| -> Result<(), &str> { Err("error") });
        assert!(matches!(result, Err(CircuitBreakerError::Operation("error"))));
        assert_eq!(cb.state(), CircuitState::Open);

        // Cooldown restarts from the failed probe
        let result = cb.call(|| -> Result<(), &str> { Ok(()) });
        assert!(matches!(result, Err(CircuitBreakerError::Open)));
    }

    #[tokio::test]
    async fn test_half_open_limits_concurrent_probes() {
        let cb = CircuitBreaker::new(fast_config(1));
        cb.record_failure();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(cb.try_permit());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.try_permit());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_permit());
    }

    #[tokio::test]
    async fn test_unsettled_half_open_call_expires() {
        let cb = CircuitBreaker::new(fast_config(1));
        cb.record_failure();
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Admitted, then abandoned without settling
        assert!(cb.try_permit());
        assert!(!cb.try_permit());
        assert!(!cb.is_call_permitted());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cb.is_call_permitted());
        assert!(cb.try_permit());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.try_permit());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_circuit_breaker_async() {
        let cb = CircuitBreaker::new(fast_config(2));

        let result = cb.call_async(|| async { Ok::<i32, &str>(42) }).await;
        assert_eq!(result.ok(), Some(42));

        let result = cb.call_async(|| async { Err::<i32, &str>("error") }).await;
        assert!(result.is_err());
        assert_eq!(cb.failure_count(), 1);
    }

    #[test]
    fn test_circuit_breaker_success_resets_failures() {
        let cb = CircuitBreaker::new(fast_config(3));

        cb.call(|| -> Result<(), &str> { Err("error") }).ok();
        cb.call(|| -> Result<(), &str> { Err("error") }).ok();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.call(|| -> Result<i32, &str> { Ok(42) }).ok();
        assert_eq!(cb.failure_count(), 0);

        cb.call(|| -> Result<(), &str> { Err("error") }).ok();
        cb.call(|| -> Result<(), &str> { Err("error") }).ok();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.call(|| -> Result<(), &str> { Err("error") }).ok();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_reset_closes() {
        let cb = CircuitBreaker::new(fast_config(1));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.open_for().is_some());
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }
}
