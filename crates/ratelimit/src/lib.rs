//! Rate limiting and fault tolerance for outbound calls
//!
//! This crate provides the per-endpoint protections used by the RPC layer:
//!
//! - `SlidingWindowLimiter`: at most N calls in any trailing window, callers sleep for a free slot
//! - `CircuitBreaker`: opens after consecutive failures, probes again after a cooldown
//! - `ExponentialBackoff` / `RetryPolicy`: explicit retry schedules for idempotent reads

pub mod backoff;
pub mod circuit_breaker;
pub mod limiter;

pub use backoff::{retry_with_policy, ExponentialBackoff, RetryPolicy};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use limiter::{RateLimitError, SlidingWindowLimiter};
