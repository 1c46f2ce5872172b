use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use swap_engine_ratelimit::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimitError, SlidingWindowLimiter,
};

/// Protection settings applied to every endpoint in a registry
#[derive(Debug, Clone)]
pub struct EndpointPolicy {
    pub max_calls: u32,
    pub window: Duration,
    pub breaker: CircuitBreakerConfig,
}

impl Default for EndpointPolicy {
    fn default() -> Self {
        Self {
            max_calls: 10,
            window: Duration::from_secs(1),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Per-URL resilience state, shared by every caller in the process
pub struct EndpointState {
    pub url: String,
    pub limiter: SlidingWindowLimiter,
    pub breaker: CircuitBreaker,
}

impl EndpointState {
    pub fn new(url: impl Into<String>, policy: &EndpointPolicy) -> Result<Self, RateLimitError> {
        Ok(Self {
            url: url.into(),
            limiter: SlidingWindowLimiter::new(policy.max_calls, policy.window)?,
            breaker: CircuitBreaker::new(policy.breaker.clone()),
        })
    }

    pub fn health(&self) -> EndpointHealth {
        EndpointHealth {
            url: self.url.clone(),
            state: self.breaker.state(),
            consecutive_failures: self.breaker.failure_count(),
            calls_in_window: self.limiter.in_window(),
            open_for: self.breaker.open_for(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EndpointHealth {
    pub url: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub calls_in_window: usize,
    pub open_for: Option<Duration>,
}

/// Endpoint state keyed by URL. Created once per process and injected into
/// every `RpcClient` so limits and circuits are shared across chains and callers.
pub struct EndpointRegistry {
    endpoints: DashMap<String, Arc<EndpointState>>,
    policy: EndpointPolicy,
}

impl EndpointRegistry {
    pub fn new(policy: EndpointPolicy) -> Result<Self, RateLimitError> {
        // Fail fast on a policy no endpoint could be built with
        SlidingWindowLimiter::new(policy.max_calls, policy.window)?;
        Ok(Self {
            endpoints: DashMap::new(),
            policy,
        })
    }

    pub fn policy(&self) -> &EndpointPolicy {
        &self.policy
    }

    /// State for `url`, created on first use
    pub fn endpoint(&self, url: &str) -> Result<Arc<EndpointState>, RateLimitError> {
        if let Some(existing) = self.endpoints.get(url) {
            return Ok(existing.clone());
        }
        let state = Arc::new(EndpointState::new(url, &self.policy)?);
        Ok(self
            .endpoints
            .entry(url.to_string())
            .or_insert(state)
            .clone())
    }

    pub fn health(&self) -> Vec<EndpointHealth> {
        let mut health: Vec<_> = self.endpoints.iter().map(|e| e.value().health()).collect();
        health.sort_by(|a, b| a.url.cmp(&b.url));
        health
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self {
            endpoints: DashMap::new(),
            policy: EndpointPolicy::default(),
        }
    }
}
