use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use swap_engine_types::{rank_quotes, Quote, SourceKind, SwapIntent};
use tracing::{debug, info, warn};

use crate::{LiquiditySource, QuoteCacheKey, QuoteRequest, RouterError, SourceError, SourceFailure};

/// Quote router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Upper bound on a single source's quote call
    pub source_timeout: Duration,
    /// How long a routed result is served from cache
    pub cache_ttl: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            source_timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_millis(swap_engine_types::QUOTE_FRESHNESS_MS),
        }
    }
}

/// Ranked quotes plus the reason every other source failed
#[derive(Debug, Clone)]
pub struct RouteResult {
    /// Sorted by buy amount, best first
    pub quotes: Vec<Quote>,
    pub failures: Vec<SourceFailure>,
    pub latencies: Vec<(SourceKind, Duration)>,
}

impl RouteResult {
    pub fn best(&self) -> Option<&Quote> {
        self.quotes.first()
    }

    /// The caller's chosen source, or the top quote when none is given
    pub fn select(&self, source: Option<SourceKind>) -> Result<&Quote, RouterError> {
        match source {
            None => self.best().ok_or(RouterError::NoSources),
            Some(kind) => self
                .quotes
                .iter()
                .find(|q| q.source == kind)
                .ok_or(RouterError::SourceNotQuoted(kind)),
        }
    }
}

struct CachedRoute {
    result: RouteResult,
    cached_at: Instant,
}

/// Fans a quote request out to every registered source
pub struct QuoteRouter {
    sources: Vec<Arc<dyn LiquiditySource>>,
    config: RouterConfig,
    cache: DashMap<QuoteCacheKey, CachedRoute>,
}

impl QuoteRouter {
    pub fn new(sources: Vec<Arc<dyn LiquiditySource>>, config: RouterConfig) -> Self {
        Self {
            sources,
            config,
            cache: DashMap::new(),
        }
    }

    pub fn add_source(&mut self, source: Arc<dyn LiquiditySource>) {
        self.sources.push(source);
    }

    pub fn sources(&self) -> &[Arc<dyn LiquiditySource>] {
        &self.sources
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub async fn quote_intent(&self, intent: &SwapIntent) -> Result<RouteResult, RouterError> {
        let request = QuoteRequest::from_intent(intent)?;
        self.route(&request).await
    }

    /// Query all sources concurrently.
    ///
    /// Fails only when no source produced a quote; the error carries the
    /// most specific failure kind across sources.
    pub async fn route(&self, request: &QuoteRequest) -> Result<RouteResult, RouterError> {
        if self.sources.is_empty() {
            return Err(RouterError::NoSources);
        }

        let key = request.cache_key();
        if let Some(result) = self.cached(&key) {
            debug!(chain_id = request.chain_id, "Serving route from cache");
            return Ok(result);
        }

        let timeout = self.config.source_timeout;
        let calls = self.sources.iter().map(|source| {
            let source = Arc::clone(source);
            async move {
                let kind = source.kind();
                let started = Instant::now();
                if !source.supports_chain(request.chain_id) {
                    return (kind, started.elapsed(), Err(SourceError::UnsupportedChain(request.chain_id)));
                }
                let outcome = match tokio::time::timeout(timeout, source.quote(request)).await {
                    Ok(Ok(quote)) if quote.buy_amount.is_zero() => {
                        Err(SourceError::NoRoute("source quoted zero output".to_string()))
                    }
                    Ok(result) => result,
                    Err(_) => Err(SourceError::Timeout(timeout)),
                };
                (kind, started.elapsed(), outcome)
            }
        });

        let mut quotes = Vec::new();
        let mut failures = Vec::new();
        let mut latencies = Vec::new();
        for (source, elapsed, outcome) in join_all(calls).await {
            latencies.push((source, elapsed));
            match outcome {
                Ok(quote) => {
                    debug!(source = %source, buy_amount = %quote.buy_amount, ?elapsed, "Source quoted");
                    quotes.push(quote);
                }
                Err(error) => {
                    warn!(source = %source, error = %error, "Source failed to quote");
                    failures.push(SourceFailure { source, error });
                }
            }
        }

        if quotes.is_empty() {
            let err = RouterError::aggregate(failures);
            warn!(kind = %err.kind(), "No source produced a quote");
            return Err(err);
        }

        rank_quotes(&mut quotes);
        info!(
            chain_id = request.chain_id,
            quotes = quotes.len(),
            failures = failures.len(),
            best = %quotes[0].source,
            "Route complete"
        );

        let result = RouteResult {
            quotes,
            failures,
            latencies,
        };
        self.cache.insert(
            key,
            CachedRoute {
                result: result.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(result)
    }

    fn cached(&self, key: &QuoteCacheKey) -> Option<RouteResult> {
        let entry = self.cache.get(key)?;
        if entry.cached_at.elapsed() < self.config.cache_ttl {
            return Some(entry.result.clone());
        }
        drop(entry);
        self.cache.remove(key);
        None
    }

    /// Drop expired quote cache entries and each source's expired state
    pub fn purge_expired(&self) -> usize {
        let before = self.cache.len();
        let ttl = self.config.cache_ttl;
        self.cache.retain(|_, entry| entry.cached_at.elapsed() < ttl);
        let from_sources: usize = self.sources.iter().map(|source| source.purge_expired()).sum();
        before - self.cache.len() + from_sources
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub async fn health_check(&self) -> Vec<(SourceKind, bool)> {
        let checks = self.sources.iter().map(|source| async move {
            (source.kind(), source.health_check().await)
        });
        join_all(checks).await
    }
}
