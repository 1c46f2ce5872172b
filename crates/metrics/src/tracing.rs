use serde::{Deserialize, Serialize};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    fmt,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::collector::MetricsCollector;

/// Default filter when neither `RUST_LOG` nor a configured level is usable
pub const DEFAULT_FILTER: &str = "info,swap_engine=debug";

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    /// `EnvFilter` directive, e.g. `info` or `warn,swap_engine_router=debug`
    pub level: String,
    /// Emit one JSON object per line instead of human-readable text
    pub json: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: DEFAULT_FILTER.to_string(),
            json: false,
        }
    }
}

impl LoggingOptions {
    /// `RUST_LOG` wins over the configured level
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Install the global subscriber
pub fn init_tracing(options: &LoggingOptions) -> Result<(), TracingError> {
    install(options, None)
}

/// Install the global subscriber and count warnings and errors in `collector`
pub fn init_tracing_with_metrics(
    options: &LoggingOptions,
    collector: MetricsCollector,
) -> Result<(), TracingError> {
    install(options, Some(MetricsLayer::new(collector)))
}

fn install(options: &LoggingOptions, metrics: Option<MetricsLayer>) -> Result<(), TracingError> {
    let registry = tracing_subscriber::registry()
        .with(options.env_filter())
        .with(metrics);

    let result = if options.json {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true).json())
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| TracingError::InitError(e.to_string()))
}

/// Tracing layer that counts warning and error events
pub struct MetricsLayer {
    collector: MetricsCollector,
}

impl MetricsLayer {
    pub fn new(collector: MetricsCollector) -> Self {
        Self { collector }
    }
}

impl<S> Layer<S> for MetricsLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        match *event.metadata().level() {
            Level::ERROR => self.collector.record_log_event("error"),
            Level::WARN => self.collector.record_log_event("warn"),
            _ => {}
        }
    }
}

/// Correlation ID for tracking one request across routing and assembly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(uuid::Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Span context for one routing request
#[derive(Debug, Clone)]
pub struct RouteSpan {
    pub correlation_id: CorrelationId,
    pub chain_id: u64,
    pub wallet: String,
}

impl RouteSpan {
    pub fn new(chain_id: u64, wallet: impl Into<String>) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            chain_id,
            wallet: wallet.into(),
        }
    }

    /// Span to instrument the request's future with
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "route",
            correlation_id = %self.correlation_id,
            chain_id = self.chain_id,
            wallet = %self.wallet,
        )
    }
}

/// Log an error with request context before propagating it
pub trait ErrorContext {
    fn with_correlation_id(self, correlation_id: CorrelationId) -> Self;

    fn with_flow_id(self, flow_id: &str) -> Self;
}

impl<T, E> ErrorContext for Result<T, E>
where
    E: std::fmt::Display,
{
    fn with_correlation_id(self, correlation_id: CorrelationId) -> Self {
        self.map_err(|e| {
            tracing::error!(correlation_id = %correlation_id, error = %e, "error occurred");
            e
        })
    }

    fn with_flow_id(self, flow_id: &str) -> Self {
        self.map_err(|e| {
            tracing::error!(flow_id = %flow_id, error = %e, "error occurred");
            e
        })
    }
}

/// Tracing error types
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("tracing initialization error: {0}")]
    InitError(String),
}
