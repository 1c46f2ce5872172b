//! Metrics and structured logging for the swap engine
//!
//! # Features
//!
//! - Prometheus metrics on a collector-owned registry
//! - Subscriber setup from [`LoggingOptions`], with optional JSON output
//! - Correlation IDs and route spans for request tracing
//!
//! # Example
//!
//! ```no_run
//! use swap_engine_metrics::{init_tracing_with_metrics, LoggingOptions, MetricsCollector};
//!
//! let collector = MetricsCollector::new().unwrap();
//! init_tracing_with_metrics(&LoggingOptions::default(), collector.clone()).unwrap();
//!
//! collector.record_quote_request();
//! println!("{}", collector.gather_text().unwrap());
//! ```

pub mod collector;
pub mod metrics;
pub mod tracing;

pub use collector::{MetricsCollector, MetricsError, QuoteOutcome};
pub use metrics::EngineMetrics;
pub use self::tracing::{
    init_tracing, init_tracing_with_metrics, CorrelationId, ErrorContext, LoggingOptions,
    MetricsLayer, RouteSpan, TracingError, DEFAULT_FILTER,
};
