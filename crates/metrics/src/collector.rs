use std::time::Duration;

use prometheus::{Encoder, Registry, TextEncoder};
use swap_engine_types::{ErrorKind, FlowStatus, SourceKind, StepKind};

use crate::metrics::EngineMetrics;

/// Outcome label for a single source's quote attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteOutcome {
    Success,
    Failure(ErrorKind),
}

impl QuoteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteOutcome::Success => "success",
            QuoteOutcome::Failure(kind) => kind.as_str(),
        }
    }
}

/// Metrics collector for the swap engine.
///
/// Each collector owns its registry, so engines built side by side (tests,
/// multiple networks in one process) never share counters.
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Registry,
    metrics: EngineMetrics,
}

impl MetricsCollector {
    /// Create a collector on a fresh registry
    pub fn new() -> Result<Self, MetricsError> {
        Self::with_registry(Registry::new())
    }

    /// Create a collector on a caller-supplied registry
    pub fn with_registry(registry: Registry) -> Result<Self, MetricsError> {
        let metrics = EngineMetrics::register(&registry)?;
        Ok(Self { registry, metrics })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ROUTING METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_quote_request(&self) {
        self.metrics.quote_requests.inc();
    }

    /// Record one source's result and, when measured, how long it took
    pub fn record_source_quote(
        &self,
        source: SourceKind,
        outcome: QuoteOutcome,
        latency: Option<Duration>,
    ) {
        self.metrics
            .source_quotes
            .with_label_values(&[source.as_str(), outcome.as_str()])
            .inc();
        if let Some(latency) = latency {
            self.metrics
                .source_latency
                .with_label_values(&[source.as_str()])
                .observe(latency.as_secs_f64() * 1000.0);
        }
    }

    /// Record a request where every source failed
    pub fn record_route_failure(&self, kind: ErrorKind) {
        self.metrics
            .route_failures
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    pub fn set_source_health(&self, source: SourceKind, healthy: bool) {
        self.metrics
            .source_health
            .with_label_values(&[source.as_str()])
            .set(i64::from(healthy));
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FLOW METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_flow_created(&self) {
        self.metrics.flows_created.inc();
        self.metrics.active_flows.inc();
    }

    /// Record a flow leaving the active state
    pub fn record_flow_finished(&self, status: FlowStatus) {
        let status_str = match status {
            FlowStatus::Active => return,
            FlowStatus::Complete => "complete",
            FlowStatus::Cancelled => "cancelled",
            FlowStatus::Expired => "expired",
        };
        self.metrics
            .flows_finished
            .with_label_values(&[status_str])
            .inc();
        self.metrics.active_flows.dec();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ASSEMBLY METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_step_assembled(&self, step: StepKind) {
        self.metrics
            .steps_assembled
            .with_label_values(&[step.as_str()])
            .inc();
    }

    pub fn record_assembly_failure(&self, kind: ErrorKind) {
        self.metrics
            .assembly_failures
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    pub(crate) fn record_log_event(&self, level: &str) {
        self.metrics.log_events.with_label_values(&[level]).inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXPORT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Render every registered metric in Prometheus text format
    pub fn gather_text(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingError(e.to_string()))?;

        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingError(e.to_string()))
    }
}

/// Metrics error types
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("encoding error: {0}")]
    EncodingError(String),
    #[error("registry error: {0}")]
    RegistryError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().unwrap();
        assert!(collector.gather_text().is_ok());
    }

    #[test]
    fn test_collectors_do_not_share_registries() {
        let a = MetricsCollector::new().unwrap();
        let b = MetricsCollector::new().unwrap();
        a.record_quote_request();
        a.record_quote_request();

        assert!(a.gather_text().unwrap().contains("swap_engine_quote_requests_total 2"));
        assert!(b.gather_text().unwrap().contains("swap_engine_quote_requests_total 0"));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        MetricsCollector::with_registry(registry.clone()).unwrap();
        assert!(matches!(
            MetricsCollector::with_registry(registry),
            Err(MetricsError::RegistryError(_))
        ));
    }

    #[test]
    fn test_record_source_metrics() {
        let collector = MetricsCollector::new().unwrap();
        collector.record_source_quote(
            SourceKind::ZeroX,
            QuoteOutcome::Success,
            Some(Duration::from_millis(120)),
        );
        collector.record_source_quote(
            SourceKind::OneInch,
            QuoteOutcome::Failure(ErrorKind::NoRouteFound),
            None,
        );
        collector.set_source_health(SourceKind::UniswapV3, false);

        let text = collector.gather_text().unwrap();
        assert!(text.contains(r#"swap_engine_source_quotes_total{outcome="success",source="0x"} 1"#));
        assert!(text.contains(r#"outcome="no_route_found",source="1inch""#));
        assert!(text.contains("swap_engine_source_quote_latency_ms_bucket"));
        assert!(text.contains(r#"swap_engine_source_health{source="uniswap_v3"} 0"#));
    }

    #[test]
    fn test_flow_lifecycle_metrics() {
        let collector = MetricsCollector::new().unwrap();
        collector.record_flow_created();
        collector.record_flow_created();
        collector.record_flow_finished(FlowStatus::Complete);
        collector.record_flow_finished(FlowStatus::Active);
        collector.record_step_assembled(StepKind::Approve);
        collector.record_assembly_failure(ErrorKind::BuildTransactionError);

        let text = collector.gather_text().unwrap();
        assert!(text.contains("swap_engine_flows_created_total 2"));
        assert!(text.contains(r#"swap_engine_flows_finished_total{status="complete"} 1"#));
        assert!(text.contains("swap_engine_active_flows 1"));
        assert!(text.contains(r#"swap_engine_steps_assembled_total{step_type="approve"} 1"#));
        assert!(text.contains(r#"swap_engine_assembly_failures_total{kind="build_transaction_error"} 1"#));
    }
}
