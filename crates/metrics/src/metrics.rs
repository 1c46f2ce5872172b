use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};

use crate::collector::MetricsError;

const NAMESPACE: &str = "swap_engine";

/// Buckets for per-source quote latency, in milliseconds
pub const QUOTE_LATENCY_BUCKETS_MS: [f64; 8] =
    [10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 10000.0];

/// Handles to every metric the engine exports, registered on one registry
#[derive(Clone)]
pub struct EngineMetrics {
    // ═══════════════════════════════════════════════════════════════════════════
    // ROUTING
    // ═══════════════════════════════════════════════════════════════════════════
    pub quote_requests: IntCounter,
    pub source_quotes: IntCounterVec,
    pub source_latency: HistogramVec,
    pub route_failures: IntCounterVec,
    pub source_health: IntGaugeVec,

    // ═══════════════════════════════════════════════════════════════════════════
    // FLOWS
    // ═══════════════════════════════════════════════════════════════════════════
    pub flows_created: IntCounter,
    pub flows_finished: IntCounterVec,
    pub active_flows: IntGauge,

    // ═══════════════════════════════════════════════════════════════════════════
    // ASSEMBLY
    // ═══════════════════════════════════════════════════════════════════════════
    pub steps_assembled: IntCounterVec,
    pub assembly_failures: IntCounterVec,

    // ═══════════════════════════════════════════════════════════════════════════
    // LOGGING
    // ═══════════════════════════════════════════════════════════════════════════
    pub log_events: IntCounterVec,
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE)
}

fn register<M>(registry: &Registry, metric: M) -> Result<M, MetricsError>
where
    M: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(metric.clone()))
        .map_err(|e| MetricsError::RegistryError(e.to_string()))?;
    Ok(metric)
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, MetricsError> {
    let metric = IntCounter::with_opts(opts(name, help))
        .map_err(|e| MetricsError::RegistryError(e.to_string()))?;
    register(registry, metric)
}

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntCounterVec, MetricsError> {
    let metric = IntCounterVec::new(opts(name, help), labels)
        .map_err(|e| MetricsError::RegistryError(e.to_string()))?;
    register(registry, metric)
}

impl EngineMetrics {
    /// Create every metric and register it on `registry`
    pub fn register(registry: &Registry) -> Result<Self, MetricsError> {
        let source_latency = HistogramVec::new(
            HistogramOpts::new("source_quote_latency_ms", "Per-source quote latency in milliseconds")
                .namespace(NAMESPACE)
                .buckets(QUOTE_LATENCY_BUCKETS_MS.to_vec()),
            &["source"],
        )
        .map_err(|e| MetricsError::RegistryError(e.to_string()))?;

        let source_health = IntGaugeVec::new(
            opts("source_health", "Liquidity source health (1 = healthy, 0 = unhealthy)"),
            &["source"],
        )
        .map_err(|e| MetricsError::RegistryError(e.to_string()))?;

        let active_flows = IntGauge::with_opts(opts("active_flows", "Flows currently active"))
            .map_err(|e| MetricsError::RegistryError(e.to_string()))?;

        Ok(Self {
            quote_requests: counter(registry, "quote_requests_total", "Total quote requests routed")?,
            source_quotes: counter_vec(
                registry,
                "source_quotes_total",
                "Quote outcomes per liquidity source",
                &["source", "outcome"],
            )?,
            source_latency: register(registry, source_latency)?,
            route_failures: counter_vec(
                registry,
                "route_failures_total",
                "Requests where no source produced a quote, by error kind",
                &["kind"],
            )?,
            source_health: register(registry, source_health)?,
            flows_created: counter(registry, "flows_created_total", "Total transaction flows created")?,
            flows_finished: counter_vec(
                registry,
                "flows_finished_total",
                "Flows that left the active state, by final status",
                &["status"],
            )?,
            active_flows: register(registry, active_flows)?,
            steps_assembled: counter_vec(
                registry,
                "steps_assembled_total",
                "Step payloads assembled, by step type",
                &["step_type"],
            )?,
            assembly_failures: counter_vec(
                registry,
                "assembly_failures_total",
                "Transaction assembly failures, by error kind",
                &["kind"],
            )?,
            log_events: counter_vec(
                registry,
                "log_events_total",
                "Warning and error log events",
                &["level"],
            )?,
        })
    }
}
