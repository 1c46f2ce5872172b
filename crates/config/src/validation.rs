//! Configuration validation

use crate::config::parse_address;
use crate::{AggregatorConfig, AppConfig, ChainConfig, ConfigError, Result};
use std::collections::HashMap;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate the entire application configuration.
///
/// Every problem is collected before returning, so one run reports them all.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let errors = collect_errors(config);
    if errors.is_empty() {
        return Ok(());
    }

    let error_msg = errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    Err(ConfigError::ValidationError(error_msg))
}

/// Every validation problem in the configuration
pub fn collect_errors(config: &AppConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // Network
    if let Err(e) = validate_log_level(&config.network.log_level) {
        errors.push(e);
    }

    // Chains
    if config.chains.is_empty() {
        errors.push(ValidationError::new("chains", "at least one chain must be configured"));
    }

    let mut seen_ids: HashMap<u64, &str> = HashMap::new();
    for (chain_name, chain) in &config.chains {
        if let Some(previous) = seen_ids.insert(chain.chain_id, chain_name) {
            errors.push(ValidationError::new(
                format!("chains.{chain_name}.chain_id"),
                format!("chain id {} already used by '{previous}'", chain.chain_id),
            ));
        }
        errors.extend(validate_chain_config(chain_name, chain));
    }

    // Router
    if config.router.source_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "router.source_timeout_ms",
            "must be greater than 0",
        ));
    }

    // Sources
    validate_aggregator("sources.zerox", &config.sources.zerox, &mut errors);
    validate_aggregator("sources.oneinch", &config.sources.oneinch, &mut errors);

    let uniswap_chains = config.chains.values().filter(|c| c.uniswap.is_some()).count();
    if config.sources.uniswap.enabled && uniswap_chains == 0 && !config.chains.is_empty() {
        errors.push(ValidationError::new(
            "sources.uniswap.enabled",
            "no chain has a uniswap deployment",
        ));
    }

    let any_enabled = config.sources.zerox.enabled
        || config.sources.oneinch.enabled
        || (config.sources.uniswap.enabled && uniswap_chains > 0);
    if !any_enabled {
        errors.push(ValidationError::new(
            "sources",
            "at least one liquidity source must be enabled",
        ));
    }

    // RPC
    if config.rpc.max_calls == 0 {
        errors.push(ValidationError::new("rpc.max_calls", "must be greater than 0"));
    }
    if config.rpc.window_ms == 0 {
        errors.push(ValidationError::new("rpc.window_ms", "must be greater than 0"));
    }
    if config.rpc.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "rpc.failure_threshold",
            "must be greater than 0",
        ));
    }
    if config.rpc.request_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "rpc.request_timeout_ms",
            "must be greater than 0",
        ));
    }
    if config.rpc.max_attempts == 0 {
        errors.push(ValidationError::new("rpc.max_attempts", "must be at least 1"));
    }
    if config.rpc.retry_initial_ms > config.rpc.retry_max_ms {
        errors.push(ValidationError::new(
            "rpc.retry_initial_ms",
            "must not exceed rpc.retry_max_ms",
        ));
    }

    // Gas
    if config.gas.nonstandard_multiplier_percent < 100 {
        errors.push(ValidationError::new(
            "gas.nonstandard_multiplier_percent",
            "must be >= 100",
        ));
    }
    if config.gas.legacy_price_multiplier_percent < 100 {
        errors.push(ValidationError::new(
            "gas.legacy_price_multiplier_percent",
            "must be >= 100",
        ));
    }

    // Signature
    if config.signature.signature_window_secs <= config.signature.deadline_buffer_secs {
        errors.push(ValidationError::new(
            "signature.signature_window_secs",
            "must be longer than signature.deadline_buffer_secs",
        ));
    }

    // Flows
    if config.flows.max_age_secs == 0 {
        errors.push(ValidationError::new("flows.max_age_secs", "must be greater than 0"));
    }
    if config.flows.maintenance_interval_secs == 0 {
        errors.push(ValidationError::new(
            "flows.maintenance_interval_secs",
            "must be greater than 0",
        ));
    }

    errors
}

/// Validate a chain configuration
pub fn validate_chain_config(chain_name: &str, chain: &ChainConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let field = |name: &str| format!("chains.{chain_name}.{name}");

    if chain.chain_id == 0 {
        errors.push(ValidationError::new(field("chain_id"), "must be greater than 0"));
    }

    if chain.rpc_urls.is_empty() {
        errors.push(ValidationError::new(
            field("rpc_urls"),
            "at least one RPC URL is required",
        ));
    }
    for (i, url) in chain.rpc_urls.iter().enumerate() {
        if let Err(e) = validate_url(url) {
            errors.push(ValidationError::new(field(&format!("rpc_urls[{i}]")), e));
        }
    }

    let mut addresses = vec![
        ("permit2", chain.permit2.as_deref()),
        ("wrapped_native", chain.wrapped_native.as_deref()),
    ];
    if let Some(uniswap) = &chain.uniswap {
        if chain.wrapped_native.is_none() {
            errors.push(ValidationError::new(
                field("wrapped_native"),
                "required when a uniswap deployment is configured",
            ));
        }
        addresses.extend([
            ("uniswap.factory", Some(uniswap.factory.as_str())),
            ("uniswap.quoter_v2", Some(uniswap.quoter_v2.as_str())),
            ("uniswap.swap_router02", Some(uniswap.swap_router02.as_str())),
        ]);
    }
    for (name, value) in addresses {
        if let Some(value) = value {
            if let Err(e) = parse_address(name, value) {
                errors.push(ValidationError::new(field(name), e.to_string()));
            }
        }
    }

    errors
}

fn validate_aggregator(section: &str, source: &AggregatorConfig, errors: &mut Vec<ValidationError>) {
    if !source.enabled {
        return;
    }
    if let Err(e) = validate_url(&source.base_url) {
        errors.push(ValidationError::new(format!("{section}.base_url"), e));
    }
    if source.timeout_ms == 0 {
        errors.push(ValidationError::new(
            format!("{section}.timeout_ms"),
            "must be greater than 0",
        ));
    }
}

/// Validate a URL
pub fn validate_url(url: &str) -> std::result::Result<(), String> {
    if url.is_empty() {
        return Err("URL cannot be empty".to_string());
    }

    if !url.starts_with("http://")
        && !url.starts_with("https://")
        && !url.starts_with("ws://")
        && !url.starts_with("wss://")
    {
        return Err("URL must start with http://, https://, ws://, or wss://".to_string());
    }

    Ok(())
}

/// Validate log level
fn validate_log_level(level: &str) -> std::result::Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new(
            "network.log_level",
            format!(
                "invalid log level '{level}', must be one of: trace, debug, info, warn, error"
            ),
        )),
    }
}
