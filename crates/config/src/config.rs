//! Core configuration structures for the swap engine

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use swap_engine_assembler::{
    ApprovalAmount, GasDefaults, GasPolicy, GasPricingMode, SignatureStrictness,
};

use crate::{ConfigError, Result};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Chain configurations by name
    #[serde(default)]
    pub chains: HashMap<String, ChainConfig>,

    /// Quote router configuration
    #[serde(default)]
    pub router: RouterSettings,

    /// Liquidity source configuration
    #[serde(default)]
    pub sources: SourcesConfig,

    /// RPC endpoint protection
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Gas limit and price policy
    #[serde(default)]
    pub gas: GasConfig,

    /// Permit2 signature handling
    #[serde(default)]
    pub signature: SignatureConfig,

    /// Transaction flow lifecycle
    #[serde(default)]
    pub flows: FlowConfig,
}

impl AppConfig {
    /// Chain entry for a numeric chain id
    pub fn chain_by_id(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.values().find(|chain| chain.chain_id == chain_id)
    }
}

/// Network environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Environment type (mainnet, testnet, local)
    #[serde(default = "default_environment")]
    pub environment: Environment,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,

    /// Enable metrics collection
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

/// Environment types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Mainnet,
    Testnet,
    Local,
}

/// Configuration for one EVM chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Numeric chain id
    pub chain_id: u64,

    /// RPC endpoints, tried in order
    #[serde(default)]
    pub rpc_urls: Vec<String>,

    /// How the chain prices gas
    #[serde(default)]
    pub gas_pricing: GasPricingMode,

    /// Permit2 contract; required before signature-based quotes can be used
    #[serde(default)]
    pub permit2: Option<String>,

    /// Wrapped native token (WETH and friends)
    #[serde(default)]
    pub wrapped_native: Option<String>,

    /// Uniswap V3 deployment; on-chain quoting is disabled without it
    #[serde(default)]
    pub uniswap: Option<UniswapContracts>,
}

/// Uniswap V3 contract addresses on one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniswapContracts {
    pub factory: String,
    pub quoter_v2: String,
    pub swap_router02: String,
}

/// Parsed Uniswap V3 addresses for a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniswapAddresses {
    pub factory: Address,
    pub quoter_v2: Address,
    pub swap_router02: Address,
    pub wrapped_native: Address,
}

impl ChainConfig {
    pub fn permit2_address(&self) -> Result<Option<Address>> {
        self.permit2
            .as_deref()
            .map(|value| parse_address("permit2", value))
            .transpose()
    }

    /// Uniswap addresses, or `None` when the chain has no deployment.
    ///
    /// A deployment without a wrapped native token is a configuration error.
    pub fn uniswap_addresses(&self) -> Result<Option<UniswapAddresses>> {
        let Some(uniswap) = &self.uniswap else {
            return Ok(None);
        };
        let wrapped_native = self
            .wrapped_native
            .as_deref()
            .ok_or_else(|| {
                ConfigError::MissingField(format!(
                    "chain {} has a uniswap deployment but no wrapped_native",
                    self.chain_id
                ))
            })
            .and_then(|value| parse_address("wrapped_native", value))?;

        Ok(Some(UniswapAddresses {
            factory: parse_address("uniswap.factory", &uniswap.factory)?,
            quoter_v2: parse_address("uniswap.quoter_v2", &uniswap.quoter_v2)?,
            swap_router02: parse_address("uniswap.swap_router02", &uniswap.swap_router02)?,
            wrapped_native,
        }))
    }
}

pub(crate) fn parse_address(field: &str, value: &str) -> Result<Address> {
    Address::from_str(value)
        .map_err(|e| ConfigError::ParseError(format!("{field}: invalid address '{value}': {e}")))
}

/// Quote router settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    /// Upper bound on a single source's quote call
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,

    /// How long a routed result is served from cache
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
}

impl RouterSettings {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

/// Liquidity sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_zerox")]
    pub zerox: AggregatorConfig,

    #[serde(default = "default_oneinch")]
    pub oneinch: AggregatorConfig,

    #[serde(default)]
    pub uniswap: UniswapSourceConfig,
}

/// An HTTP aggregator API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    pub base_url: String,

    /// Sent with every request when set
    #[serde(default)]
    pub api_key: Option<String>,

    /// HTTP request timeout in milliseconds
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl AggregatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// On-chain Uniswap V3 quoting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniswapSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Pools below this liquidity are ignored
    #[serde(default = "default_min_liquidity")]
    pub min_liquidity: u128,

    /// How long discovered pool state is reused, in seconds
    #[serde(default = "default_pool_cache_ttl_secs")]
    pub pool_cache_ttl_secs: u64,
}

impl UniswapSourceConfig {
    pub fn pool_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.pool_cache_ttl_secs)
    }
}

/// Per-endpoint rate limiting, circuit breaking and retry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Calls allowed per endpoint in each window
    #[serde(default = "default_max_calls")]
    pub max_calls: u32,

    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Consecutive failures that open an endpoint's circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Cooldown before an open circuit is probed again
    #[serde(default = "default_breaker_timeout_ms")]
    pub breaker_timeout_ms: u64,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_http_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Attempts per idempotent read, including the first
    #[serde(default = "default_max_retries")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,

    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

impl RpcConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn breaker_timeout(&self) -> Duration {
        Duration::from_millis(self.breaker_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.retry_initial_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }
}

/// Gas buffers, multipliers and fallback limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasConfig {
    /// Percentage added on top of a node estimate
    #[serde(default = "default_gas_buffer_percent")]
    pub buffer_percent: u64,

    /// Applied to limits for tokens with nonstandard transfers
    #[serde(default = "default_nonstandard_multiplier_percent")]
    pub nonstandard_multiplier_percent: u64,

    /// Applied to the node's legacy gas price
    #[serde(default = "default_legacy_price_multiplier_percent")]
    pub legacy_price_multiplier_percent: u64,

    /// Limits used when estimation fails but simulation succeeds
    #[serde(default)]
    pub defaults: GasDefaults,

    /// Grant unlimited or exact approvals
    #[serde(default)]
    pub approval_amount: ApprovalAmount,
}

impl GasConfig {
    pub fn policy(&self) -> GasPolicy {
        GasPolicy {
            buffer_percent: self.buffer_percent,
            nonstandard_multiplier_percent: self.nonstandard_multiplier_percent,
            legacy_price_multiplier_percent: self.legacy_price_multiplier_percent,
            defaults: self.defaults,
        }
    }
}

/// Permit2 signature handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureConfig {
    /// Whether signatures of unexpected length are rejected
    #[serde(default)]
    pub strictness: SignatureStrictness,

    /// Signatures this close to their deadline count as expired
    #[serde(default = "default_deadline_buffer_secs")]
    pub deadline_buffer_secs: u64,

    /// Validity of an engine-built permit signature
    #[serde(default = "default_signature_window_secs")]
    pub signature_window_secs: u64,

    /// Lifetime of the Permit2 allowance granted by the signature
    #[serde(default = "default_permit_expiration_secs")]
    pub permit_expiration_secs: u64,
}

impl SignatureConfig {
    pub fn deadline_buffer(&self) -> Duration {
        Duration::from_secs(self.deadline_buffer_secs)
    }

    pub fn signature_window(&self) -> Duration {
        Duration::from_secs(self.signature_window_secs)
    }

    pub fn permit_expiration(&self) -> Duration {
        Duration::from_secs(self.permit_expiration_secs)
    }
}

/// Transaction flow lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Active flows older than this are expired
    #[serde(default = "default_flow_max_age_secs")]
    pub max_age_secs: u64,

    /// How often stale flows and cached quotes are swept
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

impl FlowConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

// Default value functions
fn default_environment() -> Environment {
    Environment::Local
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_source_timeout_ms() -> u64 {
    10_000
}

fn default_cache_ttl_ms() -> u64 {
    8_000 // quote freshness window
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

fn default_zerox() -> AggregatorConfig {
    AggregatorConfig {
        enabled: true,
        base_url: "https://api.0x.org".to_string(),
        api_key: None,
        timeout_ms: default_http_timeout_ms(),
    }
}

fn default_oneinch() -> AggregatorConfig {
    AggregatorConfig {
        enabled: true,
        base_url: "https://api.1inch.dev".to_string(),
        api_key: None,
        timeout_ms: default_http_timeout_ms(),
    }
}

fn default_min_liquidity() -> u128 {
    1_000_000
}

fn default_pool_cache_ttl_secs() -> u64 {
    120
}

fn default_max_calls() -> u32 {
    10
}

fn default_window_ms() -> u64 {
    1_000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_breaker_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_initial_ms() -> u64 {
    100
}

fn default_retry_max_ms() -> u64 {
    2_000
}

fn default_gas_buffer_percent() -> u64 {
    25
}

fn default_nonstandard_multiplier_percent() -> u64 {
    150
}

fn default_legacy_price_multiplier_percent() -> u64 {
    110
}

fn default_deadline_buffer_secs() -> u64 {
    300 // 5 minutes
}

fn default_signature_window_secs() -> u64 {
    1_800 // 30 minutes
}

fn default_permit_expiration_secs() -> u64 {
    30 * 24 * 60 * 60 // 30 days
}

fn default_flow_max_age_secs() -> u64 {
    1_800 // 30 minutes
}

fn default_maintenance_interval_secs() -> u64 {
    60
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: default_true(),
        }
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            source_timeout_ms: default_source_timeout_ms(),
            cache_ttl_ms: default_cache_ttl_ms(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            zerox: default_zerox(),
            oneinch: default_oneinch(),
            uniswap: UniswapSourceConfig::default(),
        }
    }
}

impl Default for UniswapSourceConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            min_liquidity: default_min_liquidity(),
            pool_cache_ttl_secs: default_pool_cache_ttl_secs(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_calls: default_max_calls(),
            window_ms: default_window_ms(),
            failure_threshold: default_failure_threshold(),
            breaker_timeout_ms: default_breaker_timeout_ms(),
            request_timeout_ms: default_http_timeout_ms(),
            max_attempts: default_max_retries(),
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
        }
    }
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            buffer_percent: default_gas_buffer_percent(),
            nonstandard_multiplier_percent: default_nonstandard_multiplier_percent(),
            legacy_price_multiplier_percent: default_legacy_price_multiplier_percent(),
            defaults: GasDefaults::default(),
            approval_amount: ApprovalAmount::default(),
        }
    }
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            strictness: SignatureStrictness::default(),
            deadline_buffer_secs: default_deadline_buffer_secs(),
            signature_window_secs: default_signature_window_secs(),
            permit_expiration_secs: default_permit_expiration_secs(),
        }
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_age_secs: default_flow_max_age_secs(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}
