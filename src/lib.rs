//! Multi-source swap routing and transaction-assembly engine.
//!
//! The component crates are re-exported here; [`build_engine`] wires them
//! together from an [`AppConfig`]:
//!
//! ```no_run
//! use std::path::Path;
//! use swap_engine::{build_engine, init_observability, config::ConfigLoader};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ConfigLoader::from_file_with_env(Path::new("config/mainnet.toml"), "SWAP_ENGINE")?;
//! let metrics = init_observability(&config)?;
//! let running = build_engine(&config, metrics)?.start();
//! # drop(running);
//! # Ok(())
//! # }
//! ```

use anyhow::{bail, Context};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use swap_engine_config::{validate_config, AppConfig, RpcConfig};
use swap_engine_metrics::{init_tracing, init_tracing_with_metrics, LoggingOptions, MetricsCollector};
use swap_engine_orchestrator::{ChainRuntime, EngineConfig, SwapEngine};
use swap_engine_ratelimit::{CircuitBreakerConfig, RetryPolicy};
use swap_engine_router::{
    LiquiditySource, OneInchClient, QuoteRouter, RouterConfig, UniswapV3Client, UniswapV3Deployment,
    ZeroXClient,
};
use swap_engine_rpc::{ChainReader, EndpointPolicy, EndpointRegistry, RpcClient};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use swap_engine_assembler as assembler;
pub use swap_engine_config as config;
pub use swap_engine_metrics as metrics;
pub use swap_engine_orchestrator as orchestrator;
pub use swap_engine_ratelimit as ratelimit;
pub use swap_engine_router as router;
pub use swap_engine_rpc as rpc;
pub use swap_engine_types as types;

/// Install the tracing subscriber and create the metrics collector
pub fn init_observability(config: &AppConfig) -> anyhow::Result<MetricsCollector> {
    let options = LoggingOptions {
        level: config.network.log_level.clone(),
        json: config.network.log_json,
    };
    let metrics = MetricsCollector::new().context("failed to create metrics collector")?;

    if config.network.metrics_enabled {
        init_tracing_with_metrics(&options, metrics.clone())?;
    } else {
        init_tracing(&options)?;
    }
    Ok(metrics)
}

/// Endpoint protection shared by every RPC client
pub fn endpoint_policy(rpc: &RpcConfig) -> EndpointPolicy {
    EndpointPolicy {
        max_calls: rpc.max_calls,
        window: rpc.window(),
        breaker: CircuitBreakerConfig {
            failure_threshold: rpc.failure_threshold,
            timeout_duration: rpc.breaker_timeout(),
            ..Default::default()
        },
    }
}

pub fn retry_policy(rpc: &RpcConfig) -> RetryPolicy {
    RetryPolicy::new(rpc.max_attempts, rpc.retry_initial(), rpc.retry_max())
}

/// Engine settings taken from the gas, signature and flow sections
pub fn engine_config(config: &AppConfig) -> EngineConfig {
    EngineConfig {
        flow_max_age: config.flows.max_age(),
        signature_window: config.signature.signature_window(),
        permit_expiration: config.signature.permit_expiration(),
        deadline_buffer: config.signature.deadline_buffer(),
        strictness: config.signature.strictness,
        approval_amount: config.gas.approval_amount,
        gas_policy: config.gas.policy(),
    }
}

/// One `RpcClient` per configured chain, all sharing `registry`
pub fn build_readers(
    config: &AppConfig,
    registry: &Arc<EndpointRegistry>,
) -> anyhow::Result<HashMap<u64, Arc<dyn ChainReader>>> {
    let mut readers: HashMap<u64, Arc<dyn ChainReader>> = HashMap::new();
    for (name, chain) in &config.chains {
        let client = RpcClient::new(
            chain.chain_id,
            chain.rpc_urls.clone(),
            registry.clone(),
            config.rpc.request_timeout(),
        )
        .with_context(|| format!("chain '{name}'"))?
        .with_retry(retry_policy(&config.rpc));
        readers.insert(chain.chain_id, Arc::new(client));
    }
    Ok(readers)
}

/// Instantiate every enabled liquidity source
pub fn build_sources(
    config: &AppConfig,
    readers: &HashMap<u64, Arc<dyn ChainReader>>,
) -> anyhow::Result<Vec<Arc<dyn LiquiditySource>>> {
    let mut sources: Vec<Arc<dyn LiquiditySource>> = Vec::new();
    let chain_ids: Vec<u64> = config.chains.values().map(|c| c.chain_id).collect();

    let zerox = &config.sources.zerox;
    if zerox.enabled {
        let client = ZeroXClient::new(&zerox.base_url, zerox.api_key.clone(), zerox.timeout())
            .context("failed to build 0x client")?
            .with_chains(chain_ids.clone());
        sources.push(Arc::new(client));
    }

    let oneinch = &config.sources.oneinch;
    if oneinch.enabled {
        let client = OneInchClient::new(&oneinch.base_url, oneinch.api_key.clone(), oneinch.timeout())
            .context("failed to build 1inch client")?
            .with_chains(chain_ids);
        sources.push(Arc::new(client));
    }

    let uniswap = &config.sources.uniswap;
    if uniswap.enabled {
        let mut client = UniswapV3Client::new(uniswap.min_liquidity, uniswap.pool_cache_ttl());
        let mut deployments = 0;
        for (name, chain) in &config.chains {
            let Some(addresses) = chain.uniswap_addresses()? else {
                continue;
            };
            let Some(reader) = readers.get(&chain.chain_id) else {
                bail!("chain '{name}' has no RPC client for uniswap quoting");
            };
            client = client.with_chain(
                chain.chain_id,
                UniswapV3Deployment {
                    factory: addresses.factory,
                    quoter_v2: addresses.quoter_v2,
                    swap_router02: addresses.swap_router02,
                    wrapped_native: addresses.wrapped_native,
                },
                reader.clone(),
            );
            deployments += 1;
        }
        if deployments > 0 {
            sources.push(Arc::new(client));
        } else {
            warn!("Uniswap enabled but no chain has a deployment; skipping");
        }
    }

    if sources.is_empty() {
        bail!("no liquidity sources enabled");
    }
    Ok(sources)
}

/// Build a fully wired engine that talks to the configured RPC endpoints
pub fn build_engine(config: &AppConfig, metrics: MetricsCollector) -> anyhow::Result<Engine> {
    validate_config(config)?;

    let registry = Arc::new(
        EndpointRegistry::new(endpoint_policy(&config.rpc)).context("invalid rpc policy")?,
    );
    let readers = build_readers(config, &registry)?;
    let sources = build_sources(config, &readers)?;
    build_engine_with(config, metrics, readers, sources, Some(registry))
}

/// Build an engine from caller-supplied readers and sources.
///
/// Chain settings still come from `config`; every configured chain needs a reader.
pub fn build_engine_with(
    config: &AppConfig,
    metrics: MetricsCollector,
    readers: HashMap<u64, Arc<dyn ChainReader>>,
    sources: Vec<Arc<dyn LiquiditySource>>,
    registry: Option<Arc<EndpointRegistry>>,
) -> anyhow::Result<Engine> {
    let router = QuoteRouter::new(
        sources,
        RouterConfig {
            source_timeout: config.router.source_timeout(),
            cache_ttl: config.router.cache_ttl(),
        },
    );

    let mut builder = SwapEngine::builder()
        .with_router(router)
        .with_config(engine_config(config))
        .with_metrics(metrics);
    if let Some(registry) = registry {
        builder = builder.with_endpoint_registry(registry);
    }

    for (name, chain) in &config.chains {
        let reader = readers
            .get(&chain.chain_id)
            .cloned()
            .with_context(|| format!("no chain reader for '{name}' ({})", chain.chain_id))?;
        let mut runtime = ChainRuntime::new(reader, chain.gas_pricing);
        if let Some(permit2) = chain.permit2_address()? {
            runtime = runtime.with_permit2(permit2);
        }
        builder = builder.with_chain(runtime);
    }

    let engine = builder.build()?;
    info!(chains = ?engine.supported_chains(), "Swap engine ready");
    Ok(Engine {
        engine: Arc::new(engine),
        maintenance_interval: config.flows.maintenance_interval(),
    })
}

/// A built engine plus how often it should be swept
pub struct Engine {
    engine: Arc<SwapEngine>,
    maintenance_interval: Duration,
}

impl Engine {
    pub fn engine(&self) -> &Arc<SwapEngine> {
        &self.engine
    }

    /// Start periodic maintenance; must be called inside a Tokio runtime
    pub fn start(self) -> RunningEngine {
        let maintenance = self.engine.spawn_maintenance(self.maintenance_interval);
        RunningEngine {
            engine: self.engine,
            maintenance,
        }
    }
}

/// An engine with its maintenance task running
pub struct RunningEngine {
    pub engine: Arc<SwapEngine>,
    maintenance: JoinHandle<()>,
}

impl RunningEngine {
    /// Stop the maintenance task
    pub fn shutdown(self) {
        self.maintenance.abort();
        info!("Swap engine stopped");
    }
}
