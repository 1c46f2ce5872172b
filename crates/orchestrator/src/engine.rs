use alloy::primitives::Address;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use swap_engine_assembler::{
    permit2_nonce, AllowanceResolver, ApprovalAmount, AssemblyError, BuildContext, GasOverrides,
    GasPolicy, GasPricingMode, PermitBuilder, PermitParams, PermitTypedData, SignatureStrictness,
    TransactionAssembler, TransactionRecord, TransactionRequest, DEFAULT_DEADLINE_BUFFER,
    PERMIT2_ADDRESS,
};
use swap_engine_metrics::{MetricsCollector, QuoteOutcome, RouteSpan};
use swap_engine_router::{QuoteRouter, RouteResult, RouterError};
use swap_engine_rpc::{ChainReader, EndpointHealth, EndpointRegistry};
use swap_engine_types::{
    now_millis, now_secs, AllowanceRequirement, ApprovalSignal, FlowMeta, FlowStatus, Quote, QuoteRecord,
    SourceKind, StepKind, StepRecord, StepStatus, SwapIntent, TransactionFlow, TransactionStep,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::error::{BuilderError, OrchestratorError};
use crate::flow::{FlowStore, FlowSummary};

/// Execution stage tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStage {
    Routing,
    SelectingQuote,
    ResolvingAllowance,
    PreparingPermit,
    PlanningSteps,
    AssemblingApproval,
    PreparingSignature,
    AssemblingSwap,
}

/// Everything the engine needs to act on one chain
#[derive(Clone)]
pub struct ChainRuntime {
    pub reader: Arc<dyn ChainReader>,
    pub pricing_mode: GasPricingMode,
    /// Required only for quotes that need a Permit2 signature
    pub permit2: Option<Address>,
}

impl ChainRuntime {
    pub fn new(reader: Arc<dyn ChainReader>, pricing_mode: GasPricingMode) -> Self {
        Self {
            reader,
            pricing_mode,
            permit2: None,
        }
    }

    pub fn with_permit2(mut self, permit2: Address) -> Self {
        self.permit2 = Some(permit2);
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.reader.chain_id()
    }
}

/// Configuration for the swap engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Active flows older than this are expired
    pub flow_max_age: Duration,

    /// How long an engine-built Permit2 signature stays valid
    pub signature_window: Duration,

    /// How long the Permit2 allowance granted by that signature lasts
    pub permit_expiration: Duration,

    /// Signatures this close to their deadline are treated as expired
    pub deadline_buffer: Duration,

    pub strictness: SignatureStrictness,
    pub approval_amount: ApprovalAmount,
    pub gas_policy: GasPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flow_max_age: Duration::from_secs(30 * 60),
            signature_window: Duration::from_secs(30 * 60),
            permit_expiration: Duration::from_secs(30 * 24 * 60 * 60),
            deadline_buffer: DEFAULT_DEADLINE_BUFFER,
            strictness: SignatureStrictness::default(),
            approval_amount: ApprovalAmount::default(),
            gas_policy: GasPolicy::default(),
        }
    }
}

/// Payload for the outstanding step of a flow
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepPayload {
    /// Transaction for the wallet to sign and broadcast
    Transaction {
        transaction: TransactionRecord,
        flow: FlowMeta,
    },
    /// `eth_signTypedData_v4` request; the signature is reported back as the
    /// step's completion hash
    Signature {
        typed_data: serde_json::Value,
        signing_hash: String,
        flow: FlowMeta,
    },
    /// Step of an externally planned flow, passed through as recorded
    Raw { step: StepRecord },
}

impl StepPayload {
    pub fn flow(&self) -> &FlowMeta {
        match self {
            StepPayload::Transaction { flow, .. } | StepPayload::Signature { flow, .. } => flow,
            StepPayload::Raw { step } => &step.flow,
        }
    }
}

/// Result of preparing a swap
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreparedFlow {
    pub flow_id: String,
    pub quote: QuoteRecord,
    pub approval: ApprovalSignal,
    /// Number of quotes the selection was made from
    pub quotes_considered: usize,
    pub first_step: Option<StepPayload>,
}

/// Source health plus RPC endpoint state
#[derive(Debug, Clone)]
pub struct EngineHealth {
    pub sources: Vec<(SourceKind, bool)>,
    pub endpoints: Vec<EndpointHealth>,
    pub active_flows: usize,
}

impl EngineHealth {
    pub fn is_healthy(&self) -> bool {
        self.sources.iter().any(|(_, healthy)| *healthy)
    }
}

/// What the engine remembers about a prepared swap until its flow finishes
#[derive(Debug, Clone)]
struct SwapContext {
    intent: SwapIntent,
    quote: Quote,
    requirement: AllowanceRequirement,
    permit: Option<PermitTypedData>,
    overrides: GasOverrides,
}

/// Builder for SwapEngine
pub struct SwapEngineBuilder {
    router: Option<QuoteRouter>,
    chains: HashMap<u64, ChainRuntime>,
    config: EngineConfig,
    metrics: Option<MetricsCollector>,
    endpoints: Option<Arc<EndpointRegistry>>,
}

impl SwapEngineBuilder {
    pub fn new() -> Self {
        Self {
            router: None,
            chains: HashMap::new(),
            config: EngineConfig::default(),
            metrics: None,
            endpoints: None,
        }
    }

    pub fn with_router(mut self, router: QuoteRouter) -> Self {
        self.router = Some(router);
        self
    }

    /// Register a chain; keyed by the reader's chain id
    pub fn with_chain(mut self, runtime: ChainRuntime) -> Self {
        self.chains.insert(runtime.chain_id(), runtime);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_endpoint_registry(mut self, endpoints: Arc<EndpointRegistry>) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Build the engine, validating that all required fields are set
    pub fn build(self) -> Result<SwapEngine, BuilderError> {
        let router = self.router.ok_or_else(|| BuilderError::MissingField {
            field: "router".to_string(),
        })?;

        if self.chains.is_empty() {
            return Err(BuilderError::MissingField {
                field: "chains".to_string(),
            });
        }

        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => MetricsCollector::new()?,
        };

        let assembler = TransactionAssembler::new(
            self.config.gas_policy,
            self.config.approval_amount,
            self.config.strictness,
        );

        Ok(SwapEngine {
            router,
            chains: self.chains,
            assembler,
            flows: FlowStore::new(),
            contexts: DashMap::new(),
            config: self.config,
            metrics,
            endpoints: self.endpoints,
        })
    }
}

impl Default for SwapEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Facade tying routing, allowance resolution, assembly and flows together
pub struct SwapEngine {
    router: QuoteRouter,
    chains: HashMap<u64, ChainRuntime>,
    assembler: TransactionAssembler,
    flows: FlowStore,
    /// Keyed by flow id
    contexts: DashMap<String, SwapContext>,
    config: EngineConfig,
    metrics: MetricsCollector,
    endpoints: Option<Arc<EndpointRegistry>>,
}

impl SwapEngine {
    pub fn builder() -> SwapEngineBuilder {
        SwapEngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn router(&self) -> &QuoteRouter {
        &self.router
    }

    pub fn flows(&self) -> &FlowStore {
        &self.flows
    }

    pub fn supported_chains(&self) -> Vec<u64> {
        let mut chains: Vec<u64> = self.chains.keys().copied().collect();
        chains.sort_unstable();
        chains
    }

    fn chain(&self, chain_id: u64) -> Result<&ChainRuntime, OrchestratorError> {
        self.chains
            .get(&chain_id)
            .ok_or(OrchestratorError::UnsupportedChain(chain_id))
    }

    fn permit_builder(&self, chain_id: u64, permit2: Address) -> PermitBuilder {
        PermitBuilder::new(chain_id)
            .with_permit2(permit2)
            .with_deadline_buffer(self.config.deadline_buffer)
            .with_strictness(self.config.strictness)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUOTING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Ranked quotes for an intent from every registered source
    pub async fn quote(&self, intent: &SwapIntent) -> Result<RouteResult, OrchestratorError> {
        let span = RouteSpan::new(intent.chain_id, format!("{:#x}", intent.wallet));
        self.route(intent).instrument(span.span()).await
    }

    async fn route(&self, intent: &SwapIntent) -> Result<RouteResult, OrchestratorError> {
        self.chain(intent.chain_id)?;
        ensure_before_deadline(intent)?;
        self.metrics.record_quote_request();
        info!(
            stage = ?ExecutionStage::Routing,
            token_in = %intent.token_in.symbol,
            token_out = %intent.token_out.symbol,
            amount = %intent.amount,
            "Routing quote request"
        );

        match self.router.quote_intent(intent).await {
            Ok(result) => {
                self.record_route(&result);
                Ok(result)
            }
            Err(err) => {
                if let RouterError::AllSourcesFailed { failures, .. } = &err {
                    for failure in failures {
                        self.metrics.record_source_quote(
                            failure.source,
                            QuoteOutcome::Failure(failure.kind()),
                            None,
                        );
                    }
                }
                self.metrics.record_route_failure(err.kind());
                warn!(kind = %err.kind(), error = %err, "Routing failed");
                Err(err.into())
            }
        }
    }

    fn record_route(&self, result: &RouteResult) {
        for (source, latency) in &result.latencies {
            let outcome = result
                .failures
                .iter()
                .find(|f| f.source == *source)
                .map(|f| QuoteOutcome::Failure(f.kind()))
                .unwrap_or(QuoteOutcome::Success);
            self.metrics.record_source_quote(*source, outcome, Some(*latency));
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PREPARATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Route, pick a quote, resolve allowance, plan steps and create the
    /// wallet's flow. Any previous flow for the wallet is replaced.
    ///
    /// `source` selects a specific source's quote; `None` takes the best.
    pub async fn prepare_swap(
        &self,
        intent: &SwapIntent,
        source: Option<SourceKind>,
        overrides: GasOverrides,
    ) -> Result<PreparedFlow, OrchestratorError> {
        let chain = self.chain(intent.chain_id)?;
        let route = self.quote(intent).await?;

        info!(stage = ?ExecutionStage::SelectingQuote, requested = ?source, "Selecting quote");
        let quote = route.select(source)?.clone();

        let permit2 = match (quote.requires_signature, chain.permit2) {
            (_, Some(permit2)) => permit2,
            (false, None) => PERMIT2_ADDRESS,
            (true, None) => {
                return Err(OrchestratorError::ConfigurationMissing(format!(
                    "Permit2 address for chain {}",
                    intent.chain_id
                )))
            }
        };

        info!(stage = ?ExecutionStage::ResolvingAllowance, source = %quote.source, "Resolving allowance");
        let requirement = AllowanceResolver::new(permit2)
            .resolve(chain.reader.as_ref(), &intent.token_in, intent.wallet, &quote)
            .await?;

        let permit = if quote.requires_signature {
            info!(stage = ?ExecutionStage::PreparingPermit, "Preparing Permit2 typed data");
            Some(self.prepare_permit(chain, permit2, intent, &quote).await?)
        } else {
            None
        };

        info!(stage = ?ExecutionStage::PlanningSteps, needs_approval = requirement.needs_approval, "Planning steps");
        let steps = TransactionAssembler::plan_steps(&requirement, &quote, permit2);
        let metadata = HashMap::from([
            ("source".to_string(), quote.source.to_string()),
            ("protocol".to_string(), quote.protocol.clone()),
            ("token_in".to_string(), intent.token_in.symbol.clone()),
            ("token_out".to_string(), intent.token_out.symbol.clone()),
            ("buy_amount".to_string(), quote.buy_amount.to_string()),
        ]);

        let flow = self.start_flow(intent.wallet, intent.chain_id, steps, metadata);
        let prepared_quote = quote.to_record();
        let approval = requirement.signal();
        self.contexts.insert(
            flow.id.clone(),
            SwapContext {
                intent: intent.clone(),
                quote,
                requirement,
                permit,
                overrides,
            },
        );

        let first_step = self.next_step(&intent.wallet).await?;
        Ok(PreparedFlow {
            flow_id: flow.id,
            quote: prepared_quote,
            approval,
            quotes_considered: route.quotes.len(),
            first_step,
        })
    }

    /// Typed data from the quote when the source supplied it, otherwise a
    /// `PermitSingle` built against the wallet's current Permit2 nonce
    async fn prepare_permit(
        &self,
        chain: &ChainRuntime,
        permit2: Address,
        intent: &SwapIntent,
        quote: &Quote,
    ) -> Result<PermitTypedData, OrchestratorError> {
        let builder = self.permit_builder(intent.chain_id, permit2);
        let now = now_secs();

        if let Some(eip712) = &quote.permit2_eip712 {
            return Ok(builder.from_source(eip712, now).map_err(AssemblyError::from)?);
        }

        let spender = quote.allowance_target.unwrap_or(quote.to);
        let nonce = permit2_nonce(
            chain.reader.as_ref(),
            permit2,
            intent.wallet,
            intent.token_in.address,
            spender,
        )
        .await
        .map_err(AssemblyError::Allowance)?;

        let params = PermitParams {
            token: intent.token_in.address,
            amount: quote.sell_amount,
            expiration: now + self.config.permit_expiration.as_secs(),
            nonce,
            spender,
            sig_deadline: now + self.config.signature_window.as_secs(),
        };
        debug!(nonce, spender = %spender, "Building PermitSingle");
        Ok(builder.permit_single(params, now).map_err(AssemblyError::from)?)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FLOW OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    fn start_flow(
        &self,
        wallet: Address,
        chain_id: u64,
        steps: Vec<TransactionStep>,
        metadata: HashMap<String, String>,
    ) -> TransactionFlow {
        let (flow, replaced) = self.flows.create(wallet, chain_id, steps, metadata);
        if let Some(previous) = replaced {
            if previous.is_active() {
                self.metrics.record_flow_finished(FlowStatus::Cancelled);
            }
            self.contexts.remove(&previous.id);
        }
        self.metrics.record_flow_created();
        if !flow.is_active() {
            self.metrics.record_flow_finished(flow.status);
        }
        flow
    }

    /// Create a flow from externally planned steps; its steps are returned as
    /// recorded rather than assembled
    pub fn create_flow(
        &self,
        wallet: Address,
        chain_id: u64,
        steps: Vec<TransactionStep>,
        metadata: HashMap<String, String>,
    ) -> FlowMeta {
        self.start_flow(wallet, chain_id, steps, metadata).meta()
    }

    /// Payload for the wallet's outstanding step, or `None` when nothing is
    /// outstanding. A failed assembly leaves the flow unchanged.
    pub async fn next_step(&self, wallet: &Address) -> Result<Option<StepPayload>, OrchestratorError> {
        let Some(flow) = self.flows.get(wallet) else {
            return Ok(None);
        };
        let Some(step) = flow.next_step().cloned() else {
            return Ok(None);
        };
        let Some(context) = self.contexts.get(&flow.id).map(|ctx| ctx.clone()) else {
            return Ok(Some(raw_payload(&flow, &step)));
        };

        match self.assemble(&flow, &step, &context).await {
            Ok(payload) => {
                self.metrics.record_step_assembled(step.kind);
                Ok(Some(payload))
            }
            Err(err) => {
                self.metrics.record_assembly_failure(err.kind());
                warn!(
                    flow_id = %flow.id,
                    step = step.step_number,
                    step_type = %step.kind,
                    kind = %err.kind(),
                    error = %err,
                    "Step assembly failed"
                );
                Err(err)
            }
        }
    }

    async fn assemble(
        &self,
        flow: &TransactionFlow,
        step: &TransactionStep,
        context: &SwapContext,
    ) -> Result<StepPayload, OrchestratorError> {
        let chain = self.chain(flow.chain_id)?;
        let reader = chain.reader.as_ref();
        let build = BuildContext {
            chain_id: flow.chain_id,
            from: flow.wallet,
            pricing_mode: chain.pricing_mode,
            overrides: context.overrides,
        };

        let tx = match step.kind {
            StepKind::Approve => {
                info!(flow_id = %flow.id, stage = ?ExecutionStage::AssemblingApproval, "Assembling approval");
                self.assembler
                    .build_approval(reader, &build, &context.requirement, &context.intent.token_in)
                    .await?
            }
            StepKind::Signature => {
                info!(flow_id = %flow.id, stage = ?ExecutionStage::PreparingSignature, "Preparing signature request");
                let typed = self.validated_permit(flow.chain_id, context)?;
                return Ok(StepPayload::Signature {
                    typed_data: typed.to_json(),
                    signing_hash: typed.signing_hash().to_string(),
                    flow: flow.meta(),
                });
            }
            StepKind::Swap => {
                info!(flow_id = %flow.id, stage = ?ExecutionStage::AssemblingSwap, "Assembling swap");
                ensure_before_deadline(&context.intent)?;
                let now = now_millis();
                if !context.quote.is_fresh(now) {
                    return Err(OrchestratorError::QuoteExpired {
                        age_ms: now.saturating_sub(context.quote.quoted_at_ms),
                    });
                }
                let signature = if context.quote.requires_signature {
                    self.validated_permit(flow.chain_id, context)?;
                    signed_permit(flow)
                } else {
                    None
                };
                self.assembler
                    .build_swap(
                        reader,
                        &build,
                        &context.quote,
                        &context.intent.token_in,
                        signature.as_deref(),
                    )
                    .await?
            }
            StepKind::Bridge => return Ok(raw_payload(flow, step)),
        };

        self.record_payload(flow, step, &tx);
        Ok(StepPayload::Transaction {
            transaction: tx.to_record(),
            flow: flow.meta(),
        })
    }

    /// The prepared permit, rejected once its deadline is inside the buffer
    fn validated_permit<'a>(
        &self,
        chain_id: u64,
        context: &'a SwapContext,
    ) -> Result<&'a PermitTypedData, OrchestratorError> {
        let typed = context
            .permit
            .as_ref()
            .ok_or(AssemblyError::MissingField("permit2 typed data"))?;
        self.permit_builder(chain_id, typed.verifying_contract)
            .validate(typed, now_secs())
            .map_err(AssemblyError::from)?;
        Ok(typed)
    }

    /// Keep the step's stored payload in line with what was handed out
    fn record_payload(&self, flow: &TransactionFlow, step: &TransactionStep, tx: &TransactionRequest) {
        let updated = self.flows.update_current_step(&flow.wallet, &flow.id, step.step_number, |s| {
            s.to = tx.to;
            s.data = tx.data.clone();
            s.value = tx.value;
            s.gas_limit = Some(tx.gas_limit);
        });
        if !updated {
            debug!(flow_id = %flow.id, step = step.step_number, "Flow moved on during assembly");
        }
    }

    pub fn mark_submitted(&self, wallet: &Address, tx_hash: &str) -> bool {
        self.flows.mark_submitted(wallet, tx_hash)
    }

    /// Record the outcome of the wallet's current step. For signature steps
    /// `tx_hash` carries the signature.
    pub fn complete_step(
        &self,
        wallet: &Address,
        tx_hash: &str,
        success: bool,
        error: Option<String>,
    ) -> bool {
        let Some(flow) = self.flows.complete_step(wallet, tx_hash, success, error) else {
            return false;
        };
        if !flow.is_active() {
            self.finish(&flow);
        }
        true
    }

    pub fn cancel_flow(&self, wallet: &Address) -> bool {
        match self.flows.cancel(wallet) {
            Some(flow) => {
                self.finish(&flow);
                true
            }
            None => false,
        }
    }

    pub fn flow_status(&self, wallet: &Address) -> Option<FlowSummary> {
        self.flows.status(wallet)
    }

    /// Expire flows older than the configured maximum age
    pub fn expire_stale(&self) -> usize {
        let expired = self.flows.expire_stale(self.config.flow_max_age);
        for flow_id in &expired {
            self.metrics.record_flow_finished(FlowStatus::Expired);
            self.contexts.remove(flow_id);
        }
        expired.len()
    }

    fn finish(&self, flow: &TransactionFlow) {
        self.metrics.record_flow_finished(flow.status);
        self.contexts.remove(&flow.id);
        info!(flow_id = %flow.id, wallet = %flow.wallet, status = ?flow.status, "Flow finished");
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MAINTENANCE
    // ═══════════════════════════════════════════════════════════════════════════

    pub async fn health_check(&self) -> EngineHealth {
        let sources = self.router.health_check().await;
        for (source, healthy) in &sources {
            self.metrics.set_source_health(*source, *healthy);
        }
        EngineHealth {
            sources,
            endpoints: self
                .endpoints
                .as_ref()
                .map(|registry| registry.health())
                .unwrap_or_default(),
            active_flows: self.flows.active_count(),
        }
    }

    /// Periodically expire stale flows and purge expired router and source
    /// caches. The task stops once the engine is dropped.
    pub fn spawn_maintenance(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let engine: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                let expired = engine.expire_stale();
                let purged = engine.router.purge_expired();
                if expired > 0 || purged > 0 {
                    debug!(expired, purged, "Maintenance pass");
                }
            }
        })
    }
}

fn ensure_before_deadline(intent: &SwapIntent) -> Result<(), OrchestratorError> {
    match intent.deadline {
        Some(deadline) if intent.is_expired(now_secs()) => {
            Err(OrchestratorError::IntentExpired { deadline })
        }
        _ => Ok(()),
    }
}

/// Signature recorded on the flow's confirmed signature step
fn signed_permit(flow: &TransactionFlow) -> Option<String> {
    flow.steps
        .iter()
        .find(|s| s.kind == StepKind::Signature && s.status == StepStatus::Confirmed)
        .and_then(|s| s.tx_hash.clone())
}

fn raw_payload(flow: &TransactionFlow, step: &TransactionStep) -> StepPayload {
    StepPayload::Raw {
        step: StepRecord {
            to: format!("{:#x}", step.to),
            data: step.data.to_string(),
            value: step.value.to_string(),
            gas_limit: step.gas_limit.map(|g| g.to_string()),
            chain_id: flow.chain_id,
            flow: flow.meta(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, Bytes, U256};
    use serde_json::json;
    use swap_engine_router::{LiquiditySource, MockSource, RouterConfig, SourceError};
    use swap_engine_rpc::{MockChainReader, RpcError};
    use swap_engine_types::{ErrorKind, TokenRef};

    const USDC: Address = address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
    const WETH: Address = address!("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
    const WALLET: Address = address!("0x7777777777777777777777777777777777777777");
    const GWEI: u128 = 1_000_000_000;

    fn word(value: U256) -> Bytes {
        Bytes::from(value.to_be_bytes::<32>().to_vec())
    }

    fn reader_with_allowance(allowance: U256) -> MockChainReader {
        MockChainReader::new(1)
            .with_gas_price(20 * GWEI)
            .with_call_handler(move |_| Ok(word(allowance)))
    }

    fn intent() -> SwapIntent {
        SwapIntent::builder()
            .chain_id(1)
            .wallet(WALLET)
            .token_in(TokenRef::new(USDC, "USDC", 6, 1))
            .token_out(TokenRef::new(WETH, "WETH", 18, 1))
            .amount("100")
            .build()
            .unwrap()
    }

    fn engine_with(
        sources: Vec<Arc<dyn LiquiditySource>>,
        runtime: ChainRuntime,
        config: EngineConfig,
    ) -> SwapEngine {
        SwapEngine::builder()
            .with_router(QuoteRouter::new(sources, RouterConfig::default()))
            .with_chain(runtime)
            .with_config(config)
            .build()
            .unwrap()
    }

    fn engine(sources: Vec<Arc<dyn LiquiditySource>>, reader: MockChainReader) -> SwapEngine {
        engine_with(
            sources,
            ChainRuntime::new(Arc::new(reader), GasPricingMode::Legacy),
            EngineConfig::default(),
        )
    }

    fn mock_target(kind: SourceKind) -> Address {
        Address::repeat_byte(0xA0 + kind as u8)
    }

    fn permit_transfer_json(deadline: u64) -> serde_json::Value {
        json!({
            "domain": {
                "name": "Permit2",
                "chainId": 1,
                "verifyingContract": format!("{:#x}", PERMIT2_ADDRESS),
            },
            "primaryType": "PermitTransferFrom",
            "message": {
                "permitted": {"token": format!("{:#x}", USDC), "amount": "100000000"},
                "spender": format!("{:#x}", mock_target(SourceKind::ZeroX)),
                "nonce": "42",
                "deadline": deadline.to_string(),
            },
        })
    }

    #[tokio::test]
    async fn test_approve_then_swap_flow() {
        let engine = engine(
            vec![
                Arc::new(MockSource::returning(SourceKind::ZeroX, U256::from(950u64))),
                Arc::new(MockSource::returning(SourceKind::OneInch, U256::from(1000u64))),
            ],
            reader_with_allowance(U256::ZERO),
        );

        let prepared = engine.prepare_swap(&intent(), None, GasOverrides::default()).await.unwrap();
        assert_eq!(prepared.quotes_considered, 2);
        assert_eq!(prepared.quote.aggregator, "1inch");
        assert!(prepared.approval.needs_approval);

        let Some(StepPayload::Transaction { transaction, flow }) = prepared.first_step else {
            panic!("expected approval transaction");
        };
        assert_eq!(transaction.to, format!("{:#x}", USDC));
        assert!(transaction.data.starts_with("0x095ea7b3"));
        assert_eq!(transaction.gas, "125000");
        assert_eq!(transaction.gas_price.as_deref(), Some("22000000000"));
        assert_eq!(flow.total_steps, 2);
        assert_eq!(flow.step_type, Some(StepKind::Approve));

        assert!(engine.complete_step(&WALLET, "0xa1", true, None));
        assert!(!engine.complete_step(&WALLET, "0xa1", true, None));

        let Some(StepPayload::Transaction { transaction, flow }) = engine.next_step(&WALLET).await.unwrap() else {
            panic!("expected swap transaction");
        };
        assert_eq!(transaction.to, format!("{:#x}", mock_target(SourceKind::OneInch)));
        assert_eq!(transaction.data, "0xdeadbeef");
        assert_eq!(flow.current_step, 2);

        assert!(engine.complete_step(&WALLET, "0xb2", true, None));
        assert_eq!(engine.flow_status(&WALLET).unwrap().status, FlowStatus::Complete);
        assert!(engine.next_step(&WALLET).await.unwrap().is_none());
        assert!(engine.contexts.is_empty());

        let text = engine.metrics().gather_text().unwrap();
        assert!(text.contains(r#"swap_engine_flows_finished_total{status="complete"} 1"#));
        assert!(text.contains(r#"swap_engine_steps_assembled_total{step_type="swap"} 1"#));
    }

    #[tokio::test]
    async fn test_aged_quote_not_assembled_into_swap() {
        let engine = engine(
            vec![Arc::new(MockSource::returning(SourceKind::ZeroX, U256::from(5u64)))],
            reader_with_allowance(U256::ZERO),
        );
        engine.prepare_swap(&intent(), None, GasOverrides::default()).await.unwrap();

        // Approval confirmed a minute after quoting
        for mut context in engine.contexts.iter_mut() {
            context.quote.quoted_at_ms -= 60_000;
        }
        assert!(engine.complete_step(&WALLET, "0xa1", true, None));

        let err = engine.next_step(&WALLET).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::QuoteExpired { age_ms } if age_ms >= 60_000));
        assert_eq!(err.kind(), ErrorKind::SignatureExpired);

        let status = engine.flow_status(&WALLET).unwrap();
        assert_eq!(status.status, FlowStatus::Active);
        assert_eq!(status.current_step, 2);
        assert!(engine
            .metrics()
            .gather_text()
            .unwrap()
            .contains(r#"swap_engine_assembly_failures_total{kind="signature_expired"} 1"#));
    }

    #[tokio::test]
    async fn test_intent_deadline_enforced() {
        let engine = engine(
            vec![Arc::new(MockSource::returning(SourceKind::ZeroX, U256::from(5u64)))],
            reader_with_allowance(U256::ZERO),
        );

        let mut expired = intent();
        expired.deadline = Some(now_secs() - 1);
        let err = engine.quote(&expired).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::IntentExpired { .. }));
        assert!(engine.flow_status(&WALLET).is_none());

        // Deadline passes while the approval is pending
        engine.prepare_swap(&intent(), None, GasOverrides::default()).await.unwrap();
        for mut context in engine.contexts.iter_mut() {
            context.intent.deadline = Some(now_secs() - 1);
        }
        assert!(engine.complete_step(&WALLET, "0xa1", true, None));

        let err = engine.next_step(&WALLET).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureExpired);
        assert_eq!(engine.flow_status(&WALLET).unwrap().current_step, 2);
    }

    #[tokio::test]
    async fn test_sufficient_allowance_is_single_step() {
        let engine = engine(
            vec![Arc::new(MockSource::returning(SourceKind::ZeroX, U256::from(5u64)))],
            reader_with_allowance(U256::MAX),
        );

        let prepared = engine.prepare_swap(&intent(), None, GasOverrides::default()).await.unwrap();
        assert!(!prepared.approval.needs_approval);
        let first = prepared.first_step.unwrap();
        assert_eq!(first.flow().total_steps, 1);
        assert_eq!(first.flow().step_type, Some(StepKind::Swap));
    }

    #[tokio::test]
    async fn test_selected_source_must_have_quoted() {
        let engine = engine(
            vec![
                Arc::new(MockSource::returning(SourceKind::ZeroX, U256::from(5u64))),
                Arc::new(MockSource::failing(
                    SourceKind::OneInch,
                    SourceError::NoRoute("none".into()),
                )),
            ],
            reader_with_allowance(U256::MAX),
        );

        let err = engine
            .prepare_swap(&intent(), Some(SourceKind::OneInch), GasOverrides::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoRouteFound);
        assert!(engine.flow_status(&WALLET).is_none());
    }

    #[tokio::test]
    async fn test_permit2_signature_flow() {
        let deadline = now_secs() + 3600;
        let source = MockSource::returning(SourceKind::ZeroX, U256::from(5u64))
            .with_spender(Some(PERMIT2_ADDRESS))
            .requiring_signature(permit_transfer_json(deadline));
        let engine = engine_with(
            vec![Arc::new(source)],
            ChainRuntime::new(Arc::new(reader_with_allowance(U256::ZERO)), GasPricingMode::Legacy)
                .with_permit2(PERMIT2_ADDRESS),
            EngineConfig::default(),
        );

        let prepared = engine.prepare_swap(&intent(), None, GasOverrides::default()).await.unwrap();
        assert_eq!(prepared.approval.spender, format!("{:#x}", PERMIT2_ADDRESS));
        assert_eq!(prepared.first_step.unwrap().flow().total_steps, 3);
        assert!(engine.complete_step(&WALLET, "0xa1", true, None));

        let Some(StepPayload::Signature { typed_data, signing_hash, flow }) =
            engine.next_step(&WALLET).await.unwrap()
        else {
            panic!("expected signature request");
        };
        assert_eq!(typed_data["primaryType"], "PermitTransferFrom");
        assert_eq!(signing_hash.len(), 66);
        assert_eq!(flow.step_type, Some(StepKind::Signature));

        let signature = format!("0x{}", "11".repeat(65));
        assert!(engine.complete_step(&WALLET, &signature, true, None));

        let Some(StepPayload::Transaction { transaction, .. }) = engine.next_step(&WALLET).await.unwrap() else {
            panic!("expected swap transaction");
        };
        let expected = format!("0xdeadbeef{:064x}{}", 65, "11".repeat(65));
        assert_eq!(transaction.data, expected);
    }

    #[tokio::test]
    async fn test_expired_permit_rejected() {
        let source = MockSource::returning(SourceKind::ZeroX, U256::from(5u64))
            .requiring_signature(permit_transfer_json(now_secs() + 60));
        let engine = engine_with(
            vec![Arc::new(source)],
            ChainRuntime::new(Arc::new(reader_with_allowance(U256::MAX)), GasPricingMode::Legacy)
                .with_permit2(PERMIT2_ADDRESS),
            EngineConfig::default(),
        );

        let err = engine
            .prepare_swap(&intent(), None, GasOverrides::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureExpired);
    }

    #[tokio::test]
    async fn test_signature_quote_needs_permit2_configured() {
        let source = MockSource::returning(SourceKind::ZeroX, U256::from(5u64))
            .requiring_signature(permit_transfer_json(now_secs() + 3600));
        let engine = engine(vec![Arc::new(source)], reader_with_allowance(U256::ZERO));

        let err = engine
            .prepare_swap(&intent(), None, GasOverrides::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationMissing);
    }

    #[tokio::test]
    async fn test_engine_builds_permit_single_from_nonce() {
        let reader = MockChainReader::new(1).with_call_handler(|_| {
            let mut out = Vec::new();
            out.extend_from_slice(&U256::ZERO.to_be_bytes::<32>());
            out.extend_from_slice(&U256::ZERO.to_be_bytes::<32>());
            out.extend_from_slice(&U256::from(7u64).to_be_bytes::<32>());
            Ok(Bytes::from(out))
        });
        let runtime = ChainRuntime::new(Arc::new(reader), GasPricingMode::Legacy)
            .with_permit2(PERMIT2_ADDRESS);
        let engine = engine_with(vec![], runtime.clone(), EngineConfig::default());

        let mut quote = MockSource::returning(SourceKind::UniswapV3, U256::from(5u64))
            .quote(&swap_engine_router::QuoteRequest::from_intent(&intent()).unwrap())
            .await
            .unwrap();
        quote.requires_signature = true;

        let typed = engine
            .prepare_permit(&runtime, PERMIT2_ADDRESS, &intent(), &quote)
            .await
            .unwrap();
        assert_eq!(typed.primary_type(), "PermitSingle");
        assert_eq!(typed.spender(), mock_target(SourceKind::UniswapV3));
        let json = typed.to_json();
        assert_eq!(json["message"]["details"]["nonce"], "7");
        assert_eq!(json["message"]["details"]["amount"], "100000000");
    }

    #[tokio::test]
    async fn test_build_failure_leaves_flow_untouched() {
        let target = mock_target(SourceKind::ZeroX);
        let reader = MockChainReader::new(1)
            .with_estimate(Err(RpcError::Rpc {
                code: 3,
                message: "execution reverted: transfer_from_failed".into(),
                data: None,
            }))
            .with_call_handler(move |req| {
                if req.to == target {
                    Err(RpcError::Rpc {
                        code: 3,
                        message: "execution reverted: transfer_from_failed".into(),
                        data: None,
                    })
                } else {
                    Ok(word(U256::MAX))
                }
            });
        let engine = engine(
            vec![Arc::new(MockSource::returning(SourceKind::ZeroX, U256::from(5u64)))],
            reader,
        );

        let err = engine
            .prepare_swap(&intent(), None, GasOverrides::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BuildTransactionError);
        assert!(err.user_message().contains("balance"));

        let status = engine.flow_status(&WALLET).unwrap();
        assert_eq!(status.status, FlowStatus::Active);
        assert_eq!(status.current_step, 1);
        assert!(engine
            .metrics()
            .gather_text()
            .unwrap()
            .contains(r#"swap_engine_assembly_failures_total{kind="build_transaction_error"} 1"#));
    }

    #[tokio::test]
    async fn test_gas_limit_override() {
        let engine = engine(
            vec![Arc::new(MockSource::returning(SourceKind::ZeroX, U256::from(5u64)))],
            reader_with_allowance(U256::MAX),
        );
        let overrides = GasOverrides {
            gas_limit: Some(500_000),
            gas_price: Some(3 * GWEI),
            ..Default::default()
        };

        let prepared = engine.prepare_swap(&intent(), None, overrides).await.unwrap();
        let Some(StepPayload::Transaction { transaction, .. }) = prepared.first_step else {
            panic!("expected swap transaction");
        };
        assert_eq!(transaction.gas, "500000");
        assert_eq!(transaction.gas_price.as_deref(), Some("3000000000"));
        assert_eq!(engine.flows().next_step(&WALLET).unwrap().gas_limit, Some(500_000));
    }

    #[tokio::test]
    async fn test_unsupported_chain() {
        let engine = engine(
            vec![Arc::new(MockSource::returning(SourceKind::ZeroX, U256::from(5u64)))],
            reader_with_allowance(U256::MAX),
        );
        let intent = SwapIntent::builder()
            .chain_id(10)
            .wallet(WALLET)
            .token_in(TokenRef::new(USDC, "USDC", 6, 10))
            .token_out(TokenRef::new(WETH, "WETH", 18, 10))
            .amount("1")
            .build()
            .unwrap();

        let err = engine.quote(&intent).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedChain);
    }

    #[tokio::test]
    async fn test_route_failure_metrics() {
        let engine = engine(
            vec![Arc::new(MockSource::failing(
                SourceKind::ZeroX,
                SourceError::InsufficientLiquidity("thin".into()),
            ))],
            reader_with_allowance(U256::MAX),
        );

        let err = engine.quote(&intent()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientLiquidity);

        let text = engine.metrics().gather_text().unwrap();
        assert!(text.contains(r#"swap_engine_route_failures_total{kind="insufficient_liquidity"} 1"#));
        assert!(text.contains(r#"outcome="insufficient_liquidity",source="0x""#));
    }

    #[tokio::test]
    async fn test_cancel_and_replace() {
        let engine = engine(
            vec![Arc::new(MockSource::returning(SourceKind::ZeroX, U256::from(5u64)))],
            reader_with_allowance(U256::ZERO),
        );
        assert!(!engine.cancel_flow(&WALLET));

        let first = engine.prepare_swap(&intent(), None, GasOverrides::default()).await.unwrap();
        let second = engine.prepare_swap(&intent(), None, GasOverrides::default()).await.unwrap();
        assert_ne!(first.flow_id, second.flow_id);
        assert_eq!(engine.contexts.len(), 1);

        assert!(engine.cancel_flow(&WALLET));
        assert!(!engine.cancel_flow(&WALLET));
        assert!(engine.next_step(&WALLET).await.unwrap().is_none());
        assert!(!engine.complete_step(&WALLET, "0xa1", true, None));

        let text = engine.metrics().gather_text().unwrap();
        assert!(text.contains(r#"swap_engine_flows_finished_total{status="cancelled"} 2"#));
        assert!(text.contains("swap_engine_active_flows 0"));
    }

    #[tokio::test]
    async fn test_failed_step_cancels_flow() {
        let engine = engine(
            vec![Arc::new(MockSource::returning(SourceKind::ZeroX, U256::from(5u64)))],
            reader_with_allowance(U256::ZERO),
        );
        engine.prepare_swap(&intent(), None, GasOverrides::default()).await.unwrap();

        assert!(engine.mark_submitted(&WALLET, "0xa1"));
        assert!(engine.complete_step(&WALLET, "0xa1", false, Some("reverted".into())));

        let status = engine.flow_status(&WALLET).unwrap();
        assert_eq!(status.status, FlowStatus::Cancelled);
        assert_eq!(status.error.as_deref(), Some("reverted"));
    }

    #[tokio::test]
    async fn test_raw_flow_passes_steps_through() {
        let engine = engine(vec![], reader_with_allowance(U256::MAX));
        let steps = vec![TransactionStep::planned(StepKind::Bridge, Address::repeat_byte(0xbb))
            .with_payload(Bytes::from(vec![0x01]), U256::from(9u64), Some(90_000))];

        let meta = engine.create_flow(WALLET, 1, steps, HashMap::new());
        assert_eq!(meta.total_steps, 1);

        let Some(StepPayload::Raw { step }) = engine.next_step(&WALLET).await.unwrap() else {
            panic!("expected raw step");
        };
        assert_eq!(step.data, "0x01");
        assert_eq!(step.value, "9");
        assert_eq!(step.gas_limit.as_deref(), Some("90000"));
        assert_eq!(step.chain_id, 1);
    }

    #[tokio::test]
    async fn test_expire_stale_flows() {
        let engine = engine_with(
            vec![Arc::new(MockSource::returning(SourceKind::ZeroX, U256::from(5u64)))],
            ChainRuntime::new(Arc::new(reader_with_allowance(U256::ZERO)), GasPricingMode::Legacy),
            EngineConfig {
                flow_max_age: Duration::ZERO,
                ..EngineConfig::default()
            },
        );
        engine.prepare_swap(&intent(), None, GasOverrides::default()).await.unwrap();

        assert_eq!(engine.expire_stale(), 1);
        assert_eq!(engine.expire_stale(), 0);
        assert_eq!(engine.flow_status(&WALLET).unwrap().status, FlowStatus::Expired);
        assert!(!engine.complete_step(&WALLET, "0xa1", true, None));
    }

    #[tokio::test]
    async fn test_health_check() {
        let engine = engine(
            vec![
                Arc::new(MockSource::returning(SourceKind::ZeroX, U256::from(5u64))),
                Arc::new(MockSource::returning(SourceKind::OneInch, U256::from(5u64)).unhealthy()),
            ],
            reader_with_allowance(U256::MAX),
        );

        let health = engine.health_check().await;
        assert!(health.is_healthy());
        assert_eq!(health.sources.len(), 2);
        assert!(health.endpoints.is_empty());
        assert!(engine
            .metrics()
            .gather_text()
            .unwrap()
            .contains(r#"swap_engine_source_health{source="1inch"} 0"#));
    }

    #[test]
    fn test_builder_requires_router_and_chains() {
        let result = SwapEngine::builder().build();
        assert!(matches!(result, Err(BuilderError::MissingField { field }) if field == "router"));

        let result = SwapEngine::builder()
            .with_router(QuoteRouter::new(vec![], RouterConfig::default()))
            .build();
        assert!(matches!(result, Err(BuilderError::MissingField { field }) if field == "chains"));
    }
}
