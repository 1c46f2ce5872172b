use alloy::primitives::{aliases::U24, Address, Bytes, U160, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use swap_engine_rpc::{CallRequest, ChainReader, RpcError};
use swap_engine_types::{amount::apply_slippage, implied_price, now_millis, Quote, SourceKind};
use tracing::{debug, info};

use crate::{LiquiditySource, QuoteRequest, SourceError};

/// Fee tiers in hundredths of a basis point
pub const FEE_TIERS: [u32; 4] = [100, 500, 3000, 10_000];

/// Default lifetime of cached pool addresses and liquidity
pub const DEFAULT_POOL_CACHE_TTL: Duration = Duration::from_secs(120);

sol! {
    interface IUniswapV3Factory {
        function getPool(address tokenA, address tokenB, uint24 fee) external view returns (address pool);
    }

    interface IUniswapV3Pool {
        function liquidity() external view returns (uint128);
    }

    interface IQuoterV2 {
        struct QuoteExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint256 amountIn;
            uint24 fee;
            uint160 sqrtPriceLimitX96;
        }
        function quoteExactInputSingle(QuoteExactInputSingleParams params)
            external returns (uint256 amountOut, uint160 sqrtPriceX96After, uint32 initializedTicksCrossed, uint256 gasEstimate);
    }

    interface ISwapRouter02 {
        struct ExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint24 fee;
            address recipient;
            uint256 amountIn;
            uint256 amountOutMinimum;
            uint160 sqrtPriceLimitX96;
        }
        function exactInputSingle(ExactInputSingleParams params) external payable returns (uint256 amountOut);
        function multicall(bytes[] data) external payable returns (bytes[] results);
        function unwrapWETH9(uint256 amountMinimum, address recipient) external payable;
    }
}

/// Contract addresses of a Uniswap V3 deployment on one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniswapV3Deployment {
    pub factory: Address,
    pub quoter_v2: Address,
    pub swap_router02: Address,
    pub wrapped_native: Address,
}

// ═══════════════════════════════════════════════════════════════════════════
// POOL CACHE
// ═══════════════════════════════════════════════════════════════════════════

/// Pool address and liquidity for one (pair, fee tier); `pool` is `None`
/// when the factory has no pool for the tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolState {
    pub pool: Option<Address>,
    pub liquidity: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PoolKey {
    chain_id: u64,
    token0: Address,
    token1: Address,
    fee: u32,
}

struct CachedPool {
    state: PoolState,
    fetched_at: Instant,
}

pub struct PoolCache {
    pools: DashMap<PoolKey, CachedPool>,
    ttl: Duration,
}

impl PoolCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pools: DashMap::new(),
            ttl,
        }
    }

    fn get(&self, key: &PoolKey) -> Option<PoolState> {
        let cached = self.pools.get(key)?;
        if cached.fetched_at.elapsed() < self.ttl {
            Some(cached.state)
        } else {
            drop(cached);
            self.pools.remove(key);
            None
        }
    }

    fn insert(&self, key: PoolKey, state: PoolState) {
        self.pools.insert(
            key,
            CachedPool {
                state,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Returns the number of entries removed
    pub fn clear_expired(&self) -> usize {
        let before = self.pools.len();
        self.pools
            .retain(|_, cached| cached.fetched_at.elapsed() < self.ttl);
        before - self.pools.len()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CLIENT
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
enum TierOutcome {
    NoPool,
    BelowThreshold { liquidity: u128 },
    Quoted(TierQuote),
    Failed(SourceError),
}

#[derive(Debug, Clone, Copy)]
struct TierQuote {
    fee: u32,
    liquidity: u128,
    amount_out: U256,
    gas_estimate: Option<u64>,
}

struct TierHistory {
    tiers: Vec<u32>,
    recorded_at: Instant,
}

struct ChainContext {
    deployment: UniswapV3Deployment,
    reader: Arc<dyn ChainReader>,
}

/// On-chain Uniswap V3 quoting through QuoterV2; every read goes through a `ChainReader`
pub struct UniswapV3Client {
    chains: HashMap<u64, ChainContext>,
    pool_cache: PoolCache,
    /// Tiers seen above the liquidity threshold, most liquid first; expires
    /// with the pool cache
    tier_history: DashMap<(u64, Address, Address), TierHistory>,
    min_liquidity: u128,
}

impl UniswapV3Client {
    pub fn new(min_liquidity: u128, pool_cache_ttl: Duration) -> Self {
        Self {
            chains: HashMap::new(),
            pool_cache: PoolCache::new(pool_cache_ttl),
            tier_history: DashMap::new(),
            min_liquidity,
        }
    }

    pub fn with_chain(
        mut self,
        chain_id: u64,
        deployment: UniswapV3Deployment,
        reader: Arc<dyn ChainReader>,
    ) -> Self {
        self.chains.insert(chain_id, ChainContext { deployment, reader });
        self
    }

    pub fn pool_cache(&self) -> &PoolCache {
        &self.pool_cache
    }

    /// Known good tiers for a pair, most liquid first
    pub fn tier_history(&self, chain_id: u64, token_a: Address, token_b: Address) -> Option<Vec<u32>> {
        let ttl = self.pool_cache.ttl;
        self.tier_history
            .get(&pair_key(chain_id, token_a, token_b))
            .filter(|history| history.recorded_at.elapsed() < ttl)
            .map(|history| history.tiers.clone())
    }

    /// Drop expired pool entries and tier history; returns entries removed
    pub fn purge_expired(&self) -> usize {
        let ttl = self.pool_cache.ttl;
        let before = self.tier_history.len();
        self.tier_history
            .retain(|_, history| history.recorded_at.elapsed() < ttl);
        let purged = self.pool_cache.clear_expired() + before - self.tier_history.len();
        if purged > 0 {
            debug!(purged, "Purged expired Uniswap V3 pool state");
        }
        purged
    }

    async fn pool_state(
        &self,
        ctx: &ChainContext,
        chain_id: u64,
        token_in: Address,
        token_out: Address,
        fee: u32,
    ) -> Result<PoolState, SourceError> {
        let (token0, token1) = sort_pair(token_in, token_out);
        let key = PoolKey {
            chain_id,
            token0,
            token1,
            fee,
        };
        if let Some(state) = self.pool_cache.get(&key) {
            return Ok(state);
        }

        let call = IUniswapV3Factory::getPoolCall {
            tokenA: token0,
            tokenB: token1,
            fee: U24::from(fee),
        };
        let raw = ctx
            .reader
            .call(&CallRequest::new(ctx.deployment.factory, Bytes::from(call.abi_encode())))
            .await?;
        let pool = IUniswapV3Factory::getPoolCall::abi_decode_returns(&raw)
            .map_err(|e| SourceError::Backend(format!("getPool decode: {e}")))?;

        let state = if pool == Address::ZERO {
            PoolState {
                pool: None,
                liquidity: 0,
            }
        } else {
            let raw = ctx
                .reader
                .call(&CallRequest::new(
                    pool,
                    Bytes::from(IUniswapV3Pool::liquidityCall {}.abi_encode()),
                ))
                .await?;
            let liquidity = IUniswapV3Pool::liquidityCall::abi_decode_returns(&raw)
                .map_err(|e| SourceError::Backend(format!("liquidity decode: {e}")))?;
            PoolState {
                pool: Some(pool),
                liquidity,
            }
        };

        self.pool_cache.insert(key, state);
        Ok(state)
    }

    async fn probe_tier(
        &self,
        ctx: &ChainContext,
        chain_id: u64,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        fee: u32,
    ) -> TierOutcome {
        let state = match self.pool_state(ctx, chain_id, token_in, token_out, fee).await {
            Ok(state) => state,
            Err(e) => return TierOutcome::Failed(e),
        };
        if state.pool.is_none() {
            return TierOutcome::NoPool;
        }
        if state.liquidity == 0 || state.liquidity < self.min_liquidity {
            return TierOutcome::BelowThreshold {
                liquidity: state.liquidity,
            };
        }

        let call = IQuoterV2::quoteExactInputSingleCall {
            params: IQuoterV2::QuoteExactInputSingleParams {
                tokenIn: token_in,
                tokenOut: token_out,
                amountIn: amount_in,
                fee: U24::from(fee),
                sqrtPriceLimitX96: U160::ZERO,
            },
        };
        let raw = match ctx
            .reader
            .call(&CallRequest::new(ctx.deployment.quoter_v2, Bytes::from(call.abi_encode())))
            .await
        {
            Ok(raw) => raw,
            // Quoter reverts when the swap cannot be filled at this tier
            Err(e @ RpcError::Rpc { .. }) => {
                return TierOutcome::Failed(SourceError::InsufficientLiquidity(format!(
                    "fee tier {fee}: {}",
                    e.detail()
                )))
            }
            Err(e) => return TierOutcome::Failed(e.into()),
        };

        match IQuoterV2::quoteExactInputSingleCall::abi_decode_returns(&raw) {
            Ok(ret) if ret.amountOut.is_zero() => TierOutcome::Failed(SourceError::InsufficientLiquidity(
                format!("fee tier {fee} quoted zero output"),
            )),
            Ok(ret) => TierOutcome::Quoted(TierQuote {
                fee,
                liquidity: state.liquidity,
                amount_out: ret.amountOut,
                gas_estimate: u64::try_from(ret.gasEstimate).ok().filter(|g| *g > 0),
            }),
            Err(e) => TierOutcome::Failed(SourceError::Backend(format!("quoter decode: {e}"))),
        }
    }

    /// Try remembered tiers in order, stopping at the first that quotes
    async fn quote_from_history(
        &self,
        ctx: &ChainContext,
        request: &QuoteRequest,
        token_in: Address,
        token_out: Address,
    ) -> Option<TierQuote> {
        let tiers = self.tier_history(request.chain_id, token_in, token_out)?;
        for fee in tiers {
            match self
                .probe_tier(ctx, request.chain_id, token_in, token_out, request.amount_in, fee)
                .await
            {
                TierOutcome::Quoted(quote) => return Some(quote),
                outcome => debug!(fee, ?outcome, "remembered fee tier no longer usable"),
            }
        }
        None
    }

    /// Probe every tier concurrently and keep the best output
    async fn quote_all_tiers(
        &self,
        ctx: &ChainContext,
        request: &QuoteRequest,
        token_in: Address,
        token_out: Address,
    ) -> Result<TierQuote, SourceError> {
        let probes = FEE_TIERS.iter().map(|fee| {
            self.probe_tier(ctx, request.chain_id, token_in, token_out, request.amount_in, *fee)
        });
        let outcomes = join_all(probes).await;

        let mut quoted: Vec<TierQuote> = Vec::new();
        let mut failures: Vec<SourceError> = Vec::new();
        let mut below_threshold = false;
        for outcome in outcomes {
            match outcome {
                TierOutcome::Quoted(q) => quoted.push(q),
                TierOutcome::BelowThreshold { .. } => below_threshold = true,
                TierOutcome::NoPool => {}
                TierOutcome::Failed(e) => failures.push(e),
            }
        }

        if quoted.is_empty() {
            if below_threshold {
                failures.push(SourceError::InsufficientLiquidity(format!(
                    "no fee tier above liquidity threshold {}",
                    self.min_liquidity
                )));
            }
            // Most specific tier failure wins, as across sources
            return Err(failures
                .into_iter()
                .max_by_key(|e| e.kind().specificity())
                .unwrap_or_else(|| SourceError::NoRoute("no Uniswap V3 pool for pair".to_string())));
        }

        let mut by_liquidity = quoted.clone();
        by_liquidity.sort_by(|a, b| b.liquidity.cmp(&a.liquidity));
        self.tier_history.insert(
            pair_key(request.chain_id, token_in, token_out),
            TierHistory {
                tiers: by_liquidity.iter().map(|q| q.fee).collect(),
                recorded_at: Instant::now(),
            },
        );

        quoted
            .into_iter()
            .max_by(|a, b| a.amount_out.cmp(&b.amount_out).then(b.fee.cmp(&a.fee)))
            .ok_or_else(|| SourceError::NoRoute("no Uniswap V3 quote".to_string()))
    }

    fn build_quote(
        &self,
        ctx: &ChainContext,
        request: &QuoteRequest,
        token_in: Address,
        token_out: Address,
        tier: TierQuote,
    ) -> Quote {
        let router = ctx.deployment.swap_router02;
        let native_in = request.token_in.is_native();
        let native_out = request.token_out.is_native();
        let minimum_received = apply_slippage(tier.amount_out, request.slippage_bps);

        let exact = ISwapRouter02::exactInputSingleCall {
            params: ISwapRouter02::ExactInputSingleParams {
                tokenIn: token_in,
                tokenOut: token_out,
                fee: U24::from(tier.fee),
                recipient: if native_out { router } else { request.taker },
                amountIn: request.amount_in,
                amountOutMinimum: minimum_received,
                sqrtPriceLimitX96: U160::ZERO,
            },
        };

        let data = if native_out {
            // Swap into the router, then unwrap to the taker
            let unwrap = ISwapRouter02::unwrapWETH9Call {
                amountMinimum: minimum_received,
                recipient: request.taker,
            };
            ISwapRouter02::multicallCall {
                data: vec![Bytes::from(exact.abi_encode()), Bytes::from(unwrap.abi_encode())],
            }
            .abi_encode()
        } else {
            exact.abi_encode()
        };

        Quote {
            source: SourceKind::UniswapV3,
            chain_id: request.chain_id,
            sell_token: request.token_in.address,
            buy_token: request.token_out.address,
            buy_amount: tier.amount_out,
            sell_amount: request.amount_in,
            price: implied_price(
                tier.amount_out,
                request.token_out.decimals,
                request.amount_in,
                request.token_in.decimals,
            ),
            to: router,
            data: Bytes::from(data),
            value: if native_in { request.amount_in } else { U256::ZERO },
            gas_estimate: tier.gas_estimate,
            minimum_received,
            requires_signature: false,
            permit2_eip712: None,
            allowance_target: Some(router),
            protocol: format!("uniswap_v3:{}", tier.fee),
            gas_usd: None,
            quoted_at_ms: now_millis(),
        }
    }
}

fn sort_pair(a: Address, b: Address) -> (Address, Address) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

fn pair_key(chain_id: u64, a: Address, b: Address) -> (u64, Address, Address) {
    let (token0, token1) = sort_pair(a, b);
    (chain_id, token0, token1)
}

#[async_trait]
impl LiquiditySource for UniswapV3Client {
    fn kind(&self) -> SourceKind {
        SourceKind::UniswapV3
    }

    fn supports_chain(&self, chain_id: u64) -> bool {
        self.chains.contains_key(&chain_id)
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, SourceError> {
        let ctx = self.chains.get(&request.chain_id).ok_or_else(|| {
            SourceError::NotConfigured(format!(
                "Uniswap V3 addresses for chain {}",
                request.chain_id
            ))
        })?;

        let wrap = |token: &swap_engine_types::TokenRef| {
            if token.is_native() {
                ctx.deployment.wrapped_native
            } else {
                token.address
            }
        };
        let token_in = wrap(&request.token_in);
        let token_out = wrap(&request.token_out);
        if token_in == token_out {
            return Err(SourceError::InvalidToken(
                "wrapping native to wrapped native is not a pool swap".to_string(),
            ));
        }

        let tier = match self.quote_from_history(ctx, request, token_in, token_out).await {
            Some(tier) => tier,
            None => self.quote_all_tiers(ctx, request, token_in, token_out).await?,
        };

        info!(
            chain_id = request.chain_id,
            fee = tier.fee,
            amount_out = %tier.amount_out,
            "Uniswap V3 quote"
        );

        Ok(self.build_quote(ctx, request, token_in, token_out, tier))
    }

    async fn health_check(&self) -> bool {
        let checks = self.chains.values().map(|ctx| ctx.reader.gas_price());
        join_all(checks).await.iter().any(|r| r.is_ok())
    }

    fn purge_expired(&self) -> usize {
        UniswapV3Client::purge_expired(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use swap_engine_rpc::MockChainReader;
    use swap_engine_types::{ErrorKind, TokenRef};

    const FACTORY: Address = address!("0x1F98431c8aD98523631AE4a59f267346ea31F984");
    const QUOTER: Address = address!("0x61fFE014bA17989E743c5F6cB21bF9697530B21e");
    const ROUTER: Address = address!("0x68b3465833fb72A70ecDF485E0e4C7bD8665Fc45");
    const WETH: Address = address!("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
    const USDC: Address = address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");

    fn deployment() -> UniswapV3Deployment {
        UniswapV3Deployment {
            factory: FACTORY,
            quoter_v2: QUOTER,
            swap_router02: ROUTER,
            wrapped_native: WETH,
        }
    }

    fn word(value: U256) -> Vec<u8> {
        value.to_be_bytes::<32>().to_vec()
    }

    fn pool_for(fee: u32) -> Address {
        Address::repeat_byte((fee % 251) as u8 + 1)
    }

    /// Pools for the given tiers with (liquidity, amount_out)
    fn scripted_chain(tiers: Vec<(u32, u128, u64)>) -> Arc<MockChainReader> {
        let reader = MockChainReader::new(1).with_call_handler(move |req| {
            let selector: [u8; 4] = req.data[..4].try_into().unwrap();
            if selector == IUniswapV3Factory::getPoolCall::SELECTOR {
                let call = IUniswapV3Factory::getPoolCall::abi_decode(&req.data).unwrap();
                let fee = call.fee.to::<u32>();
                let pool = if tiers.iter().any(|(f, _, _)| *f == fee) {
                    pool_for(fee)
                } else {
                    Address::ZERO
                };
                let mut out = vec![0u8; 12];
                out.extend_from_slice(pool.as_slice());
                Ok(Bytes::from(out))
            } else if selector == IUniswapV3Pool::liquidityCall::SELECTOR {
                let (_, liquidity, _) = tiers.iter().find(|(f, _, _)| pool_for(*f) == req.to).unwrap();
                Ok(Bytes::from(word(U256::from(*liquidity))))
            } else if selector == IQuoterV2::quoteExactInputSingleCall::SELECTOR {
                let call = IQuoterV2::quoteExactInputSingleCall::abi_decode(&req.data).unwrap();
                let fee = call.params.fee.to::<u32>();
                let (_, _, out) = tiers.iter().find(|(f, _, _)| *f == fee).unwrap();
                let mut ret = word(U256::from(*out));
                ret.extend(word(U256::ZERO));
                ret.extend(word(U256::ZERO));
                ret.extend(word(U256::from(120_000u64)));
                Ok(Bytes::from(ret))
            } else {
                Err(RpcError::Rpc {
                    code: -32000,
                    message: "unexpected call".into(),
                    data: None,
                })
            }
        });
        Arc::new(reader)
    }

    fn client(reader: Arc<MockChainReader>, min_liquidity: u128) -> UniswapV3Client {
        UniswapV3Client::new(min_liquidity, DEFAULT_POOL_CACHE_TTL).with_chain(1, deployment(), reader)
    }

    fn request(token_in: TokenRef, token_out: TokenRef, amount: u128) -> QuoteRequest {
        QuoteRequest {
            chain_id: 1,
            token_in,
            token_out,
            amount_in: U256::from(amount),
            taker: Address::repeat_byte(0x33),
            slippage_bps: 50,
        }
    }

    fn usdc() -> TokenRef {
        TokenRef::new(USDC, "USDC", 6, 1)
    }

    fn weth() -> TokenRef {
        TokenRef::new(WETH, "WETH", 18, 1)
    }

    #[tokio::test]
    async fn test_probes_all_tiers_then_uses_history() {
        let reader = scripted_chain(vec![(500, 5_000_000, 990), (3000, 9_000_000, 1000)]);
        let client = client(reader.clone(), 1_000);

        let quote = client.quote(&request(usdc(), weth(), 1_000_000)).await.unwrap();
        assert_eq!(quote.buy_amount, U256::from(1000u64));
        assert_eq!(quote.protocol, "uniswap_v3:3000");
        assert_eq!(quote.gas_estimate, Some(120_000));
        assert_eq!(client.tier_history(1, USDC, WETH), Some(vec![3000, 500]));

        // 4 getPool + 2 liquidity + 2 quotes
        assert_eq!(reader.call_count(), 8);

        // History hit: pools are cached, one quoter call at the best tier
        let quote = client.quote(&request(usdc(), weth(), 2_000_000)).await.unwrap();
        assert_eq!(quote.protocol, "uniswap_v3:3000");
        assert_eq!(reader.call_count(), 9);
    }

    #[tokio::test]
    async fn test_no_pool_is_no_route() {
        let client = client(scripted_chain(vec![]), 0);
        let err = client.quote(&request(usdc(), weth(), 1_000)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoRouteFound);
    }

    #[tokio::test]
    async fn test_thin_pools_are_insufficient_liquidity() {
        let client = client(scripted_chain(vec![(3000, 10, 5)]), 1_000_000);
        let err = client.quote(&request(usdc(), weth(), 1_000)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientLiquidity);
    }

    #[tokio::test]
    async fn test_native_out_unwraps_via_multicall() {
        let client = client(scripted_chain(vec![(500, 5_000_000, 10_000)]), 0);
        let quote = client
            .quote(&request(usdc(), TokenRef::native("ETH", 1), 1_000_000))
            .await
            .unwrap();

        assert_eq!(quote.to, ROUTER);
        assert_eq!(quote.value, U256::ZERO);
        assert_eq!(&quote.data[..4], ISwapRouter02::multicallCall::SELECTOR.as_slice());
        assert_eq!(quote.minimum_received, U256::from(9_950u64));
    }

    #[tokio::test]
    async fn test_native_in_sends_value() {
        let client = client(scripted_chain(vec![(500, 5_000_000, 2_500_000_000)]), 0);
        let quote = client
            .quote(&request(TokenRef::native("ETH", 1), usdc(), 1_000_000_000_000_000_000))
            .await
            .unwrap();

        assert_eq!(quote.value, U256::from(1_000_000_000_000_000_000u128));
        assert_eq!(&quote.data[..4], ISwapRouter02::exactInputSingleCall::SELECTOR.as_slice());
        let decoded = ISwapRouter02::exactInputSingleCall::abi_decode(&quote.data).unwrap();
        assert_eq!(decoded.params.tokenIn, WETH);
        assert_eq!(decoded.params.recipient, Address::repeat_byte(0x33));
    }

    #[tokio::test]
    async fn test_unconfigured_chain() {
        let client = UniswapV3Client::new(0, DEFAULT_POOL_CACHE_TTL);
        assert!(!client.supports_chain(1));
        let err = client.quote(&request(usdc(), weth(), 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationMissing);
    }

    #[tokio::test]
    async fn test_tier_failures_report_most_specific_reason() {
        // Fee 500: the factory read fails in transit. Fee 3000: the quoter reverts.
        let reader = MockChainReader::new(1).with_call_handler(|req| {
            let selector: [u8; 4] = req.data[..4].try_into().unwrap();
            if selector == IUniswapV3Factory::getPoolCall::SELECTOR {
                let call = IUniswapV3Factory::getPoolCall::abi_decode(&req.data).unwrap();
                match call.fee.to::<u32>() {
                    500 => Err(RpcError::Transport {
                        url: "http://node".into(),
                        message: "connection reset".into(),
                    }),
                    3000 => {
                        let mut out = vec![0u8; 12];
                        out.extend_from_slice(pool_for(3000).as_slice());
                        Ok(Bytes::from(out))
                    }
                    _ => Ok(Bytes::from(vec![0u8; 32])),
                }
            } else if selector == IUniswapV3Pool::liquidityCall::SELECTOR {
                Ok(Bytes::from(word(U256::from(9_000_000u64))))
            } else {
                Err(RpcError::Rpc {
                    code: 3,
                    message: "execution reverted".into(),
                    data: None,
                })
            }
        });
        let client = client(Arc::new(reader), 1_000);

        let err = client.quote(&request(usdc(), weth(), 1_000_000)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientLiquidity);
    }

    #[tokio::test]
    async fn test_transport_only_failure_stays_transport() {
        let reader = MockChainReader::new(1).with_call_handler(|_| {
            Err(RpcError::Transport {
                url: "http://node".into(),
                message: "connection refused".into(),
            })
        });
        let client = client(Arc::new(reader), 0);

        let err = client.quote(&request(usdc(), weth(), 1_000)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_purge_drops_expired_pools_and_history() {
        let reader = scripted_chain(vec![(500, 5_000_000, 990), (3000, 9_000_000, 1000)]);
        let client = UniswapV3Client::new(0, Duration::from_millis(200)).with_chain(1, deployment(), reader);

        client.quote(&request(usdc(), weth(), 1_000_000)).await.unwrap();
        assert_eq!(client.pool_cache().len(), 4);
        assert!(client.tier_history(1, USDC, WETH).is_some());
        assert_eq!(client.purge_expired(), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(client.tier_history(1, USDC, WETH).is_none());

        let router = crate::QuoteRouter::new(
            vec![Arc::new(client) as Arc<dyn LiquiditySource>],
            crate::RouterConfig::default(),
        );
        // 4 pool entries plus 1 history entry
        assert_eq!(router.purge_expired(), 5);
        assert_eq!(router.purge_expired(), 0);
    }

    #[test]
    fn test_pool_cache_ttl() {
        let key = PoolKey {
            chain_id: 1,
            token0: USDC,
            token1: WETH,
            fee: 500,
        };
        let state = PoolState {
            pool: Some(pool_for(500)),
            liquidity: 42,
        };

        let cache = PoolCache::new(Duration::from_secs(60));
        cache.insert(key, state);
        assert_eq!(cache.get(&key), Some(state));

        let short = PoolCache::new(Duration::from_millis(1));
        short.insert(key, state);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(short.get(&key), None);
        short.insert(key, state);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(short.clear_expired(), 1);
        assert!(short.is_empty());
    }
}
