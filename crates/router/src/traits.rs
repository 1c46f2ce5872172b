use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use swap_engine_types::{IntentError, Quote, SourceKind, SwapIntent, TokenRef};

use crate::SourceError;

/// Normalized input handed to every liquidity source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub chain_id: u64,
    pub token_in: TokenRef,
    pub token_out: TokenRef,

    /// Sell amount in `token_in`'s smallest unit
    pub amount_in: U256,

    /// Wallet that will execute the swap
    pub taker: Address,
    pub slippage_bps: u32,
}

impl QuoteRequest {
    pub fn from_intent(intent: &SwapIntent) -> Result<Self, IntentError> {
        Ok(Self {
            chain_id: intent.chain_id,
            token_in: intent.token_in.clone(),
            token_out: intent.token_out.clone(),
            amount_in: intent.amount_in_smallest_units()?,
            taker: intent.wallet,
            slippage_bps: intent.slippage_bps,
        })
    }

    pub fn cache_key(&self) -> QuoteCacheKey {
        QuoteCacheKey {
            chain_id: self.chain_id,
            token_in: self.token_in.address,
            token_out: self.token_out.address,
            amount_in: self.amount_in,
            taker: self.taker,
            slippage_bps: self.slippage_bps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteCacheKey {
    pub chain_id: u64,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub taker: Address,
    pub slippage_bps: u32,
}

/// Uniform quote contract every liquidity source implements
#[async_trait]
pub trait LiquiditySource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Whether the source can be asked about this chain at all
    fn supports_chain(&self, _chain_id: u64) -> bool {
        true
    }

    /// Fetch an executable quote
    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, SourceError>;

    async fn health_check(&self) -> bool {
        true
    }

    /// Drop expired source-local state; returns the number of entries removed
    fn purge_expired(&self) -> usize {
        0
    }
}
