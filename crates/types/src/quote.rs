use alloy::primitives::{Address, Bytes, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// How long a quote stays executable after it was fetched
pub const QUOTE_FRESHNESS_MS: u64 = 8_000;

/// Closed set of liquidity sources the router knows how to query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceKind {
    #[serde(rename = "0x")]
    ZeroX,
    #[serde(rename = "1inch")]
    OneInch,
    #[serde(rename = "uniswap_v3")]
    UniswapV3,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::ZeroX, SourceKind::OneInch, SourceKind::UniswapV3];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::ZeroX => "0x",
            SourceKind::OneInch => "1inch",
            SourceKind::UniswapV3 => "uniswap_v3",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "0x" | "zerox" => Some(SourceKind::ZeroX),
            "1inch" | "oneinch" => Some(SourceKind::OneInch),
            "uniswap_v3" | "uniswap" | "uniswapv3" => Some(SourceKind::UniswapV3),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A priced, executable swap proposal from one liquidity source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub source: SourceKind,
    pub chain_id: u64,
    pub sell_token: Address,
    pub buy_token: Address,

    /// Output in the buy token's smallest unit
    pub buy_amount: U256,

    /// Input in the sell token's smallest unit
    pub sell_amount: U256,

    /// Human units of output per human unit of input
    pub price: Decimal,

    /// Contract the swap transaction is sent to
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_estimate: Option<u64>,

    /// Output guaranteed after slippage
    pub minimum_received: U256,

    /// Swap data must be extended with a Permit2 signature before submission
    pub requires_signature: bool,

    /// EIP-712 typed data returned by the source for Permit2 signing
    #[serde(default)]
    pub permit2_eip712: Option<serde_json::Value>,

    /// Spender the source expects to hold an allowance, if it reports one
    #[serde(default)]
    pub allowance_target: Option<Address>,

    /// Venue or protocol label reported by the source
    pub protocol: String,

    #[serde(default)]
    pub gas_usd: Option<Decimal>,

    pub quoted_at_ms: u64,
}

impl Quote {
    pub fn is_fresh(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.quoted_at_ms) < QUOTE_FRESHNESS_MS
    }

    /// Ranking order: buy amount descending, then source kind as a stable tie-break
    pub fn rank_cmp(&self, other: &Quote) -> Ordering {
        other
            .buy_amount
            .cmp(&self.buy_amount)
            .then_with(|| self.source.cmp(&other.source))
    }

    /// Flatten into the record shape handed to outer layers
    pub fn to_record(&self) -> QuoteRecord {
        QuoteRecord {
            to: format!("{:#x}", self.to),
            data: self.data.to_string(),
            value: self.value.to_string(),
            gas: self.gas_estimate.map(|g| g.to_string()),
            buy_amount: self.buy_amount.to_string(),
            sell_amount: self.sell_amount.to_string(),
            minimum_received: self.minimum_received.to_string(),
            price: self.price.normalize().to_string(),
            aggregator: self.source.as_str().to_string(),
            protocol: self.protocol.clone(),
            gas_usd: self.gas_usd.map(|g| g.normalize().to_string()),
        }
    }
}

/// Sort quotes in ranking order in place
pub fn rank_quotes(quotes: &mut [Quote]) {
    quotes.sort_by(|a, b| a.rank_cmp(b));
}

/// Quote/transaction record exchanged with outer layers; numbers are strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRecord {
    pub to: String,
    pub data: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<String>,
    pub buy_amount: String,
    pub sell_amount: String,
    pub minimum_received: String,
    pub price: String,
    pub aggregator: String,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_usd: Option<String>,
}
