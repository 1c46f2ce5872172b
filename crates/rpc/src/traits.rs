use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::RpcError;

/// Minimal transaction shape for `eth_call` / `eth_estimateGas`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
    pub value: Option<U256>,
}

impl CallRequest {
    pub fn new(to: Address, data: Bytes) -> Self {
        Self {
            from: None,
            to,
            data,
            value: None,
        }
    }

    pub fn from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    /// JSON-RPC transaction object
    pub fn to_json(&self) -> Value {
        let mut obj = json!({
            "to": format!("{:#x}", self.to),
            "data": self.data.to_string(),
        });
        if let Some(from) = self.from {
            obj["from"] = json!(format!("{:#x}", from));
        }
        if let Some(value) = self.value {
            obj["value"] = json!(format!("{:#x}", value));
        }
        obj
    }
}

/// Read access to one chain. Every on-chain read the engine makes goes
/// through this trait so the resilience layer sits in front of it.
#[async_trait]
pub trait ChainReader: Send + Sync {
    fn chain_id(&self) -> u64;

    /// `eth_call` against the latest block
    async fn call(&self, request: &CallRequest) -> Result<Bytes, RpcError>;

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64, RpcError>;

    /// Legacy gas price in wei
    async fn gas_price(&self) -> Result<u128, RpcError>;

    /// Latest block base fee, `None` on chains without EIP-1559
    async fn base_fee(&self) -> Result<Option<u128>, RpcError>;

    /// Suggested priority fee, `None` when the node does not support it
    async fn max_priority_fee(&self) -> Result<Option<u128>, RpcError>;
}
