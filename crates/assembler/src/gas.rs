use serde::{Deserialize, Serialize};
use swap_engine_rpc::{ChainReader, RpcError};
use swap_engine_types::TokenRef;
use tracing::debug;

/// How a chain prices gas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GasPricingMode {
    Legacy,
    #[default]
    Eip1559,
}

/// Operation used to pick a fallback gas limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasLimitKind {
    Approve,
    Transfer,
    Swap,
    Generic,
}

/// Gas limits used when the node cannot estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasDefaults {
    pub approve: u64,
    pub transfer: u64,
    pub swap: u64,
    pub generic: u64,
}

impl Default for GasDefaults {
    fn default() -> Self {
        Self {
            approve: 60_000,
            transfer: 100_000,
            swap: 350_000,
            generic: 250_000,
        }
    }
}

impl GasDefaults {
    pub fn for_kind(&self, kind: GasLimitKind) -> u64 {
        match kind {
            GasLimitKind::Approve => self.approve,
            GasLimitKind::Transfer => self.transfer,
            GasLimitKind::Swap => self.swap,
            GasLimitKind::Generic => self.generic,
        }
    }
}

/// Caller-supplied values that win over anything fetched from the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GasOverrides {
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
}

/// Fee fields of an assembled transaction, in wei
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GasPricing {
    Legacy {
        gas_price: u128,
    },
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

/// Buffers, multipliers and defaults applied to gas limits and prices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasPolicy {
    /// Added on top of a node estimate
    pub buffer_percent: u64,
    /// Applied to limits for tokens with nonstandard transfer mechanics
    pub nonstandard_multiplier_percent: u64,
    /// Applied to the node's legacy gas price
    pub legacy_price_multiplier_percent: u64,
    pub defaults: GasDefaults,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            buffer_percent: 25,
            nonstandard_multiplier_percent: 150,
            legacy_price_multiplier_percent: 110,
            defaults: GasDefaults::default(),
        }
    }
}

fn scale(value: u128, percent: u64) -> u128 {
    value.saturating_mul(percent as u128) / 100
}

fn scale_u64(value: u64, percent: u64) -> u64 {
    u64::try_from(scale(value as u128, percent)).unwrap_or(u64::MAX)
}

impl GasPolicy {
    /// Node estimate plus the safety buffer
    pub fn buffered(&self, estimate: u64) -> u64 {
        scale_u64(estimate, 100 + self.buffer_percent)
    }

    pub fn fallback(&self, kind: GasLimitKind) -> u64 {
        self.defaults.for_kind(kind)
    }

    /// Apply the nonstandard-transfer multiplier where the token needs it
    pub fn adjust_for_token(&self, limit: u64, token: Option<&TokenRef>) -> u64 {
        match token {
            Some(token) if token.nonstandard_transfer => {
                scale_u64(limit, self.nonstandard_multiplier_percent)
            }
            _ => limit,
        }
    }

    async fn legacy_price(
        &self,
        reader: &dyn ChainReader,
        overrides: &GasOverrides,
    ) -> Result<GasPricing, RpcError> {
        let gas_price = match overrides.gas_price {
            Some(price) => price,
            None => scale(reader.gas_price().await?, self.legacy_price_multiplier_percent),
        };
        Ok(GasPricing::Legacy { gas_price })
    }

    /// Resolve fee fields for the chain's pricing mode.
    ///
    /// EIP-1559 chains use `2 * base_fee + priority_fee` unless overridden, and
    /// fall back to legacy pricing when the node has no base fee or priority
    /// fee data.
    pub async fn pricing(
        &self,
        reader: &dyn ChainReader,
        mode: GasPricingMode,
        overrides: &GasOverrides,
    ) -> Result<GasPricing, RpcError> {
        if mode == GasPricingMode::Legacy {
            return self.legacy_price(reader, overrides).await;
        }

        if let (Some(max_fee), Some(priority)) =
            (overrides.max_fee_per_gas, overrides.max_priority_fee_per_gas)
        {
            return Ok(GasPricing::Eip1559 {
                max_fee_per_gas: max_fee,
                max_priority_fee_per_gas: priority.min(max_fee),
            });
        }

        let priority = match overrides.max_priority_fee_per_gas {
            Some(priority) => Some(priority),
            None => reader.max_priority_fee().await?,
        };
        let base_fee = reader.base_fee().await?;

        match (base_fee, priority) {
            (Some(base_fee), Some(priority)) => {
                let max_fee = overrides
                    .max_fee_per_gas
                    .unwrap_or_else(|| base_fee.saturating_mul(2).saturating_add(priority));
                Ok(GasPricing::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority.min(max_fee),
                })
            }
            _ => {
                debug!(
                    chain_id = reader.chain_id(),
                    "No EIP-1559 fee data, falling back to legacy gas price"
                );
                self.legacy_price(reader, overrides).await
            }
        }
    }
}
