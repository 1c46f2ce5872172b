use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{
    amount::{decimal_to_smallest_units, usd_to_token_amount, AmountError, BPS_DENOMINATOR},
    ErrorKind, TokenRef,
};

/// Default slippage tolerance (0.5%)
pub const DEFAULT_SLIPPAGE_BPS: u32 = 50;

/// A parsed request to swap one token for another on a single chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapIntent {
    // ═══════════════════════════════════════════════════════════════════════════
    // ROUTING KEY
    // ═══════════════════════════════════════════════════════════════════════════

    pub chain_id: u64,

    /// Wallet that sells `token_in` and receives `token_out`
    pub wallet: Address,

    pub token_in: TokenRef,
    pub token_out: TokenRef,

    // ═══════════════════════════════════════════════════════════════════════════
    // AMOUNT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Human decimal amount of `token_in`, or of USD when `usd_denominated`
    pub amount: String,

    #[serde(default)]
    pub usd_denominated: bool,

    /// USD price of one `token_in`, required when `usd_denominated`
    #[serde(default)]
    pub token_in_usd_price: Option<Decimal>,

    // ═══════════════════════════════════════════════════════════════════════════
    // EXECUTION CONSTRAINTS
    // ═══════════════════════════════════════════════════════════════════════════

    pub slippage_bps: u32,

    /// Unix seconds after which the swap must not execute
    #[serde(default)]
    pub deadline: Option<u64>,
}

impl SwapIntent {
    pub fn builder() -> SwapIntentBuilder {
        SwapIntentBuilder::default()
    }

    /// Human amount of `token_in` after resolving USD denomination
    pub fn token_in_amount(&self) -> Result<Decimal, IntentError> {
        let value = Decimal::from_str(self.amount.trim())
            .map_err(|e| AmountError::Invalid(format!("{}: {e}", self.amount)))?;

        if !self.usd_denominated {
            return Ok(value);
        }

        let price = self
            .token_in_usd_price
            .ok_or(IntentError::MissingField("token_in_usd_price"))?;
        Ok(usd_to_token_amount(value, price)?)
    }

    /// Sell amount as an integer in `token_in`'s smallest unit
    pub fn amount_in_smallest_units(&self) -> Result<U256, IntentError> {
        let human = self.token_in_amount()?;
        let units = decimal_to_smallest_units(human, self.token_in.decimals)?;
        if units.is_zero() {
            return Err(IntentError::ZeroAmount);
        }
        Ok(units)
    }

    pub fn is_expired(&self, now_secs: u64) -> bool {
        self.deadline.is_some_and(|d| now_secs >= d)
    }
}

/// Builder for constructing swap intents
#[derive(Default)]
pub struct SwapIntentBuilder {
    chain_id: Option<u64>,
    wallet: Option<Address>,
    token_in: Option<TokenRef>,
    token_out: Option<TokenRef>,
    amount: Option<String>,
    usd_price: Option<Decimal>,
    usd_denominated: bool,
    slippage_bps: Option<u32>,
    deadline: Option<u64>,
}

impl SwapIntentBuilder {
    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn wallet(mut self, wallet: Address) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn token_in(mut self, token: TokenRef) -> Self {
        self.token_in = Some(token);
        self
    }

    pub fn token_out(mut self, token: TokenRef) -> Self {
        self.token_out = Some(token);
        self
    }

    pub fn amount(mut self, amount: impl Into<String>) -> Self {
        self.amount = Some(amount.into());
        self
    }

    /// Treat `amount` as USD, converted with the given token-in price
    pub fn usd_amount(mut self, usd: impl Into<String>, token_in_usd_price: Option<Decimal>) -> Self {
        self.amount = Some(usd.into());
        self.usd_denominated = true;
        self.usd_price = token_in_usd_price;
        self
    }

    pub fn slippage_bps(mut self, bps: u32) -> Self {
        self.slippage_bps = Some(bps);
        self
    }

    pub fn deadline(mut self, deadline: u64) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn build(self) -> Result<SwapIntent, IntentError> {
        let chain_id = self.chain_id.ok_or(IntentError::MissingField("chain_id"))?;
        let wallet = self.wallet.ok_or(IntentError::MissingField("wallet"))?;
        let token_in = self.token_in.ok_or(IntentError::MissingField("token_in"))?;
        let token_out = self.token_out.ok_or(IntentError::MissingField("token_out"))?;
        let amount = self.amount.ok_or(IntentError::MissingField("amount"))?;
        let slippage_bps = self.slippage_bps.unwrap_or(DEFAULT_SLIPPAGE_BPS);

        if self.usd_denominated && self.usd_price.is_none() {
            return Err(IntentError::MissingField("token_in_usd_price"));
        }
        if slippage_bps > BPS_DENOMINATOR {
            return Err(IntentError::SlippageOutOfRange(slippage_bps));
        }
        if token_in.chain_id != chain_id || token_out.chain_id != chain_id {
            return Err(IntentError::ChainMismatch {
                intent: chain_id,
                token_in: token_in.chain_id,
                token_out: token_out.chain_id,
            });
        }
        if token_in.address == token_out.address {
            return Err(IntentError::SameToken(token_in.symbol));
        }

        Ok(SwapIntent {
            chain_id,
            wallet,
            token_in,
            token_out,
            amount,
            usd_denominated: self.usd_denominated,
            token_in_usd_price: self.usd_price,
            slippage_bps,
            deadline: self.deadline,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntentError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error(transparent)]
    Amount(#[from] AmountError),

    #[error("amount resolves to zero smallest units")]
    ZeroAmount,

    #[error("slippage {0} bps exceeds 10000")]
    SlippageOutOfRange(u32),

    #[error("chain mismatch: intent {intent}, token_in {token_in}, token_out {token_out}")]
    ChainMismatch {
        intent: u64,
        token_in: u64,
        token_out: u64,
    },

    #[error("token_in and token_out are the same token: {0}")]
    SameToken(String),
}

impl IntentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IntentError::MissingField(_) => ErrorKind::MissingRequiredField,
            IntentError::ChainMismatch { .. } => ErrorKind::UnsupportedChain,
            IntentError::SameToken(_) => ErrorKind::InvalidToken,
            IntentError::Amount(_) | IntentError::ZeroAmount | IntentError::SlippageOutOfRange(_) => {
                ErrorKind::MissingRequiredField
            }
        }
    }
}
