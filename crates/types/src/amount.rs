//! Exact conversion between human decimal amounts and on-chain integer units
//!
//! Values placed into transaction data are always `U256` integers in the
//! token's smallest unit. Human amounts go through `rust_decimal` so no
//! floating point ever touches a chain-bound value.

use alloy::primitives::U256;
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

/// Largest smallest-unit amount accepted from a conversion (10^36)
pub const MAX_SANE_AMOUNT_EXP: u64 = 36;

/// Basis point denominator
pub const BPS_DENOMINATOR: u32 = 10_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("invalid amount: {0}")]
    Invalid(String),

    #[error("amount must not be negative: {0}")]
    Negative(String),

    #[error("amount exceeds sanity bound of 10^{MAX_SANE_AMOUNT_EXP}")]
    ExceedsSanityBound,

    #[error("invalid numeric field: {0}")]
    InvalidNumeric(String),

    #[error("price must be positive")]
    NonPositivePrice,
}

fn pow10(exp: u32) -> U256 {
    U256::from(10u64).pow(U256::from(exp))
}

/// Upper bound every converted amount must stay under
pub fn sanity_bound() -> U256 {
    pow10(MAX_SANE_AMOUNT_EXP as u32)
}

/// Convert a human decimal amount into smallest units, rounding down any
/// fractional digits beyond `decimals`
pub fn to_smallest_units(human: &str, decimals: u8) -> Result<U256, AmountError> {
    let value = Decimal::from_str(human.trim())
        .map_err(|e| AmountError::Invalid(format!("{human}: {e}")))?;
    decimal_to_smallest_units(value, decimals)
}

/// Same as [`to_smallest_units`] for an already parsed decimal
pub fn decimal_to_smallest_units(value: Decimal, decimals: u8) -> Result<U256, AmountError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(AmountError::Negative(value.to_string()));
    }

    let mantissa = U256::from(value.mantissa().unsigned_abs());
    let scale = value.scale();
    let decimals = u32::from(decimals);

    let units = if decimals >= scale {
        mantissa
            .checked_mul(pow10(decimals - scale))
            .ok_or(AmountError::ExceedsSanityBound)?
    } else {
        mantissa / pow10(scale - decimals)
    };

    if units > sanity_bound() {
        return Err(AmountError::ExceedsSanityBound);
    }

    Ok(units)
}

/// Render smallest units as an exact human decimal string with trailing zeros trimmed
pub fn from_smallest_units(amount: U256, decimals: u8) -> String {
    let digits = amount.to_string();
    let decimals = decimals as usize;
    if decimals == 0 {
        return digits;
    }

    let padded = if digits.len() <= decimals {
        format!("{}{}", "0".repeat(decimals - digits.len() + 1), digits)
    } else {
        digits
    };

    let (int_part, frac_part) = padded.split_at(padded.len() - decimals);
    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{int_part}.{frac_part}")
    }
}

/// Smallest units as a `Decimal`, `None` if the value exceeds decimal precision
pub fn to_decimal(amount: U256, decimals: u8) -> Option<Decimal> {
    Decimal::from_str(&from_smallest_units(amount, decimals)).ok()
}

/// Parse a caller-supplied numeric field given as a decimal or `0x` hex string
pub fn parse_u256(value: &str) -> Result<U256, AmountError> {
    let trimmed = value.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some("") => return Err(AmountError::InvalidNumeric(value.to_string())),
        Some(hex_digits) => U256::from_str_radix(hex_digits, 16),
        None if trimmed.is_empty() => {
            return Err(AmountError::InvalidNumeric(value.to_string()))
        }
        None => U256::from_str_radix(trimmed, 10),
    };
    parsed.map_err(|e| AmountError::InvalidNumeric(format!("{value}: {e}")))
}

/// Parse a gas-sized numeric field (decimal or hex)
pub fn parse_u64(value: &str) -> Result<u64, AmountError> {
    let wide = parse_u256(value)?;
    u64::try_from(wide).map_err(|_| AmountError::InvalidNumeric(format!("{value}: exceeds u64")))
}

/// Parse a fee-sized numeric field (decimal or hex)
pub fn parse_u128(value: &str) -> Result<u128, AmountError> {
    let wide = parse_u256(value)?;
    u128::try_from(wide)
        .map_err(|_| AmountError::InvalidNumeric(format!("{value}: exceeds u128")))
}

/// Amount remaining after a slippage tolerance, rounded down
pub fn apply_slippage(amount: U256, slippage_bps: u32) -> U256 {
    let bps = slippage_bps.min(BPS_DENOMINATOR);
    let keep = U256::from(BPS_DENOMINATOR - bps);
    let denom = U256::from(BPS_DENOMINATOR);
    match amount.checked_mul(keep) {
        Some(scaled) => scaled / denom,
        None => amount / denom * keep,
    }
}

/// Token amount for a USD-denominated request
pub fn usd_to_token_amount(usd: Decimal, token_usd_price: Decimal) -> Result<Decimal, AmountError> {
    if token_usd_price <= Decimal::ZERO {
        return Err(AmountError::NonPositivePrice);
    }
    usd.checked_div(token_usd_price)
        .ok_or_else(|| AmountError::Invalid(format!("{usd} / {token_usd_price}")))
}

/// Implied price in human units of output per unit of input
pub fn implied_price(
    buy_amount: U256,
    buy_decimals: u8,
    sell_amount: U256,
    sell_decimals: u8,
) -> Decimal {
    let buy = to_decimal(buy_amount, buy_decimals);
    let sell = to_decimal(sell_amount, sell_decimals);
    match (buy, sell) {
        (Some(buy), Some(sell)) if !sell.is_zero() => buy.checked_div(sell).unwrap_or_default(),
        _ => Decimal::ZERO,
    }
}
