use alloy::primitives::{address, Address};
use serde::{Deserialize, Serialize};

/// Sentinel address aggregators use for the chain's native asset
pub const NATIVE_TOKEN_ADDRESS: Address = address!("0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE");

/// A resolved token on a specific chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenRef {
    /// Contract address, or [`NATIVE_TOKEN_ADDRESS`] for the native asset
    pub address: Address,

    pub symbol: String,

    /// Decimal places of the smallest unit
    pub decimals: u8,

    pub chain_id: u64,

    /// Token appears on a verified list supplied by the token resolver
    #[serde(default)]
    pub verified: bool,

    /// Fee-on-transfer, rebasing or otherwise nonstandard transfer mechanics
    #[serde(default)]
    pub nonstandard_transfer: bool,
}

impl TokenRef {
    pub fn new(address: Address, symbol: impl Into<String>, decimals: u8, chain_id: u64) -> Self {
        Self {
            address,
            symbol: symbol.into(),
            decimals,
            chain_id,
            verified: false,
            nonstandard_transfer: false,
        }
    }

    /// Native asset of a chain (ETH, MATIC, ...)
    pub fn native(symbol: impl Into<String>, chain_id: u64) -> Self {
        Self {
            verified: true,
            ..Self::new(NATIVE_TOKEN_ADDRESS, symbol, 18, chain_id)
        }
    }

    pub fn verified(mut self) -> Self {
        self.verified = true;
        self
    }

    pub fn with_nonstandard_transfer(mut self) -> Self {
        self.nonstandard_transfer = true;
        self
    }

    pub fn is_native(&self) -> bool {
        self.address == NATIVE_TOKEN_ADDRESS
    }

    /// Address as the lowercase `0x` string used in aggregator query strings
    pub fn address_hex(&self) -> String {
        format!("{:#x}", self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_token() {
        let eth = TokenRef::native("ETH", 1);
        assert!(eth.is_native());
        assert_eq!(eth.decimals, 18);
        assert_eq!(
            eth.address_hex(),
            "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee"
        );
    }

    #[test]
    fn test_erc20_token_flags() {
        let usdc = TokenRef::new(
            address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
            "USDC",
            6,
            1,
        )
        .verified();
        assert!(!usdc.is_native());
        assert!(usdc.verified);
        assert!(!usdc.nonstandard_transfer);

        let fot = usdc.clone().with_nonstandard_transfer();
        assert!(fot.nonstandard_transfer);
    }
}
