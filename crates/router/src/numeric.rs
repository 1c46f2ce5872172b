use alloy::primitives::U256;
use serde::Deserialize;
use swap_engine_types::amount::{parse_u256, parse_u64};

use crate::SourceError;

/// Numeric response field some APIs send as a string and others as a JSON number
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub(crate) enum NumericField {
    Text(String),
    Number(u64),
}

impl NumericField {
    pub(crate) fn to_u256(&self, field: &str) -> Result<U256, SourceError> {
        match self {
            NumericField::Text(s) => {
                parse_u256(s).map_err(|e| SourceError::Backend(format!("invalid {field}: {e}")))
            }
            NumericField::Number(n) => Ok(U256::from(*n)),
        }
    }

    /// Gas-sized value; `None` when absent, zero or unparseable
    pub(crate) fn to_gas(&self) -> Option<u64> {
        let gas = match self {
            NumericField::Text(s) => parse_u64(s).ok(),
            NumericField::Number(n) => Some(*n),
        };
        gas.filter(|g| *g > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_string_hex_and_number() {
        let fields: Vec<NumericField> = serde_json::from_str(r#"["1000", "0x3e8", 1000]"#).unwrap();
        for f in &fields {
            assert_eq!(f.to_u256("amount").unwrap(), U256::from(1000u64));
            assert_eq!(f.to_gas(), Some(1000));
        }
        assert_eq!(NumericField::Number(0).to_gas(), None);
        assert!(NumericField::Text("abc".into()).to_u256("amount").is_err());
    }
}
