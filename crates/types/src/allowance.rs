use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Result of comparing an owner's on-chain allowance against what a swap needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowanceRequirement {
    pub token: Address,

    /// Address the approval must be granted to
    pub spender: Address,

    /// Contract that finally executes the swap; differs from `spender`
    /// when a universal allowance contract sits in between
    pub execution_target: Address,

    pub current_allowance: U256,
    pub required_allowance: U256,
    pub needs_approval: bool,
}

impl AllowanceRequirement {
    pub fn new(
        token: Address,
        spender: Address,
        execution_target: Address,
        current_allowance: U256,
        required_allowance: U256,
    ) -> Self {
        Self {
            token,
            spender,
            execution_target,
            current_allowance,
            required_allowance,
            needs_approval: current_allowance < required_allowance,
        }
    }

    /// Requirement for the chain's native asset, which never needs approval
    pub fn native(execution_target: Address, required_allowance: U256) -> Self {
        Self {
            token: crate::NATIVE_TOKEN_ADDRESS,
            spender: execution_target,
            execution_target,
            current_allowance: U256::MAX,
            required_allowance,
            needs_approval: false,
        }
    }

    pub fn signal(&self) -> ApprovalSignal {
        ApprovalSignal {
            needs_approval: self.needs_approval,
            token_to_approve: self.needs_approval.then(|| format!("{:#x}", self.token)),
            spender: format!("{:#x}", self.spender),
        }
    }
}

/// Approval signaling record handed to outer layers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSignal {
    pub needs_approval: bool,
    pub token_to_approve: Option<String>,
    pub spender: String,
}
