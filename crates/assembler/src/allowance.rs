use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use swap_engine_rpc::{CallRequest, ChainReader, RpcError};
use swap_engine_types::{AllowanceRequirement, Quote, TokenRef};
use tracing::debug;

use crate::AssemblyError;

sol! {
    interface IERC20 {
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}

/// Works out who must be approved for a quote and whether the owner already has
pub struct AllowanceResolver {
    permit2: Address,
}

impl AllowanceResolver {
    pub fn new(permit2: Address) -> Self {
        Self { permit2 }
    }

    pub fn permit2(&self) -> Address {
        self.permit2
    }

    /// Signature-based quotes pull tokens through Permit2, so Permit2 is the
    /// spender even though the quote's target executes the swap
    pub fn spender_for(&self, quote: &Quote) -> Address {
        if quote.requires_signature {
            self.permit2
        } else {
            quote.allowance_target.unwrap_or(quote.to)
        }
    }

    pub async fn current_allowance(
        &self,
        reader: &dyn ChainReader,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, RpcError> {
        let call = IERC20::allowanceCall { owner, spender };
        let raw = reader
            .call(&CallRequest::new(token, Bytes::from(call.abi_encode())))
            .await?;
        IERC20::allowanceCall::abi_decode_returns(&raw)
            .map_err(|e| RpcError::Decode(format!("ERC-20 allowance: {e}")))
    }

    pub async fn resolve(
        &self,
        reader: &dyn ChainReader,
        token_in: &TokenRef,
        owner: Address,
        quote: &Quote,
    ) -> Result<AllowanceRequirement, AssemblyError> {
        if token_in.is_native() {
            return Ok(AllowanceRequirement::native(quote.to, quote.sell_amount));
        }

        let spender = self.spender_for(quote);
        let current = self
            .current_allowance(reader, token_in.address, owner, spender)
            .await
            .map_err(AssemblyError::Allowance)?;

        let requirement =
            AllowanceRequirement::new(token_in.address, spender, quote.to, current, quote.sell_amount);
        debug!(
            token = %token_in.symbol,
            spender = %spender,
            current = %current,
            required = %quote.sell_amount,
            needs_approval = requirement.needs_approval,
            "Resolved allowance"
        );
        Ok(requirement)
    }
}
