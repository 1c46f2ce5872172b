use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use serde::{Deserialize, Serialize};
use swap_engine_rpc::{CallRequest, ChainReader};
use swap_engine_types::{AllowanceRequirement, Quote, StepKind, TokenRef, TransactionStep};
use tracing::{debug, info, warn};

use crate::allowance::IERC20;
use crate::permit2::{append_signature, SignatureStrictness};
use crate::{AssemblyError, GasLimitKind, GasOverrides, GasPolicy, GasPricing, GasPricingMode};

/// How much an approve step grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAmount {
    /// `type(uint256).max`
    #[default]
    Unlimited,
    /// Exactly what the swap needs
    Exact,
}

/// Where a transaction's gas limit came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GasSource {
    Estimated,
    /// Estimation failed but `eth_call` succeeded; default limit used
    Simulated,
    Override,
}

/// Per-request inputs to assembly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildContext {
    pub chain_id: u64,
    pub from: Address,
    pub pricing_mode: GasPricingMode,
    pub overrides: GasOverrides,
}

/// A fully specified transaction ready for the wallet to sign
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub chain_id: u64,
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_source: GasSource,
    pub pricing: GasPricing,
}

impl TransactionRequest {
    pub fn to_record(&self) -> TransactionRecord {
        let (gas_price, max_fee_per_gas, max_priority_fee_per_gas) = match self.pricing {
            GasPricing::Legacy { gas_price } => (Some(gas_price.to_string()), None, None),
            GasPricing::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => (
                None,
                Some(max_fee_per_gas.to_string()),
                Some(max_priority_fee_per_gas.to_string()),
            ),
        };
        TransactionRecord {
            from: format!("{:#x}", self.from),
            to: format!("{:#x}", self.to),
            data: self.data.to_string(),
            value: self.value.to_string(),
            gas: self.gas_limit.to_string(),
            gas_price,
            max_fee_per_gas,
            max_priority_fee_per_gas,
            chain_id: self.chain_id,
        }
    }
}

/// Transaction shape handed to outer layers; numbers are decimal strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub from: String,
    pub to: String,
    pub data: String,
    pub value: String,
    pub gas: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<String>,
    #[serde(rename = "chainId")]
    pub chain_id: u64,
}

/// Builds approve and swap transactions with gas limits and fees resolved
pub struct TransactionAssembler {
    policy: GasPolicy,
    approval_amount: ApprovalAmount,
    strictness: SignatureStrictness,
}

impl Default for TransactionAssembler {
    fn default() -> Self {
        Self::new(GasPolicy::default(), ApprovalAmount::default(), SignatureStrictness::default())
    }
}

impl TransactionAssembler {
    pub fn new(policy: GasPolicy, approval_amount: ApprovalAmount, strictness: SignatureStrictness) -> Self {
        Self {
            policy,
            approval_amount,
            strictness,
        }
    }

    pub fn policy(&self) -> &GasPolicy {
        &self.policy
    }

    /// Ordered steps for a quote: approve if needed, Permit2 signature if the
    /// quote requires one, then the swap itself
    pub fn plan_steps(requirement: &AllowanceRequirement, quote: &Quote, permit2: Address) -> Vec<TransactionStep> {
        let mut steps = Vec::with_capacity(3);
        if requirement.needs_approval {
            steps.push(TransactionStep::planned(StepKind::Approve, requirement.token));
        }
        if quote.requires_signature {
            steps.push(TransactionStep::planned(StepKind::Signature, permit2));
        }
        steps.push(
            TransactionStep::planned(StepKind::Swap, quote.to).with_payload(
                quote.data.clone(),
                quote.value,
                quote.gas_estimate,
            ),
        );
        steps
    }

    pub fn approve_calldata(&self, spender: Address, required: U256) -> Bytes {
        let amount = match self.approval_amount {
            ApprovalAmount::Unlimited => U256::MAX,
            ApprovalAmount::Exact => required,
        };
        Bytes::from(IERC20::approveCall { spender, amount }.abi_encode())
    }

    pub async fn build_approval(
        &self,
        reader: &dyn ChainReader,
        ctx: &BuildContext,
        requirement: &AllowanceRequirement,
        token: &TokenRef,
    ) -> Result<TransactionRequest, AssemblyError> {
        let data = self.approve_calldata(requirement.spender, requirement.required_allowance);
        let call = CallRequest::new(requirement.token, data).from(ctx.from);
        self.finalize(reader, ctx, call, GasLimitKind::Approve, Some(token)).await
    }

    /// Swap transaction for a quote, with the Permit2 signature appended when
    /// the quote requires one
    pub async fn build_swap(
        &self,
        reader: &dyn ChainReader,
        ctx: &BuildContext,
        quote: &Quote,
        token_in: &TokenRef,
        signature: Option<&str>,
    ) -> Result<TransactionRequest, AssemblyError> {
        let data = match (quote.requires_signature, signature) {
            (true, Some(signature)) => append_signature(&quote.data, signature, self.strictness)?,
            (true, None) => return Err(AssemblyError::MissingField("permit2 signature")),
            (false, _) => quote.data.clone(),
        };

        let call = CallRequest::new(quote.to, data).from(ctx.from).value(quote.value);
        self.finalize(reader, ctx, call, GasLimitKind::Swap, Some(token_in)).await
    }

    async fn finalize(
        &self,
        reader: &dyn ChainReader,
        ctx: &BuildContext,
        call: CallRequest,
        kind: GasLimitKind,
        token: Option<&TokenRef>,
    ) -> Result<TransactionRequest, AssemblyError> {
        let (gas_limit, gas_source) = self.resolve_gas_limit(reader, &call, kind, token, &ctx.overrides).await?;
        let pricing = self
            .policy
            .pricing(reader, ctx.pricing_mode, &ctx.overrides)
            .await
            .map_err(AssemblyError::GasPrice)?;

        info!(
            chain_id = ctx.chain_id,
            to = %call.to,
            gas_limit,
            ?gas_source,
            "Assembled transaction"
        );

        Ok(TransactionRequest {
            chain_id: ctx.chain_id,
            from: ctx.from,
            to: call.to,
            data: call.data,
            value: call.value.unwrap_or(U256::ZERO),
            gas_limit,
            gas_source,
            pricing,
        })
    }

    /// Estimate, falling back to a simulation plus default limit.
    ///
    /// Fails with `BuildTransactionError` only when both the estimate and the
    /// simulation fail.
    pub async fn resolve_gas_limit(
        &self,
        reader: &dyn ChainReader,
        call: &CallRequest,
        kind: GasLimitKind,
        token: Option<&TokenRef>,
        overrides: &GasOverrides,
    ) -> Result<(u64, GasSource), AssemblyError> {
        if let Some(limit) = overrides.gas_limit {
            return Ok((limit, GasSource::Override));
        }

        let (limit, source) = match reader.estimate_gas(call).await {
            Ok(estimate) => (self.policy.buffered(estimate), GasSource::Estimated),
            Err(estimate_err) => {
                warn!(error = %estimate_err, "Gas estimation failed, simulating");
                match reader.call(call).await {
                    Ok(_) => {
                        debug!(?kind, "Simulation succeeded, using default gas limit");
                        (self.policy.fallback(kind), GasSource::Simulated)
                    }
                    Err(sim_err) => {
                        return Err(AssemblyError::build_failed(
                            format!("estimate: {}; simulation: {}", estimate_err.detail(), sim_err.detail()),
                            sim_err.kind(),
                        ))
                    }
                }
            }
        };

        Ok((self.policy.adjust_for_token(limit, token), source))
    }
}
