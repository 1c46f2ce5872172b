//! Turns a selected quote into the transactions a wallet signs: allowance
//! checks, Permit2 typed data, gas limits and fee fields.

pub mod allowance;
pub mod assembler;
pub mod error;
pub mod gas;
pub mod permit2;

pub use allowance::AllowanceResolver;
pub use assembler::{
    ApprovalAmount, BuildContext, GasSource, TransactionAssembler, TransactionRecord, TransactionRequest,
};
pub use error::{AssemblyError, PermitError};
pub use gas::{GasDefaults, GasLimitKind, GasOverrides, GasPolicy, GasPricing, GasPricingMode};
pub use permit2::{
    append_signature, concat_signature, permit2_nonce, PermitBuilder, PermitMessage, PermitParams,
    PermitTypedData, SignatureStrictness, DEFAULT_DEADLINE_BUFFER, PERMIT2_ADDRESS,
};
