use swap_engine_rpc::RpcError;
use swap_engine_types::{EngineError, ErrorKind};
use thiserror::Error;

/// Rejections from Permit2 typed-data validation and signature encoding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermitError {
    #[error("signature deadline {deadline} is within {buffer_secs}s of now ({now}); refresh the permit")]
    Expired { deadline: u64, now: u64, buffer_secs: u64 },

    #[error("typed data chain id {actual} does not match execution chain {expected}")]
    ChainMismatch { expected: u64, actual: u64 },

    #[error("verifying contract {0} is not Permit2")]
    WrongVerifyingContract(String),

    #[error("invalid signature format: {0}")]
    InvalidFormat(String),

    #[error("typed data missing field: {0}")]
    MissingField(&'static str),
}

impl PermitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PermitError::Expired { .. } => ErrorKind::SignatureExpired,
            PermitError::MissingField(_) => ErrorKind::MissingRequiredField,
            PermitError::ChainMismatch { .. }
            | PermitError::WrongVerifyingContract(_)
            | PermitError::InvalidFormat(_) => ErrorKind::InvalidSignatureFormat,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum AssemblyError {
    /// Neither gas estimation nor simulation succeeded
    #[error("failed to build transaction: {technical}")]
    BuildTransaction {
        technical: String,
        user_message: String,
        cause: ErrorKind,
    },

    #[error(transparent)]
    Permit(#[from] PermitError),

    #[error("allowance read failed: {0}")]
    Allowance(RpcError),

    #[error("gas price unavailable: {0}")]
    GasPrice(RpcError),

    #[error("missing configuration: {0}")]
    ConfigurationMissing(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

impl AssemblyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AssemblyError::BuildTransaction { .. } => ErrorKind::BuildTransactionError,
            AssemblyError::Permit(e) => e.kind(),
            AssemblyError::Allowance(e) | AssemblyError::GasPrice(e) => e.kind(),
            AssemblyError::ConfigurationMissing(_) => ErrorKind::ConfigurationMissing,
            AssemblyError::MissingField(_) => ErrorKind::MissingRequiredField,
        }
    }

    /// Build failure with a message the wallet user can act on
    pub fn build_failed(technical: impl Into<String>, cause: ErrorKind) -> Self {
        let user_message = match cause {
            ErrorKind::TransferFromFailed => {
                "The token transfer would fail. Check your balance and approval, then try again."
            }
            ErrorKind::RpcUnavailable | ErrorKind::Transport => {
                "The network is not responding right now. Please try again shortly."
            }
            _ => "This swap cannot be executed right now. Try refreshing the quote.",
        };
        AssemblyError::BuildTransaction {
            technical: technical.into(),
            user_message: user_message.to_string(),
            cause,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            AssemblyError::BuildTransaction { user_message, .. } => user_message.clone(),
            other => other.kind().user_message().to_string(),
        }
    }
}

impl From<AssemblyError> for EngineError {
    fn from(e: AssemblyError) -> Self {
        EngineError::new(e.kind(), e.to_string()).with_user_message(e.user_message())
    }
}
