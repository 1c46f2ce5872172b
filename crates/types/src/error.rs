use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classified failure kinds shared by every engine component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoRouteFound,
    InsufficientLiquidity,
    InvalidToken,
    UnsupportedChain,
    TransferFromFailed,
    BuildTransactionError,
    /// Circuit open or all endpoints exhausted
    RpcUnavailable,
    SignatureExpired,
    InvalidSignatureFormat,
    MissingRequiredField,
    /// e.g. no Permit2 or router address configured for a chain
    ConfigurationMissing,
    /// Network failure or timeout talking to a source
    Transport,
    /// Unrecognized backend failure
    Backend,
}

impl ErrorKind {
    /// Rank used when several sources fail; higher is more specific and no
    /// two kinds share a rank
    pub fn specificity(&self) -> u8 {
        match self {
            ErrorKind::NoRouteFound => 13,
            ErrorKind::InsufficientLiquidity => 12,
            ErrorKind::InvalidToken => 11,
            ErrorKind::UnsupportedChain => 10,
            ErrorKind::TransferFromFailed => 9,
            ErrorKind::SignatureExpired => 8,
            ErrorKind::InvalidSignatureFormat => 7,
            ErrorKind::MissingRequiredField => 6,
            ErrorKind::ConfigurationMissing => 5,
            ErrorKind::BuildTransactionError => 4,
            ErrorKind::RpcUnavailable => 3,
            ErrorKind::Transport => 2,
            ErrorKind::Backend => 1,
        }
    }

    /// Most specific kind among a set of failures
    pub fn most_specific<I>(kinds: I) -> Option<ErrorKind>
    where
        I: IntoIterator<Item = ErrorKind>,
    {
        kinds.into_iter().max_by_key(|k| k.specificity())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NoRouteFound => "no_route_found",
            ErrorKind::InsufficientLiquidity => "insufficient_liquidity",
            ErrorKind::InvalidToken => "invalid_token",
            ErrorKind::UnsupportedChain => "unsupported_chain",
            ErrorKind::TransferFromFailed => "transfer_from_failed",
            ErrorKind::BuildTransactionError => "build_transaction_error",
            ErrorKind::RpcUnavailable => "rpc_unavailable",
            ErrorKind::SignatureExpired => "signature_expired",
            ErrorKind::InvalidSignatureFormat => "invalid_signature_format",
            ErrorKind::MissingRequiredField => "missing_required_field",
            ErrorKind::ConfigurationMissing => "configuration_missing",
            ErrorKind::Transport => "transport",
            ErrorKind::Backend => "backend",
        }
    }

    /// Default user-facing text for this kind
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::NoRouteFound => "No swap route was found for this token pair.",
            ErrorKind::InsufficientLiquidity => {
                "There is not enough liquidity to fill this swap. Try a smaller amount."
            }
            ErrorKind::InvalidToken => "One of the tokens is not recognized on this chain.",
            ErrorKind::UnsupportedChain => "Swaps are not supported on this chain.",
            ErrorKind::TransferFromFailed => {
                "The token transfer would fail. Check your balance and approval."
            }
            ErrorKind::BuildTransactionError => {
                "The transaction could not be prepared. Please try again shortly."
            }
            ErrorKind::RpcUnavailable => {
                "The network is temporarily unreachable. Please try again shortly."
            }
            ErrorKind::SignatureExpired => "The quote expired before signing. Request a new quote.",
            ErrorKind::InvalidSignatureFormat => "The provided signature is not valid.",
            ErrorKind::MissingRequiredField => "The request is missing required information.",
            ErrorKind::ConfigurationMissing => "This chain is not fully configured for swaps.",
            ErrorKind::Transport | ErrorKind::Backend => {
                "A liquidity provider failed to respond. Please try again."
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine-level error carrying a kind, technical detail and user-facing message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {technical}")]
pub struct EngineError {
    pub kind: ErrorKind,
    pub technical: String,
    user_message: Option<String>,
}

impl EngineError {
    pub fn new(kind: ErrorKind, technical: impl Into<String>) -> Self {
        Self {
            kind,
            technical: technical.into(),
            user_message: None,
        }
    }

    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(ErrorKind::MissingRequiredField, format!("missing field: {field}"))
    }

    pub fn configuration_missing(what: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigurationMissing, what)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn user_message(&self) -> &str {
        self.user_message
            .as_deref()
            .unwrap_or_else(|| self.kind.user_message())
    }
}
