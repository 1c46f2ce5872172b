use swap_engine_types::ErrorKind;
use thiserror::Error;

/// JSON-RPC error code for an execution revert
pub const EXECUTION_REVERTED_CODE: i64 = 3;

#[derive(Debug, Clone, Error)]
pub enum RpcError {
    #[error("transport error from {url}: {message}")]
    Transport { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    /// The node answered with a JSON-RPC error object; the endpoint itself is healthy
    #[error("JSON-RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<String>,
    },

    #[error("endpoint {url} rejected: circuit open")]
    CircuitOpen { url: String },

    #[error("all RPC endpoints unavailable for chain {chain_id}: {detail}")]
    Unavailable { chain_id: u64, detail: String },

    #[error("no RPC endpoints configured for chain {0}")]
    NoEndpoints(u64),

    #[error("failed to decode RPC response: {0}")]
    Decode(String),
}

impl RpcError {
    /// Failures that count against an endpoint's circuit breaker and move on
    /// to the next endpoint
    pub fn is_endpoint_failure(&self) -> bool {
        matches!(
            self,
            RpcError::Transport { .. } | RpcError::Http { .. } | RpcError::Decode(_)
        )
    }

    pub fn is_revert(&self) -> bool {
        match self {
            RpcError::Rpc { code, message, .. } => {
                *code == EXECUTION_REVERTED_CODE || message.to_lowercase().contains("revert")
            }
            _ => false,
        }
    }

    /// Revert reason text including any `data` payload
    pub fn detail(&self) -> String {
        match self {
            RpcError::Rpc {
                message,
                data: Some(data),
                ..
            } => format!("{message} ({data})"),
            other => other.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::Unavailable { .. } | RpcError::CircuitOpen { .. } | RpcError::NoEndpoints(_) => {
                ErrorKind::RpcUnavailable
            }
            RpcError::Transport { .. } | RpcError::Http { .. } => ErrorKind::Transport,
            RpcError::Rpc { message, .. } if message.to_lowercase().contains("transfer_from_failed") => {
                ErrorKind::TransferFromFailed
            }
            RpcError::Rpc { .. } | RpcError::Decode(_) => ErrorKind::Backend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let revert = RpcError::Rpc {
            code: 3,
            message: "execution reverted: TRANSFER_FROM_FAILED".into(),
            data: Some("0x08c379a0".into()),
        };
        assert!(revert.is_revert());
        assert!(!revert.is_endpoint_failure());
        assert_eq!(revert.kind(), ErrorKind::TransferFromFailed);
        assert!(revert.detail().contains("0x08c379a0"));

        let http = RpcError::Http {
            url: "http://node".into(),
            status: 502,
        };
        assert!(http.is_endpoint_failure());
        assert_eq!(http.kind(), ErrorKind::Transport);

        let unavailable = RpcError::Unavailable {
            chain_id: 1,
            detail: "exhausted".into(),
        };
        assert_eq!(unavailable.kind(), ErrorKind::RpcUnavailable);
    }
}
