use std::time::Duration;
use swap_engine_rpc::RpcError;
use swap_engine_types::{ErrorKind, IntentError, SourceKind};
use thiserror::Error;

/// Failure reported by a single liquidity source
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("no route found: {0}")]
    NoRoute(String),

    #[error("insufficient liquidity: {0}")]
    InsufficientLiquidity(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("unsupported chain: {0}")]
    UnsupportedChain(u64),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl SourceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::NoRoute(_) => ErrorKind::NoRouteFound,
            SourceError::InsufficientLiquidity(_) => ErrorKind::InsufficientLiquidity,
            SourceError::InvalidToken(_) => ErrorKind::InvalidToken,
            SourceError::UnsupportedChain(_) => ErrorKind::UnsupportedChain,
            SourceError::Transport(_) | SourceError::Timeout(_) => ErrorKind::Transport,
            SourceError::NotConfigured(_) => ErrorKind::ConfigurationMissing,
            SourceError::Backend(_) => ErrorKind::Backend,
        }
    }

    /// Classify an error response body from an aggregator API.
    ///
    /// Unrecognized messages become `Backend` so nothing is dropped.
    pub fn classify(chain_id: u64, status: u16, body: &str) -> Self {
        let lower = body.to_lowercase();
        let detail = format!("HTTP {status}: {}", truncate(body, 300));

        if lower.contains("insufficient liquidity")
            || lower.contains("insufficient_liquidity")
            || lower.contains("not enough liquidity")
            || lower.contains("liquidity not available")
        {
            SourceError::InsufficientLiquidity(detail)
        } else if lower.contains("no route")
            || lower.contains("no_route")
            || lower.contains("route not found")
            || lower.contains("no swap path")
        {
            SourceError::NoRoute(detail)
        } else if (lower.contains("chain") && (lower.contains("not supported") || lower.contains("unsupported")))
            || lower.contains("chain_not_supported")
        {
            SourceError::UnsupportedChain(chain_id)
        } else if lower.contains("token_not_supported")
            || lower.contains("invalid token")
            || lower.contains("unknown token")
            || (lower.contains("token") && lower.contains("not supported"))
            || lower.contains("invalid address")
        {
            SourceError::InvalidToken(detail)
        } else if status == 429 || status >= 500 {
            SourceError::Transport(detail)
        } else {
            SourceError::Backend(detail)
        }
    }
}

impl From<RpcError> for SourceError {
    fn from(e: RpcError) -> Self {
        match e.kind() {
            ErrorKind::RpcUnavailable | ErrorKind::Transport => SourceError::Transport(e.to_string()),
            _ => SourceError::Backend(e.detail()),
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        SourceError::Transport(e.to_string())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// A source's failure as reported back to the caller
#[derive(Debug, Clone)]
pub struct SourceFailure {
    pub source: SourceKind,
    pub error: SourceError,
}

impl SourceFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no liquidity sources registered")]
    NoSources,

    #[error("all liquidity sources failed: {kind}")]
    AllSourcesFailed {
        kind: ErrorKind,
        failures: Vec<SourceFailure>,
    },

    #[error("source {0} did not return a quote")]
    SourceNotQuoted(SourceKind),

    #[error(transparent)]
    Intent(#[from] IntentError),
}

impl RouterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RouterError::NoSources => ErrorKind::ConfigurationMissing,
            RouterError::AllSourcesFailed { kind, .. } => *kind,
            RouterError::SourceNotQuoted(_) => ErrorKind::NoRouteFound,
            RouterError::Intent(e) => e.kind(),
        }
    }

    /// Reduce per-source failures to the single most specific one
    pub fn aggregate(failures: Vec<SourceFailure>) -> Self {
        match ErrorKind::most_specific(failures.iter().map(SourceFailure::kind)) {
            Some(kind) => RouterError::AllSourcesFailed { kind, failures },
            None => RouterError::NoSources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_aggregator_bodies() {
        let e = SourceError::classify(1, 400, r#"{"description":"insufficient liquidity"}"#);
        assert_eq!(e.kind(), ErrorKind::InsufficientLiquidity);

        let e = SourceError::classify(1, 400, r#"{"name":"TOKEN_NOT_SUPPORTED"}"#);
        assert_eq!(e.kind(), ErrorKind::InvalidToken);

        let e = SourceError::classify(7, 400, "chain not supported");
        assert!(matches!(e, SourceError::UnsupportedChain(7)));

        let e = SourceError::classify(1, 404, "No route found for pair");
        assert_eq!(e.kind(), ErrorKind::NoRouteFound);

        assert_eq!(SourceError::classify(1, 503, "bad gateway").kind(), ErrorKind::Transport);
        assert_eq!(SourceError::classify(1, 400, "something odd").kind(), ErrorKind::Backend);
    }

    #[test]
    fn test_aggregate_picks_most_specific() {
        let failures = vec![
            SourceFailure {
                source: SourceKind::ZeroX,
                error: SourceError::Timeout(Duration::from_secs(5)),
            },
            SourceFailure {
                source: SourceKind::OneInch,
                error: SourceError::NoRoute("none".into()),
            },
            SourceFailure {
                source: SourceKind::UniswapV3,
                error: SourceError::Backend("weird".into()),
            },
        ];
        let err = RouterError::aggregate(failures);
        assert_eq!(err.kind(), ErrorKind::NoRouteFound);
        match err {
            RouterError::AllSourcesFailed { failures, .. } => assert_eq!(failures.len(), 3),
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(RouterError::aggregate(vec![]), RouterError::NoSources));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
