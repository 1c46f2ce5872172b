use swap_engine_assembler::AssemblyError;
use swap_engine_metrics::MetricsError;
use swap_engine_router::RouterError;
use swap_engine_types::{EngineError, ErrorKind, IntentError};
use thiserror::Error;

/// Failures surfaced by the swap engine facade
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Intent(#[from] IntentError),

    #[error("chain {0} is not configured")]
    UnsupportedChain(u64),

    #[error("missing configuration: {0}")]
    ConfigurationMissing(String),

    #[error("quote is {age_ms} ms old; request a new quote")]
    QuoteExpired { age_ms: u64 },

    #[error("intent deadline {deadline} has passed")]
    IntentExpired { deadline: u64 },
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Router(e) => e.kind(),
            OrchestratorError::Assembly(e) => e.kind(),
            OrchestratorError::Intent(e) => e.kind(),
            OrchestratorError::UnsupportedChain(_) => ErrorKind::UnsupportedChain,
            OrchestratorError::ConfigurationMissing(_) => ErrorKind::ConfigurationMissing,
            OrchestratorError::QuoteExpired { .. } | OrchestratorError::IntentExpired { .. } => {
                ErrorKind::SignatureExpired
            }
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            OrchestratorError::Assembly(e) => e.user_message(),
            other => other.kind().user_message().to_string(),
        }
    }
}

impl From<OrchestratorError> for EngineError {
    fn from(err: OrchestratorError) -> Self {
        let user_message = err.user_message();
        EngineError::new(err.kind(), err.to_string()).with_user_message(user_message)
    }
}

/// Builder error
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}
