//! Transaction flow orchestration and the swap engine facade.
//!
//! [`SwapEngine`] routes an intent, resolves allowance, plans the
//! approve → sign → swap steps and hands out one step payload at a time.
//! Flows live in a [`FlowStore`] keyed by wallet; a wallet has at most one
//! flow, and creating a new one replaces the old.

pub mod engine;
pub mod error;
pub mod flow;

pub use engine::{
    ChainRuntime, EngineConfig, EngineHealth, ExecutionStage, PreparedFlow, StepPayload, SwapEngine,
    SwapEngineBuilder,
};
pub use error::{BuilderError, OrchestratorError};
pub use flow::{FlowStore, FlowSummary};
