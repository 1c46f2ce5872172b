//! RPC resilience layer
//!
//! Every on-chain read goes through a [`ChainReader`]. The production
//! implementation, [`RpcClient`], walks a chain's endpoint list in order and
//! guards each URL with state from a shared [`EndpointRegistry`]:
//!
//! - a sliding-window rate limiter (callers wait for a free slot)
//! - a circuit breaker (open endpoints are skipped without a network call)
//!
//! When every endpoint fails the call ends in [`RpcError::Unavailable`].

pub mod client;
pub mod endpoint;
pub mod error;
pub mod mock;
pub mod traits;

pub use client::RpcClient;
pub use endpoint::{EndpointHealth, EndpointPolicy, EndpointRegistry, EndpointState};
pub use error::RpcError;
pub use mock::MockChainReader;
pub use traits::{CallRequest, ChainReader};
