//! Liquidity sources and the quote router.
//!
//! Every source implements [`LiquiditySource`]; [`QuoteRouter`] queries them
//! concurrently and ranks the quotes by output.

pub mod error;
pub mod mock;
pub mod oneinch;
pub mod router;
pub mod traits;
pub mod uniswap_v3;
pub mod zerox;

mod numeric;

pub use error::{RouterError, SourceError, SourceFailure};
pub use mock::MockSource;
pub use oneinch::OneInchClient;
pub use router::{QuoteRouter, RouteResult, RouterConfig};
pub use traits::{LiquiditySource, QuoteCacheKey, QuoteRequest};
pub use uniswap_v3::{PoolCache, PoolState, UniswapV3Client, UniswapV3Deployment, FEE_TIERS};
pub use zerox::ZeroXClient;
