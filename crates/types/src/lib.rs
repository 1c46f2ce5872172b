pub mod allowance;
pub mod amount;
pub mod error;
pub mod flow;
pub mod intent;
pub mod quote;
pub mod token;

pub use allowance::*;
pub use amount::*;
pub use error::*;
pub use flow::*;
pub use intent::*;
pub use quote::*;
pub use token::*;

pub const ENGINE_VERSION: &str = "1.0";

/// Current unix time in milliseconds
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Current unix time in seconds
pub fn now_secs() -> u64 {
    now_millis() / 1000
}
