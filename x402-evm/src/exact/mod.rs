//! The `exact` scheme on EVM chains, built on ERC-3009.

pub mod types;

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "facilitator")]
pub mod facilitator;

pub use types::*;
