//! The `exact` scheme on Solana.
//!
//! The transaction a client sends holds, in order, a compute unit limit, a
//! compute unit price and one `TransferChecked` from the payer's associated
//! token account to the payee's. Account key 0 is the facilitator's fee
//! payer, whose signature slot stays empty until settlement.

#[cfg(feature = "client")]
pub mod client;
mod error;
#[cfg(feature = "facilitator")]
pub mod facilitator;
pub mod types;

pub use error::SolanaExactError;
pub use types::*;
