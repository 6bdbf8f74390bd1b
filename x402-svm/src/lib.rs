#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Solana support for the x402 payment protocol.
//!
//! The `exact` scheme on Solana pays with an SPL Token `TransferChecked`
//! instruction. The client builds the transaction with the facilitator as
//! fee payer, signs its own slot and sends the partially signed transaction
//! base64-encoded in the payload's `signature` field. The facilitator checks
//! the transfer, co-signs slot 0, simulates with signature verification and
//! submits.
//!
//! # Feature Flags
//!
//! - `client`: [`exact::client::SolanaPaymentSigner`]
//! - `facilitator`: [`exact::facilitator::SolanaExactFacilitator`]
//! - `telemetry`: `tracing` spans and events

pub mod exact;
pub mod networks;
#[cfg(any(feature = "client", feature = "facilitator"))]
pub mod rpc;

pub use networks::{SOLANA_NETWORKS, known_assets};
