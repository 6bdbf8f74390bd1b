#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! EIP-155 (EVM) support for the x402 `exact` scheme.
//!
//! Payments are ERC-3009 authorizations: the wallet signs an EIP-712
//! `TransferWithAuthorization` message off-chain, and the facilitator submits
//! it to the token contract, paying gas from its own funded account.
//!
//! # Modules
//!
//! - [`networks`] - Known EVM networks and USDC deployments
//! - [`exact`] - Signer, verification and settlement for the `exact` scheme
//! - [`chain`] - RPC seam used by the facilitator, with an alloy-backed implementation
//!
//! # Feature Flags
//!
//! - `client` - [`EvmPaymentSigner`](exact::client::EvmPaymentSigner)
//! - `facilitator` - [`EvmExactFacilitator`](exact::facilitator::EvmExactFacilitator) and the alloy provider
//! - `telemetry` - Tracing instrumentation

#[cfg(feature = "facilitator")]
pub mod chain;
pub mod exact;
pub mod networks;

pub use networks::{EVM_NETWORKS, known_assets};
