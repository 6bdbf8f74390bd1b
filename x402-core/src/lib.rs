#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Protocol engine for x402 payments.
//!
//! This crate holds everything in the x402 handshake that does not depend on a
//! specific blockchain or HTTP stack. Chain crates plug signers and facilitator
//! services into the role traits defined here, and the HTTP crate drives the
//! client retry loop and the server validation engine over real requests.
//!
//! # Overview
//!
//! A server answers an unpaid request with `402 Payment Required` and a list of
//! [`PaymentRequirement`](types::PaymentRequirement)s. The client picks one it is
//! willing to pay ([`selector`]), signs a time-bounded authorization for it
//! (a [`PaymentSigner`](scheme::PaymentSigner)), and retries with the payment
//! header attached ([`client`]). The server decodes the header, validates it and
//! settles through a [`Facilitator`](facilitator::Facilitator) according to the
//! configured [`SettlementMode`](server::SettlementMode) ([`server`]).
//!
//! Two wire encodings exist. Version 1 carries the requirements in a JSON body and
//! the payment in `X-PAYMENT`; version 2 uses base64 headers in both directions.
//! Both decode into the same domain model through [`proto::adapter`].
//!
//! # Modules
//!
//! - [`amount`] - Atomic token amounts and decimal price conversion
//! - [`assets`] - Runtime registry of token metadata used for signing domains
//! - [`chain`] - CAIP-2 chain identifiers and patterns
//! - [`client`] - Transport-agnostic core of the client retry handler
//! - [`encoding`] - Base64 helpers
//! - [`error`] - Machine-readable error taxonomy
//! - [`facilitator`] - Facilitator trait used by the validation engine
//! - [`networks`] - Network name to chain id registry
//! - [`proto`] - Wire formats for both protocol versions and the version adapter
//! - [`scheme`] - Role traits and the `(scheme, network)` registry
//! - [`selector`] - Wallet payment selection against local allowances
//! - [`server`] - Server validation engine and settlement modes
//! - [`timestamp`] - Unix timestamps used in validity windows
//! - [`types`] - Version-agnostic domain model
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation

pub mod amount;
pub mod assets;
pub mod chain;
pub mod client;
pub mod encoding;
pub mod error;
pub mod facilitator;
pub mod networks;
pub mod proto;
pub mod scheme;
pub mod selector;
pub mod server;
pub mod timestamp;
pub mod types;

pub use error::ErrorReason;
pub use types::{
    ExactPayload, PaymentAuthorization, PaymentPayload, PaymentRequired, PaymentRequirement,
    ResourceInfo, Scheme, SettlementResult, VerificationResult,
};
