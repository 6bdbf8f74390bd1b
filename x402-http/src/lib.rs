#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP transport for the x402 payment protocol.
//!
//! The protocol decisions live in `x402-core`; this crate moves them over
//! real HTTP:
//!
//! - [`client`] - reqwest middleware that answers `402 Payment Required` by
//!   paying and retrying (feature: `client`)
//! - [`server`] - tower layer that guards axum routes with a
//!   [`PaymentEngine`](x402_core::server::PaymentEngine), plus an HTTP client
//!   for a remote facilitator (feature: `server`)
//! - [`headers`] - reading and writing the x402 headers on `http` types
//! - [`constants`] - header names and defaults
//! - [`error`] - transport error types
//!
//! # Feature Flags
//!
//! - `client` - reqwest retry middleware
//! - `server` - tower/axum paywall and facilitator client
//! - `telemetry` - tracing instrumentation

pub mod constants;
pub mod error;
#[cfg(any(feature = "client", feature = "server"))]
pub mod headers;

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "server")]
pub mod server;
