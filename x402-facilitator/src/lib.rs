//! x402 facilitator server.
//!
//! Verifies and settles x402 payments for resource servers over HTTP. Each
//! configured chain is served by the `exact` scheme of its chain family;
//! requests in either protocol version are routed through one
//! [`SchemeRegistry`](x402_core::scheme::SchemeRegistry).
//!
//! # Modules
//!
//! - [`config`] - JSON configuration with environment expansion and CLI overrides
//! - [`discovery`] - In-memory catalog behind `/discovery/resources`
//! - [`error`] - HTTP error responses
//! - [`handlers`] - Axum route handlers and router builder
//! - [`schemes`] - Scheme handlers built from configuration
//! - [`sig_down`] - Graceful shutdown on SIGTERM and SIGINT
//! - [`telemetry`] - Logging and OpenTelemetry export (feature `telemetry`)
//!
//! # Feature Flags
//!
//! - `chain-eip155` - EVM chains
//! - `chain-solana` - Solana clusters
//! - `telemetry` - OTLP export of spans and metrics

pub mod config;
pub mod discovery;
pub mod error;
pub mod handlers;
pub mod schemes;
pub mod sig_down;
#[cfg(feature = "telemetry")]
pub mod telemetry;

pub use handlers::{AppState, FacilitatorState, facilitator_router};
