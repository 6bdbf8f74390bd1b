//! Server side of the 402 handshake.
//!
//! [`PaymentEngine`] decides, for one inbound request, whether the protected
//! handler may run. It decodes the payment header, matches it against the
//! accepted requirements, checks the validity window, asks the
//! [`Facilitator`](crate::facilitator::Facilitator) to verify, and settles
//! according to the [`SettlementMode`]. It never touches HTTP types: the
//! result is a [`HandleOutcome`] the transport turns into a response.
//!
//! ## Optimistic settlement
//!
//! In [`SettlementMode::Optimistic`] the engine lets the handler run and hands
//! back a [`PendingSettlement`]. The transport must call
//! [`PaymentEngine::settle_pending`] when the response head is ready and
//! before any body byte is sent. If settlement fails after the head was
//! already flushed, the response stands as a success and the failure is only
//! logged ([`OptimisticSettlement::Unrecoverable`]). Use
//! [`SettlementMode::Pessimistic`] when that is not acceptable.

mod engine;
mod hooks;
mod outcome;

pub use engine::{IncomingPayment, PaymentEngine};
pub use hooks::{BeforeSettleHook, CustomizeRequirementsHook, OnSettledHook, ServerHooks};
pub use outcome::{HandleOutcome, OptimisticSettlement, PendingSettlement, ResponseHeader, Settlement};

use serde::{Deserialize, Serialize};

/// When the engine settles a verified payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementMode {
    /// Settle before the handler runs; failures become 402.
    #[default]
    Pessimistic,
    /// Run the handler, settle as the response starts.
    Optimistic,
    /// Verify only. A success record without a transaction is reported.
    DoNotSettle,
}
