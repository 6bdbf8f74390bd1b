use crate::error::ErrorReason;
use crate::proto::{PaymentRequiredWire, ProtocolVersion};
use crate::types::{PaymentPayload, PaymentRequirement, SettlementResult, VerificationResult};

/// A response header the transport must attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Header name, fixed by the protocol version.
    pub name: &'static str,
    /// Base64-encoded JSON value.
    pub value: String,
}

/// What happened to the money for this request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Settlement {
    /// Nothing was settled.
    #[default]
    None,
    /// Settled (or synthesized for [`SettlementMode::DoNotSettle`](super::SettlementMode::DoNotSettle)).
    Completed(SettlementResult),
    /// Verified; settlement runs when the response starts.
    Pending(PendingSettlement),
}

/// A verified payment waiting for optimistic settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSettlement {
    /// Version the payment arrived in.
    pub version: ProtocolVersion,
    /// The verified payment.
    pub payment: PaymentPayload,
    /// The requirement it was verified against.
    pub requirement: PaymentRequirement,
    /// Requirements to advertise if settlement fails before the head is flushed.
    pub accepts: Vec<PaymentRequirement>,
    /// Resource the payment is for.
    pub resource: crate::types::ResourceInfo,
}

/// Result of [`PaymentEngine::handle`](super::PaymentEngine::handle).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleOutcome {
    /// Whether the protected handler may run.
    pub can_continue: bool,
    /// 200 when continuing, 402 for payment problems, 500 for facilitator failures.
    pub status_code: u16,
    /// Message for the client when not continuing.
    pub error: Option<String>,
    /// Taxonomy reason behind `error`, when one applies.
    pub reason: Option<ErrorReason>,
    /// The version the response must be written in.
    pub version: ProtocolVersion,
    /// Facilitator verdict, when verification ran.
    pub verification: Option<VerificationResult>,
    /// Settlement state for this request.
    pub settlement: Settlement,
    /// Requirement the payment matched.
    pub selected_requirement: Option<PaymentRequirement>,
    /// The 402 demand to send, when not continuing.
    pub payment_required: Option<PaymentRequiredWire>,
    /// Headers to attach to the response.
    pub headers: Vec<ResponseHeader>,
}

impl HandleOutcome {
    pub(crate) const fn new(version: ProtocolVersion, status_code: u16) -> Self {
        Self {
            can_continue: false,
            status_code,
            error: None,
            reason: None,
            version,
            verification: None,
            settlement: Settlement::None,
            selected_requirement: None,
            payment_required: None,
            headers: Vec::new(),
        }
    }

    /// Header names to list in `Access-Control-Expose-Headers`.
    #[must_use]
    pub fn expose_headers(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.headers.iter().map(|h| h.name).collect();
        if let Some(PaymentRequiredWire::Header { name, .. }) = &self.payment_required {
            names.push(name);
        }
        names
    }

    /// The optimistic settlement to run when the response starts, if any.
    #[must_use]
    pub fn take_pending(&mut self) -> Option<PendingSettlement> {
        match std::mem::take(&mut self.settlement) {
            Settlement::Pending(pending) => Some(pending),
            other => {
                self.settlement = other;
                None
            }
        }
    }
}

/// Result of [`PaymentEngine::settle_pending`](super::PaymentEngine::settle_pending).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimisticSettlement {
    /// Attach the settlement header and send the response.
    Settled {
        /// The facilitator's answer.
        settlement: SettlementResult,
        /// Settlement summary header.
        header: ResponseHeader,
    },
    /// Headers were not flushed; replace the response with this 402.
    Rejected(Box<HandleOutcome>),
    /// Headers were already flushed. The response stands; the failure is only logged.
    Unrecoverable {
        /// What went wrong.
        error: String,
    },
}
