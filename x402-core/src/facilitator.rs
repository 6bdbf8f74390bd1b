//! The facilitator role seen from a resource server.
//!
//! The validation engine only needs three calls: verify a payment against a
//! requirement, settle it, and list what is supported. A remote HTTP
//! facilitator, a local [`SchemeRegistry`](crate::scheme::SchemeRegistry) and
//! test doubles all implement [`Facilitator`].
//!
//! Returning `Ok` with an invalid verification or a failed settlement means
//! the facilitator looked at the payment and rejected it. Returning `Err`
//! means it could not look at all; the engine reports that as a server error.

use std::future::Future;
use std::sync::Arc;

use crate::proto::SupportedResponse;
use crate::types::{PaymentPayload, PaymentRequirement, SettlementResult, VerificationResult};

/// Verifies and settles payments.
pub trait Facilitator {
    /// Failure to reach or use the facilitator.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Checks the payment without moving funds.
    fn verify(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> impl Future<Output = Result<VerificationResult, Self::Error>> + Send;

    /// Executes the transfer on chain.
    fn settle(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> impl Future<Output = Result<SettlementResult, Self::Error>> + Send;

    /// Lists the payment kinds and signers the facilitator handles.
    fn supported(&self) -> impl Future<Output = Result<SupportedResponse, Self::Error>> + Send;
}

impl<T> Facilitator for Arc<T>
where
    T: Facilitator + Send + Sync,
{
    type Error = T::Error;

    fn verify(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> impl Future<Output = Result<VerificationResult, Self::Error>> + Send {
        self.as_ref().verify(payment, requirement)
    }

    fn settle(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> impl Future<Output = Result<SettlementResult, Self::Error>> + Send {
        self.as_ref().settle(payment, requirement)
    }

    fn supported(&self) -> impl Future<Output = Result<SupportedResponse, Self::Error>> + Send {
        self.as_ref().supported()
    }
}
