//! Error taxonomy for verification and settlement.
//!
//! Every rejection that crosses a process boundary carries an [`ErrorReason`]
//! code. Library errors are `thiserror` enums that map onto those codes:
//! [`PaymentVerificationError`] for problems with what the client sent, and
//! [`SchemeError`] for signing and infrastructure failures.

use serde::{Deserialize, Serialize};

/// Machine-readable failure codes shared by clients, servers and facilitators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorReason {
    /// The payer does not hold enough of the asset.
    InsufficientFunds,
    /// `validAfter` lies in the future.
    InvalidExactEvmPayloadAuthorizationValidAfter,
    /// `validBefore` lies in the past.
    InvalidExactEvmPayloadAuthorizationValidBefore,
    /// The authorized value does not cover the required amount.
    InvalidExactEvmPayloadAuthorizationValue,
    /// The signature does not recover to the payer.
    InvalidExactEvmPayloadSignature,
    /// The authorization pays someone other than `payTo`.
    InvalidExactEvmPayloadRecipientMismatch,
    /// The payment names a network the requirement does not.
    InvalidNetwork,
    /// The payment header or payload could not be read.
    InvalidPayload,
    /// No accepted requirement matches the payment.
    InvalidPaymentRequirements,
    /// The payment names a scheme the requirement does not.
    InvalidScheme,
    /// No scheme handler covers the scheme and network.
    UnsupportedScheme,
    /// The `x402Version` is not supported.
    #[serde(rename = "invalid_x402_version")]
    InvalidX402Version,
    /// The transaction is not in a state that can be settled.
    InvalidTransactionState,
    /// Solana simulation with signature verification failed.
    SimulationFailed,
    /// The facilitator could not be reached or failed while verifying.
    UnexpectedVerifyError,
    /// The facilitator could not be reached or failed while settling.
    UnexpectedSettleError,
    /// A code this build does not know.
    #[serde(other)]
    Unknown,
}

impl ErrorReason {
    /// The wire spelling of the code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientFunds => "insufficient_funds",
            Self::InvalidExactEvmPayloadAuthorizationValidAfter => {
                "invalid_exact_evm_payload_authorization_valid_after"
            }
            Self::InvalidExactEvmPayloadAuthorizationValidBefore => {
                "invalid_exact_evm_payload_authorization_valid_before"
            }
            Self::InvalidExactEvmPayloadAuthorizationValue => {
                "invalid_exact_evm_payload_authorization_value"
            }
            Self::InvalidExactEvmPayloadSignature => "invalid_exact_evm_payload_signature",
            Self::InvalidExactEvmPayloadRecipientMismatch => {
                "invalid_exact_evm_payload_recipient_mismatch"
            }
            Self::InvalidNetwork => "invalid_network",
            Self::InvalidPayload => "invalid_payload",
            Self::InvalidPaymentRequirements => "invalid_payment_requirements",
            Self::InvalidScheme => "invalid_scheme",
            Self::UnsupportedScheme => "unsupported_scheme",
            Self::InvalidX402Version => "invalid_x402_version",
            Self::InvalidTransactionState => "invalid_transaction_state",
            Self::SimulationFailed => "simulation_failed",
            Self::UnexpectedVerifyError => "unexpected_verify_error",
            Self::UnexpectedSettleError => "unexpected_settle_error",
            Self::Unknown => "unknown",
        }
    }
}

impl core::fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What is wrong with a payment the client sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PaymentVerificationError {
    /// The payload cannot be decoded or is malformed.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// The payment does not fit the requirement it claims to pay.
    #[error("payment does not match the accepted requirements: {0}")]
    InvalidRequirements(String),
    /// The payment names another scheme.
    #[error("scheme does not match the requirements")]
    InvalidScheme,
    /// No handler covers the scheme and network.
    #[error("unsupported scheme or network")]
    UnsupportedScheme,
    /// The payment names another network.
    #[error("network does not match the requirements")]
    InvalidNetwork,
    /// The protocol version is not supported.
    #[error("unsupported x402 version")]
    InvalidVersion,
    /// Now is before `validAfter`.
    #[error("payment authorization is not yet valid")]
    Early,
    /// Now is after `validBefore`.
    #[error("payment authorization is expired")]
    Expired,
    /// The signature is malformed or recovers to someone else.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    /// The transfer pays someone other than `payTo`.
    #[error("payment recipient does not match payTo")]
    RecipientMismatch,
    /// The transfer is for less than the required amount.
    #[error("authorized value does not cover the required amount")]
    InvalidValue,
    /// The payer's balance is too low.
    #[error("on-chain balance does not cover the payment amount")]
    InsufficientFunds,
    /// The transaction cannot be settled as is, e.g. a replayed nonce.
    #[error("invalid transaction state: {0}")]
    TransactionState(String),
    /// Solana simulation rejected the transaction.
    #[error("simulation failed: {0}")]
    SimulationFailed(String),
}

impl PaymentVerificationError {
    /// Reason code reported on the wire.
    #[must_use]
    pub const fn reason(&self) -> ErrorReason {
        match self {
            Self::InvalidPayload(_) => ErrorReason::InvalidPayload,
            Self::InvalidRequirements(_) => ErrorReason::InvalidPaymentRequirements,
            Self::InvalidScheme => ErrorReason::InvalidScheme,
            Self::UnsupportedScheme => ErrorReason::UnsupportedScheme,
            Self::InvalidNetwork => ErrorReason::InvalidNetwork,
            Self::InvalidVersion => ErrorReason::InvalidX402Version,
            Self::Early => ErrorReason::InvalidExactEvmPayloadAuthorizationValidAfter,
            Self::Expired => ErrorReason::InvalidExactEvmPayloadAuthorizationValidBefore,
            Self::InvalidSignature(_) => ErrorReason::InvalidExactEvmPayloadSignature,
            Self::RecipientMismatch => ErrorReason::InvalidExactEvmPayloadRecipientMismatch,
            Self::InvalidValue => ErrorReason::InvalidExactEvmPayloadAuthorizationValue,
            Self::InsufficientFunds => ErrorReason::InsufficientFunds,
            Self::TransactionState(_) => ErrorReason::InvalidTransactionState,
            Self::SimulationFailed(_) => ErrorReason::SimulationFailed,
        }
    }
}

impl From<serde_json::Error> for PaymentVerificationError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidPayload(value.to_string())
    }
}

/// Failures that are not the client's fault: signing, configuration and I/O.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SchemeError {
    /// The signer could not produce a signature.
    #[error("signing failed: {0}")]
    Signing(String),
    /// A requirement amount is not an unsigned integer.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    /// The asset is not in the registry and the requirement carries no domain data.
    #[error("unknown asset {asset} on {network}")]
    UnknownAsset {
        /// Network of the requirement.
        network: String,
        /// Asset the requirement names.
        asset: String,
    },
    /// No signer or handler for the network.
    #[error("unsupported network {0}")]
    UnsupportedNetwork(String),
    /// The requirement cannot be paid by this signer.
    #[error("invalid requirement: {0}")]
    InvalidRequirement(String),
    /// RPC or HTTP failure talking to a chain or facilitator.
    #[error("transport error: {0}")]
    Transport(String),
    /// The settlement was submitted but could not be confirmed.
    #[error("settlement error: {0}")]
    Settlement(String),
    /// A deadline passed, e.g. waiting for a receipt.
    #[error("timed out: {0}")]
    Timeout(String),
}

/// Shorthand for boxed, thread-safe errors returned by caller callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
