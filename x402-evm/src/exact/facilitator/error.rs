//! Errors of the EVM `exact` facilitator.

use alloy_primitives::TxHash;
use x402_core::error::{PaymentVerificationError, SchemeError};

/// Failures of the EVM `exact` facilitator.
#[derive(Debug, thiserror::Error)]
pub enum EvmExactError {
    /// RPC transport failure.
    #[error(transparent)]
    Transport(#[from] alloy_transport::TransportError),
    /// A read-only contract call failed.
    #[error("contract call failed: {0}")]
    ContractCall(String),
    /// The transaction was mined and reverted.
    #[error("transaction {0} reverted")]
    Reverted(TxHash),
    /// No receipt within the polling budget.
    #[error("no receipt for transaction {0}")]
    ReceiptTimeout(TxHash),
    /// Provider setup or facilitator configuration problem.
    #[error("configuration error: {0}")]
    Config(String),
    /// The payment itself is wrong.
    #[error(transparent)]
    Verification(#[from] PaymentVerificationError),
}

impl From<alloy_contract::Error> for EvmExactError {
    fn from(e: alloy_contract::Error) -> Self {
        match e {
            alloy_contract::Error::TransportError(e) => Self::Transport(e),
            other => Self::ContractCall(other.to_string()),
        }
    }
}

impl From<EvmExactError> for SchemeError {
    fn from(value: EvmExactError) -> Self {
        match value {
            EvmExactError::Transport(_)
            | EvmExactError::ContractCall(_)
            | EvmExactError::Config(_) => {
                Self::Transport(value.to_string())
            }
            EvmExactError::Reverted(_) | EvmExactError::Verification(_) => {
                Self::Settlement(value.to_string())
            }
            EvmExactError::ReceiptTimeout(_) => Self::Timeout(value.to_string()),
        }
    }
}
