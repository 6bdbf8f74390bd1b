use x402_core::error::{PaymentVerificationError, SchemeError};

/// Errors of the Solana `exact` scheme.
#[derive(Debug, thiserror::Error)]
pub enum SolanaExactError {
    /// The RPC node failed or refused a call.
    #[error("rpc error: {0}")]
    Rpc(String),
    /// Building, serializing or signing a transaction failed.
    #[error("transaction error: {0}")]
    Transaction(String),
    /// The fee payer key or cluster setup is unusable.
    #[error("configuration error: {0}")]
    Config(String),
    /// The payment itself is wrong.
    #[error(transparent)]
    Verification(#[from] PaymentVerificationError),
}

impl From<SolanaExactError> for SchemeError {
    fn from(e: SolanaExactError) -> Self {
        match e {
            SolanaExactError::Rpc(message) => Self::Transport(message),
            SolanaExactError::Transaction(message) => Self::Signing(message),
            SolanaExactError::Config(message) => Self::InvalidRequirement(message),
            SolanaExactError::Verification(e) => Self::Settlement(e.to_string()),
        }
    }
}
