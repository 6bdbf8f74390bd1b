//! The Solana RPC calls the `exact` scheme makes.
//!
//! The client reads the mint and a recent blockhash; the facilitator
//! simulates and submits. [`SolanaRpc`] names exactly those calls so both
//! sides run against the nonblocking [`RpcClient`] and against in-memory
//! fakes alike.

use solana_account::Account;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSimulateTransactionConfig;
use solana_message::Hash;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_transaction::versioned::VersionedTransaction;

use crate::exact::SolanaExactError;

/// Node access for the `exact` scheme.
#[async_trait::async_trait]
pub trait SolanaRpc: Send + Sync {
    /// Fetches an account, failing when it does not exist.
    async fn get_account(&self, pubkey: &Pubkey) -> Result<Account, SolanaExactError>;

    /// A recent blockhash for a new transaction.
    async fn latest_blockhash(&self) -> Result<Hash, SolanaExactError>;

    /// Simulates with signature verification on. `Ok(Some(error))` is a
    /// simulation that ran and failed.
    async fn simulate(&self, transaction: &VersionedTransaction) -> Result<Option<String>, SolanaExactError>;

    /// Submits the transaction. Returning `Ok` is the node accepting it.
    async fn send(&self, transaction: &VersionedTransaction) -> Result<Signature, SolanaExactError>;
}

#[async_trait::async_trait]
impl SolanaRpc for RpcClient {
    async fn get_account(&self, pubkey: &Pubkey) -> Result<Account, SolanaExactError> {
        Self::get_account(self, pubkey)
            .await
            .map_err(|e| SolanaExactError::Rpc(e.to_string()))
    }

    async fn latest_blockhash(&self) -> Result<Hash, SolanaExactError> {
        self.get_latest_blockhash()
            .await
            .map_err(|e| SolanaExactError::Rpc(e.to_string()))
    }

    async fn simulate(&self, transaction: &VersionedTransaction) -> Result<Option<String>, SolanaExactError> {
        let config = RpcSimulateTransactionConfig {
            sig_verify: true,
            replace_recent_blockhash: false,
            commitment: Some(self.commitment()),
            ..RpcSimulateTransactionConfig::default()
        };
        let response = self
            .simulate_transaction_with_config(transaction, config)
            .await
            .map_err(|e| SolanaExactError::Rpc(e.to_string()))?;
        Ok(response.value.err.map(|e| format!("{e:?}")))
    }

    async fn send(&self, transaction: &VersionedTransaction) -> Result<Signature, SolanaExactError> {
        self.send_transaction(transaction)
            .await
            .map_err(|e| SolanaExactError::Rpc(e.to_string()))
    }
}
