//! The RPC surface the EVM facilitator needs, and its alloy implementation.
//!
//! Verification and settlement only read a balance, send one transaction and
//! look up its receipt. [`EvmChain`] names exactly that, so the facilitator
//! logic runs the same against [`AlloyChain`] and against in-memory fakes.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};

use alloy_network::{EthereumWallet, NetworkWallet, ReceiptResponse as _, TransactionBuilder};
use alloy_primitives::{Address, Bytes, TxHash, U256};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::TransactionRequest;
use alloy_transport::layers::{FallbackLayer, ThrottleLayer};
use alloy_transport_http::Http;
use tower::ServiceBuilder;
use url::Url;

use crate::exact::facilitator::{EvmExactError, IEIP3009};

/// A contract call to submit from one of the facilitator's accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaTransaction {
    /// Account to send from; `None` picks the next signer.
    pub from: Option<Address>,
    /// Contract to call.
    pub to: Address,
    /// ABI-encoded call.
    pub calldata: Bytes,
}

/// The chain access the `exact` facilitator needs.
#[async_trait::async_trait]
pub trait EvmChain: Send + Sync {
    /// Numeric EIP-155 chain id.
    fn chain_id(&self) -> u64;

    /// Accounts the facilitator can send from.
    fn signer_addresses(&self) -> Vec<Address>;

    /// ERC-20 `balanceOf(owner)` on `asset`.
    async fn balance_of(&self, asset: Address, owner: Address) -> Result<U256, EvmExactError>;

    /// Submits the transaction and returns its hash without waiting for it.
    async fn send(&self, tx: MetaTransaction) -> Result<TxHash, EvmExactError>;

    /// `None` while the transaction is pending; otherwise whether it succeeded.
    async fn receipt_status(&self, hash: TxHash) -> Result<Option<bool>, EvmExactError>;
}

/// [`EvmChain`] over an alloy provider with a local wallet.
pub struct AlloyChain {
    chain_id: u64,
    provider: DynProvider,
    signers: Vec<Address>,
    cursor: AtomicUsize,
}

impl std::fmt::Debug for AlloyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlloyChain")
            .field("chain_id", &self.chain_id)
            .field("signers", &self.signers)
            .finish_non_exhaustive()
    }
}

impl AlloyChain {
    /// An RPC client over HTTP endpoints, each with an optional requests-per-second limit.
    /// Requests fall back across endpoints. Non-HTTP URLs are skipped.
    ///
    /// # Errors
    ///
    /// No usable endpoint.
    pub fn rpc_client(endpoints: &[(Url, Option<u32>)]) -> Result<RpcClient, EvmExactError> {
        let transports = endpoints
            .iter()
            .filter(|(url, _)| matches!(url.scheme(), "http" | "https"))
            .map(|(url, rate_limit)| {
                ServiceBuilder::new()
                    .layer(ThrottleLayer::new(rate_limit.unwrap_or(u32::MAX)))
                    .service(Http::new(url.clone()))
            })
            .collect::<Vec<_>>();
        let count = NonZeroUsize::new(transports.len())
            .ok_or_else(|| EvmExactError::Config("no HTTP RPC endpoint configured".into()))?;
        let fallback = ServiceBuilder::new()
            .layer(FallbackLayer::default().with_active_transport_count(count))
            .service(transports);
        Ok(RpcClient::new(fallback, false))
    }

    /// # Errors
    ///
    /// The wallet has no signer, or no endpoint is usable.
    pub fn new(
        chain_id: u64,
        wallet: EthereumWallet,
        endpoints: &[(Url, Option<u32>)],
    ) -> Result<Self, EvmExactError> {
        let signers: Vec<Address> =
            NetworkWallet::<alloy_network::Ethereum>::signer_addresses(&wallet).collect();
        if signers.is_empty() {
            return Err(EvmExactError::Config("at least one signer is required".into()));
        }
        let client = Self::rpc_client(endpoints)?;
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_client(client)
            .erased();

        #[cfg(feature = "telemetry")]
        tracing::info!(chain_id, signers = ?signers, "EVM provider ready");

        Ok(Self {
            chain_id,
            provider,
            signers,
            cursor: AtomicUsize::new(0),
        })
    }

    fn next_signer(&self) -> Address {
        let next = self.cursor.fetch_add(1, Ordering::Relaxed) % self.signers.len();
        self.signers[next]
    }
}

#[async_trait::async_trait]
impl EvmChain for AlloyChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn signer_addresses(&self) -> Vec<Address> {
        self.signers.clone()
    }

    async fn balance_of(&self, asset: Address, owner: Address) -> Result<U256, EvmExactError> {
        let token = IEIP3009::new(asset, &self.provider);
        Ok(token.balanceOf(owner).call().await?)
    }

    async fn send(&self, tx: MetaTransaction) -> Result<TxHash, EvmExactError> {
        let from = tx.from.unwrap_or_else(|| self.next_signer());
        let request = TransactionRequest::default()
            .with_from(from)
            .with_to(tx.to)
            .with_input(tx.calldata);
        let pending = self.provider.send_transaction(request).await?;
        Ok(*pending.tx_hash())
    }

    async fn receipt_status(&self, hash: TxHash) -> Result<Option<bool>, EvmExactError> {
        let receipt = self.provider.get_transaction_receipt(hash).await?;
        Ok(receipt.map(|receipt| receipt.status()))
    }
}
