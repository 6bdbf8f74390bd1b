//! Builds the local facilitator from configuration.
//!
//! Every configured chain gets one `exact` scheme handler, picked by the
//! CAIP-2 namespace of its network: EIP-155 chains get an
//! [`EvmExactFacilitator`](x402_evm::exact::facilitator::EvmExactFacilitator)
//! over an alloy provider, Solana clusters a
//! [`SolanaExactFacilitator`](x402_svm::exact::facilitator::SolanaExactFacilitator)
//! over the nonblocking RPC client. Chains whose signer key is missing are
//! skipped with a warning rather than failing startup.

use std::sync::Arc;

use x402_core::assets::AssetRegistry;
use x402_core::chain::ChainId;
use x402_core::networks::NetworkRegistry;
use x402_core::scheme::{SchemeFacilitator, SchemeRegistry};
use x402_core::types::Scheme;

use crate::config::{ChainConfig, FacilitatorConfig, ReceiptConfig};

/// The local facilitator: one handler per served `(scheme, chain)`.
pub type LocalFacilitator = SchemeRegistry<dyn SchemeFacilitator>;

/// A configured chain that cannot be served.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The signer key does not parse. The key itself is never included.
    #[error("invalid signer key for {network}: {message}")]
    InvalidKey {
        /// Configured network name.
        network: String,
        /// Parser message.
        message: String,
    },
    /// The RPC endpoint cannot be used.
    #[error("cannot connect {network}: {message}")]
    Chain {
        /// Configured network name.
        network: String,
        /// Connection error.
        message: String,
    },
}

/// Known networks plus the configured ones.
#[must_use]
pub fn network_registry(config: &FacilitatorConfig) -> Arc<NetworkRegistry> {
    let networks = NetworkRegistry::new();
    #[cfg(feature = "chain-eip155")]
    networks.register(x402_evm::EVM_NETWORKS);
    #[cfg(feature = "chain-solana")]
    networks.register(x402_svm::SOLANA_NETWORKS);
    config.apply_networks(&networks);
    Arc::new(networks)
}

/// Known USDC deployments plus the configured assets.
#[must_use]
pub fn asset_registry(config: &FacilitatorConfig, networks: &Arc<NetworkRegistry>) -> Arc<AssetRegistry> {
    let assets = AssetRegistry::new(Arc::clone(networks));
    #[cfg(feature = "chain-eip155")]
    let assets = assets.with_assets(x402_evm::known_assets());
    #[cfg(feature = "chain-solana")]
    let assets = assets.with_assets(x402_svm::known_assets());
    config.apply_assets(&assets);
    Arc::new(assets)
}

/// Registers a handler for every usable chain in `config`.
///
/// # Errors
///
/// A chain with a resolved but malformed key or unusable RPC endpoints.
pub fn build_facilitator(
    config: &FacilitatorConfig,
    networks: &Arc<NetworkRegistry>,
    assets: &Arc<AssetRegistry>,
) -> Result<LocalFacilitator, SetupError> {
    let mut registry = LocalFacilitator::new(Arc::clone(networks));

    for (network, chain) in &config.chains {
        let Some(chain_id) = networks.resolve(network) else {
            tracing::warn!(network = %network, "skipping chain: unknown network");
            continue;
        };
        if chain.signer_private_key.is_unresolved() {
            tracing::warn!(
                network = %network,
                "skipping chain: signer_private_key not resolved (missing env var?)"
            );
            continue;
        }
        let Some(handler) = scheme_handler(network, &chain_id, chain, config.receipts, networks, assets)?
        else {
            tracing::warn!(network = %network, namespace = chain_id.namespace(), "skipping chain: unsupported namespace");
            continue;
        };
        let signers = handler.signers(&chain_id);
        tracing::info!(network = %network, chain_id = %chain_id, signers = ?signers, "registered exact scheme");
        registry.register(Scheme::Exact, chain_id, handler);
    }

    if registry.is_empty() {
        tracing::warn!("no chains configured, facilitator will report no supported kinds");
    }
    Ok(registry)
}

#[allow(unused_variables)] // For when no chain features are enabled
fn scheme_handler(
    network: &str,
    chain_id: &ChainId,
    chain: &ChainConfig,
    receipts: ReceiptConfig,
    networks: &Arc<NetworkRegistry>,
    assets: &Arc<AssetRegistry>,
) -> Result<Option<Arc<dyn SchemeFacilitator>>, SetupError> {
    match chain_id.namespace() {
        #[cfg(feature = "chain-eip155")]
        x402_core::chain::EIP155_NAMESPACE => evm_handler(network, chain_id, chain, receipts, assets).map(Some),
        #[cfg(feature = "chain-solana")]
        x402_core::chain::SOLANA_NAMESPACE => solana_handler(network, chain_id, chain, networks).map(Some),
        _ => Ok(None),
    }
}

#[cfg(feature = "chain-eip155")]
fn evm_handler(
    network: &str,
    chain_id: &ChainId,
    chain: &ChainConfig,
    receipts: ReceiptConfig,
    assets: &Arc<AssetRegistry>,
) -> Result<Arc<dyn SchemeFacilitator>, SetupError> {
    use alloy_network::EthereumWallet;
    use alloy_signer_local::PrivateKeySigner;
    use x402_evm::chain::AlloyChain;
    use x402_evm::exact::facilitator::{EvmExactFacilitator, ReceiptPolicy};

    let numeric = chain_id.evm_chain_id().ok_or_else(|| SetupError::Chain {
        network: network.to_owned(),
        message: format!("{chain_id} has no numeric chain id"),
    })?;
    let signer: PrivateKeySigner =
        chain
            .signer_private_key
            .expose()
            .parse()
            .map_err(|e: alloy_signer_local::LocalSignerError| SetupError::InvalidKey {
                network: network.to_owned(),
                message: e.to_string(),
            })?;
    let endpoints: Vec<_> = chain
        .rpc
        .iter()
        .map(|endpoint| (endpoint.url.clone(), endpoint.rate_limit))
        .collect();
    let provider = AlloyChain::new(numeric, EthereumWallet::from(signer), &endpoints).map_err(|e| {
        SetupError::Chain {
            network: network.to_owned(),
            message: e.to_string(),
        }
    })?;
    let facilitator = EvmExactFacilitator::new(provider, Arc::clone(assets))
        .with_settlement_method(chain.settlement_method)
        .with_receipt_policy(ReceiptPolicy {
            attempts: receipts.attempts,
            delay: receipts.delay(),
        });
    Ok(Arc::new(facilitator))
}

#[cfg(feature = "chain-solana")]
fn solana_handler(
    network: &str,
    chain_id: &ChainId,
    chain: &ChainConfig,
    networks: &Arc<NetworkRegistry>,
) -> Result<Arc<dyn SchemeFacilitator>, SetupError> {
    use solana_client::nonblocking::rpc_client::RpcClient;
    use x402_svm::exact::facilitator::{SolanaExactFacilitator, keypair_from_base58};

    let fee_payer =
        keypair_from_base58(chain.signer_private_key.expose()).map_err(|e| SetupError::InvalidKey {
            network: network.to_owned(),
            message: e.to_string(),
        })?;
    let endpoint = chain.rpc.first().ok_or_else(|| SetupError::Chain {
        network: network.to_owned(),
        message: "no RPC endpoint configured".to_owned(),
    })?;
    let rpc = RpcClient::new(endpoint.url.to_string());
    Ok(Arc::new(SolanaExactFacilitator::new(
        chain_id.clone(),
        Arc::clone(networks),
        fee_payer,
        rpc,
    )))
}
