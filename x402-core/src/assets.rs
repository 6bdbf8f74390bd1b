//! Token metadata used to build signing domains.
//!
//! EVM signers and verifiers need the token's EIP-712 `name` and `version`,
//! and price helpers need its decimals. An [`AssetRegistry`] is a value built
//! once at startup and shared through an `Arc`; custom assets and aliases can
//! be registered at runtime through `&self`.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::amount::{MoneyAmount, MoneyAmountError, TokenAmount};
use crate::chain::ChainId;
use crate::networks::NetworkRegistry;

/// A token deployment on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetInfo {
    /// Chain the token is deployed on.
    pub chain_id: ChainId,
    /// Contract address (EVM) or mint (Solana).
    pub address: String,
    /// EIP-712 domain name, e.g. `USD Coin`.
    pub name: String,
    /// EIP-712 domain version, e.g. `2`.
    pub version: String,
    /// Atomic units per whole token, as a power of ten.
    pub decimals: u32,
    /// Ticker, e.g. `USDC`.
    pub symbol: String,
}

/// Normalizes an address for lookups: hex addresses compare without case,
/// base58 keys compare exactly.
#[must_use]
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    if trimmed.starts_with("0x") || trimmed.starts_with("0X") {
        trimmed.to_ascii_lowercase()
    } else {
        trimmed.to_owned()
    }
}

/// Whether two addresses denote the same account under [`normalize_address`].
#[must_use]
pub fn same_address(a: &str, b: &str) -> bool {
    normalize_address(a) == normalize_address(b)
}

/// Lookup of [`AssetInfo`] by network and address.
#[derive(Debug)]
pub struct AssetRegistry {
    networks: Arc<NetworkRegistry>,
    assets: DashMap<(ChainId, String), AssetInfo>,
    aliases: DashMap<(ChainId, String), String>,
    defaults: DashMap<ChainId, String>,
}

/// Why a price could not be turned into a requirement amount.
#[derive(Debug, thiserror::Error)]
pub enum PriceError {
    /// The network is not in the registry.
    #[error("unknown network {0}")]
    UnknownNetwork(String),
    /// No asset is registered as the network's default.
    #[error("no default asset for network {0}")]
    NoDefaultAsset(ChainId),
    /// The price itself is malformed or too precise.
    #[error(transparent)]
    Money(#[from] MoneyAmountError),
}

impl AssetRegistry {
    /// An empty registry resolving network names through `networks`.
    #[must_use]
    pub fn new(networks: Arc<NetworkRegistry>) -> Self {
        Self {
            networks,
            assets: DashMap::new(),
            aliases: DashMap::new(),
            defaults: DashMap::new(),
        }
    }

    /// Registers every asset in `assets` and returns the registry.
    #[must_use]
    pub fn with_assets<I: IntoIterator<Item = AssetInfo>>(self, assets: I) -> Self {
        for asset in assets {
            self.register(asset);
        }
        self
    }

    /// The network registry names are resolved through.
    #[must_use]
    pub const fn networks(&self) -> &Arc<NetworkRegistry> {
        &self.networks
    }

    /// Adds or replaces an asset. The first asset registered on a chain
    /// becomes that chain's default.
    pub fn register(&self, asset: AssetInfo) {
        let address = normalize_address(&asset.address);
        self.defaults
            .entry(asset.chain_id.clone())
            .or_insert_with(|| address.clone());
        self.assets.insert((asset.chain_id.clone(), address), asset);
    }

    /// Makes `alias` resolve to the asset at `address` on `network`.
    ///
    /// Returns `false` when the network or the asset is unknown.
    pub fn register_alias(&self, network: &str, alias: &str, address: &str) -> bool {
        let Some(chain_id) = self.networks.resolve(network) else {
            return false;
        };
        let address = normalize_address(address);
        if !self.assets.contains_key(&(chain_id.clone(), address.clone())) {
            return false;
        }
        self.aliases
            .insert((chain_id, alias.to_ascii_lowercase()), address);
        true
    }

    /// Overrides the default asset of a network.
    pub fn set_default(&self, chain_id: ChainId, address: &str) {
        self.defaults.insert(chain_id, normalize_address(address));
    }

    /// Finds an asset by network (name or CAIP-2 id) and address or alias.
    #[must_use]
    pub fn find(&self, network: &str, asset: &str) -> Option<AssetInfo> {
        let chain_id = self.networks.resolve(network)?;
        self.find_on_chain(&chain_id, asset)
    }

    /// Finds an asset by address or alias on a known chain.
    #[must_use]
    pub fn find_on_chain(&self, chain_id: &ChainId, asset: &str) -> Option<AssetInfo> {
        let address = normalize_address(asset);
        if let Some(info) = self.assets.get(&(chain_id.clone(), address)) {
            return Some(info.clone());
        }
        let target = self
            .aliases
            .get(&(chain_id.clone(), asset.to_ascii_lowercase()))?
            .clone();
        self.assets
            .get(&(chain_id.clone(), target))
            .map(|info| info.clone())
    }

    /// Finds an asset by address alone, on whichever chain it is deployed.
    #[must_use]
    pub fn find_by_address(&self, asset: &str) -> Option<AssetInfo> {
        let address = normalize_address(asset);
        self.assets
            .iter()
            .find(|entry| entry.key().1 == address)
            .map(|entry| entry.value().clone())
    }

    /// The default asset of `network`, if one is registered.
    #[must_use]
    pub fn default_for_network(&self, network: &str) -> Option<AssetInfo> {
        let chain_id = self.networks.resolve(network)?;
        let address = self.defaults.get(&chain_id)?.clone();
        self.assets
            .get(&(chain_id, address))
            .map(|info| info.clone())
    }

    /// Converts a human price on `network` into the default asset and its
    /// atomic amount.
    ///
    /// # Errors
    ///
    /// Fails for unknown networks, networks without a default asset, and
    /// prices that do not fit the asset's decimals.
    pub fn price(&self, network: &str, price: &str) -> Result<(AssetInfo, TokenAmount), PriceError> {
        let chain_id = self
            .networks
            .resolve(network)
            .ok_or_else(|| PriceError::UnknownNetwork(network.to_owned()))?;
        let asset = self
            .default_for_network(&chain_id.to_string())
            .ok_or(PriceError::NoDefaultAsset(chain_id))?;
        let amount = MoneyAmount::parse(price)?.to_token_amount(asset.decimals)?;
        Ok((asset, amount))
    }

    /// Number of registered assets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Whether no asset is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}
