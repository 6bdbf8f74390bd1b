//! Known EVM networks and their USDC deployments.
//!
//! The core crate carries no chain data. Seed the registries from here:
//!
//! ```
//! use std::sync::Arc;
//! use x402_core::assets::AssetRegistry;
//! use x402_core::networks::NetworkRegistry;
//!
//! let networks = Arc::new(NetworkRegistry::from_networks(x402_evm::EVM_NETWORKS));
//! let assets = AssetRegistry::new(networks).with_assets(x402_evm::known_assets());
//! assert!(assets.default_for_network("base-sepolia").is_some());
//! ```

use x402_core::assets::AssetInfo;
use x402_core::chain::ChainId;
use x402_core::networks::NetworkInfo;

/// Base mainnet.
pub const BASE: u64 = 8453;
/// Base Sepolia testnet.
pub const BASE_SEPOLIA: u64 = 84532;
/// Ethereum mainnet.
pub const ETHEREUM: u64 = 1;
/// Polygon PoS mainnet.
pub const POLYGON: u64 = 137;
/// Polygon Amoy testnet.
pub const POLYGON_AMOY: u64 = 80002;
/// Avalanche C-Chain.
pub const AVALANCHE: u64 = 43114;
/// Avalanche Fuji testnet.
pub const AVALANCHE_FUJI: u64 = 43113;
/// Celo mainnet.
pub const CELO: u64 = 42220;

/// USDC on Base mainnet.
pub const USDC_BASE: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";
/// USDC on Base Sepolia testnet.
pub const USDC_BASE_SEPOLIA: &str = "0x036CbD53842c5426634e7929541eC2318f3dCF7e";
/// USDC on Ethereum mainnet.
pub const USDC_ETHEREUM: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
/// USDC on Polygon PoS mainnet.
pub const USDC_POLYGON: &str = "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359";
/// USDC on Polygon Amoy testnet.
pub const USDC_POLYGON_AMOY: &str = "0x41E94Eb71Ef8C9fAE0235d1e472b21E21B5a4dbF";
/// USDC on Avalanche C-Chain.
pub const USDC_AVALANCHE: &str = "0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E";
/// USDC on Avalanche Fuji testnet.
pub const USDC_AVALANCHE_FUJI: &str = "0x5425890298aed601595a70AB815c96711a31Bc65";
/// USDC on Celo mainnet.
pub const USDC_CELO: &str = "0xcebA9300f2b948710d2653dD7B07f33A8B32118C";

/// Decimals of every USDC deployment listed here.
pub const USDC_DECIMALS: u32 = 6;

/// v1 names of the known EVM networks.
pub const EVM_NETWORKS: &[NetworkInfo] = &[
    NetworkInfo { name: "base", namespace: "eip155", reference: "8453" },
    NetworkInfo { name: "base-sepolia", namespace: "eip155", reference: "84532" },
    NetworkInfo { name: "ethereum", namespace: "eip155", reference: "1" },
    NetworkInfo { name: "polygon", namespace: "eip155", reference: "137" },
    NetworkInfo { name: "polygon-amoy", namespace: "eip155", reference: "80002" },
    NetworkInfo { name: "avalanche", namespace: "eip155", reference: "43114" },
    NetworkInfo { name: "avalanche-fuji", namespace: "eip155", reference: "43113" },
    NetworkInfo { name: "celo", namespace: "eip155", reference: "42220" },
];

/// USDC on every known EVM network, with its EIP-712 domain.
///
/// Testnet USDC on Base Sepolia signs with the domain name `USDC`; the other
/// deployments use `USD Coin`.
#[must_use]
pub fn known_assets() -> Vec<AssetInfo> {
    [
        (BASE, USDC_BASE, "USD Coin"),
        (BASE_SEPOLIA, USDC_BASE_SEPOLIA, "USDC"),
        (ETHEREUM, USDC_ETHEREUM, "USD Coin"),
        (POLYGON, USDC_POLYGON, "USD Coin"),
        (POLYGON_AMOY, USDC_POLYGON_AMOY, "USDC"),
        (AVALANCHE, USDC_AVALANCHE, "USD Coin"),
        (AVALANCHE_FUJI, USDC_AVALANCHE_FUJI, "USD Coin"),
        (CELO, USDC_CELO, "USDC"),
    ]
    .into_iter()
    .map(|(chain, address, name)| AssetInfo {
        chain_id: ChainId::eip155(chain),
        address: address.to_owned(),
        name: name.to_owned(),
        version: "2".to_owned(),
        decimals: USDC_DECIMALS,
        symbol: "USDC".to_owned(),
    })
    .collect()
}
