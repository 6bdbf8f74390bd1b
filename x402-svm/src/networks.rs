//! Known Solana networks and their USDC mints.
//!
//! Solana CAIP-2 references are the first 32 characters of the cluster's
//! genesis hash.

use x402_core::assets::AssetInfo;
use x402_core::chain::ChainId;
use x402_core::networks::NetworkInfo;

/// Mainnet-beta reference.
pub const SOLANA_MAINNET: &str = "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp";
/// Devnet reference.
pub const SOLANA_DEVNET: &str = "EtWTRABZaYq6iMfeYKouRu166VU2xqa1";

/// USDC mint on mainnet-beta.
pub const USDC_SOLANA: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
/// USDC mint on devnet.
pub const USDC_SOLANA_DEVNET: &str = "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU";

/// v1 names of the known Solana clusters.
pub const SOLANA_NETWORKS: &[NetworkInfo] = &[
    NetworkInfo {
        name: "solana",
        namespace: "solana",
        reference: SOLANA_MAINNET,
    },
    NetworkInfo {
        name: "solana-devnet",
        namespace: "solana",
        reference: SOLANA_DEVNET,
    },
];

/// USDC mints on the known clusters. Solana assets have no EIP-712 domain,
/// so `name` carries the token name for display only.
#[must_use]
pub fn known_assets() -> Vec<AssetInfo> {
    [(SOLANA_MAINNET, USDC_SOLANA), (SOLANA_DEVNET, USDC_SOLANA_DEVNET)]
        .into_iter()
        .map(|(reference, mint)| AssetInfo {
            chain_id: ChainId::new("solana", reference),
            address: mint.to_owned(),
            name: "USD Coin".to_owned(),
            version: String::new(),
            decimals: 6,
            symbol: "USDC".to_owned(),
        })
        .collect()
}
