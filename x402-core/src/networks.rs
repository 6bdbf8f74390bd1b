//! Network names and their CAIP-2 chain ids.
//!
//! Version 1 messages say `"base-sepolia"` where version 2 messages say
//! `"eip155:84532"`. A [`NetworkRegistry`] knows both spellings and resolves
//! either one to a [`ChainId`]. Chain crates export the tables of networks
//! they support (`EVM_NETWORKS`, `SOLANA_NETWORKS`); applications build one
//! registry from those tables at startup and can register more at runtime.

use dashmap::DashMap;

use crate::chain::ChainId;

/// A network known by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfo {
    /// Version 1 name, e.g. `base-sepolia`.
    pub name: &'static str,
    /// CAIP-2 namespace, e.g. `eip155`.
    pub namespace: &'static str,
    /// CAIP-2 reference, e.g. `84532`.
    pub reference: &'static str,
}

impl NetworkInfo {
    /// The CAIP-2 chain id.
    #[must_use]
    pub fn chain_id(&self) -> ChainId {
        ChainId::new(self.namespace, self.reference)
    }
}

/// Two-way lookup between network names and chain ids.
///
/// Registration goes through `&self`, so a registry shared behind an `Arc`
/// can still learn new networks and aliases while in use.
#[derive(Debug, Default)]
pub struct NetworkRegistry {
    by_name: DashMap<String, ChainId>,
    by_chain: DashMap<ChainId, String>,
}

impl NetworkRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every network in `networks`.
    #[must_use]
    pub fn from_networks(networks: &[NetworkInfo]) -> Self {
        let registry = Self::new();
        registry.register(networks);
        registry
    }

    /// Adds a table of networks and returns the registry.
    #[must_use]
    pub fn with_networks(self, networks: &[NetworkInfo]) -> Self {
        self.register(networks);
        self
    }

    /// Adds every network in `networks`.
    pub fn register(&self, networks: &[NetworkInfo]) {
        for info in networks {
            self.register_network(info.name, info.chain_id());
        }
    }

    /// Registers `name` as the canonical name of `chain_id`.
    pub fn register_network(&self, name: &str, chain_id: ChainId) {
        let name = name.to_ascii_lowercase();
        self.by_chain.insert(chain_id.clone(), name.clone());
        self.by_name.insert(name, chain_id);
    }

    /// Registers an extra name for an already known network.
    ///
    /// `target` may be a name or a CAIP-2 id. The alias resolves to the
    /// target's chain id but never becomes its canonical name. Returns `false`
    /// when the target cannot be resolved.
    pub fn register_alias(&self, alias: &str, target: &str) -> bool {
        match self.resolve(target) {
            Some(chain_id) => {
                self.by_name.insert(alias.to_ascii_lowercase(), chain_id);
                true
            }
            None => false,
        }
    }

    /// Resolves a network name, alias or CAIP-2 id to a chain id.
    ///
    /// Unregistered CAIP-2 ids resolve to themselves.
    #[must_use]
    pub fn resolve(&self, network: &str) -> Option<ChainId> {
        if let Some(chain_id) = self.by_name.get(&network.to_ascii_lowercase()) {
            return Some(chain_id.clone());
        }
        network.parse().ok()
    }

    /// The canonical name of a chain id.
    #[must_use]
    pub fn name_of(&self, chain_id: &ChainId) -> Option<String> {
        self.by_chain.get(chain_id).map(|name| name.clone())
    }

    /// The version 1 spelling of `network`, falling back to the input.
    #[must_use]
    pub fn v1_name(&self, network: &str) -> String {
        self.resolve(network)
            .and_then(|chain_id| self.name_of(&chain_id))
            .unwrap_or_else(|| network.to_owned())
    }

    /// The CAIP-2 spelling of `network`, falling back to the input.
    #[must_use]
    pub fn caip2(&self, network: &str) -> String {
        self.resolve(network)
            .map_or_else(|| network.to_owned(), |chain_id| chain_id.to_string())
    }

    /// Whether two network strings denote the same chain.
    #[must_use]
    pub fn same_network(&self, a: &str, b: &str) -> bool {
        if a.eq_ignore_ascii_case(b) {
            return true;
        }
        match (self.resolve(a), self.resolve(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// Number of known chains.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_chain.len()
    }

    /// Whether no chain is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_chain.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETWORKS: &[NetworkInfo] = &[
        NetworkInfo {
            name: "base",
            namespace: "eip155",
            reference: "8453",
        },
        NetworkInfo {
            name: "base-sepolia",
            namespace: "eip155",
            reference: "84532",
        },
    ];

    #[test]
    fn resolves_both_spellings() {
        let registry = NetworkRegistry::from_networks(NETWORKS);
        assert_eq!(registry.resolve("base"), Some(ChainId::eip155(8453)));
        assert_eq!(registry.resolve("eip155:84532"), Some(ChainId::eip155(84532)));
        assert_eq!(registry.v1_name("eip155:84532"), "base-sepolia");
        assert_eq!(registry.caip2("base-sepolia"), "eip155:84532");
        assert!(registry.same_network("base", "eip155:8453"));
        assert!(!registry.same_network("base", "base-sepolia"));
        assert_eq!(registry.resolve("unknown"), None);
    }

    #[test]
    fn aliases_and_runtime_networks() {
        let registry = NetworkRegistry::from_networks(NETWORKS);
        assert!(registry.register_alias("base-mainnet", "base"));
        assert!(!registry.register_alias("nowhere", "moon"));
        assert_eq!(registry.resolve("Base-Mainnet"), Some(ChainId::eip155(8453)));
        assert_eq!(registry.v1_name("base-mainnet"), "base");

        registry.register_network("local", ChainId::eip155(31337));
        assert_eq!(registry.v1_name("eip155:31337"), "local");
        assert_eq!(registry.len(), 3);
    }
}
