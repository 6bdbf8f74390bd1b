//! CAIP-2 chain identifiers.
//!
//! Version 2 of the protocol names networks by CAIP-2 id (`eip155:8453`,
//! `solana:5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp`). Version 1 uses short names such
//! as `base`; [`crate::networks::NetworkRegistry`] translates between the two.

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// CAIP-2 namespace for EVM chains.
pub const EIP155_NAMESPACE: &str = "eip155";

/// CAIP-2 namespace for Solana clusters.
pub const SOLANA_NAMESPACE: &str = "solana";

/// A `namespace:reference` chain identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId {
    namespace: String,
    reference: String,
}

impl ChainId {
    /// Builds a chain id from its two components.
    pub fn new<N: Into<String>, R: Into<String>>(namespace: N, reference: R) -> Self {
        Self {
            namespace: namespace.into(),
            reference: reference.into(),
        }
    }

    /// `eip155:<chain_id>`.
    #[must_use]
    pub fn eip155(chain_id: u64) -> Self {
        Self::new(EIP155_NAMESPACE, chain_id.to_string())
    }

    /// CAIP-2 namespace, e.g. `eip155`.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Chain reference within the namespace.
    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Numeric EVM chain id, if this is an `eip155` chain with a numeric reference.
    #[must_use]
    pub fn evm_chain_id(&self) -> Option<u64> {
        if self.namespace != EIP155_NAMESPACE {
            return None;
        }
        self.reference.parse().ok()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

/// A string that is not `namespace:reference` with both parts non-empty.
#[derive(Debug, thiserror::Error)]
#[error("invalid chain id format: {0}")]
pub struct ChainIdFormatError(String);

impl FromStr for ChainId {
    type Err = ChainIdFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((namespace, reference)) if !namespace.is_empty() && !reference.is_empty() => {
                Ok(Self::new(namespace, reference))
            }
            _ => Err(ChainIdFormatError(s.into())),
        }
    }
}

impl Serialize for ChainId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}

/// Matches one chain, every chain of a namespace, or a set of references.
///
/// Textual forms are `eip155:8453`, `eip155:*` and `eip155:{1,8453}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainIdPattern {
    /// Every chain in the namespace.
    Wildcard { namespace: String },
    /// Exactly one chain.
    Exact(ChainId),
    /// Any of the listed references within the namespace.
    Set {
        /// Namespace of every listed chain.
        namespace: String,
        /// Accepted references.
        references: BTreeSet<String>,
    },
}

impl ChainIdPattern {
    /// Every chain in `namespace`.
    pub fn wildcard<S: Into<String>>(namespace: S) -> Self {
        Self::Wildcard {
            namespace: namespace.into(),
        }
    }

    /// Whether `chain_id` falls under this pattern.
    #[must_use]
    pub fn matches(&self, chain_id: &ChainId) -> bool {
        match self {
            Self::Wildcard { namespace } => chain_id.namespace == *namespace,
            Self::Exact(exact) => exact == chain_id,
            Self::Set {
                namespace,
                references,
            } => chain_id.namespace == *namespace && references.contains(&chain_id.reference),
        }
    }

    /// Namespace every matching chain shares.
    #[must_use]
    pub fn namespace(&self) -> &str {
        match self {
            Self::Wildcard { namespace } | Self::Set { namespace, .. } => namespace,
            Self::Exact(chain_id) => chain_id.namespace(),
        }
    }
}

impl fmt::Display for ChainIdPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wildcard { namespace } => write!(f, "{namespace}:*"),
            Self::Exact(chain_id) => write!(f, "{chain_id}"),
            Self::Set {
                namespace,
                references,
            } => {
                let refs: Vec<&str> = references.iter().map(String::as_str).collect();
                write!(f, "{namespace}:{{{}}}", refs.join(","))
            }
        }
    }
}

impl FromStr for ChainIdPattern {
    type Err = ChainIdFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, rest) = s
            .split_once(':')
            .filter(|(ns, rest)| !ns.is_empty() && !rest.is_empty())
            .ok_or_else(|| ChainIdFormatError(s.into()))?;

        if rest == "*" {
            return Ok(Self::wildcard(namespace));
        }

        if let Some(inner) = rest.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
            let references = inner
                .split(',')
                .map(str::trim)
                .map(|item| {
                    if item.is_empty() {
                        Err(ChainIdFormatError(s.into()))
                    } else {
                        Ok(item.to_owned())
                    }
                })
                .collect::<Result<BTreeSet<_>, _>>()?;
            return Ok(Self::Set {
                namespace: namespace.into(),
                references,
            });
        }

        Ok(Self::Exact(ChainId::new(namespace, rest)))
    }
}

impl Serialize for ChainIdPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChainIdPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}

impl From<ChainId> for ChainIdPattern {
    fn from(chain_id: ChainId) -> Self {
        Self::Exact(chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chain_id() {
        let id: ChainId = "eip155:84532".parse().unwrap();
        assert_eq!(id.namespace(), "eip155");
        assert_eq!(id.evm_chain_id(), Some(84532));
        assert!("eip155".parse::<ChainId>().is_err());
        assert!(":1".parse::<ChainId>().is_err());
    }

    #[test]
    fn solana_has_no_evm_chain_id() {
        let id = ChainId::new(SOLANA_NAMESPACE, "EtWTRABZaYq6iMfeYKouRu166VU2xqa1");
        assert_eq!(id.evm_chain_id(), None);
    }

    #[test]
    fn pattern_forms() {
        let base = ChainId::eip155(8453);
        let wildcard: ChainIdPattern = "eip155:*".parse().unwrap();
        let set: ChainIdPattern = "eip155:{1, 8453}".parse().unwrap();
        let exact: ChainIdPattern = "eip155:1".parse().unwrap();
        assert!(wildcard.matches(&base));
        assert!(set.matches(&base));
        assert!(!exact.matches(&base));
        assert_eq!(set.to_string(), "eip155:{1,8453}");
        assert!("eip155:{1,}".parse::<ChainIdPattern>().is_err());
    }
}
