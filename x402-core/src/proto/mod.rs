//! Wire formats.
//!
//! - [`v1`] and [`v2`] hold the JSON shapes of the two header encodings.
//! - [`adapter`] converts between those shapes and [`crate::types`].
//! - This module holds the facilitator HTTP API bodies, which wrap a
//!   version-specific payload and requirement in one envelope.

use serde::{Deserialize, Serialize};
use serde_with::{VecSkipError, serde_as};
use std::collections::HashMap;

use crate::chain::ChainId;

pub mod adapter;
pub mod v1;
pub mod v2;
mod version;

pub use adapter::{AdapterError, PaymentRequiredWire, ProtocolAdapter};
pub use version::{ProtocolVersion, Version};

/// Body of `POST /verify` and `POST /settle`.
///
/// `x402Version` selects the shape of the two nested documents, so they stay
/// raw JSON until [`ProtocolAdapter::decode_facilitator_request`] reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorRequest {
    /// Protocol version of the nested documents.
    pub x402_version: u8,
    /// The payment, in its version's shape.
    pub payment_payload: serde_json::Value,
    /// The requirement, in its version's shape.
    pub payment_requirements: serde_json::Value,
}

/// One `(version, scheme, network)` combination a facilitator handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedKind {
    /// Protocol version.
    pub x402_version: u8,
    /// Scheme name, e.g. `exact`.
    pub scheme: String,
    /// Network name for version 1, CAIP-2 id for version 2.
    pub network: String,
    /// Scheme data for clients, e.g. the Solana fee payer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Body of `GET /supported`.
#[serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedResponse {
    /// Kinds this build cannot read are skipped instead of failing the whole list.
    #[serde_as(as = "VecSkipError<_>")]
    pub kinds: Vec<SupportedKind>,
    /// Protocol extensions the facilitator understands.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Signer addresses keyed by CAIP-2 id or `namespace:*` pattern.
    #[serde(default)]
    pub signers: HashMap<String, Vec<String>>,
}

impl SupportedResponse {
    /// Signers registered for `chain_id`, exact entries first.
    #[must_use]
    pub fn signers_for_chain(&self, chain_id: &ChainId) -> Vec<&str> {
        let exact = chain_id.to_string();
        let wildcard = format!("{}:*", chain_id.namespace());
        [exact, wildcard]
            .iter()
            .filter_map(|key| self.signers.get(key))
            .flatten()
            .map(String::as_str)
            .collect()
    }

    /// Whether any kind covers `scheme` on `network` for `version`.
    #[must_use]
    pub fn supports(&self, version: ProtocolVersion, scheme: &str, network: &str) -> bool {
        self.kinds.iter().any(|kind| {
            kind.x402_version == version.as_u8() && kind.scheme == scheme && kind.network == network
        })
    }
}

/// A resource listed by `GET /discovery/resources`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResource {
    /// Resource URL.
    pub resource: String,
    /// Resource type, e.g. `http`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Protocol version the requirements are written in.
    pub x402_version: u8,
    /// Requirements the resource advertises.
    pub accepts: Vec<v2::PaymentRequirements>,
    /// Unix seconds of the last update.
    pub last_updated: u64,
    /// Free-form data supplied at registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Window of a paged listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Page size.
    pub limit: usize,
    /// Items skipped.
    pub offset: usize,
    /// Items in the whole listing.
    pub total: usize,
}

/// Body of `GET /discovery/resources`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResponse {
    /// Protocol version.
    pub x402_version: u8,
    /// Resources on this page.
    pub items: Vec<DiscoveryResource>,
    /// Where this page sits in the listing.
    pub pagination: Pagination,
}
