//! In-memory catalog behind `GET /discovery/resources`.

use std::collections::BTreeMap;

use tokio::sync::RwLock;
use x402_core::proto::{DiscoveryResource, DiscoveryResponse, Pagination, ProtocolAdapter, ProtocolVersion};
use x402_core::timestamp::UnixTimestamp;
use x402_core::types::PaymentRequirement;

/// Page size when the query names none.
pub const DEFAULT_LIMIT: usize = 100;

/// Discoverable resources keyed by URL, listed in URL order.
#[derive(Debug, Default)]
pub struct DiscoveryCatalog {
    items: RwLock<BTreeMap<String, DiscoveryResource>>,
}

impl DiscoveryCatalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog of the discoverable requirements in `requirements`.
    #[must_use]
    pub fn from_requirements(adapter: &ProtocolAdapter, requirements: &[PaymentRequirement]) -> Self {
        let mut items = BTreeMap::new();
        for requirement in requirements {
            if let Some(url) = listed_url(requirement) {
                upsert(&mut items, adapter, url, requirement);
            }
        }
        Self {
            items: RwLock::new(items),
        }
    }

    /// Adds `requirement` to its resource's entry. Requirements that are not
    /// discoverable or name no resource are ignored.
    pub async fn register(&self, adapter: &ProtocolAdapter, requirement: &PaymentRequirement) {
        if let Some(url) = listed_url(requirement) {
            upsert(&mut *self.items.write().await, adapter, url, requirement);
        }
    }

    /// Number of listed resources.
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    /// Whether nothing is listed.
    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// One page of the catalog.
    pub async fn page(&self, offset: usize, limit: usize) -> DiscoveryResponse {
        let items = self.items.read().await;
        DiscoveryResponse {
            x402_version: ProtocolVersion::V2.as_u8(),
            items: items.values().skip(offset).take(limit).cloned().collect(),
            pagination: Pagination {
                limit,
                offset,
                total: items.len(),
            },
        }
    }
}

fn listed_url(requirement: &PaymentRequirement) -> Option<&str> {
    requirement
        .resource
        .as_deref()
        .filter(|url| requirement.discoverable && !url.is_empty())
}

fn upsert(
    items: &mut BTreeMap<String, DiscoveryResource>,
    adapter: &ProtocolAdapter,
    url: &str,
    requirement: &PaymentRequirement,
) {
    let accepted = adapter.requirement_to_v2(requirement);
    let now = UnixTimestamp::now().as_secs();
    let entry = items.entry(url.to_owned()).or_insert_with(|| DiscoveryResource {
        resource: url.to_owned(),
        kind: "http".to_owned(),
        x402_version: ProtocolVersion::V2.as_u8(),
        accepts: Vec::new(),
        last_updated: now,
        metadata: None,
    });
    if !entry.accepts.contains(&accepted) {
        entry.accepts.push(accepted);
    }
    entry.last_updated = now;
    let mut metadata = serde_json::Map::new();
    if let Some(description) = &requirement.description {
        metadata.insert("description".into(), description.clone().into());
    }
    if let Some(mime_type) = &requirement.mime_type {
        metadata.insert("mimeType".into(), mime_type.clone().into());
    }
    if let Some(schema) = &requirement.output_schema {
        metadata.insert("outputSchema".into(), schema.clone());
    }
    if !metadata.is_empty() {
        entry.metadata = Some(metadata.into());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use x402_core::amount::TokenAmount;
    use x402_core::networks::{NetworkInfo, NetworkRegistry};

    use super::*;

    fn adapter() -> ProtocolAdapter {
        ProtocolAdapter::new(Arc::new(NetworkRegistry::from_networks(&[NetworkInfo {
            name: "base-sepolia",
            namespace: "eip155",
            reference: "84532",
        }])))
    }

    fn requirement(url: &str, amount: u64) -> PaymentRequirement {
        PaymentRequirement::exact("base-sepolia", "0xUSDC", "0xPAY", TokenAmount::from(amount))
            .with_resource(url)
            .with_description("weather")
            .with_discoverable(true)
    }

    #[tokio::test]
    async fn lists_discoverable_requirements_by_resource() {
        let hidden = PaymentRequirement::exact("base-sepolia", "0xUSDC", "0xPAY", TokenAmount::from(1_u64))
            .with_resource("https://api.example/hidden");
        let catalog = DiscoveryCatalog::from_requirements(
            &adapter(),
            &[
                requirement("https://api.example/b", 1),
                requirement("https://api.example/a", 1),
                requirement("https://api.example/a", 2),
                hidden,
            ],
        );
        let page = catalog.page(0, DEFAULT_LIMIT).await;
        assert_eq!(page.pagination.total, 2);
        assert_eq!(page.items[0].resource, "https://api.example/a");
        assert_eq!(page.items[0].accepts.len(), 2);
        assert_eq!(page.items[0].accepts[0].network, "eip155:84532");
        assert_eq!(page.items[0].metadata.as_ref().unwrap()["description"], "weather");
    }

    #[tokio::test]
    async fn pages_with_offset_and_limit() {
        let catalog = DiscoveryCatalog::new();
        let adapter = adapter();
        for i in 0..5 {
            catalog
                .register(&adapter, &requirement(&format!("https://api.example/{i}"), 1))
                .await;
        }
        catalog.register(&adapter, &requirement("https://api.example/0", 1)).await;
        assert_eq!(catalog.len().await, 5);

        let page = catalog.page(3, 10).await;
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].resource, "https://api.example/3");
        assert_eq!(page.pagination, Pagination { limit: 10, offset: 3, total: 5 });

        let page = catalog.page(10, 10).await;
        assert!(page.items.is_empty());
        assert_eq!(page.pagination.total, 5);
    }
}
