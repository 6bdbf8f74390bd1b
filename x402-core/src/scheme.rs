//! Per-chain roles and their `(scheme, network)` registry.
//!
//! EVM and Solana sign and settle in structurally different ways, so each
//! chain crate provides its own implementation of the two role traits:
//!
//! - [`PaymentSigner`] builds and signs one authorization (client side)
//! - [`SchemeFacilitator`] verifies and settles it (facilitator side)
//!
//! A [`SchemeRegistry`] resolves the implementation for a requirement by
//! scheme and network, falling back to a namespace-wide registration such as
//! `eip155:*`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::chain::ChainId;
use crate::error::{ErrorReason, SchemeError};
use crate::facilitator::Facilitator;
use crate::networks::NetworkRegistry;
use crate::proto::{ProtocolVersion, SupportedKind, SupportedResponse};
use crate::types::{
    ExactPayload, PaymentPayload, PaymentRequirement, Scheme, SettlementResult, VerificationResult,
};

/// Builds and signs one payment authorization for a requirement.
///
/// Implementations must be callable concurrently; nonces come from a local
/// random draw, never from shared counters.
#[async_trait::async_trait]
pub trait PaymentSigner: Send + Sync {
    /// # Errors
    ///
    /// [`SchemeError`] when the requirement cannot be paid by this signer or
    /// signing fails.
    async fn sign(&self, requirement: &PaymentRequirement) -> Result<ExactPayload, SchemeError>;
}

/// Verifies and settles payments of one scheme on one chain family.
///
/// `Ok` results carry client-caused rejections as data; `Err` is reserved
/// for failures of the facilitator itself.
#[async_trait::async_trait]
pub trait SchemeFacilitator: Send + Sync {
    /// # Errors
    ///
    /// Infrastructure failures only.
    async fn verify(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<VerificationResult, SchemeError>;

    /// # Errors
    ///
    /// Infrastructure failures only.
    async fn settle(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<SettlementResult, SchemeError>;

    /// Extra data advertised for `chain_id` in `/supported`.
    fn extra(&self, _chain_id: &ChainId) -> Option<serde_json::Value> {
        None
    }

    /// Addresses that sign or pay fees on `chain_id`.
    fn signers(&self, chain_id: &ChainId) -> Vec<String>;
}

/// Registry key. A `*` reference matches every chain of the namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemeSlug {
    /// Payment scheme.
    pub scheme: Scheme,
    /// Chain, or `namespace:*` for a wildcard.
    pub chain_id: ChainId,
}

impl SchemeSlug {
    /// A key for `scheme` on `chain_id`.
    #[must_use]
    pub const fn new(scheme: Scheme, chain_id: ChainId) -> Self {
        Self { scheme, chain_id }
    }

    /// The same key widened to the whole namespace.
    #[must_use]
    pub fn as_wildcard(&self) -> Self {
        Self {
            scheme: self.scheme,
            chain_id: ChainId::new(self.chain_id.namespace(), "*"),
        }
    }

    /// Whether the key covers a whole namespace.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.chain_id.reference() == "*"
    }
}

impl fmt::Display for SchemeSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain_id, self.scheme)
    }
}

/// Implementations of one role keyed by [`SchemeSlug`].
pub struct SchemeRegistry<T: ?Sized> {
    networks: Arc<NetworkRegistry>,
    entries: BTreeMap<SchemeSlug, Arc<T>>,
}

impl<T: ?Sized> fmt::Debug for SchemeRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slugs: Vec<String> = self.entries.keys().map(ToString::to_string).collect();
        f.debug_tuple("SchemeRegistry").field(&slugs).finish()
    }
}

impl<T: ?Sized> Clone for SchemeRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            networks: Arc::clone(&self.networks),
            entries: self.entries.clone(),
        }
    }
}

impl<T: ?Sized> SchemeRegistry<T> {
    /// An empty registry resolving network names through `networks`.
    #[must_use]
    pub const fn new(networks: Arc<NetworkRegistry>) -> Self {
        Self {
            networks,
            entries: BTreeMap::new(),
        }
    }

    /// The registry network names are resolved through.
    #[must_use]
    pub const fn networks(&self) -> &Arc<NetworkRegistry> {
        &self.networks
    }

    /// Registers `handler` for one chain.
    pub fn register(&mut self, scheme: Scheme, chain_id: ChainId, handler: Arc<T>) -> &mut Self {
        self.entries.insert(SchemeSlug::new(scheme, chain_id), handler);
        self
    }

    /// Registers `handler` for every chain of `namespace` without an exact entry.
    pub fn register_namespace(&mut self, scheme: Scheme, namespace: &str, handler: Arc<T>) -> &mut Self {
        self.entries
            .insert(SchemeSlug::new(scheme, ChainId::new(namespace, "*")), handler);
        self
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, scheme: Scheme, chain_id: ChainId, handler: Arc<T>) -> Self {
        self.register(scheme, chain_id, handler);
        self
    }

    /// Exact chain first, then the namespace wildcard.
    #[must_use]
    pub fn by_slug(&self, slug: &SchemeSlug) -> Option<&Arc<T>> {
        self.entries
            .get(slug)
            .or_else(|| self.entries.get(&slug.as_wildcard()))
    }

    /// Looks up by scheme and a network in either spelling.
    #[must_use]
    pub fn get(&self, scheme: Scheme, network: &str) -> Option<&Arc<T>> {
        let chain_id = self.networks.resolve(network)?;
        self.by_slug(&SchemeSlug::new(scheme, chain_id))
    }

    /// Registered entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&SchemeSlug, &Arc<T>)> {
        self.entries.iter()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SchemeRegistry<dyn SchemeFacilitator> {
    fn route(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<&Arc<dyn SchemeFacilitator>, ErrorReason> {
        if payment.scheme != requirement.scheme {
            return Err(ErrorReason::InvalidScheme);
        }
        if !self.networks.same_network(&payment.network, &requirement.network) {
            return Err(ErrorReason::InvalidNetwork);
        }
        self.get(payment.scheme, &payment.network)
            .ok_or(ErrorReason::UnsupportedScheme)
    }

    fn kinds_for(&self, slug: &SchemeSlug, handler: &Arc<dyn SchemeFacilitator>) -> Vec<SupportedKind> {
        let mut kinds = Vec::with_capacity(2);
        let extra = handler.extra(&slug.chain_id);
        if let Some(name) = self.networks.name_of(&slug.chain_id) {
            kinds.push(SupportedKind {
                x402_version: ProtocolVersion::V1.as_u8(),
                scheme: slug.scheme.to_string(),
                network: name,
                extra: extra.clone(),
            });
        }
        kinds.push(SupportedKind {
            x402_version: ProtocolVersion::V2.as_u8(),
            scheme: slug.scheme.to_string(),
            network: slug.chain_id.to_string(),
            extra,
        });
        kinds
    }
}

impl Facilitator for SchemeRegistry<dyn SchemeFacilitator> {
    type Error = SchemeError;

    #[cfg_attr(feature = "telemetry", tracing::instrument(name = "x402.registry.verify", skip_all, err))]
    async fn verify(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<VerificationResult, SchemeError> {
        match self.route(payment, requirement) {
            Ok(handler) => handler.verify(payment, requirement).await,
            Err(reason) => Ok(VerificationResult::invalid(
                reason,
                Some(payment.payer().to_owned()),
            )),
        }
    }

    #[cfg_attr(feature = "telemetry", tracing::instrument(name = "x402.registry.settle", skip_all, err))]
    async fn settle(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<SettlementResult, SchemeError> {
        match self.route(payment, requirement) {
            Ok(handler) => handler.settle(payment, requirement).await,
            Err(reason) => Ok(SettlementResult::failed(
                reason,
                payment.network.clone(),
                Some(payment.payer().to_owned()),
            )),
        }
    }

    async fn supported(&self) -> Result<SupportedResponse, SchemeError> {
        let mut kinds = Vec::new();
        let mut signers: HashMap<String, Vec<String>> = HashMap::new();
        for (slug, handler) in &self.entries {
            if !slug.is_wildcard() {
                kinds.extend(self.kinds_for(slug, handler));
            }
            let entry = signers.entry(slug.chain_id.to_string()).or_default();
            entry.extend(handler.signers(&slug.chain_id));
        }
        for addresses in signers.values_mut() {
            addresses.sort_unstable();
            addresses.dedup();
        }
        signers.retain(|_, addresses| !addresses.is_empty());
        Ok(SupportedResponse {
            kinds,
            extensions: Vec::new(),
            signers,
        })
    }
}
