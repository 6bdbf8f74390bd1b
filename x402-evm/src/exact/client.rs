//! Wallet-side signing of EIP-3009 authorizations.
//!
//! [`EvmPaymentSigner`] implements the core
//! [`PaymentSigner`](x402_core::scheme::PaymentSigner): given the requirement
//! the wallet chose, it builds the token's EIP-712 domain, fills a
//! `TransferWithAuthorization` message with a fresh random nonce and a validity
//! window around the current time, and signs the digest. Facilitators that
//! settle through `receiveWithAuthorization` need the matching message; see
//! [`EvmPaymentSigner::with_settlement_method`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use alloy_primitives::{Address, B256, FixedBytes, Signature, hex};
use alloy_signer_local::PrivateKeySigner;
use rand::RngExt;
use rand::rng;
use x402_core::assets::AssetRegistry;
use x402_core::error::SchemeError;
use x402_core::scheme::PaymentSigner;
use x402_core::timestamp::UnixTimestamp;
use x402_core::types::{ExactPayload, PaymentAuthorization, PaymentRequirement};

#[cfg(feature = "telemetry")]
use tracing::instrument;

use super::types::{EvmAuthorization, SettlementMethod, token_domain};

/// Default `validAfter` offset from now, in seconds.
pub const DEFAULT_VALID_AFTER_OFFSET: i64 = -60;
/// Default `validBefore` offset from now, in seconds.
pub const DEFAULT_VALID_BEFORE_OFFSET: i64 = 15 * 60;

/// Signing operations the payment signer needs, so that owned and
/// `Arc`-shared alloy signers both work.
pub trait SignerLike: Send + Sync {
    /// The account that signs.
    fn address(&self) -> Address;

    /// Signs a 32-byte prehash.
    fn sign_hash(
        &self,
        hash: &FixedBytes<32>,
    ) -> impl Future<Output = Result<Signature, alloy_signer::Error>> + Send;
}

impl SignerLike for PrivateKeySigner {
    fn address(&self) -> Address {
        Self::address(self)
    }

    async fn sign_hash(&self, hash: &FixedBytes<32>) -> Result<Signature, alloy_signer::Error> {
        alloy_signer::Signer::sign_hash(self, hash).await
    }
}

impl<T: SignerLike> SignerLike for Arc<T> {
    fn address(&self) -> Address {
        (**self).address()
    }

    async fn sign_hash(&self, hash: &FixedBytes<32>) -> Result<Signature, alloy_signer::Error> {
        (**self).sign_hash(hash).await
    }
}

/// Signs `exact` payments on EVM chains.
pub struct EvmPaymentSigner<S> {
    signer: S,
    assets: Arc<AssetRegistry>,
    valid_after_offset: i64,
    valid_before_offset: i64,
    method: SettlementMethod,
}

impl<S: SignerLike> fmt::Debug for EvmPaymentSigner<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmPaymentSigner")
            .field("address", &self.signer.address())
            .field("valid_after_offset", &self.valid_after_offset)
            .field("valid_before_offset", &self.valid_before_offset)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

impl<S: SignerLike> EvmPaymentSigner<S> {
    /// `assets` supplies the EIP-712 domain when a requirement carries none.
    pub const fn new(signer: S, assets: Arc<AssetRegistry>) -> Self {
        Self {
            signer,
            assets,
            valid_after_offset: DEFAULT_VALID_AFTER_OFFSET,
            valid_before_offset: DEFAULT_VALID_BEFORE_OFFSET,
            method: SettlementMethod::TransferWithAuthorization,
        }
    }

    /// Offsets from the signing time, in seconds, for `validAfter` and `validBefore`.
    #[must_use]
    pub const fn with_validity_window(mut self, after: i64, before: i64) -> Self {
        self.valid_after_offset = after;
        self.valid_before_offset = before;
        self
    }

    /// Signs for `receiveWithAuthorization` instead of
    /// `transferWithAuthorization`, matching a facilitator configured that way.
    #[must_use]
    pub const fn with_settlement_method(mut self, method: SettlementMethod) -> Self {
        self.method = method;
        self
    }

    /// The paying account.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    fn domain_params(&self, requirement: &PaymentRequirement) -> Result<(String, String), SchemeError> {
        if let (Some(name), Some(version)) = (requirement.token_name(), requirement.token_version()) {
            return Ok((name.to_owned(), version.to_owned()));
        }
        self.assets
            .find(&requirement.network, &requirement.asset)
            .map(|asset| (asset.name, asset.version))
            .ok_or_else(|| SchemeError::UnknownAsset {
                network: requirement.network.clone(),
                asset: requirement.asset.clone(),
            })
    }

    fn chain_id(&self, requirement: &PaymentRequirement) -> Result<u64, SchemeError> {
        self.assets
            .networks()
            .resolve(&requirement.network)
            .and_then(|chain_id| chain_id.evm_chain_id())
            .ok_or_else(|| SchemeError::UnsupportedNetwork(requirement.network.clone()))
    }
}

fn address_of(field: &str, value: &str) -> Result<Address, SchemeError> {
    super::types::parse_address(field, value).map_err(|e| SchemeError::InvalidRequirement(e.to_string()))
}

#[async_trait::async_trait]
impl<S: SignerLike> PaymentSigner for EvmPaymentSigner<S> {
    #[cfg_attr(feature = "telemetry", instrument(name = "x402.evm.sign", skip_all, err))]
    async fn sign(&self, requirement: &PaymentRequirement) -> Result<ExactPayload, SchemeError> {
        let chain_id = self.chain_id(requirement)?;
        let asset = address_of("asset", &requirement.asset)?;
        let pay_to = address_of("payTo", &requirement.pay_to)?;
        let (name, version) = self.domain_params(requirement)?;
        let domain = token_domain(&name, &version, chain_id, asset);

        let now = UnixTimestamp::now();
        let nonce: [u8; 32] = rng().random();
        let authorization = EvmAuthorization {
            from: self.signer.address(),
            to: pay_to,
            value: requirement.amount.as_u256(),
            valid_after: now.offset(self.valid_after_offset),
            valid_before: now.offset(self.valid_before_offset),
            nonce: B256::from(nonce),
            signature: Default::default(),
        };
        if authorization.valid_before <= authorization.valid_after {
            return Err(SchemeError::InvalidRequirement(
                "validity window is empty".into(),
            ));
        }

        let digest = authorization.signing_hash(self.method, &domain);
        let signature = self
            .signer
            .sign_hash(&digest)
            .await
            .map_err(|e| SchemeError::Signing(e.to_string()))?;

        Ok(ExactPayload {
            signature: hex::encode_prefixed(signature.as_bytes()),
            authorization: PaymentAuthorization {
                from: authorization.from.to_string(),
                to: authorization.to.to_string(),
                value: requirement.amount,
                valid_after: authorization.valid_after,
                valid_before: authorization.valid_before,
                nonce: authorization.nonce.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networks::{EVM_NETWORKS, USDC_BASE_SEPOLIA, known_assets};
    use alloy_sol_types::SolStruct;
    use x402_core::amount::TokenAmount;
    use x402_core::networks::NetworkRegistry;

    fn signer() -> EvmPaymentSigner<PrivateKeySigner> {
        let networks = Arc::new(NetworkRegistry::from_networks(EVM_NETWORKS));
        let assets = Arc::new(AssetRegistry::new(networks).with_assets(known_assets()));
        EvmPaymentSigner::new(PrivateKeySigner::random(), assets)
    }

    fn requirement() -> PaymentRequirement {
        PaymentRequirement::exact(
            "base-sepolia",
            USDC_BASE_SEPOLIA,
            "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
            TokenAmount::from(1000),
        )
    }

    #[tokio::test]
    async fn signature_recovers_to_wallet() {
        let signer = signer();
        let payload = signer.sign(&requirement()).await.unwrap();
        let parsed = EvmAuthorization::parse(&payload).unwrap();
        assert_eq!(parsed.from, signer.address());
        assert!(parsed.valid_before > parsed.valid_after);
        assert_eq!(parsed.signature.len(), 65);

        let domain = token_domain("USDC", "2", 84532, parsed_asset());
        let digest = parsed.message().eip712_signing_hash(&domain);
        let recovered = Signature::from_raw(&parsed.signature)
            .unwrap()
            .recover_address_from_prehash(&digest)
            .unwrap();
        assert_eq!(recovered, signer.address());
    }

    fn parsed_asset() -> Address {
        USDC_BASE_SEPOLIA.parse().unwrap()
    }

    #[tokio::test]
    async fn nonces_are_fresh() {
        let signer = signer();
        let a = signer.sign(&requirement()).await.unwrap();
        let b = signer.sign(&requirement()).await.unwrap();
        assert_ne!(a.authorization.nonce, b.authorization.nonce);
        assert_eq!(a.authorization.nonce.len(), 2 + 64);
    }

    #[tokio::test]
    async fn window_follows_offsets() {
        let signer = signer().with_validity_window(-10, 30);
        let before = UnixTimestamp::now();
        let payload = signer.sign(&requirement()).await.unwrap();
        let window = &payload.authorization;
        assert!(window.valid_after.as_secs() >= before.as_secs() - 10);
        assert_eq!(window.valid_before.as_secs() - window.valid_after.as_secs(), 40);
    }

    #[tokio::test]
    async fn unknown_asset_without_domain_fails() {
        let mut requirement = requirement();
        requirement.asset = "0x0000000000000000000000000000000000000001".into();
        assert!(matches!(
            signer().sign(&requirement).await,
            Err(SchemeError::UnknownAsset { .. })
        ));
        let requirement = requirement.with_token_domain("Token", "1");
        assert!(signer().sign(&requirement).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_network_fails() {
        let mut requirement = requirement();
        requirement.network = "eip155:999999".into();
        assert!(matches!(
            signer().sign(&requirement).await,
            Err(SchemeError::UnsupportedNetwork(_))
        ));
    }
}
