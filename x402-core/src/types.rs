//! Version-agnostic domain model.
//!
//! Both wire encodings decode into these types (see [`crate::proto::adapter`]),
//! and every role (selector, signer, validation engine, facilitator) works
//! on them only. Amounts are [`TokenAmount`]s and validity bounds are
//! [`UnixTimestamp`]s; addresses stay strings because their format depends
//! on the chain family.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::amount::TokenAmount;
use crate::assets::{AssetRegistry, PriceError, same_address};
use crate::error::{ErrorReason, PaymentVerificationError};
use crate::networks::NetworkRegistry;
use crate::proto::ProtocolVersion;
use crate::timestamp::UnixTimestamp;

/// Payment scheme. Only `exact` (pay precisely the stated amount) exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Transfer exactly the stated amount.
    Exact,
}

impl Scheme {
    /// Wire name of the scheme.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheme name this build does not implement.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unsupported scheme {0}")]
pub struct UnknownScheme(pub String);

impl FromStr for Scheme {
    type Err = UnknownScheme;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(Self::Exact),
            other => Err(UnknownScheme(other.to_owned())),
        }
    }
}

/// Scheme-specific data attached to a requirement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementExtra {
    /// EIP-712 domain name of the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// EIP-712 domain version of the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Solana account that pays transaction fees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_payer: Option<String>,
    /// Fields this crate does not interpret, kept for round trips.
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

impl RequirementExtra {
    fn is_empty(&self) -> bool {
        self.name.is_none() && self.version.is_none() && self.fee_payer.is_none() && self.other.is_empty()
    }
}

/// Terms under which a server accepts payment for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    /// Payment scheme.
    pub scheme: Scheme,
    /// Network name or CAIP-2 id.
    pub network: String,
    /// Token contract address or mint.
    pub asset: String,
    /// Recipient address.
    pub pay_to: String,
    /// Amount in atomic units.
    pub amount: TokenAmount,
    /// How long a signed payment stays usable.
    pub max_timeout_seconds: u64,
    /// Scheme-specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<RequirementExtra>,
    /// URL of the protected resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Human description of the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type of the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// JSON schema of the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    /// Whether the resource may be listed by discovery services.
    #[serde(default)]
    pub discoverable: bool,
}

impl PaymentRequirement {
    /// Default `maxTimeoutSeconds` for new requirements.
    pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

    /// An `exact` requirement with no extra data.
    pub fn exact<N, A, P>(network: N, asset: A, pay_to: P, amount: TokenAmount) -> Self
    where
        N: Into<String>,
        A: Into<String>,
        P: Into<String>,
    {
        Self {
            scheme: Scheme::Exact,
            network: network.into(),
            asset: asset.into(),
            pay_to: pay_to.into(),
            amount,
            max_timeout_seconds: Self::DEFAULT_TIMEOUT_SECONDS,
            extra: None,
            resource: None,
            description: None,
            mime_type: None,
            output_schema: None,
            discoverable: false,
        }
    }

    /// An `exact` requirement priced in the network's default asset.
    ///
    /// The asset's EIP-712 name and version are copied into `extra`.
    ///
    /// # Errors
    ///
    /// See [`AssetRegistry::price`].
    pub fn from_price(
        assets: &AssetRegistry,
        network: &str,
        pay_to: &str,
        price: &str,
    ) -> Result<Self, PriceError> {
        let (asset, amount) = assets.price(network, price)?;
        Ok(Self::exact(network, asset.address, pay_to, amount)
            .with_token_domain(asset.name, asset.version))
    }

    /// Sets the token's EIP-712 name and version in `extra`.
    #[must_use]
    pub fn with_token_domain<N: Into<String>, V: Into<String>>(mut self, name: N, version: V) -> Self {
        let extra = self.extra.get_or_insert_with(RequirementExtra::default);
        extra.name = Some(name.into());
        extra.version = Some(version.into());
        self
    }

    /// Sets the Solana fee payer in `extra`.
    #[must_use]
    pub fn with_fee_payer<S: Into<String>>(mut self, fee_payer: S) -> Self {
        self.extra
            .get_or_insert_with(RequirementExtra::default)
            .fee_payer = Some(fee_payer.into());
        self
    }

    /// Sets the resource URL.
    #[must_use]
    pub fn with_resource<S: Into<String>>(mut self, resource: S) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Sets the human description.
    #[must_use]
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the resource MIME type.
    #[must_use]
    pub fn with_mime_type<S: Into<String>>(mut self, mime_type: S) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Sets the response schema.
    #[must_use]
    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Sets how long a signed payment stays usable.
    #[must_use]
    pub const fn with_max_timeout_seconds(mut self, seconds: u64) -> Self {
        self.max_timeout_seconds = seconds;
        self
    }

    /// Lists the resource for discovery services.
    #[must_use]
    pub const fn with_discoverable(mut self, discoverable: bool) -> Self {
        self.discoverable = discoverable;
        self
    }

    /// Token name for the signing domain, if present in `extra`.
    #[must_use]
    pub fn token_name(&self) -> Option<&str> {
        self.extra.as_ref()?.name.as_deref()
    }

    /// Token version for the signing domain, if present in `extra`.
    #[must_use]
    pub fn token_version(&self) -> Option<&str> {
        self.extra.as_ref()?.version.as_deref()
    }

    /// Solana fee payer, if present in `extra`.
    #[must_use]
    pub fn fee_payer(&self) -> Option<&str> {
        self.extra.as_ref()?.fee_payer.as_deref()
    }

    /// Whether `other` states the same payment terms: scheme, network,
    /// asset, recipient and amount.
    #[must_use]
    pub fn same_terms(&self, other: &Self, networks: &NetworkRegistry) -> bool {
        self.scheme == other.scheme
            && networks.same_network(&self.network, &other.network)
            && same_address(&self.asset, &other.asset)
            && same_address(&self.pay_to, &other.pay_to)
            && self.amount == other.amount
    }

    pub(crate) fn extra_or_none(extra: RequirementExtra) -> Option<RequirementExtra> {
        if extra.is_empty() { None } else { Some(extra) }
    }
}

/// Description of the protected resource in version 2 messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    /// Resource URL.
    pub url: String,
    /// Human description.
    #[serde(default)]
    pub description: String,
    /// MIME type of the response.
    #[serde(default)]
    pub mime_type: String,
}

/// The signed, time-bounded transfer a wallet authorizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorization {
    /// Paying wallet.
    pub from: String,
    /// Recipient.
    pub to: String,
    /// Atomic amount.
    pub value: TokenAmount,
    /// Earliest time the payment may settle.
    pub valid_after: UnixTimestamp,
    /// Latest time the payment may settle.
    pub valid_before: UnixTimestamp,
    /// 32 random bytes: `0x` hex on EVM, base64 on Solana.
    pub nonce: String,
}

impl PaymentAuthorization {
    /// Checks `validAfter <= now <= validBefore`.
    ///
    /// # Errors
    ///
    /// [`PaymentVerificationError::Early`] or [`PaymentVerificationError::Expired`].
    pub fn check_window(&self, now: UnixTimestamp) -> Result<(), PaymentVerificationError> {
        if now < self.valid_after {
            return Err(PaymentVerificationError::Early);
        }
        if now > self.valid_before {
            return Err(PaymentVerificationError::Expired);
        }
        Ok(())
    }
}

/// Payload of the `exact` scheme.
///
/// On EVM `signature` is the 65-byte EIP-712 signature in hex. On Solana it
/// carries the base64 partially signed transaction instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactPayload {
    /// Signature or signed transaction.
    pub signature: String,
    /// The signed transfer terms.
    pub authorization: PaymentAuthorization,
}

/// What the client sends in the payment header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentPayload {
    /// Version the header was written in.
    pub version: ProtocolVersion,
    /// Scheme of the chosen requirement.
    pub scheme: Scheme,
    /// Network of the chosen requirement.
    pub network: String,
    /// The requirement the client chose, echoed back (version 2 only).
    pub accepted: Option<PaymentRequirement>,
    /// The signed payment.
    pub payload: ExactPayload,
    /// Resource the payment is bound to, if the client stated one.
    pub resource: Option<String>,
}

impl PaymentPayload {
    /// Builds the payload for `requirement` in the given protocol version.
    #[must_use]
    pub fn for_requirement(
        version: ProtocolVersion,
        requirement: &PaymentRequirement,
        payload: ExactPayload,
    ) -> Self {
        Self {
            version,
            scheme: requirement.scheme,
            network: requirement.network.clone(),
            accepted: match version {
                ProtocolVersion::V1 => None,
                ProtocolVersion::V2 => Some(requirement.clone()),
            },
            payload,
            resource: requirement.resource.clone(),
        }
    }

    /// Address of the paying wallet.
    #[must_use]
    pub fn payer(&self) -> &str {
        &self.payload.authorization.from
    }
}

/// A facilitator's verdict on a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// Whether the payment may be settled.
    pub is_valid: bool,
    /// Reason code when invalid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<ErrorReason>,
    /// Human detail when invalid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_message: Option<String>,
    /// Paying wallet, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

impl VerificationResult {
    /// A valid result for `payer`.
    #[must_use]
    pub fn valid<S: Into<String>>(payer: S) -> Self {
        Self {
            is_valid: true,
            invalid_reason: None,
            invalid_message: None,
            payer: Some(payer.into()),
        }
    }

    /// An invalid result with a reason code and no message.
    #[must_use]
    pub const fn invalid(reason: ErrorReason, payer: Option<String>) -> Self {
        Self {
            is_valid: false,
            invalid_reason: Some(reason),
            invalid_message: None,
            payer,
        }
    }

    /// An invalid result carrying the error's code and message.
    #[must_use]
    pub fn rejected(error: &PaymentVerificationError, payer: Option<String>) -> Self {
        Self {
            is_valid: false,
            invalid_reason: Some(error.reason()),
            invalid_message: Some(error.to_string()),
            payer,
        }
    }
}

/// Outcome of settling a payment. This is also the body of the
/// settlement-summary response header in both protocol versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResult {
    /// Whether the transfer landed.
    pub success: bool,
    /// Reason code on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<ErrorReason>,
    /// Transaction hash or signature. Serialized as `""` when absent.
    #[serde(default, serialize_with = "empty_when_none", deserialize_with = "none_when_empty")]
    pub transaction: Option<String>,
    /// Network, spelled for the protocol version.
    pub network: String,
    /// Paying wallet, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

impl SettlementResult {
    /// A successful settlement in `transaction`.
    #[must_use]
    pub fn settled<T, N>(transaction: T, network: N, payer: Option<String>) -> Self
    where
        T: Into<String>,
        N: Into<String>,
    {
        Self {
            success: true,
            error_reason: None,
            transaction: Some(transaction.into()),
            network: network.into(),
            payer,
        }
    }

    /// A failed settlement with its reason code.
    #[must_use]
    pub fn failed<N: Into<String>>(reason: ErrorReason, network: N, payer: Option<String>) -> Self {
        Self {
            success: false,
            error_reason: Some(reason),
            transaction: None,
            network: network.into(),
            payer,
        }
    }
}

#[allow(clippy::ref_option)]
fn empty_when_none<S: Serializer>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(value.as_deref().unwrap_or(""))
}

fn none_when_empty<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// Wallet-local spending policy for one asset. Never transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetAllowance {
    /// Token contract or mint.
    pub asset: String,
    /// Most the wallet will spend in total.
    pub total_allowance: TokenAmount,
    /// Most the wallet will spend on one request.
    pub max_per_request_allowance: TokenAmount,
}

impl AssetAllowance {
    /// An allowance for `asset`.
    pub fn new<S: Into<String>>(
        asset: S,
        total_allowance: TokenAmount,
        max_per_request_allowance: TokenAmount,
    ) -> Self {
        Self {
            asset: asset.into(),
            total_allowance,
            max_per_request_allowance,
        }
    }

    /// Whether this allowance covers one payment of `amount`.
    #[must_use]
    pub fn covers(&self, amount: TokenAmount) -> bool {
        self.total_allowance >= amount && self.max_per_request_allowance >= amount
    }
}

/// The demand a server sends with `402 Payment Required`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequired {
    /// Version the demand is written in.
    pub version: ProtocolVersion,
    /// The protected resource.
    pub resource: Option<ResourceInfo>,
    /// Requirements the client may pay.
    pub accepts: Vec<PaymentRequirement>,
    /// Why the request was not served.
    pub error: Option<String>,
}

impl PaymentRequired {
    /// A demand offering `accepts`.
    #[must_use]
    pub const fn new(version: ProtocolVersion, accepts: Vec<PaymentRequirement>) -> Self {
        Self {
            version,
            resource: None,
            accepts,
            error: None,
        }
    }

    /// Sets the resource description.
    #[must_use]
    pub fn with_resource(mut self, resource: Option<ResourceInfo>) -> Self {
        self.resource = resource;
        self
    }

    /// Sets the error message.
    #[must_use]
    pub fn with_error<S: Into<String>>(mut self, error: S) -> Self {
        self.error = Some(error.into());
        self
    }
}
