//! Version 1 wire types.
//!
//! The 402 demand travels as a JSON body, the payment as base64(JSON) in the
//! `X-PAYMENT` request header. Networks are named (`base-sepolia`), the amount
//! field is `maxAmountRequired`, and the payment carries no echo of the chosen
//! requirement, only its scheme and network.

use serde::{Deserialize, Serialize};

use super::Version;
use crate::types::PaymentAuthorization;

/// `x402Version: 1`.
pub type X402Version1 = Version<1>;

/// The version 1 marker value.
pub const V1: X402Version1 = Version;

/// A requirement as listed in a version 1 `accepts` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// Scheme name, e.g. `exact`.
    pub scheme: String,
    /// Network name, e.g. `base-sepolia`.
    pub network: String,
    /// Atomic amount as a decimal string.
    pub max_amount_required: String,
    /// URL of the protected resource.
    #[serde(default)]
    pub resource: String,
    /// Human description of the resource.
    #[serde(default)]
    pub description: String,
    /// MIME type of the resource.
    #[serde(default)]
    pub mime_type: String,
    /// JSON schema of the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    /// Recipient address.
    pub pay_to: String,
    /// How long a signed payment stays usable.
    #[serde(default)]
    pub max_timeout_seconds: u64,
    /// Token contract or mint.
    pub asset: String,
    /// Scheme data, e.g. the EIP-712 domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Body of a version 1 `402 Payment Required` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    /// Always 1.
    pub x402_version: X402Version1,
    /// Requirements the client may pay.
    #[serde(default)]
    pub accepts: Vec<PaymentRequirements>,
    /// Why the request was not served.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Scheme payload inside `X-PAYMENT`. The resource binding sits next to
/// the signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactPayload {
    /// Scheme signature or signed transaction.
    pub signature: String,
    /// The signed transfer terms.
    pub authorization: PaymentAuthorization,
    /// URL the payment was made for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

/// Decoded `X-PAYMENT` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    /// Always 1.
    pub x402_version: X402Version1,
    /// Scheme of the chosen requirement.
    pub scheme: String,
    /// Network of the chosen requirement.
    pub network: String,
    /// The signed payment.
    pub payload: ExactPayload,
}
