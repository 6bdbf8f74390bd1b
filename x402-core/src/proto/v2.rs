//! Version 2 wire types.
//!
//! Every message is base64(JSON) in a header: `PAYMENT-REQUIRED` on the 402
//! response (no body), `PAYMENT-SIGNATURE` on the retried request and
//! `PAYMENT-RESPONSE` on success. Networks are CAIP-2 ids and the payment
//! echoes the whole requirement the client accepted.

use serde::{Deserialize, Serialize};

use super::Version;
use crate::types::{ExactPayload, ResourceInfo};

/// `x402Version: 2`.
pub type X402Version2 = Version<2>;

/// The version 2 marker value.
pub const V2: X402Version2 = Version;

/// A requirement as listed in a version 2 `accepts` array, and as echoed
/// back in `accepted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// Scheme name, e.g. `exact`.
    pub scheme: String,
    /// CAIP-2 network id, e.g. `eip155:84532`.
    pub network: String,
    /// Atomic amount as a decimal string.
    pub amount: String,
    /// Token contract or mint.
    pub asset: String,
    /// Recipient address.
    pub pay_to: String,
    /// How long a signed payment stays usable.
    pub max_timeout_seconds: u64,
    /// Scheme data, e.g. the EIP-712 domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Content of the `PAYMENT-REQUIRED` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    /// Always 2.
    pub x402_version: X402Version2,
    /// The protected resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceInfo>,
    /// Requirements the client may pay.
    #[serde(default)]
    pub accepts: Vec<PaymentRequirements>,
    /// Why the request was not served.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Content of the `PAYMENT-SIGNATURE` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    /// Always 2.
    pub x402_version: X402Version2,
    /// The requirement being paid, echoed verbatim.
    pub accepted: PaymentRequirements,
    /// The signed payment.
    pub payload: ExactPayload,
    /// The resource the payment is for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceInfo>,
}
