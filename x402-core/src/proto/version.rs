//! Protocol version markers.
//!
//! [`Version<N>`] pins a wire struct to one version: it serializes as the bare
//! integer and refuses any other value. [`ProtocolVersion`] is the runtime
//! choice between the two encodings and owns the header names of each.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A version field fixed to `N`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Version<const N: u8>;

impl<const N: u8> Version<N> {
    /// The pinned version number.
    pub const VALUE: u8 = N;
}

impl<const N: u8> Serialize for Version<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(N)
    }
}

impl<'de, const N: u8> Deserialize<'de> for Version<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = u8::deserialize(deserializer)?;
        if v == N {
            Ok(Self)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected x402Version {N}, got {v}"
            )))
        }
    }
}

/// One of the two incompatible wire encodings.
///
/// The version decides every header name of an exchange; names of the two
/// versions are never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolVersion {
    /// JSON 402 body, `X-PAYMENT` request header.
    V1,
    /// Base64 headers in both directions.
    #[default]
    V2,
}

impl ProtocolVersion {
    /// Request header carrying the client's payment.
    #[must_use]
    pub const fn payment_header(&self) -> &'static str {
        match self {
            Self::V1 => "X-PAYMENT",
            Self::V2 => "PAYMENT-SIGNATURE",
        }
    }

    /// Response header carrying the settlement summary.
    #[must_use]
    pub const fn response_header(&self) -> &'static str {
        match self {
            Self::V1 => "X-PAYMENT-RESPONSE",
            Self::V2 => "PAYMENT-RESPONSE",
        }
    }

    /// Response header carrying the 402 demand. Version 1 uses the body.
    #[must_use]
    pub const fn payment_required_header(&self) -> Option<&'static str> {
        match self {
            Self::V1 => None,
            Self::V2 => Some("PAYMENT-REQUIRED"),
        }
    }

    /// The `x402Version` number.
    #[must_use]
    pub const fn as_u8(&self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    /// The version numbered `value`, if supported.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }

    /// The version whose payment header is named `name`, ignoring case.
    #[must_use]
    pub fn from_payment_header(name: &str) -> Option<Self> {
        [Self::V2, Self::V1]
            .into_iter()
            .find(|version| version.payment_header().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = u8::deserialize(deserializer)?;
        Self::from_u8(v)
            .ok_or_else(|| serde::de::Error::custom(format!("unsupported x402Version {v}")))
    }
}
