//! Base64 helpers for x402 headers and serialized transactions.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Display;

/// Bytes holding base64 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Bytes(pub Vec<u8>);

impl Base64Bytes {
    /// Decodes the held base64 text into raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not valid base64.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        b64.decode(&self.0)
    }

    /// Encodes raw bytes into base64 text.
    pub fn encode<T: AsRef<[u8]>>(input: T) -> Self {
        let encoded = b64.encode(input.as_ref());
        Self(encoded.into_bytes())
    }
}

impl AsRef<[u8]> for Base64Bytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for Base64Bytes {
    fn from(slice: &[u8]) -> Self {
        Self(slice.to_vec())
    }
}

impl From<&str> for Base64Bytes {
    fn from(value: &str) -> Self {
        Self(value.trim().as_bytes().to_vec())
    }
}

impl Display for Base64Bytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Failure while turning a value into or out of base64(JSON).
#[derive(Debug, thiserror::Error)]
pub enum Base64JsonError {
    /// The text was not valid base64.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The decoded bytes were not the expected JSON document.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializes `value` to JSON and base64-encodes the result.
///
/// # Errors
///
/// Returns [`Base64JsonError::Json`] if serialization fails.
pub fn to_base64_json<T: Serialize + ?Sized>(value: &T) -> Result<String, Base64JsonError> {
    let json = serde_json::to_vec(value)?;
    Ok(b64.encode(json))
}

/// Decodes base64 text and parses the bytes as JSON.
///
/// # Errors
///
/// Returns [`Base64JsonError`] when either step fails.
pub fn from_base64_json<T: DeserializeOwned>(text: &str) -> Result<T, Base64JsonError> {
    let bytes = Base64Bytes::from(text).decode()?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_json_reads_back() {
        let value = serde_json::json!({"success": true, "network": "base"});
        let text = to_base64_json(&value).unwrap();
        let back: serde_json::Value = from_base64_json(&text).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn garbage_is_rejected_by_kind() {
        assert!(matches!(
            from_base64_json::<serde_json::Value>("%%%"),
            Err(Base64JsonError::Base64(_))
        ));
        let not_json = Base64Bytes::encode(b"not json").to_string();
        assert!(matches!(
            from_base64_json::<serde_json::Value>(&not_json),
            Err(Base64JsonError::Json(_))
        ));
    }
}
