//! Reading and writing x402 headers on `http` types.
//!
//! Encoding itself (base64 of JSON, per version) is done by
//! [`ProtocolAdapter`]; this module only moves the resulting strings in and
//! out of a [`HeaderMap`].

use http::header::{self, HeaderName, HeaderValue};
use http::HeaderMap;
use x402_core::SettlementResult;
use x402_core::proto::{ProtocolAdapter, ProtocolVersion};
use x402_core::server::{IncomingPayment, ResponseHeader};

use crate::constants::PAYMENT_REQUIRED_HEADER;
use crate::error::HttpError;

/// Finds the payment header on a request.
///
/// The header name decides the version. A version 2 header wins when a
/// client sends both.
#[must_use]
pub fn incoming_payment(headers: &HeaderMap) -> Option<IncomingPayment<'_>> {
    [ProtocolVersion::V2, ProtocolVersion::V1]
        .into_iter()
        .find_map(|version| {
            let value = headers.get(version.payment_header())?.to_str().ok()?;
            Some(IncomingPayment::new(version, value.trim()))
        })
}

/// The `PAYMENT-REQUIRED` value of a 402, when present and readable.
#[must_use]
pub fn payment_required_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(PAYMENT_REQUIRED_HEADER)
        .and_then(|value| value.to_str().ok())
}

/// Reads the settlement summary a server attached to a paid response.
///
/// Looks for `PAYMENT-RESPONSE` first, then `X-PAYMENT-RESPONSE`.
#[must_use]
pub fn settlement_response(
    headers: &HeaderMap,
    adapter: &ProtocolAdapter,
) -> Option<SettlementResult> {
    [ProtocolVersion::V2, ProtocolVersion::V1]
        .into_iter()
        .find_map(|version| {
            let value = headers.get(version.response_header())?.to_str().ok()?;
            adapter.decode_settlement(value).ok()
        })
}

/// Converts an encoded header into `http` types.
///
/// # Errors
///
/// The name or value is not legal in HTTP.
pub fn to_header(name: &'static str, value: &str) -> Result<(HeaderName, HeaderValue), HttpError> {
    let header_name = HeaderName::try_from(name).map_err(|_| HttpError::HeaderName(name))?;
    let header_value = HeaderValue::from_str(value).map_err(|e| HttpError::HeaderValue {
        name,
        message: e.to_string(),
    })?;
    Ok((header_name, header_value))
}

/// Inserts every header in `headers` and lists their names in
/// `Access-Control-Expose-Headers`.
///
/// # Errors
///
/// A header could not be converted; earlier headers stay inserted.
pub fn insert_all(target: &mut HeaderMap, headers: &[ResponseHeader]) -> Result<(), HttpError> {
    for h in headers {
        let (name, value) = to_header(h.name, &h.value)?;
        target.insert(name, value);
    }
    let names: Vec<&str> = headers.iter().map(|h| h.name).collect();
    expose_headers(target, &names);
    Ok(())
}

/// Adds `names` to `Access-Control-Expose-Headers`, keeping what is already
/// listed and skipping duplicates (case-insensitively).
pub fn expose_headers(target: &mut HeaderMap, names: &[&str]) {
    if names.is_empty() {
        return;
    }
    let mut exposed: Vec<String> = target
        .get_all(header::ACCESS_CONTROL_EXPOSE_HEADERS)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_owned())
        .filter(|name| !name.is_empty())
        .collect();
    for name in names {
        if !exposed.iter().any(|e| e.eq_ignore_ascii_case(name)) {
            exposed.push((*name).to_owned());
        }
    }
    if let Ok(value) = HeaderValue::from_str(&exposed.join(", ")) {
        target.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use x402_core::networks::{NetworkInfo, NetworkRegistry};

    #[test]
    fn version_two_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("x-payment", HeaderValue::from_static("v1"));
        assert_eq!(
            incoming_payment(&headers),
            Some(IncomingPayment::new(ProtocolVersion::V1, "v1"))
        );
        headers.insert("payment-signature", HeaderValue::from_static(" v2 "));
        assert_eq!(
            incoming_payment(&headers),
            Some(IncomingPayment::new(ProtocolVersion::V2, "v2"))
        );
        assert!(incoming_payment(&HeaderMap::new()).is_none());
    }

    #[test]
    fn expose_headers_merges_without_duplicates() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static("X-Request-Id, payment-response"),
        );
        expose_headers(&mut headers, &["PAYMENT-RESPONSE", "PAYMENT-REQUIRED"]);
        assert_eq!(
            headers[header::ACCESS_CONTROL_EXPOSE_HEADERS],
            "X-Request-Id, payment-response, PAYMENT-REQUIRED"
        );
    }

    #[test]
    fn insert_all_sets_and_exposes() {
        let mut headers = HeaderMap::new();
        insert_all(
            &mut headers,
            &[ResponseHeader {
                name: "PAYMENT-RESPONSE",
                value: "eyJ9".into(),
            }],
        )
        .unwrap();
        assert_eq!(headers["payment-response"], "eyJ9");
        assert_eq!(headers[header::ACCESS_CONTROL_EXPOSE_HEADERS], "PAYMENT-RESPONSE");

        let err = insert_all(
            &mut headers,
            &[ResponseHeader {
                name: "PAYMENT-RESPONSE",
                value: "line\nbreak".into(),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, HttpError::HeaderValue { name: "PAYMENT-RESPONSE", .. }));
    }

    #[test]
    fn reads_settlement_from_either_header() {
        let networks = Arc::new(NetworkRegistry::from_networks(&[NetworkInfo {
            name: "base",
            namespace: "eip155",
            reference: "8453",
        }]));
        let adapter = ProtocolAdapter::new(networks);
        let settled = SettlementResult::settled("0xabc", "eip155:8453", Some("0xPAYER".into()));

        let mut headers = HeaderMap::new();
        let value = adapter.encode_settlement(ProtocolVersion::V1, &settled).unwrap();
        headers.insert("x-payment-response", HeaderValue::from_str(&value).unwrap());
        let read = settlement_response(&headers, &adapter).unwrap();
        assert!(read.success);
        assert_eq!(read.network, "base");
        assert_eq!(read.transaction.as_deref(), Some("0xabc"));

        assert!(settlement_response(&HeaderMap::new(), &adapter).is_none());
    }
}
