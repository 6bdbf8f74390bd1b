//! HTTP-level constants for the x402 protocol.
//!
//! Header names are spelled the way the protocol documents them; lookups in
//! `http::HeaderMap` are case-insensitive.

/// Version 2 payment header (client to server).
pub const PAYMENT_SIGNATURE_HEADER: &str = "PAYMENT-SIGNATURE";

/// Version 2 demand header on a 402 (server to client).
pub const PAYMENT_REQUIRED_HEADER: &str = "PAYMENT-REQUIRED";

/// Version 2 settlement summary (server to client).
pub const PAYMENT_RESPONSE_HEADER: &str = "PAYMENT-RESPONSE";

/// Version 1 payment header.
pub const X_PAYMENT_HEADER: &str = "X-PAYMENT";

/// Version 1 settlement summary.
pub const X_PAYMENT_RESPONSE_HEADER: &str = "X-PAYMENT-RESPONSE";

/// CORS header listing the x402 headers browsers may read.
pub const ACCESS_CONTROL_EXPOSE_HEADERS: &str = "Access-Control-Expose-Headers";

/// `402 Payment Required`.
pub const HTTP_STATUS_PAYMENT_REQUIRED: u16 = 402;

/// Public facilitator used when none is configured.
pub const DEFAULT_FACILITATOR_URL: &str = "https://x402.org/facilitator";

/// Resource MIME type advertised when a route does not set one.
pub const DEFAULT_MIME_TYPE: &str = "application/json";
