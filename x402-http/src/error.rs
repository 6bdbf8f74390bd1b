//! Error types for the HTTP transport layer.

use x402_core::proto::AdapterError;

/// Failure to turn an x402 message into an HTTP header, or back.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The message could not be encoded or decoded.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    /// The encoded value is not a legal header value.
    #[error("invalid value for header {name}: {message}")]
    HeaderValue {
        /// Header being written.
        name: &'static str,
        /// Why the value was refused.
        message: String,
    },
    /// The protocol header name is not a legal header name.
    #[error("invalid header name {0}")]
    HeaderName(&'static str),
}
