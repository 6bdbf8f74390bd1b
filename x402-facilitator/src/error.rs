//! Error responses of the facilitator API.
//!
//! Client mistakes answer 400. A scheme or network this facilitator does not
//! serve is not an error of the request: it answers 200 with an invalid
//! verification or a failed settlement carrying `unsupported_scheme`, like
//! any other rejected payment. Failures of the facilitator itself answer 500.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use x402_core::error::{ErrorReason, SchemeError};
use x402_core::proto::AdapterError;
use x402_core::types::{SettlementResult, VerificationResult};

/// The call a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `POST /verify`.
    Verify,
    /// `POST /settle`.
    Settle,
    /// `GET /supported`.
    Supported,
}

/// Failures of the facilitator endpoints, mapped to HTTP answers.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorError {
    /// The body is not a facilitator request.
    #[error("invalid request body: {0}")]
    InvalidBody(#[from] serde_json::Error),

    /// The nested payment or requirement does not decode.
    #[error("invalid payment: {0}")]
    Protocol(AdapterError),

    /// No scheme handler for the request.
    #[error("unsupported scheme on network {network}")]
    Unsupported {
        /// Endpoint that was called.
        operation: Operation,
        /// Network the request named.
        network: String,
    },

    /// The scheme handler failed to reach its chain.
    #[error("{operation:?} failed: {source}")]
    Scheme {
        /// Endpoint that was called.
        operation: Operation,
        /// The handler's error.
        #[source]
        source: SchemeError,
    },
}

impl FacilitatorError {
    /// Classifies a decode failure: an unknown scheme is answered as
    /// unsupported, anything else is a bad request.
    #[must_use]
    pub fn decode(operation: Operation, network: String, error: AdapterError) -> Self {
        match error.reason() {
            ErrorReason::UnsupportedScheme => Self::Unsupported { operation, network },
            _ => Self::Protocol(error),
        }
    }

    /// A scheme handler failure during `operation`.
    #[must_use]
    pub const fn scheme(operation: Operation, source: SchemeError) -> Self {
        Self::Scheme { operation, source }
    }
}

impl IntoResponse for FacilitatorError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidBody(_) => {
                let body = serde_json::json!({
                    "error": self.to_string(),
                    "reason": ErrorReason::InvalidPayload.as_str(),
                });
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            Self::Protocol(ref e) => {
                let body = serde_json::json!({
                    "error": self.to_string(),
                    "reason": e.reason().as_str(),
                });
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            Self::Unsupported {
                operation: Operation::Settle,
                network,
            } => Json(SettlementResult::failed(ErrorReason::UnsupportedScheme, network, None))
                .into_response(),
            Self::Unsupported { .. } => {
                Json(VerificationResult::invalid(ErrorReason::UnsupportedScheme, None)).into_response()
            }
            Self::Scheme { operation, source } => {
                tracing::error!(?operation, error = %source, "scheme handler failed");
                let error = match operation {
                    Operation::Verify => ErrorReason::UnexpectedVerifyError.as_str(),
                    Operation::Settle => ErrorReason::UnexpectedSettleError.as_str(),
                    Operation::Supported => "supported_unavailable",
                };
                let body = serde_json::json!({
                    "error": error,
                    "message": source.to_string(),
                });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}
