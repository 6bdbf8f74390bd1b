//! Axum route handlers for the facilitator HTTP API.
//!
//! `POST /verify` and `POST /settle` take `{x402Version, paymentPayload,
//! paymentRequirements}` in either protocol version; `x402Version` selects
//! the shape of the nested documents.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use x402_core::facilitator::Facilitator;
use x402_core::proto::{DiscoveryResponse, FacilitatorRequest, ProtocolAdapter, SupportedResponse};
use x402_core::types::{PaymentPayload, PaymentRequirement, SettlementResult, VerificationResult};

use crate::discovery::{DEFAULT_LIMIT, DiscoveryCatalog};
use crate::error::{FacilitatorError, Operation};
use crate::schemes::LocalFacilitator;

/// Everything the handlers share.
#[derive(Debug)]
pub struct AppState {
    /// Scheme handlers per served chain.
    pub facilitator: LocalFacilitator,
    /// Decodes request bodies.
    pub adapter: ProtocolAdapter,
    /// Resources listed by discovery.
    pub catalog: DiscoveryCatalog,
}

impl AppState {
    /// State over `facilitator` with an empty discovery catalog.
    #[must_use]
    pub fn new(facilitator: LocalFacilitator) -> Self {
        let adapter = ProtocolAdapter::new(Arc::clone(facilitator.networks()));
        Self {
            facilitator,
            adapter,
            catalog: DiscoveryCatalog::new(),
        }
    }

    /// Replaces the discovery catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: DiscoveryCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    fn decode(
        &self,
        operation: Operation,
        body: &[u8],
    ) -> Result<(PaymentPayload, PaymentRequirement), FacilitatorError> {
        let request: FacilitatorRequest = serde_json::from_slice(body)?;
        self.adapter.decode_facilitator_request(&request).map_err(|e| {
            let network = request
                .payment_requirements
                .get("network")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_owned();
            FacilitatorError::decode(operation, network, e)
        })
    }
}

/// Router state.
pub type FacilitatorState = Arc<AppState>;

/// `POST /verify`
///
/// # Errors
///
/// 400 on a malformed body, 500 when the chain cannot be reached.
pub async fn post_verify(
    State(state): State<FacilitatorState>,
    body: Bytes,
) -> Result<Json<VerificationResult>, FacilitatorError> {
    let (payment, requirement) = state.decode(Operation::Verify, &body)?;
    let result = state
        .facilitator
        .verify(&payment, &requirement)
        .await
        .map_err(|e| FacilitatorError::scheme(Operation::Verify, e))?;
    tracing::debug!(
        network = %payment.network,
        valid = result.is_valid,
        reason = ?result.invalid_reason,
        "verified"
    );
    Ok(Json(result))
}

/// `POST /settle`
///
/// # Errors
///
/// 400 on a malformed body, 500 when the chain cannot be reached.
pub async fn post_settle(
    State(state): State<FacilitatorState>,
    body: Bytes,
) -> Result<Json<SettlementResult>, FacilitatorError> {
    let (payment, requirement) = state.decode(Operation::Settle, &body)?;
    let result = state
        .facilitator
        .settle(&payment, &requirement)
        .await
        .map_err(|e| FacilitatorError::scheme(Operation::Settle, e))?;
    tracing::info!(
        network = %result.network,
        success = result.success,
        transaction = result.transaction.as_deref().unwrap_or_default(),
        reason = ?result.error_reason,
        "settled"
    );
    Ok(Json(result))
}

/// `GET /supported`
///
/// # Errors
///
/// 500 when a scheme handler cannot list its kinds.
pub async fn get_supported(
    State(state): State<FacilitatorState>,
) -> Result<Json<SupportedResponse>, FacilitatorError> {
    let supported = state
        .facilitator
        .supported()
        .await
        .map_err(|e| FacilitatorError::scheme(Operation::Supported, e))?;
    Ok(Json(supported))
}

/// Query of `GET /discovery/resources`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DiscoveryQuery {
    /// Items to skip.
    #[serde(default)]
    pub offset: Option<usize>,
    /// Page size.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `GET /discovery/resources?offset=&limit=`
pub async fn get_discovery_resources(
    State(state): State<FacilitatorState>,
    Query(query): Query<DiscoveryQuery>,
) -> Json<DiscoveryResponse> {
    let page = state
        .catalog
        .page(query.offset.unwrap_or(0), query.limit.unwrap_or(DEFAULT_LIMIT))
        .await;
    Json(page)
}

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Creates a [`Router`] with every facilitator endpoint.
pub fn facilitator_router(state: FacilitatorState) -> Router {
    Router::new()
        .route("/verify", post(post_verify))
        .route("/settle", post(post_settle))
        .route("/supported", get(get_supported))
        .route("/discovery/resources", get(get_discovery_resources))
        .route("/health", get(health))
        .with_state(state)
}
