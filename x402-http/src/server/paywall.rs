//! Per-route payment configuration and the request lifecycle around it.

use std::sync::Arc;

use axum_core::body::Body;
use axum_core::extract::Request;
use axum_core::response::Response;
use http::header::{self, HeaderValue};
use http::{StatusCode, Uri};
use tower::Service;
use url::Url;
use x402_core::chain::SOLANA_NAMESPACE;
use x402_core::facilitator::Facilitator;
use x402_core::networks::NetworkRegistry;
use x402_core::proto::PaymentRequiredWire;
use x402_core::server::{HandleOutcome, OptimisticSettlement, PaymentEngine, SettlementMode};
use x402_core::{PaymentRequirement, ResourceInfo};

#[cfg(feature = "telemetry")]
use tracing::{Instrument, debug, instrument, warn};

use super::layer::PaywallLayer;
use crate::constants::DEFAULT_MIME_TYPE;
use crate::headers::{expose_headers, incoming_payment, insert_all, to_header};

/// What a protected route charges and how it settles.
///
/// Cheap to clone; the engine and requirement list are shared.
#[derive(Debug)]
pub struct Paywall<F> {
    engine: Arc<PaymentEngine<F>>,
    accepts: Arc<Vec<PaymentRequirement>>,
    description: String,
    mime_type: String,
    resource: Option<String>,
    base_url: Option<Url>,
    mode: SettlementMode,
}

impl<F> Clone for Paywall<F> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            accepts: Arc::clone(&self.accepts),
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
            resource: self.resource.clone(),
            base_url: self.base_url.clone(),
            mode: self.mode,
        }
    }
}

impl<F> Paywall<F> {
    /// A paywall with no requirements. Add at least one with
    /// [`Paywall::with_requirement`]; a paywall that accepts nothing lets
    /// every request through.
    #[must_use]
    pub fn new(engine: PaymentEngine<F>) -> Self {
        Self::from_shared(Arc::new(engine))
    }

    /// Like [`Paywall::new`], for an engine shared between routes.
    #[must_use]
    pub fn from_shared(engine: Arc<PaymentEngine<F>>) -> Self {
        Self {
            engine,
            accepts: Arc::new(Vec::new()),
            description: String::new(),
            mime_type: DEFAULT_MIME_TYPE.to_owned(),
            resource: None,
            base_url: None,
            mode: SettlementMode::default(),
        }
    }

    /// Adds an accepted payment option. Order is kept in the 402 demand.
    #[must_use]
    pub fn with_requirement(mut self, requirement: PaymentRequirement) -> Self {
        Arc::make_mut(&mut self.accepts).push(requirement);
        self
    }

    /// Description of the protected resource.
    #[must_use]
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    /// MIME type of the protected resource. Defaults to `application/json`.
    #[must_use]
    pub fn with_mime_type<S: Into<String>>(mut self, mime_type: S) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Fixes the canonical resource URL instead of deriving it per request.
    #[must_use]
    #[allow(clippy::needless_pass_by_value)]
    pub fn with_resource(mut self, resource: Url) -> Self {
        self.resource = Some(resource.to_string());
        self
    }

    /// Origin the canonical resource URL is built on.
    ///
    /// Without it the request's `Host` header is used over plain `http`,
    /// which is only right behind a trusted proxy.
    #[must_use]
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// When settlement runs relative to the handler.
    #[must_use]
    pub const fn with_settlement_mode(mut self, mode: SettlementMode) -> Self {
        self.mode = mode;
        self
    }

    /// Requirements as configured, before enrichment.
    #[must_use]
    pub fn accepts(&self) -> &[PaymentRequirement] {
        &self.accepts
    }

    /// The configured settlement mode.
    #[must_use]
    pub const fn settlement_mode(&self) -> SettlementMode {
        self.mode
    }

    /// The engine requests are handled by.
    #[must_use]
    pub fn engine(&self) -> &PaymentEngine<F> {
        &self.engine
    }

    /// The tower layer enforcing this paywall.
    #[must_use]
    pub fn layer(&self) -> PaywallLayer<F> {
        PaywallLayer::new(self.clone())
    }

    /// Canonical URL of the requested resource: base URL plus the request
    /// path and query.
    #[must_use]
    pub fn resource_url(&self, uri: &Uri, host: Option<&str>) -> String {
        if let Some(resource) = &self.resource {
            return resource.clone();
        }
        let base = self.base_url.clone().or_else(|| {
            #[cfg(feature = "telemetry")]
            warn!("paywall base_url is not configured; using the Host header as origin");
            Url::parse(&format!("http://{}/", host.unwrap_or("localhost"))).ok()
        });
        match base {
            Some(mut url) => {
                url.set_path(uri.path());
                url.set_query(uri.query());
                url.to_string()
            }
            None => format!(
                "http://localhost{}",
                uri.path_and_query().map_or("/", |pq| pq.as_str())
            ),
        }
    }

    /// Resource description for `req`.
    #[must_use]
    pub fn resource_info(&self, req: &Request) -> ResourceInfo {
        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|value| value.to_str().ok());
        ResourceInfo {
            url: self.resource_url(req.uri(), host),
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

impl<F> Paywall<F>
where
    F: Facilitator + Sync,
{
    /// The accepted requirements, with a fee payer filled in from the
    /// facilitator's `/supported` answer where a requirement lacks one.
    pub async fn resolved_accepts(&self) -> Vec<PaymentRequirement> {
        let mut accepts = (*self.accepts).clone();
        let networks = self.engine.adapter().networks();
        if accepts
            .iter()
            .all(|r| r.fee_payer().is_some() || !needs_fee_payer(networks, r))
        {
            return accepts;
        }
        let supported = match self.engine.facilitator().supported().await {
            Ok(supported) => supported,
            Err(_e) => {
                #[cfg(feature = "telemetry")]
                warn!(error = %_e, "facilitator /supported unavailable");
                return accepts;
            }
        };
        for requirement in accepts
            .iter_mut()
            .filter(|r| r.fee_payer().is_none() && needs_fee_payer(networks, r))
        {
            let fee_payer = supported
                .kinds
                .iter()
                .filter(|kind| kind.scheme == requirement.scheme.as_str())
                .filter(|kind| networks.same_network(&kind.network, &requirement.network))
                .find_map(|kind| kind.extra.as_ref()?.get("feePayer")?.as_str().map(str::to_owned));
            if let Some(fee_payer) = fee_payer {
                *requirement = requirement.clone().with_fee_payer(fee_payer);
            }
        }
        accepts
    }

    /// Runs the handshake for one request around `inner`.
    ///
    /// - Payment problems answer 402 and `inner` never runs.
    /// - A facilitator that cannot verify answers 500.
    /// - In optimistic mode settlement runs once `inner` has produced its
    ///   response head and before any body byte is sent; a failure then
    ///   replaces the response with a 402. Error responses from `inner` are
    ///   passed through without settling.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "x402.paywall.handle_request", skip_all, fields(mode = ?self.mode))
    )]
    pub async fn handle_request<S>(&self, mut inner: S, req: Request) -> Response
    where
        S: Service<Request, Response = Response, Error = std::convert::Infallible>,
        S::Future: Send,
    {
        let accepts = self.resolved_accepts().await;
        if accepts.is_empty() {
            return call_inner(&mut inner, req).await;
        }

        let resource = self.resource_info(&req);
        let mut outcome = {
            let incoming = incoming_payment(req.headers());
            self.engine.handle(&accepts, &resource, incoming, self.mode).await
        };
        if !outcome.can_continue {
            return rejection(outcome);
        }

        let pending = outcome.take_pending();
        let mut response = call_inner(&mut inner, req).await;
        let mut headers = outcome.headers;

        if let Some(pending) = pending {
            let status = response.status();
            if status.is_client_error() || status.is_server_error() {
                #[cfg(feature = "telemetry")]
                debug!(%status, "handler failed, payment not settled");
                return response;
            }
            match self.engine.settle_pending(pending, false).await {
                OptimisticSettlement::Settled { header, .. } => headers.push(header),
                OptimisticSettlement::Rejected(outcome) => return rejection(*outcome),
                OptimisticSettlement::Unrecoverable { error: _error } => {
                    #[cfg(feature = "telemetry")]
                    warn!(error = %_error, "settlement header unavailable");
                }
            }
        }

        if let Err(_e) = insert_all(response.headers_mut(), &headers) {
            #[cfg(feature = "telemetry")]
            warn!(error = %_e, "failed to attach settlement header");
        }
        response
    }
}

/// Requirements that settle through a facilitator-paid transaction.
fn needs_fee_payer(networks: &NetworkRegistry, requirement: &PaymentRequirement) -> bool {
    networks
        .resolve(&requirement.network)
        .is_some_and(|chain_id| chain_id.namespace() == SOLANA_NAMESPACE)
}

async fn call_inner<S>(inner: &mut S, req: Request) -> Response
where
    S: Service<Request, Response = Response, Error = std::convert::Infallible>,
    S::Future: Send,
{
    let fut = inner.call(req);
    #[cfg(feature = "telemetry")]
    let fut = fut.instrument(tracing::info_span!("inner"));
    match fut.await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

/// Turns a non-continuing outcome into a 402 or 500 response.
fn rejection(outcome: HandleOutcome) -> Response {
    let status =
        StatusCode::from_u16(outcome.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let expose = outcome.expose_headers();
    let mut response = match outcome.payment_required {
        Some(PaymentRequiredWire::Body(body)) => {
            let mut response = Response::new(Body::from(body));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            response
        }
        Some(PaymentRequiredWire::Header { name, value }) => {
            let mut response = Response::new(Body::empty());
            match to_header(name, &value) {
                Ok((name, value)) => {
                    response.headers_mut().insert(name, value);
                }
                Err(_e) => {
                    #[cfg(feature = "telemetry")]
                    warn!(error = %_e, "failed to attach payment required header");
                }
            }
            response
        }
        None => {
            let body = serde_json::json!({
                "error": outcome.error,
                "reason": outcome.reason,
            });
            let mut response = Response::new(Body::from(body.to_string()));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            response
        }
    };
    *response.status_mut() = status;
    if let Err(_e) = insert_all(response.headers_mut(), &outcome.headers) {
        #[cfg(feature = "telemetry")]
        warn!(error = %_e, "failed to attach response header");
    }
    expose_headers(response.headers_mut(), &expose);
    response
}
