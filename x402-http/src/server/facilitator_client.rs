//! A [`Facilitator`] that talks to a remote x402 facilitator over HTTP.
//!
//! [`FacilitatorClient`] calls `POST /verify`, `POST /settle`,
//! `GET /supported` and `GET /discovery/resources` relative to a base URL.
//! Request bodies are built by the core
//! [`ProtocolAdapter`](x402_core::proto::ProtocolAdapter) in the payment's own
//! protocol version, so one client serves version 1 and version 2 routes.
//!
//! `/supported` answers are cached for a configurable TTL.

use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{HeaderMap, StatusCode};
use reqwest::Client;
use tokio::sync::RwLock;
use url::Url;
use x402_core::facilitator::Facilitator;
use x402_core::networks::NetworkRegistry;
use x402_core::proto::{AdapterError, DiscoveryResponse, ProtocolAdapter, SupportedResponse};
use x402_core::{PaymentPayload, PaymentRequirement, SettlementResult, VerificationResult};

#[cfg(feature = "telemetry")]
use tracing::{Instrument, Span, instrument};

#[derive(Clone, Debug)]
struct SupportedCacheState {
    response: SupportedResponse,
    expires_at: Instant,
}

/// TTL cache for the `/supported` answer.
///
/// Each clone starts empty.
#[derive(Debug)]
pub struct SupportedCache {
    ttl: Duration,
    state: RwLock<Option<SupportedCacheState>>,
}

impl SupportedCache {
    /// An empty cache. A zero `ttl` disables caching.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: RwLock::new(None),
        }
    }

    /// The cached answer, if it has not expired.
    pub async fn get(&self) -> Option<SupportedResponse> {
        let guard = self.state.read().await;
        let cache = guard.as_ref()?;
        (Instant::now() < cache.expires_at).then(|| cache.response.clone())
    }

    /// Stores `response` for one TTL.
    pub async fn set(&self, response: SupportedResponse) {
        let mut guard = self.state.write().await;
        *guard = Some(SupportedCacheState {
            response,
            expires_at: Instant::now() + self.ttl,
        });
    }

    /// Drops the cached answer.
    pub async fn clear(&self) {
        let mut guard = self.state.write().await;
        *guard = None;
    }
}

impl Clone for SupportedCache {
    fn clone(&self) -> Self {
        Self::new(self.ttl)
    }
}

/// Errors talking to a remote facilitator.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorClientError {
    /// An endpoint URL could not be built.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// What was being built.
        context: &'static str,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },
    /// The payment could not be put into a request body.
    #[error("failed to encode request: {0}")]
    Encode(#[from] AdapterError),
    /// The request did not complete.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Endpoint being called.
        context: &'static str,
        /// Client error.
        #[source]
        source: reqwest::Error,
    },
    /// The answer was not the expected JSON.
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        /// Endpoint being called.
        context: &'static str,
        /// Decode error.
        #[source]
        source: reqwest::Error,
    },
    /// The facilitator answered with a non-200 status.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Endpoint being called.
        context: &'static str,
        /// Status received.
        status: StatusCode,
        /// Response body.
        body: String,
    },
    /// The error body could not be read.
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        /// Endpoint being called.
        context: &'static str,
        /// Read error.
        #[source]
        source: reqwest::Error,
    },
}

/// HTTP client for a remote facilitator.
#[derive(Clone, Debug)]
pub struct FacilitatorClient {
    /// Base URL, always ending in a slash.
    base_url: Url,
    verify_url: Url,
    settle_url: Url,
    supported_url: Url,
    discovery_url: Url,
    client: Client,
    /// Encodes request bodies in the payment's own version.
    adapter: ProtocolAdapter,
    headers: HeaderMap,
    timeout: Option<Duration>,
    supported_cache: SupportedCache,
}

impl Facilitator for FacilitatorClient {
    type Error = FacilitatorClientError;

    async fn verify(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<VerificationResult, FacilitatorClientError> {
        let fut = Self::verify(self, payment, requirement);
        #[cfg(feature = "telemetry")]
        let fut = fut.instrument(tracing::info_span!(
            "x402.facilitator_client.verify",
            timeout = ?self.timeout,
            otel.status_code = tracing::field::Empty,
            error.message = tracing::field::Empty,
        ));
        fut.await
    }

    async fn settle(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<SettlementResult, FacilitatorClientError> {
        let fut = Self::settle(self, payment, requirement);
        #[cfg(feature = "telemetry")]
        let fut = fut.instrument(tracing::info_span!(
            "x402.facilitator_client.settle",
            timeout = ?self.timeout,
            otel.status_code = tracing::field::Empty,
            error.message = tracing::field::Empty,
        ));
        fut.await
    }

    async fn supported(&self) -> Result<SupportedResponse, FacilitatorClientError> {
        Self::supported(self).await
    }
}

impl FacilitatorClient {
    /// Default TTL for the `/supported` cache (10 minutes).
    pub const DEFAULT_SUPPORTED_CACHE_TTL: Duration = Duration::from_secs(600);

    /// Base URL the endpoints are joined to.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `POST /verify` endpoint.
    #[must_use]
    pub const fn verify_url(&self) -> &Url {
        &self.verify_url
    }

    /// `POST /settle` endpoint.
    #[must_use]
    pub const fn settle_url(&self) -> &Url {
        &self.settle_url
    }

    /// `GET /supported` endpoint.
    #[must_use]
    pub const fn supported_url(&self) -> &Url {
        &self.supported_url
    }

    /// `GET /discovery/resources` endpoint.
    #[must_use]
    pub const fn discovery_url(&self) -> &Url {
        &self.discovery_url
    }

    /// Extra headers sent with every request.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Per-request timeout, if set.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Cache in front of `/supported`.
    #[must_use]
    pub const fn supported_cache(&self) -> &SupportedCache {
        &self.supported_cache
    }

    /// A client for the facilitator at `base_url`.
    ///
    /// Endpoint URLs are resolved relative to the base, so a base of
    /// `https://x402.org/facilitator/` posts to `.../facilitator/verify`.
    /// `networks` spells the network of each request body the way the
    /// payment's protocol version expects; pass the registry the payment
    /// engine uses.
    ///
    /// # Errors
    ///
    /// An endpoint URL cannot be built from the base.
    pub fn try_new(base_url: Url, networks: Arc<NetworkRegistry>) -> Result<Self, FacilitatorClientError> {
        let join = |path: &'static str, context: &'static str| {
            base_url
                .join(path)
                .map_err(|source| FacilitatorClientError::UrlParse { context, source })
        };
        let verify_url = join("./verify", "Failed to construct ./verify URL")?;
        let settle_url = join("./settle", "Failed to construct ./settle URL")?;
        let supported_url = join("./supported", "Failed to construct ./supported URL")?;
        let discovery_url = join(
            "./discovery/resources",
            "Failed to construct ./discovery/resources URL",
        )?;
        Ok(Self {
            client: Client::new(),
            base_url,
            verify_url,
            settle_url,
            supported_url,
            discovery_url,
            adapter: ProtocolAdapter::new(networks),
            headers: HeaderMap::new(),
            timeout: None,
            supported_cache: SupportedCache::new(Self::DEFAULT_SUPPORTED_CACHE_TTL),
        })
    }

    /// Parses `base_url`, normalized to one trailing slash, and calls
    /// [`FacilitatorClient::try_new`].
    ///
    /// # Errors
    ///
    /// `base_url` is not a URL, or an endpoint URL cannot be built from it.
    pub fn parse(base_url: &str, networks: Arc<NetworkRegistry>) -> Result<Self, FacilitatorClientError> {
        let mut normalized = base_url.trim_end_matches('/').to_owned();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|source| FacilitatorClientError::UrlParse {
            context: "Failed to parse base url",
            source,
        })?;
        Self::try_new(url, networks)
    }

    /// Headers sent with every request, e.g. an API key.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets a per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replaces the `/supported` cache with an empty one of this TTL.
    #[must_use]
    pub fn with_supported_cache_ttl(mut self, ttl: Duration) -> Self {
        self.supported_cache = SupportedCache::new(ttl);
        self
    }

    /// Asks the facilitator on every `/supported` call.
    #[must_use]
    pub fn without_supported_cache(self) -> Self {
        self.with_supported_cache_ttl(Duration::ZERO)
    }

    /// `POST /verify`.
    ///
    /// # Errors
    ///
    /// Encoding, transport, non-200 status or an unreadable answer.
    pub async fn verify(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<VerificationResult, FacilitatorClientError> {
        let body = self.adapter.encode_facilitator_request(payment, requirement)?;
        self.post_json(&self.verify_url, "POST /verify", &body).await
    }

    /// `POST /settle`.
    ///
    /// # Errors
    ///
    /// Encoding, transport, non-200 status or an unreadable answer.
    pub async fn settle(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<SettlementResult, FacilitatorClientError> {
        let body = self.adapter.encode_facilitator_request(payment, requirement)?;
        self.post_json(&self.settle_url, "POST /settle", &body).await
    }

    #[cfg_attr(
        feature = "telemetry",
        instrument(
            name = "x402.facilitator_client.supported",
            skip_all,
            err,
            fields(otel.status_code = tracing::field::Empty, error.message = tracing::field::Empty)
        )
    )]
    async fn supported_inner(&self) -> Result<SupportedResponse, FacilitatorClientError> {
        self.get_json(self.supported_url.clone(), "GET /supported").await
    }

    /// `GET /supported`, served from the cache while it is fresh.
    ///
    /// # Errors
    ///
    /// Transport, non-200 status or an unreadable answer.
    pub async fn supported(&self) -> Result<SupportedResponse, FacilitatorClientError> {
        if let Some(response) = self.supported_cache.get().await {
            return Ok(response);
        }

        #[cfg(feature = "telemetry")]
        tracing::info!("x402.facilitator_client.supported_cache_miss");

        let response = self.supported_inner().await?;
        self.supported_cache.set(response.clone()).await;
        Ok(response)
    }

    /// `GET /discovery/resources?offset=&limit=`.
    ///
    /// # Errors
    ///
    /// Transport, non-200 status or an unreadable answer.
    #[cfg_attr(
        feature = "telemetry",
        instrument(
            name = "x402.facilitator_client.discovery",
            skip(self),
            err,
            fields(otel.status_code = tracing::field::Empty, error.message = tracing::field::Empty)
        )
    )]
    pub async fn discovery(
        &self,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> Result<DiscoveryResponse, FacilitatorClientError> {
        let mut url = self.discovery_url.clone();
        {
            let mut query = url.query_pairs_mut();
            if let Some(offset) = offset {
                query.append_pair("offset", &offset.to_string());
            }
            if let Some(limit) = limit {
                query.append_pair("limit", &limit.to_string());
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        self.get_json(url, "GET /discovery/resources").await
    }

    async fn post_json<T, R>(
        &self,
        url: &Url,
        context: &'static str,
        payload: &T,
    ) -> Result<R, FacilitatorClientError>
    where
        T: serde::Serialize + Sync + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let req = self.client.post(url.clone()).json(payload);
        self.send(req, context).await
    }

    async fn get_json<R>(&self, url: Url, context: &'static str) -> Result<R, FacilitatorClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        let req = self.client.get(url);
        self.send(req, context).await
    }

    /// Applies headers and timeout, sends, and reads a 200 JSON answer.
    async fn send<R>(
        &self,
        mut req: reqwest::RequestBuilder,
        context: &'static str,
    ) -> Result<R, FacilitatorClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|source| FacilitatorClientError::Http { context, source })?;

        let result = if http_response.status() == StatusCode::OK {
            http_response
                .json::<R>()
                .await
                .map_err(|source| FacilitatorClientError::JsonDeserialization { context, source })
        } else {
            let status = http_response.status();
            let body = http_response
                .text()
                .await
                .map_err(|source| FacilitatorClientError::ResponseBodyRead { context, source })?;
            Err(FacilitatorClientError::HttpStatus {
                context,
                status,
                body,
            })
        };

        record_result_on_span(&result);
        result
    }
}

#[cfg(feature = "telemetry")]
fn record_result_on_span<R, E: Display>(result: &Result<R, E>) {
    let span = Span::current();
    match result {
        Ok(_) => {
            span.record("otel.status_code", "OK");
        }
        Err(err) => {
            span.record("otel.status_code", "ERROR");
            span.record("error.message", tracing::field::display(err));
            tracing::event!(tracing::Level::ERROR, error = %err, "Request to facilitator failed");
        }
    }
}

#[cfg(not(feature = "telemetry"))]
fn record_result_on_span<R, E: Display>(_result: &Result<R, E>) {}
