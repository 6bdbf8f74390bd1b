//! Tower plumbing for [`Paywall`].

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum_core::extract::Request;
use axum_core::response::Response;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};
use x402_core::facilitator::Facilitator;

use super::paywall::Paywall;

/// Wraps a route with a [`Paywall`].
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/weather", get(weather))
///     .layer(paywall.layer());
/// ```
#[derive(Debug)]
pub struct PaywallLayer<F> {
    paywall: Arc<Paywall<F>>,
}

impl<F> PaywallLayer<F> {
    /// Shares `paywall` across every wrapped service.
    #[must_use]
    pub fn new(paywall: Paywall<F>) -> Self {
        Self {
            paywall: Arc::new(paywall),
        }
    }
}

impl<F> Clone for PaywallLayer<F> {
    fn clone(&self) -> Self {
        Self {
            paywall: Arc::clone(&self.paywall),
        }
    }
}

impl<S, F> Layer<S> for PaywallLayer<F>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Service = PaywallService<F>;

    fn layer(&self, inner: S) -> Self::Service {
        PaywallService {
            paywall: Arc::clone(&self.paywall),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// Service produced by [`PaywallLayer`].
#[allow(missing_debug_implementations)] // BoxCloneSyncService does not implement Debug
pub struct PaywallService<F> {
    paywall: Arc<Paywall<F>>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl<F> Clone for PaywallService<F> {
    fn clone(&self) -> Self {
        Self {
            paywall: Arc::clone(&self.paywall),
            inner: self.inner.clone(),
        }
    }
}

impl<F> Service<Request> for PaywallService<F>
where
    F: Facilitator + Send + Sync + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let paywall = Arc::clone(&self.paywall);
        // The clone may not be ready; swap in the one that was polled.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { Ok(paywall.handle_request(inner, req).await) })
    }
}
