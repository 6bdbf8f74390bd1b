//! Reqwest middleware that pays for `402 Payment Required` responses.
//!
//! [`X402Client`] wraps a [`PaymentClient`](x402_core::client::PaymentClient)
//! from `x402-core`, which owns selection, allowances and signing. The
//! middleware owns the loop: send, read the demand on a 402, attach the
//! payment header to a copy of the original request and send again, at most
//! `max_retries` times.
//!
//! ```rust,ignore
//! use x402_http::client::{ReqwestWithPayments, ReqwestWithPaymentsBuild, X402Client};
//!
//! let http = reqwest::Client::new()
//!     .with_payments(X402Client::new(payment_client))
//!     .build();
//! let res = http.get("https://api.example.com/paid").send().await?;
//! ```

mod middleware;

pub use middleware::X402Client;

use reqwest::{Client, ClientBuilder};
use reqwest_middleware as rqm;

/// Adds x402 payment handling to reqwest clients and builders.
pub trait ReqwestWithPayments<A> {
    /// Pairs `self` with the payment middleware.
    fn with_payments(self, x402_client: X402Client) -> ReqwestWithPaymentsBuilder<A>;
}

impl ReqwestWithPayments<Self> for Client {
    fn with_payments(self, x402_client: X402Client) -> ReqwestWithPaymentsBuilder<Self> {
        ReqwestWithPaymentsBuilder {
            inner: self,
            x402_client,
        }
    }
}

impl ReqwestWithPayments<Self> for ClientBuilder {
    fn with_payments(self, x402_client: X402Client) -> ReqwestWithPaymentsBuilder<Self> {
        ReqwestWithPaymentsBuilder {
            inner: self,
            x402_client,
        }
    }
}

/// A client or builder paired with the payment middleware.
#[allow(missing_debug_implementations)] // generic A may not implement Debug
pub struct ReqwestWithPaymentsBuilder<A> {
    inner: A,
    x402_client: X402Client,
}

/// Finishes a [`ReqwestWithPaymentsBuilder`].
pub trait ReqwestWithPaymentsBuild {
    /// The finished client.
    type BuildResult;
    /// The middleware builder.
    type BuilderResult;

    /// Builds the client with the middleware installed.
    fn build(self) -> Self::BuildResult;

    /// Returns the middleware builder, for adding more middleware.
    fn builder(self) -> Self::BuilderResult;
}

impl ReqwestWithPaymentsBuild for ReqwestWithPaymentsBuilder<Client> {
    type BuildResult = rqm::ClientWithMiddleware;
    type BuilderResult = rqm::ClientBuilder;

    fn build(self) -> Self::BuildResult {
        self.builder().build()
    }

    fn builder(self) -> Self::BuilderResult {
        rqm::ClientBuilder::new(self.inner).with(self.x402_client)
    }
}

impl ReqwestWithPaymentsBuild for ReqwestWithPaymentsBuilder<ClientBuilder> {
    type BuildResult = Result<rqm::ClientWithMiddleware, reqwest::Error>;
    type BuilderResult = Result<rqm::ClientBuilder, reqwest::Error>;

    fn build(self) -> Self::BuildResult {
        let builder = self.builder()?;
        Ok(builder.build())
    }

    fn builder(self) -> Self::BuilderResult {
        let client = self.inner.build()?;
        Ok(rqm::ClientBuilder::new(client).with(self.x402_client))
    }
}
