use http::{Extensions, StatusCode};
use reqwest::{Request, Response};
use reqwest_middleware as rqm;
#[cfg(feature = "telemetry")]
use tracing::{debug, info, instrument, trace};
use x402_core::PaymentRequired;
use x402_core::client::PaymentClient;

use crate::headers::{payment_required_header, to_header};

/// Pays for 402 responses and retries the request.
///
/// A response other than 402 is returned as is. A 402 the wallet cannot or
/// will not pay is returned untouched, body included. Requests whose body
/// cannot be cloned (streams) are sent once without payment handling.
#[derive(Debug, Clone)]
pub struct X402Client {
    client: PaymentClient,
}

impl X402Client {
    /// Wraps a configured payment client.
    #[must_use]
    pub const fn new(client: PaymentClient) -> Self {
        Self { client }
    }

    /// Overrides the payment client's retry bound.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.client = self.client.with_max_retries(max_retries);
        self
    }

    /// The wrapped payment client.
    #[must_use]
    pub const fn payment_client(&self) -> &PaymentClient {
        &self.client
    }

    /// Reads the demand of a 402 without losing the response.
    ///
    /// A version 2 demand sits in a header. Otherwise the body is read and
    /// the response rebuilt around the same bytes so it can still be handed
    /// back to the caller.
    async fn read_demand(&self, res: Response) -> rqm::Result<(Response, Option<PaymentRequired>)> {
        if let Some(value) = payment_required_header(res.headers()) {
            let required = self.client.parse_payment_required(Some(value), &[]);
            return Ok((res, required));
        }

        let status = res.status();
        let version = res.version();
        let headers = res.headers().clone();
        let body = res.bytes().await?;
        let required = self.client.parse_payment_required(None, &body);

        let mut rebuilt = http::Response::new(body);
        *rebuilt.status_mut() = status;
        *rebuilt.version_mut() = version;
        *rebuilt.headers_mut() = headers;
        Ok((Response::from(rebuilt), required))
    }
}

impl From<PaymentClient> for X402Client {
    fn from(client: PaymentClient) -> Self {
        Self::new(client)
    }
}

#[cfg_attr(feature = "telemetry", instrument(name = "x402.reqwest.next", skip_all))]
async fn run_next(
    next: rqm::Next<'_>,
    req: Request,
    extensions: &mut Extensions,
) -> rqm::Result<Response> {
    next.run(req, extensions).await
}

#[async_trait::async_trait]
impl rqm::Middleware for X402Client {
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "x402.reqwest.handle", skip_all, err)
    )]
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: rqm::Next<'_>,
    ) -> rqm::Result<Response> {
        let Some(template) = req.try_clone() else {
            #[cfg(feature = "telemetry")]
            trace!("request body is not cloneable, sending without payment handling");
            return run_next(next, req, extensions).await;
        };

        let mut res = run_next(next.clone(), req, extensions).await?;
        let mut retries = 0;
        while res.status() == StatusCode::PAYMENT_REQUIRED && retries < self.client.max_retries() {
            #[cfg(feature = "telemetry")]
            info!(url = %res.url(), retries, "received 402 Payment Required");

            let (unpaid, required) = self.read_demand(res).await?;
            let Some(required) = required else {
                return Ok(unpaid);
            };
            let header = self
                .client
                .payment_header(&required)
                .await
                .map_err(|e| rqm::Error::Middleware(e.into()))?;
            let Some(header) = header else {
                return Ok(unpaid);
            };
            let Some(mut retry) = template.try_clone() else {
                return Ok(unpaid);
            };
            let (name, value) =
                to_header(header.name, &header.value).map_err(|e| rqm::Error::Middleware(e.into()))?;
            retry.headers_mut().insert(name, value);
            drop(unpaid);

            #[cfg(feature = "telemetry")]
            debug!(header = header.name, network = %header.requirement.network, "retrying with payment");

            res = run_next(next.clone(), retry, extensions).await?;
            retries += 1;
        }
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ReqwestWithPayments, ReqwestWithPaymentsBuild};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_string, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use x402_core::amount::TokenAmount;
    use x402_core::chain::ChainId;
    use x402_core::error::SchemeError;
    use x402_core::networks::{NetworkInfo, NetworkRegistry};
    use x402_core::proto::{PaymentRequiredWire, ProtocolAdapter, ProtocolVersion};
    use x402_core::scheme::PaymentSigner;
    use x402_core::timestamp::UnixTimestamp;
    use x402_core::types::AssetAllowance;
    use x402_core::{ExactPayload, PaymentAuthorization, PaymentRequirement, ResourceInfo, Scheme};

    struct TestSigner(AtomicUsize);

    #[async_trait::async_trait]
    impl PaymentSigner for TestSigner {
        async fn sign(&self, requirement: &PaymentRequirement) -> Result<ExactPayload, SchemeError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            let now = UnixTimestamp::now();
            Ok(ExactPayload {
                signature: "0xsig".into(),
                authorization: PaymentAuthorization {
                    from: "0xPAYER".into(),
                    to: requirement.pay_to.clone(),
                    value: requirement.amount,
                    valid_after: now.offset(-60),
                    valid_before: now.offset(300),
                    nonce: "0x01".into(),
                },
            })
        }
    }

    fn networks() -> Arc<NetworkRegistry> {
        Arc::new(NetworkRegistry::from_networks(&[NetworkInfo {
            name: "base-sepolia",
            namespace: "eip155",
            reference: "84532",
        }]))
    }

    fn x402_client(signer: Arc<TestSigner>) -> X402Client {
        X402Client::new(
            PaymentClient::new(networks())
                .with_signer(Scheme::Exact, ChainId::eip155(84532), signer)
                .with_allowance(AssetAllowance::new(
                    "0xUSDC",
                    TokenAmount::from(10_000),
                    TokenAmount::from(5_000),
                )),
        )
    }

    fn demand(version: ProtocolVersion, amount: u64) -> PaymentRequiredWire {
        let required = PaymentRequired::new(
            version,
            vec![PaymentRequirement::exact(
                "base-sepolia",
                "0xUSDC",
                "0xPAY",
                TokenAmount::from(amount),
            )],
        )
        .with_resource(Some(ResourceInfo {
            url: "https://api.example.com/paid".into(),
            ..ResourceInfo::default()
        }));
        ProtocolAdapter::new(networks())
            .encode_payment_required(&required)
            .unwrap()
    }

    fn payment_required(version: ProtocolVersion, amount: u64) -> ResponseTemplate {
        match demand(version, amount) {
            PaymentRequiredWire::Body(body) => ResponseTemplate::new(402)
                .insert_header("content-type", "application/json")
                .set_body_string(body),
            PaymentRequiredWire::Header { name, value } => {
                ResponseTemplate::new(402).insert_header(name, value.as_str())
            }
        }
    }

    #[tokio::test]
    async fn passes_through_non_402() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/free"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let signer = Arc::new(TestSigner(AtomicUsize::new(0)));
        let http = reqwest::Client::new()
            .with_payments(x402_client(Arc::clone(&signer)))
            .build();
        let res = http.get(format!("{}/free", server.uri())).send().await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(signer.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pays_version_two_demand_from_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paid"))
            .and(header_exists("PAYMENT-SIGNATURE"))
            .respond_with(ResponseTemplate::new(200).set_body_string("content"))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/paid"))
            .respond_with(payment_required(ProtocolVersion::V2, 1000))
            .expect(1)
            .mount(&server)
            .await;

        let signer = Arc::new(TestSigner(AtomicUsize::new(0)));
        let http = reqwest::Client::new()
            .with_payments(x402_client(Arc::clone(&signer)))
            .build();
        let res = http.get(format!("{}/paid", server.uri())).send().await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(res.text().await.unwrap(), "content");
        assert_eq!(signer.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pays_version_one_demand_and_resends_same_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/paid"))
            .and(header_exists("X-PAYMENT"))
            .and(body_string("{\"q\":1}"))
            .respond_with(ResponseTemplate::new(200))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/paid"))
            .respond_with(payment_required(ProtocolVersion::V1, 1000))
            .expect(1)
            .mount(&server)
            .await;

        let signer = Arc::new(TestSigner(AtomicUsize::new(0)));
        let http = reqwest::Client::new()
            .with_payments(x402_client(Arc::clone(&signer)))
            .build();
        let res = http
            .post(format!("{}/paid", server.uri()))
            .body("{\"q\":1}")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
    }

    #[tokio::test]
    async fn unaffordable_demand_returns_402_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paid"))
            .respond_with(payment_required(ProtocolVersion::V1, 9_000))
            .expect(1)
            .mount(&server)
            .await;

        let signer = Arc::new(TestSigner(AtomicUsize::new(0)));
        let http = reqwest::Client::new()
            .with_payments(x402_client(Arc::clone(&signer)))
            .build();
        let res = http.get(format!("{}/paid", server.uri())).send().await.unwrap();
        assert_eq!(res.status(), 402);
        assert_eq!(res.headers()["content-type"], "application/json");
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["x402Version"], 1);
        assert_eq!(body["accepts"][0]["maxAmountRequired"], "9000");
        assert_eq!(signer.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_demand_is_not_retried() {
        let server = MockServer::start().await;
        let body = r#"{"x402Version":1,"accepts":[],"error":"X-PAYMENT header is required"}"#;
        Mock::given(method("GET"))
            .and(path("/paid"))
            .respond_with(
                ResponseTemplate::new(402)
                    .insert_header("content-type", "application/json")
                    .set_body_string(body),
            )
            .expect(1)
            .mount(&server)
            .await;
        let empty_v2 = ProtocolAdapter::new(networks())
            .encode_payment_required(&PaymentRequired::new(ProtocolVersion::V2, Vec::new()))
            .unwrap();
        let PaymentRequiredWire::Header { name, value } = empty_v2 else {
            panic!("version 2 demands travel in a header");
        };
        Mock::given(method("GET"))
            .and(path("/paid-v2"))
            .respond_with(ResponseTemplate::new(402).insert_header(name, value.as_str()))
            .expect(1)
            .mount(&server)
            .await;

        let signer = Arc::new(TestSigner(AtomicUsize::new(0)));
        let http = reqwest::Client::new()
            .with_payments(x402_client(Arc::clone(&signer)))
            .build();
        let res = http.get(format!("{}/paid", server.uri())).send().await.unwrap();
        assert_eq!(res.status(), 402);
        assert_eq!(res.text().await.unwrap(), body);
        let res = http.get(format!("{}/paid-v2", server.uri())).send().await.unwrap();
        assert_eq!(res.status(), 402);
        assert_eq!(signer.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unreadable_402_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paid"))
            .respond_with(ResponseTemplate::new(402).set_body_string("<html>pay up</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let http = reqwest::Client::new()
            .with_payments(x402_client(Arc::new(TestSigner(AtomicUsize::new(0)))))
            .build();
        let res = http.get(format!("{}/paid", server.uri())).send().await.unwrap();
        assert_eq!(res.status(), 402);
        assert_eq!(res.text().await.unwrap(), "<html>pay up</html>");
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paid"))
            .respond_with(payment_required(ProtocolVersion::V2, 1000))
            .expect(3)
            .mount(&server)
            .await;

        let signer = Arc::new(TestSigner(AtomicUsize::new(0)));
        let http = reqwest::Client::new()
            .with_payments(x402_client(Arc::clone(&signer)).with_max_retries(2))
            .build();
        let res = http.get(format!("{}/paid", server.uri())).send().await.unwrap();
        assert_eq!(res.status(), 402);
        assert_eq!(signer.0.load(Ordering::SeqCst), 2);
    }
}
