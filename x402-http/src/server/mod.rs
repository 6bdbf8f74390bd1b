//! Tower/axum middleware that enforces x402 payments on protected routes.
//!
//! A [`Paywall`] describes what a route charges: the accepted
//! [`PaymentRequirement`](x402_core::PaymentRequirement)s, the resource
//! description and the [`SettlementMode`]. Its [`PaywallLayer`] runs the core
//! [`PaymentEngine`] for every request and turns the outcome into HTTP:
//!
//! - no or bad payment: `402 Payment Required`, as a JSON body (version 1) or
//!   a `PAYMENT-REQUIRED` header (version 2)
//! - facilitator unreachable during verify: `500`
//! - paid: the route's response plus the settlement summary header
//!
//! Every x402 header is listed in `Access-Control-Expose-Headers`.
//!
//! ```rust,ignore
//! let facilitator = FacilitatorClient::parse("https://x402.org/facilitator", Arc::clone(&networks))?;
//! let engine = PaymentEngine::new(facilitator, networks);
//! let paywall = Paywall::new(engine)
//!     .with_requirement(PaymentRequirement::exact("base-sepolia", USDC, PAY_TO, amount))
//!     .with_description("Weather report")
//!     .with_base_url("https://api.example.com".parse()?)
//!     .with_settlement_mode(SettlementMode::Optimistic);
//! let app = Router::new().route("/weather", get(weather)).layer(paywall.layer());
//! ```
//!
//! See [`facilitator_client::FacilitatorClient`] for talking to a remote
//! facilitator.

pub mod facilitator_client;
mod layer;
mod paywall;

pub use facilitator_client::{FacilitatorClient, FacilitatorClientError};
pub use layer::{PaywallLayer, PaywallService};
pub use paywall::Paywall;

pub use x402_core::server::{PaymentEngine, ServerHooks, SettlementMode};

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;
    use x402_core::amount::TokenAmount;
    use x402_core::facilitator::Facilitator;
    use x402_core::networks::{NetworkInfo, NetworkRegistry};
    use x402_core::proto::{ProtocolAdapter, ProtocolVersion, SupportedKind, SupportedResponse};
    use x402_core::timestamp::UnixTimestamp;
    use x402_core::{
        ErrorReason, ExactPayload, PaymentAuthorization, PaymentPayload, PaymentRequirement,
        SettlementResult, VerificationResult,
    };

    const SOLANA_DEVNET: &str = "EtWTRABZaYq6iMfeYKouRuhh";

    #[derive(Default)]
    struct FakeFacilitator {
        unreachable: bool,
        settle_fails: bool,
        fee_payer: Option<&'static str>,
        settled: AtomicUsize,
    }

    impl Facilitator for FakeFacilitator {
        type Error = std::io::Error;

        async fn verify(
            &self,
            payment: &PaymentPayload,
            _requirement: &PaymentRequirement,
        ) -> Result<VerificationResult, Self::Error> {
            if self.unreachable {
                return Err(std::io::Error::other("connection refused"));
            }
            Ok(VerificationResult::valid(payment.payer()))
        }

        async fn settle(
            &self,
            payment: &PaymentPayload,
            requirement: &PaymentRequirement,
        ) -> Result<SettlementResult, Self::Error> {
            self.settled.fetch_add(1, Ordering::SeqCst);
            let payer = Some(payment.payer().to_owned());
            Ok(if self.settle_fails {
                SettlementResult::failed(ErrorReason::InvalidTransactionState, &requirement.network, payer)
            } else {
                SettlementResult::settled("0xtx", &requirement.network, payer)
            })
        }

        async fn supported(&self) -> Result<SupportedResponse, Self::Error> {
            Ok(SupportedResponse {
                kinds: vec![SupportedKind {
                    x402_version: 2,
                    scheme: "exact".into(),
                    network: format!("solana:{SOLANA_DEVNET}"),
                    extra: self.fee_payer.map(|fp| serde_json::json!({ "feePayer": fp })),
                }],
                ..SupportedResponse::default()
            })
        }
    }

    fn networks() -> Arc<NetworkRegistry> {
        Arc::new(NetworkRegistry::from_networks(&[
            NetworkInfo {
                name: "base-sepolia",
                namespace: "eip155",
                reference: "84532",
            },
            NetworkInfo {
                name: "solana-devnet",
                namespace: "solana",
                reference: SOLANA_DEVNET,
            },
        ]))
    }

    fn requirement() -> PaymentRequirement {
        PaymentRequirement::exact("base-sepolia", "0xUSDC", "0xPAY", TokenAmount::from(1000))
    }

    struct Harness {
        app: Router,
        facilitator: Arc<FakeFacilitator>,
        handled: Arc<AtomicUsize>,
    }

    fn harness(
        facilitator: FakeFacilitator,
        mode: SettlementMode,
        version: ProtocolVersion,
        requirement: PaymentRequirement,
    ) -> Harness {
        let facilitator = Arc::new(facilitator);
        let engine = PaymentEngine::new(Arc::clone(&facilitator), networks()).with_default_version(version);
        let paywall = Paywall::new(engine)
            .with_requirement(requirement)
            .with_description("Weather report")
            .with_base_url("https://api.example.com".parse().unwrap())
            .with_settlement_mode(mode);
        let handled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&handled);
        let app = Router::new()
            .route(
                "/weather",
                get(move || {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        "sunny"
                    }
                }),
            )
            .layer(paywall.layer());
        Harness {
            app,
            facilitator,
            handled,
        }
    }

    fn payment_header(version: ProtocolVersion) -> String {
        let now = UnixTimestamp::now();
        let requirement = requirement();
        let payload = ExactPayload {
            signature: "0xsig".into(),
            authorization: PaymentAuthorization {
                from: "0xPAYER".into(),
                to: "0xPAY".into(),
                value: TokenAmount::from(1000),
                valid_after: now.offset(-60),
                valid_before: now.offset(300),
                nonce: "0x01".into(),
            },
        };
        ProtocolAdapter::new(networks())
            .encode_payment(&PaymentPayload::for_requirement(version, &requirement, payload))
            .unwrap()
    }

    fn request(header: Option<(&str, String)>) -> Request<Body> {
        let mut builder = Request::builder().uri("/weather?city=paris");
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn adapter() -> ProtocolAdapter {
        ProtocolAdapter::new(networks())
    }

    #[tokio::test]
    async fn unpaid_request_gets_v2_demand_header() {
        let h = harness(
            FakeFacilitator::default(),
            SettlementMode::Pessimistic,
            ProtocolVersion::V2,
            requirement(),
        );
        let res = h.app.oneshot(request(None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(res.headers()["access-control-expose-headers"], "PAYMENT-REQUIRED");
        let demand = adapter()
            .decode_payment_required_header(res.headers()["payment-required"].to_str().unwrap())
            .unwrap();
        assert_eq!(demand.accepts.len(), 1);
        let resource = demand.resource.unwrap();
        assert_eq!(resource.url, "https://api.example.com/weather?city=paris");
        assert_eq!(resource.description, "Weather report");
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
        assert_eq!(h.handled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unpaid_request_gets_v1_demand_body() {
        let h = harness(
            FakeFacilitator::default(),
            SettlementMode::Pessimistic,
            ProtocolVersion::V1,
            requirement(),
        );
        let res = h.app.oneshot(request(None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(res.headers()["content-type"], "application/json");
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["x402Version"], 1);
        assert_eq!(json["accepts"][0]["network"], "base-sepolia");
        assert_eq!(
            json["accepts"][0]["resource"],
            "https://api.example.com/weather?city=paris"
        );
    }

    #[tokio::test]
    async fn paid_request_runs_handler_and_reports_settlement() {
        let h = harness(
            FakeFacilitator::default(),
            SettlementMode::Pessimistic,
            ProtocolVersion::V2,
            requirement(),
        );
        let res = h
            .app
            .oneshot(request(Some(("PAYMENT-SIGNATURE", payment_header(ProtocolVersion::V2)))))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["access-control-expose-headers"], "PAYMENT-RESPONSE");
        let settlement = adapter()
            .decode_settlement(res.headers()["payment-response"].to_str().unwrap())
            .unwrap();
        assert!(settlement.success);
        assert_eq!(settlement.transaction.as_deref(), Some("0xtx"));
        assert_eq!(settlement.payer.as_deref(), Some("0xPAYER"));
        assert_eq!(h.handled.load(Ordering::SeqCst), 1);
        assert_eq!(h.facilitator.settled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn version_one_payment_gets_version_one_response_header() {
        let h = harness(
            FakeFacilitator::default(),
            SettlementMode::DoNotSettle,
            ProtocolVersion::V2,
            requirement(),
        );
        let res = h
            .app
            .oneshot(request(Some(("X-PAYMENT", payment_header(ProtocolVersion::V1)))))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let settlement = adapter()
            .decode_settlement(res.headers()["x-payment-response"].to_str().unwrap())
            .unwrap();
        assert!(settlement.success);
        assert_eq!(settlement.transaction, None);
        assert_eq!(h.facilitator.settled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_header_is_402_not_500() {
        let h = harness(
            FakeFacilitator::default(),
            SettlementMode::Pessimistic,
            ProtocolVersion::V2,
            requirement(),
        );
        let res = h
            .app
            .oneshot(request(Some(("PAYMENT-SIGNATURE", "%%%".to_owned()))))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(h.handled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unreachable_facilitator_is_500() {
        let h = harness(
            FakeFacilitator {
                unreachable: true,
                ..FakeFacilitator::default()
            },
            SettlementMode::Pessimistic,
            ProtocolVersion::V2,
            requirement(),
        );
        let res = h
            .app
            .oneshot(request(Some(("PAYMENT-SIGNATURE", payment_header(ProtocolVersion::V2)))))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["reason"], "unexpected_verify_error");
        assert_eq!(h.handled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pessimistic_settlement_failure_blocks_handler() {
        let h = harness(
            FakeFacilitator {
                settle_fails: true,
                ..FakeFacilitator::default()
            },
            SettlementMode::Pessimistic,
            ProtocolVersion::V2,
            requirement(),
        );
        let res = h
            .app
            .oneshot(request(Some(("PAYMENT-SIGNATURE", payment_header(ProtocolVersion::V2)))))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(h.handled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn optimistic_settlement_failure_replaces_response() {
        let h = harness(
            FakeFacilitator {
                settle_fails: true,
                ..FakeFacilitator::default()
            },
            SettlementMode::Optimistic,
            ProtocolVersion::V2,
            requirement(),
        );
        let res = h
            .app
            .oneshot(request(Some(("PAYMENT-SIGNATURE", payment_header(ProtocolVersion::V2)))))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::PAYMENT_REQUIRED);
        let demand = adapter()
            .decode_payment_required_header(res.headers()["payment-required"].to_str().unwrap())
            .unwrap();
        assert_eq!(demand.error.as_deref(), Some("settlement failed"));
        assert_eq!(h.handled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn optimistic_settlement_success_attaches_header() {
        let h = harness(
            FakeFacilitator::default(),
            SettlementMode::Optimistic,
            ProtocolVersion::V2,
            requirement(),
        );
        let res = h
            .app
            .oneshot(request(Some(("PAYMENT-SIGNATURE", payment_header(ProtocolVersion::V2)))))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().contains_key("payment-response"));
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"sunny");
        assert_eq!(h.facilitator.settled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn solana_requirement_gets_fee_payer_from_facilitator() {
        let h = harness(
            FakeFacilitator {
                fee_payer: Some("FeePayer111"),
                ..FakeFacilitator::default()
            },
            SettlementMode::Pessimistic,
            ProtocolVersion::V2,
            PaymentRequirement::exact("solana-devnet", "Mint111", "PayTo111", TokenAmount::from(1000)),
        );
        let res = h.app.oneshot(request(None)).await.unwrap();
        let demand = adapter()
            .decode_payment_required_header(res.headers()["payment-required"].to_str().unwrap())
            .unwrap();
        assert_eq!(demand.accepts[0].fee_payer(), Some("FeePayer111"));
    }

    #[tokio::test]
    async fn fee_payer_follows_registry_spellings() {
        let networks = networks();
        assert!(networks.register_alias("devnet", "solana-devnet"));
        let engine = PaymentEngine::new(
            FakeFacilitator {
                fee_payer: Some("FeePayer111"),
                ..FakeFacilitator::default()
            },
            networks,
        );
        let paywall = Paywall::new(engine)
            .with_requirement(PaymentRequirement::exact(
                format!("solana:{SOLANA_DEVNET}"),
                "Mint111",
                "PayTo111",
                TokenAmount::from(1000),
            ))
            .with_requirement(PaymentRequirement::exact(
                "devnet",
                "Mint111",
                "PayTo111",
                TokenAmount::from(1000),
            ))
            .with_requirement(requirement());
        let accepts = paywall.resolved_accepts().await;
        assert_eq!(accepts[0].fee_payer(), Some("FeePayer111"));
        assert_eq!(accepts[1].fee_payer(), Some("FeePayer111"));
        assert_eq!(accepts[2].fee_payer(), None);
    }

    #[test]
    fn resource_url_prefers_explicit_resource() {
        let engine = PaymentEngine::new(FakeFacilitator::default(), networks());
        let paywall = Paywall::new(engine);
        let uri = "/a/b?x=1".parse().unwrap();
        assert_eq!(
            paywall.resource_url(&uri, Some("api.local:8080")),
            "http://api.local:8080/a/b?x=1"
        );
        let paywall = paywall.with_resource("https://cdn.example.com/file".parse().unwrap());
        assert_eq!(paywall.resource_url(&uri, None), "https://cdn.example.com/file");
    }
}
