use std::sync::Arc;

#[cfg(feature = "telemetry")]
use tracing::{debug, instrument, warn};

use super::hooks::ServerHooks;
use super::outcome::{
    HandleOutcome, OptimisticSettlement, PendingSettlement, ResponseHeader, Settlement,
};
use super::SettlementMode;
use crate::assets::same_address;
use crate::error::{ErrorReason, PaymentVerificationError};
use crate::facilitator::Facilitator;
use crate::networks::NetworkRegistry;
use crate::proto::{ProtocolAdapter, ProtocolVersion};
use crate::timestamp::UnixTimestamp;
use crate::types::{
    PaymentPayload, PaymentRequired, PaymentRequirement, ResourceInfo, SettlementResult,
};

const PAYMENT_REQUIRED: &str = "payment required";

/// A payment header found on the request, with the version its name implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncomingPayment<'a> {
    /// Version implied by the header name.
    pub version: ProtocolVersion,
    /// Raw header value.
    pub value: &'a str,
}

impl<'a> IncomingPayment<'a> {
    /// Pairs a header value with the version its name implies.
    #[must_use]
    pub const fn new(version: ProtocolVersion, value: &'a str) -> Self {
        Self { version, value }
    }
}

/// Validates payments for protected resources and drives settlement.
#[derive(Debug, Clone)]
pub struct PaymentEngine<F> {
    facilitator: F,
    adapter: ProtocolAdapter,
    hooks: ServerHooks,
    default_version: ProtocolVersion,
}

impl<F> PaymentEngine<F> {
    /// Creates an engine that verifies and settles through `facilitator`.
    /// Network names on the wire are translated through `networks`.
    #[must_use]
    pub fn new(facilitator: F, networks: Arc<NetworkRegistry>) -> Self {
        Self {
            facilitator,
            adapter: ProtocolAdapter::new(networks),
            hooks: ServerHooks::default(),
            default_version: ProtocolVersion::default(),
        }
    }

    /// Installs requirement customizers and settlement callbacks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: ServerHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Version used to answer requests that carry no payment header.
    #[must_use]
    pub const fn with_default_version(mut self, version: ProtocolVersion) -> Self {
        self.default_version = version;
        self
    }

    /// The facilitator payments are sent to.
    #[must_use]
    pub const fn facilitator(&self) -> &F {
        &self.facilitator
    }

    /// Wire codec shared with the transports.
    #[must_use]
    pub const fn adapter(&self) -> &ProtocolAdapter {
        &self.adapter
    }

    /// Version used when a request carries no payment.
    #[must_use]
    pub const fn default_version(&self) -> ProtocolVersion {
        self.default_version
    }

    /// Builds a 402 outcome advertising `accepts` in `version`.
    #[must_use]
    pub fn payment_required(
        &self,
        version: ProtocolVersion,
        accepts: &[PaymentRequirement],
        resource: &ResourceInfo,
        error: impl Into<String>,
        reason: Option<ErrorReason>,
    ) -> HandleOutcome {
        let error = error.into();
        let required = PaymentRequired::new(version, self.hooks.customized(accepts, resource))
            .with_resource(Some(resource.clone()))
            .with_error(error.clone());
        let mut outcome = HandleOutcome::new(version, 402);
        match self.adapter.encode_payment_required(&required) {
            Ok(wire) => outcome.payment_required = Some(wire),
            Err(_e) => {
                #[cfg(feature = "telemetry")]
                warn!(error = %_e, "failed to encode payment required");
            }
        }
        outcome.error = Some(error);
        outcome.reason = reason;
        outcome
    }

    fn rejected(
        &self,
        version: ProtocolVersion,
        accepts: &[PaymentRequirement],
        resource: &ResourceInfo,
        reason: ErrorReason,
        message: impl Into<String>,
    ) -> HandleOutcome {
        #[cfg(feature = "telemetry")]
        debug!(%reason, "payment rejected");
        self.payment_required(version, accepts, resource, message, Some(reason))
    }

    fn settlement_header(
        &self,
        version: ProtocolVersion,
        settlement: &SettlementResult,
    ) -> Option<ResponseHeader> {
        match self.adapter.encode_settlement(version, settlement) {
            Ok(value) => Some(ResponseHeader {
                name: version.response_header(),
                value,
            }),
            Err(_e) => {
                #[cfg(feature = "telemetry")]
                warn!(error = %_e, "failed to encode settlement header");
                None
            }
        }
    }

    /// Finds the single accepted requirement the payment pays.
    ///
    /// When nothing matches, the reason names the first field that ruled
    /// every candidate out.
    ///
    /// # Errors
    ///
    /// The mismatch, as a verification error.
    pub fn match_requirement<'a>(
        &self,
        payment: &PaymentPayload,
        accepts: &'a [PaymentRequirement],
    ) -> Result<&'a PaymentRequirement, PaymentVerificationError> {
        let networks = self.adapter.networks();
        let authorization = &payment.payload.authorization;

        let mut candidates: Vec<&PaymentRequirement> =
            accepts.iter().filter(|r| r.scheme == payment.scheme).collect();
        if candidates.is_empty() {
            return Err(PaymentVerificationError::InvalidScheme);
        }
        candidates.retain(|r| networks.same_network(&r.network, &payment.network));
        if candidates.is_empty() {
            return Err(PaymentVerificationError::InvalidNetwork);
        }
        if let Some(accepted) = &payment.accepted {
            candidates.retain(|r| r.same_terms(accepted, networks));
            if candidates.is_empty() {
                return Err(PaymentVerificationError::InvalidRequirements(
                    "accepted requirement is not offered".into(),
                ));
            }
        }
        candidates.retain(|r| same_address(&r.pay_to, &authorization.to));
        if candidates.is_empty() {
            return Err(PaymentVerificationError::RecipientMismatch);
        }
        candidates.retain(|r| r.amount == authorization.value);
        let Some((first, rest)) = candidates.split_first() else {
            return Err(PaymentVerificationError::InvalidValue);
        };
        if rest.iter().any(|r| !r.same_terms(first, networks)) {
            return Err(PaymentVerificationError::InvalidRequirements(
                "payment matches more than one requirement".into(),
            ));
        }
        Ok(first)
    }
}

impl<F> PaymentEngine<F>
where
    F: Facilitator + Sync,
{
    /// Runs the server side of the handshake for one request.
    ///
    /// Never fails: every problem becomes a 402 (client input) or a 500
    /// (facilitator unreachable during verify) in the outcome.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "x402.server.handle", skip_all, fields(mode = ?mode, url = %resource.url))
    )]
    pub async fn handle(
        &self,
        accepts: &[PaymentRequirement],
        resource: &ResourceInfo,
        incoming: Option<IncomingPayment<'_>>,
        mode: SettlementMode,
    ) -> HandleOutcome {
        let Some(incoming) = incoming else {
            return self.payment_required(self.default_version, accepts, resource, PAYMENT_REQUIRED, None);
        };
        let version = incoming.version;

        let payment = match self.adapter.decode_payment(version, incoming.value) {
            Ok(payment) => payment,
            Err(e) => {
                return self.rejected(version, accepts, resource, e.reason(), format!("malformed payment header: {e}"));
            }
        };

        if version == ProtocolVersion::V1
            && let Some(bound) = &payment.resource
            && bound != &resource.url
        {
            return self.rejected(
                version,
                accepts,
                resource,
                ErrorReason::InvalidPayload,
                format!("payment is bound to {bound}, not {}", resource.url),
            );
        }

        let requirement = match self.match_requirement(&payment, accepts) {
            Ok(requirement) => requirement.clone(),
            Err(e) => return self.rejected(version, accepts, resource, e.reason(), e.to_string()),
        };

        if let Err(e) = payment.payload.authorization.check_window(UnixTimestamp::now()) {
            return self.rejected(version, accepts, resource, e.reason(), e.to_string());
        }

        let verification = match self.facilitator.verify(&payment, &requirement).await {
            Ok(verification) => verification,
            Err(_e) => {
                #[cfg(feature = "telemetry")]
                warn!(error = %_e, "facilitator verify failed");
                let mut outcome = HandleOutcome::new(version, 500);
                outcome.error = Some("payment verification unavailable".into());
                outcome.reason = Some(ErrorReason::UnexpectedVerifyError);
                outcome.selected_requirement = Some(requirement);
                return outcome;
            }
        };
        if !verification.is_valid {
            let reason = verification
                .invalid_reason
                .unwrap_or(ErrorReason::InvalidPayload);
            let message = verification
                .invalid_message
                .clone()
                .unwrap_or_else(|| reason.to_string());
            let mut outcome = self.rejected(version, accepts, resource, reason, message);
            outcome.verification = Some(verification);
            outcome.selected_requirement = Some(requirement);
            return outcome;
        }

        if !self.hooks.allow_settle(&payment, &requirement, &verification) {
            let mut outcome = self.payment_required(version, accepts, resource, "payment declined", None);
            outcome.verification = Some(verification);
            outcome.selected_requirement = Some(requirement);
            return outcome;
        }

        let payer = verification
            .payer
            .clone()
            .or_else(|| Some(payment.payer().to_owned()));
        let mut outcome = HandleOutcome::new(version, 200);
        outcome.verification = Some(verification);
        outcome.selected_requirement = Some(requirement.clone());

        match mode {
            SettlementMode::Pessimistic => {
                let settlement = match self.settle(&payment, &requirement).await {
                    Ok(settlement) => settlement,
                    Err(failed) => {
                        let reason = failed.error_reason.unwrap_or(ErrorReason::UnexpectedSettleError);
                        let mut rejected = self.rejected(version, accepts, resource, reason, "settlement failed");
                        rejected.verification = outcome.verification;
                        rejected.selected_requirement = outcome.selected_requirement;
                        rejected.settlement = Settlement::Completed(failed);
                        return rejected;
                    }
                };
                outcome.headers.extend(self.settlement_header(version, &settlement));
                outcome.settlement = Settlement::Completed(settlement);
            }
            SettlementMode::Optimistic => {
                outcome.settlement = Settlement::Pending(PendingSettlement {
                    version,
                    payment,
                    requirement,
                    accepts: accepts.to_vec(),
                    resource: resource.clone(),
                });
            }
            SettlementMode::DoNotSettle => {
                let settlement = SettlementResult {
                    success: true,
                    error_reason: None,
                    transaction: None,
                    network: requirement.network.clone(),
                    payer,
                };
                outcome.headers.extend(self.settlement_header(version, &settlement));
                outcome.settlement = Settlement::Completed(settlement);
            }
        }
        outcome.can_continue = true;
        outcome
    }

    /// Settles a payment deferred by [`SettlementMode::Optimistic`].
    ///
    /// `headers_flushed` tells whether the response head already left; a
    /// failure after that cannot change the status.
    #[cfg_attr(feature = "telemetry", instrument(name = "x402.server.settle_pending", skip_all))]
    pub async fn settle_pending(
        &self,
        pending: PendingSettlement,
        headers_flushed: bool,
    ) -> OptimisticSettlement {
        match self.settle(&pending.payment, &pending.requirement).await {
            Ok(settlement) => match self.settlement_header(pending.version, &settlement) {
                Some(header) => OptimisticSettlement::Settled { settlement, header },
                None => OptimisticSettlement::Unrecoverable {
                    error: "failed to encode settlement header".into(),
                },
            },
            Err(failed) => {
                let reason = failed.error_reason.unwrap_or(ErrorReason::UnexpectedSettleError);
                if headers_flushed {
                    #[cfg(feature = "telemetry")]
                    warn!(%reason, "optimistic settlement failed after headers were sent");
                    return OptimisticSettlement::Unrecoverable {
                        error: reason.to_string(),
                    };
                }
                let mut outcome = self.rejected(
                    pending.version,
                    &pending.accepts,
                    &pending.resource,
                    reason,
                    "settlement failed",
                );
                outcome.selected_requirement = Some(pending.requirement);
                outcome.settlement = Settlement::Completed(failed);
                OptimisticSettlement::Rejected(Box::new(outcome))
            }
        }
    }

    /// Settles and runs `on_settled`. A facilitator error becomes a failed
    /// settlement with `unexpected_settle_error`.
    async fn settle(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<SettlementResult, SettlementResult> {
        let settlement = match self.facilitator.settle(payment, requirement).await {
            Ok(settlement) => settlement,
            Err(_e) => {
                #[cfg(feature = "telemetry")]
                warn!(error = %_e, "facilitator settle failed");
                return Err(SettlementResult::failed(
                    ErrorReason::UnexpectedSettleError,
                    requirement.network.clone(),
                    Some(payment.payer().to_owned()),
                ));
            }
        };
        if !settlement.success {
            return Err(settlement);
        }
        #[cfg(feature = "telemetry")]
        debug!(transaction = ?settlement.transaction, "payment settled");
        self.hooks.settled(&settlement, requirement);
        Ok(settlement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::TokenAmount;
    use crate::encoding::to_base64_json;
    use crate::error::SchemeError;
    use crate::networks::NetworkInfo;
    use crate::proto::{PaymentRequiredWire, SupportedResponse};
    use crate::types::{ExactPayload, PaymentAuthorization, VerificationResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeFacilitator {
        verify: Mutex<Option<Result<VerificationResult, String>>>,
        settle: Mutex<Option<Result<SettlementResult, String>>>,
        settle_calls: AtomicUsize,
    }

    impl FakeFacilitator {
        fn approving() -> Self {
            let fake = Self::default();
            *fake.verify.lock().unwrap() = Some(Ok(VerificationResult::valid("0xAB")));
            *fake.settle.lock().unwrap() = Some(Ok(SettlementResult::settled(
                "0xtx",
                "base-sepolia",
                Some("0xAB".into()),
            )));
            fake
        }

        fn with_settle(self, result: Result<SettlementResult, String>) -> Self {
            *self.settle.lock().unwrap() = Some(result);
            self
        }

        fn with_verify(self, result: Result<VerificationResult, String>) -> Self {
            *self.verify.lock().unwrap() = Some(result);
            self
        }
    }

    impl Facilitator for FakeFacilitator {
        type Error = SchemeError;

        async fn verify(
            &self,
            _payment: &PaymentPayload,
            _requirement: &PaymentRequirement,
        ) -> Result<VerificationResult, SchemeError> {
            self.verify
                .lock()
                .unwrap()
                .clone()
                .unwrap()
                .map_err(SchemeError::Transport)
        }

        async fn settle(
            &self,
            _payment: &PaymentPayload,
            _requirement: &PaymentRequirement,
        ) -> Result<SettlementResult, SchemeError> {
            self.settle_calls.fetch_add(1, Ordering::SeqCst);
            self.settle
                .lock()
                .unwrap()
                .clone()
                .unwrap()
                .map_err(SchemeError::Transport)
        }

        async fn supported(&self) -> Result<SupportedResponse, SchemeError> {
            Ok(SupportedResponse::default())
        }
    }

    fn networks() -> Arc<NetworkRegistry> {
        Arc::new(NetworkRegistry::from_networks(&[NetworkInfo {
            name: "base-sepolia",
            namespace: "eip155",
            reference: "84532",
        }]))
    }

    fn engine(facilitator: FakeFacilitator) -> PaymentEngine<FakeFacilitator> {
        PaymentEngine::new(facilitator, networks())
    }

    fn requirement() -> PaymentRequirement {
        PaymentRequirement::exact("base-sepolia", "0xUSDC", "0xPAY", TokenAmount::from(1000))
    }

    fn resource() -> ResourceInfo {
        ResourceInfo {
            url: "https://api.example.com/weather".into(),
            ..ResourceInfo::default()
        }
    }

    fn authorization(valid_after: i64, valid_before: i64) -> PaymentAuthorization {
        let now = UnixTimestamp::now();
        PaymentAuthorization {
            from: "0xAB".into(),
            to: "0xPAY".into(),
            value: TokenAmount::from(1000),
            valid_after: now.offset(valid_after),
            valid_before: now.offset(valid_before),
            nonce: format!("0x{}", "11".repeat(32)),
        }
    }

    fn header(
        engine: &PaymentEngine<FakeFacilitator>,
        version: ProtocolVersion,
        authorization: PaymentAuthorization,
    ) -> String {
        let mut requirement = requirement();
        requirement.resource = Some(resource().url);
        let payment = PaymentPayload::for_requirement(
            version,
            &requirement,
            ExactPayload {
                signature: "0xsig".into(),
                authorization,
            },
        );
        engine.adapter().encode_payment(&payment).unwrap()
    }

    #[tokio::test]
    async fn missing_header_lists_every_requirement() {
        let engine = engine(FakeFacilitator::approving());
        let accepts = vec![requirement(), requirement().with_description("second")];
        let outcome = engine.handle(&accepts, &resource(), None, SettlementMode::Pessimistic).await;
        assert!(!outcome.can_continue);
        assert_eq!(outcome.status_code, 402);
        let Some(PaymentRequiredWire::Header { name, value }) = &outcome.payment_required else {
            panic!("v2 demand goes in a header");
        };
        assert_eq!(*name, "PAYMENT-REQUIRED");
        assert_eq!(outcome.expose_headers(), vec!["PAYMENT-REQUIRED"]);
        let decoded = engine.adapter().decode_payment_required_header(value).unwrap();
        assert_eq!(decoded.accepts.len(), 2);

        let v1 = engine.clone_with_version(ProtocolVersion::V1);
        let outcome = v1.handle(&accepts, &resource(), None, SettlementMode::Pessimistic).await;
        assert!(matches!(outcome.payment_required, Some(PaymentRequiredWire::Body(_))));
    }

    #[tokio::test]
    async fn malformed_header_is_client_error() {
        let engine = engine(FakeFacilitator::approving());
        let incoming = IncomingPayment::new(ProtocolVersion::V2, "not base64 !!");
        let outcome = engine
            .handle(&[requirement()], &resource(), Some(incoming), SettlementMode::Pessimistic)
            .await;
        assert_eq!(outcome.status_code, 402);
        assert_eq!(outcome.reason, Some(ErrorReason::InvalidPayload));

        let garbage = to_base64_json(&serde_json::json!({"hello": "world"})).unwrap();
        let incoming = IncomingPayment::new(ProtocolVersion::V1, &garbage);
        let outcome = engine
            .handle(&[requirement()], &resource(), Some(incoming), SettlementMode::Pessimistic)
            .await;
        assert_eq!(outcome.status_code, 402);
    }

    #[tokio::test]
    async fn end_to_end_pessimistic() {
        let engine = engine(FakeFacilitator::approving());
        let value = header(&engine, ProtocolVersion::V2, authorization(-60, 900));
        let outcome = engine
            .handle(
                &[requirement()],
                &resource(),
                Some(IncomingPayment::new(ProtocolVersion::V2, &value)),
                SettlementMode::Pessimistic,
            )
            .await;
        assert!(outcome.can_continue);
        assert_eq!(outcome.status_code, 200);
        assert_eq!(outcome.headers.len(), 1);
        assert_eq!(outcome.headers[0].name, "PAYMENT-RESPONSE");
        assert_eq!(outcome.expose_headers(), vec!["PAYMENT-RESPONSE"]);
        let summary = engine.adapter().decode_settlement(&outcome.headers[0].value).unwrap();
        assert!(summary.success);
        assert_eq!(summary.payer.as_deref(), Some("0xAB"));
        assert_eq!(summary.network, "eip155:84532");

        let value = header(&engine, ProtocolVersion::V1, authorization(-60, 900));
        let outcome = engine
            .handle(
                &[requirement()],
                &resource(),
                Some(IncomingPayment::new(ProtocolVersion::V1, &value)),
                SettlementMode::Pessimistic,
            )
            .await;
        assert!(outcome.can_continue);
        assert_eq!(outcome.headers[0].name, "X-PAYMENT-RESPONSE");
        let summary = engine.adapter().decode_settlement(&outcome.headers[0].value).unwrap();
        assert_eq!(summary.network, "base-sepolia");
    }

    #[tokio::test]
    async fn expired_and_early_are_rejected_distinctly() {
        let engine = engine(FakeFacilitator::approving());
        for (window, reason) in [
            (authorization(-900, -60), ErrorReason::InvalidExactEvmPayloadAuthorizationValidBefore),
            (authorization(60, 900), ErrorReason::InvalidExactEvmPayloadAuthorizationValidAfter),
        ] {
            let value = header(&engine, ProtocolVersion::V2, window);
            let outcome = engine
                .handle(
                    &[requirement()],
                    &resource(),
                    Some(IncomingPayment::new(ProtocolVersion::V2, &value)),
                    SettlementMode::Pessimistic,
                )
                .await;
            assert_eq!(outcome.status_code, 402);
            assert_eq!(outcome.reason, Some(reason));
        }
        assert_eq!(engine.facilitator().settle_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn v1_resource_must_match_request_url() {
        let engine = engine(FakeFacilitator::approving());
        let value = header(&engine, ProtocolVersion::V1, authorization(-60, 900));
        let other = ResourceInfo {
            url: "https://api.example.com/other".into(),
            ..ResourceInfo::default()
        };
        let outcome = engine
            .handle(
                &[requirement()],
                &other,
                Some(IncomingPayment::new(ProtocolVersion::V1, &value)),
                SettlementMode::Pessimistic,
            )
            .await;
        assert_eq!(outcome.status_code, 402);
        assert_eq!(outcome.reason, Some(ErrorReason::InvalidPayload));
    }

    #[tokio::test]
    async fn mismatch_reasons() {
        let engine = engine(FakeFacilitator::approving());
        let payment = engine
            .adapter()
            .decode_payment(
                ProtocolVersion::V1,
                &header(&engine, ProtocolVersion::V1, authorization(-60, 900)),
            )
            .unwrap();

        let mut other_network = requirement();
        other_network.network = "eip155:1".into();
        assert_eq!(
            engine.match_requirement(&payment, &[other_network]).unwrap_err(),
            PaymentVerificationError::InvalidNetwork
        );

        let mut other_recipient = requirement();
        other_recipient.pay_to = "0xELSE".into();
        assert_eq!(
            engine.match_requirement(&payment, &[other_recipient]).unwrap_err(),
            PaymentVerificationError::RecipientMismatch
        );

        let mut other_amount = requirement();
        other_amount.amount = TokenAmount::from(2000);
        assert_eq!(
            engine.match_requirement(&payment, &[other_amount]).unwrap_err(),
            PaymentVerificationError::InvalidValue
        );

        let mut other_asset = requirement();
        other_asset.asset = "0xDAI".into();
        assert!(matches!(
            engine.match_requirement(&payment, &[requirement(), other_asset]),
            Err(PaymentVerificationError::InvalidRequirements(_))
        ));
        assert!(engine.match_requirement(&payment, &[requirement(), requirement()]).is_ok());
    }

    #[tokio::test]
    async fn v2_accepted_must_be_offered() {
        let engine = engine(FakeFacilitator::approving());
        let value = header(&engine, ProtocolVersion::V2, authorization(-60, 900));
        let mut offered = requirement();
        offered.asset = "0xDAI".into();
        let outcome = engine
            .handle(
                &[offered],
                &resource(),
                Some(IncomingPayment::new(ProtocolVersion::V2, &value)),
                SettlementMode::Pessimistic,
            )
            .await;
        assert_eq!(outcome.reason, Some(ErrorReason::InvalidPaymentRequirements));
    }

    #[tokio::test]
    async fn invalid_verification_carries_facilitator_reason() {
        let engine = engine(FakeFacilitator::approving().with_verify(Ok(VerificationResult::invalid(
            ErrorReason::InsufficientFunds,
            Some("0xAB".into()),
        ))));
        let value = header(&engine, ProtocolVersion::V2, authorization(-60, 900));
        let outcome = engine
            .handle(
                &[requirement()],
                &resource(),
                Some(IncomingPayment::new(ProtocolVersion::V2, &value)),
                SettlementMode::Pessimistic,
            )
            .await;
        assert_eq!(outcome.status_code, 402);
        assert_eq!(outcome.reason, Some(ErrorReason::InsufficientFunds));
    }

    #[tokio::test]
    async fn unreachable_verifier_is_server_error() {
        let engine = engine(FakeFacilitator::approving().with_verify(Err("connection refused".into())));
        let value = header(&engine, ProtocolVersion::V2, authorization(-60, 900));
        let outcome = engine
            .handle(
                &[requirement()],
                &resource(),
                Some(IncomingPayment::new(ProtocolVersion::V2, &value)),
                SettlementMode::Pessimistic,
            )
            .await;
        assert_eq!(outcome.status_code, 500);
        assert_eq!(outcome.reason, Some(ErrorReason::UnexpectedVerifyError));
        assert!(!outcome.can_continue);
    }

    #[tokio::test]
    async fn pessimistic_settle_failure_blocks_handler() {
        for failure in [
            Ok(SettlementResult::failed(
                ErrorReason::InvalidTransactionState,
                "base-sepolia",
                None,
            )),
            Err("rpc down".to_string()),
        ] {
            let engine = engine(FakeFacilitator::approving().with_settle(failure));
            let value = header(&engine, ProtocolVersion::V2, authorization(-60, 900));
            let outcome = engine
                .handle(
                    &[requirement()],
                    &resource(),
                    Some(IncomingPayment::new(ProtocolVersion::V2, &value)),
                    SettlementMode::Pessimistic,
                )
                .await;
            assert!(!outcome.can_continue);
            assert_eq!(outcome.status_code, 402);
            assert!(outcome.headers.is_empty());
        }
    }

    #[tokio::test]
    async fn optimistic_failure_depends_on_flush() {
        let failed = SettlementResult::failed(ErrorReason::InvalidTransactionState, "base-sepolia", None);
        let engine = engine(FakeFacilitator::approving().with_settle(Ok(failed)));
        let value = header(&engine, ProtocolVersion::V2, authorization(-60, 900));
        let mut outcome = engine
            .handle(
                &[requirement()],
                &resource(),
                Some(IncomingPayment::new(ProtocolVersion::V2, &value)),
                SettlementMode::Optimistic,
            )
            .await;
        assert!(outcome.can_continue);
        assert_eq!(engine.facilitator().settle_calls.load(Ordering::SeqCst), 0);
        let pending = outcome.take_pending().unwrap();

        match engine.settle_pending(pending.clone(), false).await {
            OptimisticSettlement::Rejected(rejected) => {
                assert_eq!(rejected.status_code, 402);
                assert_eq!(rejected.reason, Some(ErrorReason::InvalidTransactionState));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert!(matches!(
            engine.settle_pending(pending, true).await,
            OptimisticSettlement::Unrecoverable { .. }
        ));
    }

    #[tokio::test]
    async fn optimistic_success_yields_header() {
        let engine = engine(FakeFacilitator::approving());
        let value = header(&engine, ProtocolVersion::V2, authorization(-60, 900));
        let mut outcome = engine
            .handle(
                &[requirement()],
                &resource(),
                Some(IncomingPayment::new(ProtocolVersion::V2, &value)),
                SettlementMode::Optimistic,
            )
            .await;
        let pending = outcome.take_pending().unwrap();
        let OptimisticSettlement::Settled { header, settlement } = engine.settle_pending(pending, false).await else {
            panic!("expected settlement");
        };
        assert_eq!(header.name, "PAYMENT-RESPONSE");
        assert_eq!(settlement.transaction.as_deref(), Some("0xtx"));
    }

    #[tokio::test]
    async fn do_not_settle_synthesizes_record() {
        let engine = engine(FakeFacilitator::approving());
        let value = header(&engine, ProtocolVersion::V2, authorization(-60, 900));
        let outcome = engine
            .handle(
                &[requirement()],
                &resource(),
                Some(IncomingPayment::new(ProtocolVersion::V2, &value)),
                SettlementMode::DoNotSettle,
            )
            .await;
        assert!(outcome.can_continue);
        assert_eq!(engine.facilitator().settle_calls.load(Ordering::SeqCst), 0);
        let Settlement::Completed(settlement) = &outcome.settlement else {
            panic!("expected synthesized settlement");
        };
        assert!(settlement.success);
        assert!(settlement.transaction.is_none());
        assert_eq!(outcome.headers.len(), 1);
    }

    #[tokio::test]
    async fn hooks_veto_and_errors_are_ignored() {
        let settled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&settled);
        let hooks = ServerHooks::default()
            .with_on_settled(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("observer failed".into())
            })
            .with_customize_requirements(|_, _| Err("schema failed".into()));
        let engine = engine(FakeFacilitator::approving()).with_hooks(hooks.clone());
        let value = header(&engine, ProtocolVersion::V2, authorization(-60, 900));
        let outcome = engine
            .handle(
                &[requirement()],
                &resource(),
                Some(IncomingPayment::new(ProtocolVersion::V2, &value)),
                SettlementMode::Pessimistic,
            )
            .await;
        assert!(outcome.can_continue);
        assert_eq!(settled.load(Ordering::SeqCst), 1);

        let outcome = engine.handle(&[requirement()], &resource(), None, SettlementMode::Pessimistic).await;
        assert_eq!(outcome.status_code, 402);
        assert!(outcome.payment_required.is_some());

        let vetoing = PaymentEngine::new(FakeFacilitator::approving(), networks())
            .with_hooks(hooks.with_before_settle(|_, _, _| false));
        let outcome = vetoing
            .handle(
                &[requirement()],
                &resource(),
                Some(IncomingPayment::new(ProtocolVersion::V2, &value)),
                SettlementMode::Pessimistic,
            )
            .await;
        assert_eq!(outcome.status_code, 402);
        assert_eq!(vetoing.facilitator().settle_calls.load(Ordering::SeqCst), 0);
    }

    impl PaymentEngine<FakeFacilitator> {
        fn clone_with_version(&self, version: ProtocolVersion) -> Self {
            PaymentEngine::new(FakeFacilitator::approving(), Arc::clone(self.adapter().networks()))
                .with_default_version(version)
        }
    }
}
