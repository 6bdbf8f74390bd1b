//! Facilitator-side verification and settlement of EVM `exact` payments.
//!
//! Verification is offline apart from one balance read: it parses the
//! authorization, checks network, recipient, validity window and value,
//! recomputes the EIP-712 digest and recovers the signer. Settlement re-runs
//! the same checks, then submits the authorization through the token's
//! EIP-3009 entry point and polls for the receipt.

mod contract;
mod error;
mod settle;
mod verify;

use std::sync::Arc;

use alloy_primitives::{Address, Signature};
pub use contract::IEIP3009;
pub use error::EvmExactError;
pub use settle::{ReceiptPolicy, calldata, settle_payment};
pub use verify::{assert_enough_balance, assert_enough_value, assert_signer, parse_signature};
use x402_core::assets::AssetRegistry;
use x402_core::chain::ChainId;
use x402_core::error::{ErrorReason, PaymentVerificationError, SchemeError};
use x402_core::scheme::SchemeFacilitator;
use x402_core::timestamp::UnixTimestamp;
use x402_core::types::{PaymentPayload, PaymentRequirement, SettlementResult, VerificationResult};

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::chain::EvmChain;
use crate::exact::types::{EvmAuthorization, SettlementMethod, parse_address, token_domain};

/// A payment that passed every check, ready to submit.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    /// Token contract.
    pub asset: Address,
    /// The checked authorization.
    pub authorization: EvmAuthorization,
    /// Parsed signature, split into `(r, s, v)` at submission.
    pub signature: Signature,
}

/// The `exact` scheme facilitator for one EVM chain.
pub struct EvmExactFacilitator<C> {
    chain: C,
    assets: Arc<AssetRegistry>,
    method: SettlementMethod,
    receipts: ReceiptPolicy,
}

impl<C: EvmChain> std::fmt::Debug for EvmExactFacilitator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmExactFacilitator")
            .field("chain_id", &self.chain.chain_id())
            .field("method", &self.method)
            .field("receipts", &self.receipts)
            .finish_non_exhaustive()
    }
}

impl<C: EvmChain> EvmExactFacilitator<C> {
    /// A facilitator settling through `transferWithAuthorization` with the
    /// default receipt policy. `assets` supplies EIP-712 domains for
    /// requirements that carry none.
    pub fn new(chain: C, assets: Arc<AssetRegistry>) -> Self {
        Self {
            chain,
            assets,
            method: SettlementMethod::default(),
            receipts: ReceiptPolicy::default(),
        }
    }

    /// EIP-3009 entry point used to settle; wallets must sign for the same one.
    #[must_use]
    pub fn with_settlement_method(mut self, method: SettlementMethod) -> Self {
        self.method = method;
        self
    }

    /// How long settlement waits for a receipt.
    #[must_use]
    pub fn with_receipt_policy(mut self, receipts: ReceiptPolicy) -> Self {
        self.receipts = receipts;
        self
    }

    /// CAIP-2 id of the served chain.
    pub fn chain_id(&self) -> ChainId {
        ChainId::eip155(self.chain.chain_id())
    }

    /// Runs every verification step.
    ///
    /// # Errors
    ///
    /// [`EvmExactError::Verification`] for payment problems; other variants
    /// for RPC failures.
    pub async fn check(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<VerifiedPayment, EvmExactError> {
        let networks = self.assets.networks();
        if networks.resolve(&requirement.network) != Some(self.chain_id())
            || !networks.same_network(&payment.network, &requirement.network)
        {
            return Err(PaymentVerificationError::InvalidNetwork.into());
        }
        if payment.scheme != requirement.scheme {
            return Err(PaymentVerificationError::InvalidScheme.into());
        }

        let authorization = EvmAuthorization::parse(&payment.payload)?;
        let asset = parse_address("asset", &requirement.asset)
            .map_err(|e| PaymentVerificationError::InvalidRequirements(e.to_string()))?;
        let pay_to = parse_address("payTo", &requirement.pay_to)
            .map_err(|e| PaymentVerificationError::InvalidRequirements(e.to_string()))?;
        if authorization.to != pay_to {
            return Err(PaymentVerificationError::RecipientMismatch.into());
        }
        if self.method == SettlementMethod::ReceiveWithAuthorization
            && !self.chain.signer_addresses().contains(&pay_to)
        {
            return Err(settle::payee_not_signer(pay_to).into());
        }
        payment.payload.authorization.check_window(UnixTimestamp::now())?;
        let required = requirement.amount.as_u256();
        assert_enough_value(authorization.value, required)?;

        let (name, version) = match (requirement.token_name(), requirement.token_version()) {
            (Some(name), Some(version)) => (name.to_owned(), version.to_owned()),
            _ => self
                .assets
                .find_on_chain(&self.chain_id(), &requirement.asset)
                .map(|asset| (asset.name, asset.version))
                .ok_or_else(|| {
                    PaymentVerificationError::InvalidRequirements(format!(
                        "no EIP-712 domain for asset {}",
                        requirement.asset
                    ))
                })?,
        };
        let domain = token_domain(&name, &version, self.chain.chain_id(), asset);
        let signature = assert_signer(&authorization, &domain, self.method)?;
        assert_enough_balance(&self.chain, asset, authorization.from, required).await?;

        Ok(VerifiedPayment {
            asset,
            authorization,
            signature,
        })
    }
}

#[async_trait::async_trait]
impl<C: EvmChain + 'static> SchemeFacilitator for EvmExactFacilitator<C> {
    #[cfg_attr(feature = "telemetry", instrument(name = "x402.evm.verify", skip_all, err))]
    async fn verify(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<VerificationResult, SchemeError> {
        let payer = Some(payment.payer().to_owned());
        match self.check(payment, requirement).await {
            Ok(verified) => Ok(VerificationResult::valid(verified.authorization.from.to_string())),
            Err(EvmExactError::Verification(e)) => Ok(VerificationResult::rejected(&e, payer)),
            Err(e) => Err(e.into()),
        }
    }

    #[cfg_attr(feature = "telemetry", instrument(name = "x402.evm.settle", skip_all, err))]
    async fn settle(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<SettlementResult, SchemeError> {
        let payer = Some(payment.payer().to_owned());
        let verified = match self.check(payment, requirement).await {
            Ok(verified) => verified,
            Err(EvmExactError::Verification(e)) => {
                return Ok(SettlementResult::failed(e.reason(), requirement.network.clone(), payer));
            }
            Err(e) => return Err(e.into()),
        };
        let payer = Some(verified.authorization.from.to_string());
        match settle_payment(
            &self.chain,
            verified.asset,
            &verified.authorization,
            &verified.signature,
            self.method,
            self.receipts,
        )
        .await
        {
            Ok(hash) => Ok(SettlementResult::settled(
                hash.to_string(),
                requirement.network.clone(),
                payer,
            )),
            Err(EvmExactError::Reverted(_)) => Ok(SettlementResult::failed(
                ErrorReason::InvalidTransactionState,
                requirement.network.clone(),
                payer,
            )),
            Err(EvmExactError::Verification(e)) => Ok(SettlementResult::failed(
                e.reason(),
                requirement.network.clone(),
                payer,
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn signers(&self, chain_id: &ChainId) -> Vec<String> {
        if chain_id == &self.chain_id() {
            self.chain
                .signer_addresses()
                .iter()
                .map(ToString::to_string)
                .collect()
        } else {
            Vec::new()
        }
    }
}

#[cfg(all(test, feature = "client"))]
mod tests {
    use super::*;
    use crate::chain::MetaTransaction;
    use crate::exact::client::EvmPaymentSigner;
    use crate::networks::{EVM_NETWORKS, USDC_BASE_SEPOLIA, known_assets};
    use alloy_primitives::{B256, TxHash, U256};
    use alloy_sol_types::SolCall;
    use alloy_signer_local::PrivateKeySigner;
    use std::sync::Mutex;
    use std::time::Duration;
    use x402_core::amount::TokenAmount;
    use x402_core::networks::NetworkRegistry;
    use x402_core::proto::ProtocolVersion;
    use x402_core::scheme::PaymentSigner;

    struct FakeChain {
        signers: Vec<Address>,
        balance: U256,
        receipts: Mutex<Vec<Option<bool>>>,
        sent: Mutex<Vec<MetaTransaction>>,
    }

    impl FakeChain {
        fn new(signer: Address, balance: u64, receipts: Vec<Option<bool>>) -> Self {
            Self {
                signers: vec![signer],
                balance: U256::from(balance),
                receipts: Mutex::new(receipts),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl EvmChain for FakeChain {
        fn chain_id(&self) -> u64 {
            84532
        }

        fn signer_addresses(&self) -> Vec<Address> {
            self.signers.clone()
        }

        async fn balance_of(&self, _asset: Address, _owner: Address) -> Result<U256, EvmExactError> {
            Ok(self.balance)
        }

        async fn send(&self, tx: MetaTransaction) -> Result<TxHash, EvmExactError> {
            self.sent.lock().unwrap().push(tx);
            Ok(B256::repeat_byte(0xaa))
        }

        async fn receipt_status(&self, _hash: TxHash) -> Result<Option<bool>, EvmExactError> {
            let mut receipts = self.receipts.lock().unwrap();
            Ok(if receipts.is_empty() { None } else { receipts.remove(0) })
        }
    }

    fn assets() -> Arc<AssetRegistry> {
        let networks = Arc::new(NetworkRegistry::from_networks(EVM_NETWORKS));
        Arc::new(AssetRegistry::new(networks).with_assets(known_assets()))
    }

    fn facilitator(chain: FakeChain) -> EvmExactFacilitator<FakeChain> {
        EvmExactFacilitator::new(chain, assets()).with_receipt_policy(ReceiptPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        })
    }

    async fn signed(pay_to: Address, amount: u64) -> (PaymentPayload, PaymentRequirement) {
        signed_for(pay_to, amount, SettlementMethod::TransferWithAuthorization).await
    }

    async fn signed_for(
        pay_to: Address,
        amount: u64,
        method: SettlementMethod,
    ) -> (PaymentPayload, PaymentRequirement) {
        let requirement = PaymentRequirement::exact(
            "base-sepolia",
            USDC_BASE_SEPOLIA,
            pay_to.to_string(),
            TokenAmount::from(amount),
        );
        let signer =
            EvmPaymentSigner::new(PrivateKeySigner::random(), assets()).with_settlement_method(method);
        let payload = signer.sign(&requirement).await.unwrap();
        (
            PaymentPayload::for_requirement(ProtocolVersion::V2, &requirement, payload),
            requirement,
        )
    }

    #[tokio::test]
    async fn valid_payment_verifies() {
        let pay_to = Address::repeat_byte(0x09);
        let (payment, requirement) = signed(pay_to, 1000).await;
        let facilitator = facilitator(FakeChain::new(pay_to, 5000, vec![]));
        let result = facilitator.verify(&payment, &requirement).await.unwrap();
        assert!(result.is_valid, "{result:?}");
        assert_eq!(result.payer.unwrap().to_lowercase(), payment.payer().to_lowercase());
    }

    #[tokio::test]
    async fn low_balance_is_insufficient_funds() {
        let pay_to = Address::repeat_byte(0x09);
        let (payment, requirement) = signed(pay_to, 1000).await;
        let result = facilitator(FakeChain::new(pay_to, 999, vec![]))
            .verify(&payment, &requirement)
            .await
            .unwrap();
        assert_eq!(result.invalid_reason, Some(ErrorReason::InsufficientFunds));
    }

    #[tokio::test]
    async fn wrong_recipient_and_value_have_own_codes() {
        let pay_to = Address::repeat_byte(0x09);
        let (payment, mut requirement) = signed(pay_to, 1000).await;
        let facilitator = facilitator(FakeChain::new(pay_to, 5000, vec![]));

        requirement.amount = TokenAmount::from(2000);
        let result = facilitator.verify(&payment, &requirement).await.unwrap();
        assert_eq!(
            result.invalid_reason,
            Some(ErrorReason::InvalidExactEvmPayloadAuthorizationValue)
        );

        requirement.amount = TokenAmount::from(1000);
        requirement.pay_to = Address::repeat_byte(0x07).to_string();
        let result = facilitator.verify(&payment, &requirement).await.unwrap();
        assert_eq!(
            result.invalid_reason,
            Some(ErrorReason::InvalidExactEvmPayloadRecipientMismatch)
        );
    }

    #[tokio::test]
    async fn forged_signature_is_rejected() {
        let pay_to = Address::repeat_byte(0x09);
        let (mut payment, requirement) = signed(pay_to, 1000).await;
        payment.payload.authorization.from = Address::repeat_byte(0x01).to_string();
        let result = facilitator(FakeChain::new(pay_to, 5000, vec![]))
            .verify(&payment, &requirement)
            .await
            .unwrap();
        assert_eq!(
            result.invalid_reason,
            Some(ErrorReason::InvalidExactEvmPayloadSignature)
        );
    }

    #[tokio::test]
    async fn other_chain_is_invalid_network() {
        let pay_to = Address::repeat_byte(0x09);
        let (mut payment, mut requirement) = signed(pay_to, 1000).await;
        requirement.network = "base".into();
        payment.network = "base".into();
        let result = facilitator(FakeChain::new(pay_to, 5000, vec![]))
            .verify(&payment, &requirement)
            .await
            .unwrap();
        assert_eq!(result.invalid_reason, Some(ErrorReason::InvalidNetwork));
    }

    #[tokio::test]
    async fn settle_polls_until_receipt() {
        let pay_to = Address::repeat_byte(0x09);
        let (payment, requirement) = signed(pay_to, 1000).await;
        let facilitator = facilitator(FakeChain::new(pay_to, 5000, vec![None, Some(true)]));
        let result = facilitator.settle(&payment, &requirement).await.unwrap();
        assert!(result.success);
        assert_eq!(result.transaction.as_deref(), Some(B256::repeat_byte(0xaa).to_string().as_str()));

        let sent = facilitator.chain.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, None);
        assert_eq!(
            &sent[0].calldata[..4],
            IEIP3009::transferWithAuthorizationCall::SELECTOR.as_slice()
        );
    }

    #[tokio::test]
    async fn settle_reports_revert_and_timeout() {
        let pay_to = Address::repeat_byte(0x09);
        let (payment, requirement) = signed(pay_to, 1000).await;
        let reverted = facilitator(FakeChain::new(pay_to, 5000, vec![Some(false)]))
            .settle(&payment, &requirement)
            .await
            .unwrap();
        assert!(!reverted.success);
        assert_eq!(reverted.error_reason, Some(ErrorReason::InvalidTransactionState));

        let pending = facilitator(FakeChain::new(pay_to, 5000, vec![]))
            .settle(&payment, &requirement)
            .await;
        assert!(matches!(pending, Err(SchemeError::Timeout(_))));
    }

    #[tokio::test]
    async fn receive_method_submits_from_payee() {
        let pay_to = Address::repeat_byte(0x09);
        let (payment, requirement) =
            signed_for(pay_to, 1000, SettlementMethod::ReceiveWithAuthorization).await;
        let facilitator = facilitator(FakeChain::new(pay_to, 5000, vec![Some(true)]))
            .with_settlement_method(SettlementMethod::ReceiveWithAuthorization);
        assert!(facilitator.settle(&payment, &requirement).await.unwrap().success);
        let sent = facilitator.chain.sent.lock().unwrap();
        assert_eq!(sent[0].from, Some(pay_to));
        assert_eq!(
            &sent[0].calldata[..4],
            IEIP3009::receiveWithAuthorizationCall::SELECTOR.as_slice()
        );
    }

    #[tokio::test]
    async fn receive_method_needs_payee_as_signer() {
        let pay_to = Address::repeat_byte(0x09);
        let (payment, requirement) =
            signed_for(pay_to, 1000, SettlementMethod::ReceiveWithAuthorization).await;
        let facilitator = facilitator(FakeChain::new(Address::repeat_byte(0x05), 5000, vec![Some(true)]))
            .with_settlement_method(SettlementMethod::ReceiveWithAuthorization);

        let verification = facilitator.verify(&payment, &requirement).await.unwrap();
        assert!(!verification.is_valid);
        assert_eq!(
            verification.invalid_reason,
            Some(ErrorReason::InvalidPaymentRequirements)
        );

        let settlement = facilitator.settle(&payment, &requirement).await.unwrap();
        assert!(!settlement.success);
        assert_eq!(
            settlement.error_reason,
            Some(ErrorReason::InvalidPaymentRequirements)
        );
        assert!(facilitator.chain.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn receive_method_rejects_transfer_signature() {
        let pay_to = Address::repeat_byte(0x09);
        let (payment, requirement) = signed(pay_to, 1000).await;
        let result = facilitator(FakeChain::new(pay_to, 5000, vec![]))
            .with_settlement_method(SettlementMethod::ReceiveWithAuthorization)
            .verify(&payment, &requirement)
            .await
            .unwrap();
        assert_eq!(
            result.invalid_reason,
            Some(ErrorReason::InvalidExactEvmPayloadSignature)
        );
    }
}
