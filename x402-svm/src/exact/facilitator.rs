//! Facilitator-side verification and settlement of Solana `exact` payments.
//!
//! Verification decodes the client's partially signed transaction, checks
//! the fee payer and the `TransferChecked` against the requirement, co-signs
//! slot 0 and simulates with signature verification on. Settlement repeats
//! the checks and submits; the node accepting the transaction is success.

use std::sync::Arc;

use solana_keypair::Keypair;
use solana_pubkey::Pubkey;
use solana_signer::Signer;
use solana_transaction::versioned::VersionedTransaction;
use x402_core::chain::ChainId;
use x402_core::error::{ErrorReason, PaymentVerificationError, SchemeError};
use x402_core::networks::NetworkRegistry;
use x402_core::scheme::SchemeFacilitator;
use x402_core::timestamp::UnixTimestamp;
use x402_core::types::{PaymentPayload, PaymentRequirement, SettlementResult, VerificationResult};

#[cfg(feature = "telemetry")]
use tracing::{debug, instrument};

use super::SolanaExactError;
use super::types::{
    FeePayerExtra, associated_token_account, decode_transaction, find_transfer_checked,
    is_fully_signed, parse_pubkey, sign_slot,
};
use crate::rpc::SolanaRpc;

/// Reads a keypair from its base58 encoding.
///
/// # Errors
///
/// [`SolanaExactError::Config`] when the text is not a 64-byte base58 keypair.
pub fn keypair_from_base58(encoded: &str) -> Result<Keypair, SolanaExactError> {
    let bytes = bs58::decode(encoded.trim())
        .into_vec()
        .map_err(|e| SolanaExactError::Config(format!("keypair: {e}")))?;
    Keypair::try_from(bytes.as_slice()).map_err(|e| SolanaExactError::Config(format!("keypair: {e}")))
}

/// A co-signed transaction that passed every check.
#[derive(Debug, Clone)]
pub struct VerifiedTransfer {
    /// Transaction signed by payer and fee payer.
    pub transaction: VersionedTransaction,
    /// Transfer authority.
    pub payer: Pubkey,
}

/// The `exact` scheme facilitator for one Solana cluster.
pub struct SolanaExactFacilitator<R> {
    chain_id: ChainId,
    networks: Arc<NetworkRegistry>,
    fee_payer: Keypair,
    rpc: R,
}

impl<R> std::fmt::Debug for SolanaExactFacilitator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaExactFacilitator")
            .field("chain_id", &self.chain_id)
            .field("fee_payer", &self.fee_payer.pubkey())
            .finish_non_exhaustive()
    }
}

impl<R: SolanaRpc> SolanaExactFacilitator<R> {
    /// A facilitator for `chain_id` paying fees from `fee_payer`.
    pub const fn new(chain_id: ChainId, networks: Arc<NetworkRegistry>, fee_payer: Keypair, rpc: R) -> Self {
        Self {
            chain_id,
            networks,
            fee_payer,
            rpc,
        }
    }

    /// Fee payer advertised in `/supported`.
    pub fn fee_payer(&self) -> Pubkey {
        self.fee_payer.pubkey()
    }

    /// Runs every verification step and returns the co-signed transaction.
    ///
    /// # Errors
    ///
    /// [`SolanaExactError::Verification`] for payment problems; other
    /// variants for RPC and signing failures.
    pub async fn check(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<VerifiedTransfer, SolanaExactError> {
        if self.networks.resolve(&requirement.network).as_ref() != Some(&self.chain_id)
            || !self.networks.same_network(&payment.network, &requirement.network)
        {
            return Err(PaymentVerificationError::InvalidNetwork.into());
        }
        if payment.scheme != requirement.scheme {
            return Err(PaymentVerificationError::InvalidScheme.into());
        }
        payment.payload.authorization.check_window(UnixTimestamp::now())?;

        let mut transaction = decode_transaction(&payment.payload.signature)?;
        let fee_payer = self.fee_payer.pubkey();
        if transaction.message.static_account_keys().first() != Some(&fee_payer) {
            return Err(PaymentVerificationError::TransactionState(format!(
                "fee payer must be {fee_payer}"
            ))
            .into());
        }
        let transfer = find_transfer_checked(&transaction).ok_or_else(|| {
            PaymentVerificationError::InvalidPayload("no TransferChecked instruction".into())
        })?;
        if transfer.authority == fee_payer {
            return Err(PaymentVerificationError::TransactionState(
                "fee payer cannot authorize the transfer".into(),
            )
            .into());
        }
        if transfer.authority != parse_pubkey("from", &payment.payload.authorization.from)? {
            return Err(PaymentVerificationError::InvalidPayload(
                "transfer authority does not match the payer".into(),
            )
            .into());
        }

        let requirements_error = PaymentVerificationError::InvalidRequirements;
        let mint = parse_pubkey("asset", &requirement.asset).map_err(|e| requirements_error(e.to_string()))?;
        let pay_to = parse_pubkey("payTo", &requirement.pay_to).map_err(|e| requirements_error(e.to_string()))?;
        if transfer.mint != mint {
            return Err(requirements_error(format!("mint {} is not {mint}", transfer.mint)).into());
        }
        if transfer.destination != associated_token_account(&pay_to, &transfer.token_program, &mint) {
            return Err(requirements_error("destination is not the payTo token account".into()).into());
        }
        if requirement.amount.to_u64() != Some(transfer.amount) {
            return Err(requirements_error(format!(
                "transfer of {} does not equal {}",
                transfer.amount, requirement.amount
            ))
            .into());
        }

        sign_slot(&mut transaction, &self.fee_payer)?;
        if let Some(error) = self.rpc.simulate(&transaction).await? {
            #[cfg(feature = "telemetry")]
            debug!(error = %error, "simulation failed");
            return Err(PaymentVerificationError::SimulationFailed(error).into());
        }

        Ok(VerifiedTransfer {
            transaction,
            payer: transfer.authority,
        })
    }
}

#[async_trait::async_trait]
impl<R: SolanaRpc + 'static> SchemeFacilitator for SolanaExactFacilitator<R> {
    #[cfg_attr(feature = "telemetry", instrument(name = "x402.svm.verify", skip_all, err))]
    async fn verify(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<VerificationResult, SchemeError> {
        match self.check(payment, requirement).await {
            Ok(verified) => Ok(VerificationResult::valid(verified.payer.to_string())),
            Err(SolanaExactError::Verification(e)) => Ok(VerificationResult::rejected(
                &e,
                Some(payment.payer().to_owned()),
            )),
            Err(e) => Err(e.into()),
        }
    }

    #[cfg_attr(feature = "telemetry", instrument(name = "x402.svm.settle", skip_all, err))]
    async fn settle(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<SettlementResult, SchemeError> {
        let verified = match self.check(payment, requirement).await {
            Ok(verified) => verified,
            Err(SolanaExactError::Verification(e)) => {
                return Ok(SettlementResult::failed(
                    e.reason(),
                    requirement.network.clone(),
                    Some(payment.payer().to_owned()),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        let payer = Some(verified.payer.to_string());
        if !is_fully_signed(&verified.transaction) {
            return Ok(SettlementResult::failed(
                ErrorReason::InvalidTransactionState,
                requirement.network.clone(),
                payer,
            ));
        }
        let signature = self.rpc.send(&verified.transaction).await?;
        Ok(SettlementResult::settled(
            signature.to_string(),
            requirement.network.clone(),
            payer,
        ))
    }

    fn extra(&self, chain_id: &ChainId) -> Option<serde_json::Value> {
        (chain_id == &self.chain_id)
            .then(|| {
                serde_json::to_value(FeePayerExtra {
                    fee_payer: self.fee_payer.pubkey().to_string(),
                })
                .ok()
            })
            .flatten()
    }

    fn signers(&self, chain_id: &ChainId) -> Vec<String> {
        if chain_id == &self.chain_id {
            vec![self.fee_payer.pubkey().to_string()]
        } else {
            Vec::new()
        }
    }
}
