//! Submitting an authorization and waiting for its receipt.

use std::time::Duration;

use alloy_primitives::{B256, Signature, TxHash, U256};
use alloy_sol_types::SolCall;

use x402_core::error::PaymentVerificationError;

use super::contract::IEIP3009;
use super::error::EvmExactError;
use crate::chain::{EvmChain, MetaTransaction};
use crate::exact::types::{EvmAuthorization, SettlementMethod};

/// Bounded receipt polling: `attempts` lookups, `delay` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptPolicy {
    /// Receipt lookups before giving up.
    pub attempts: u32,
    /// Pause between lookups.
    pub delay: Duration,
}

impl Default for ReceiptPolicy {
    fn default() -> Self {
        Self {
            attempts: 30,
            delay: Duration::from_secs(2),
        }
    }
}

/// ABI-encodes the EIP-3009 call for `method`.
#[must_use]
pub fn calldata(
    method: SettlementMethod,
    authorization: &EvmAuthorization,
    signature: &Signature,
) -> Vec<u8> {
    let v = 27 + u8::from(signature.v());
    let r = B256::from(signature.r());
    let s = B256::from(signature.s());
    let valid_after = U256::from(authorization.valid_after.as_secs());
    let valid_before = U256::from(authorization.valid_before.as_secs());
    match method {
        SettlementMethod::ReceiveWithAuthorization => IEIP3009::receiveWithAuthorizationCall {
            from: authorization.from,
            to: authorization.to,
            value: authorization.value,
            validAfter: valid_after,
            validBefore: valid_before,
            nonce: authorization.nonce,
            v,
            r,
            s,
        }
        .abi_encode(),
        SettlementMethod::TransferWithAuthorization => IEIP3009::transferWithAuthorizationCall {
            from: authorization.from,
            to: authorization.to,
            value: authorization.value,
            validAfter: valid_after,
            validBefore: valid_before,
            nonce: authorization.nonce,
            v,
            r,
            s,
        }
        .abi_encode(),
    }
}

/// `receiveWithAuthorization` with a payee the facilitator cannot sign for.
pub(super) fn payee_not_signer(pay_to: alloy_primitives::Address) -> PaymentVerificationError {
    PaymentVerificationError::InvalidRequirements(format!(
        "receiveWithAuthorization needs payTo {pay_to} to be a facilitator signer"
    ))
}

/// Sends the authorization to the token contract and polls for the receipt.
///
/// `receiveWithAuthorization` is sent from the payee's account, which must be
/// one of the chain's signers.
///
/// # Errors
///
/// [`EvmExactError::Verification`] when the payee cannot submit a
/// `receiveWithAuthorization`; submission failures, a reverted transaction,
/// or no receipt within `policy`.
#[cfg_attr(feature = "telemetry", tracing::instrument(name = "x402.evm.settle_onchain", skip_all, err, fields(
    from = %authorization.from,
    to = %authorization.to,
    value = %authorization.value,
)))]
pub async fn settle_payment<C: EvmChain + ?Sized>(
    chain: &C,
    asset: alloy_primitives::Address,
    authorization: &EvmAuthorization,
    signature: &Signature,
    method: SettlementMethod,
    policy: ReceiptPolicy,
) -> Result<TxHash, EvmExactError> {
    let from = match method {
        SettlementMethod::ReceiveWithAuthorization => {
            if !chain.signer_addresses().contains(&authorization.to) {
                return Err(payee_not_signer(authorization.to).into());
            }
            Some(authorization.to)
        }
        SettlementMethod::TransferWithAuthorization => None,
    };
    let hash = chain
        .send(MetaTransaction {
            from,
            to: asset,
            calldata: calldata(method, authorization, signature).into(),
        })
        .await?;

    for _ in 0..policy.attempts {
        match chain.receipt_status(hash).await? {
            Some(true) => {
                #[cfg(feature = "telemetry")]
                tracing::info!(tx = %hash, "authorization settled");
                return Ok(hash);
            }
            Some(false) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(tx = %hash, "authorization reverted");
                return Err(EvmExactError::Reverted(hash));
            }
            None => tokio::time::sleep(policy.delay).await,
        }
    }
    Err(EvmExactError::ReceiptTimeout(hash))
}
