//! Checks that run before any transaction is sent.

use alloy_primitives::{Address, B256, Bytes, Signature, U256};
use alloy_sol_types::Eip712Domain;
use x402_core::error::PaymentVerificationError;

use crate::chain::EvmChain;
use crate::exact::types::{EvmAuthorization, SettlementMethod};

/// Parses a 65-byte `(r, s, v)` signature whose `v` is 27/28 or 0/1.
///
/// # Errors
///
/// [`PaymentVerificationError::InvalidSignature`] for any other shape.
pub fn parse_signature(bytes: &Bytes) -> Result<Signature, PaymentVerificationError> {
    if bytes.len() != 65 {
        return Err(PaymentVerificationError::InvalidSignature(format!(
            "expected 65 bytes, got {}",
            bytes.len()
        )));
    }
    let y_parity = match bytes[64] {
        0 | 27 => false,
        1 | 28 => true,
        v => {
            return Err(PaymentVerificationError::InvalidSignature(format!(
                "unsupported recovery id {v}"
            )));
        }
    };
    let r = U256::from_be_slice(&bytes[..32]);
    let s = U256::from_be_slice(&bytes[32..64]);
    Ok(Signature::new(r, s, y_parity))
}

/// Recovers the signer of the authorization's EIP-712 digest for `method`
/// and requires it to be `authorization.from`.
///
/// # Errors
///
/// [`PaymentVerificationError::InvalidSignature`].
pub fn assert_signer(
    authorization: &EvmAuthorization,
    domain: &Eip712Domain,
    method: SettlementMethod,
) -> Result<Signature, PaymentVerificationError> {
    let signature = parse_signature(&authorization.signature)?;
    let digest: B256 = authorization.signing_hash(method, domain);
    let recovered: Address = signature
        .recover_address_from_prehash(&digest)
        .map_err(|e| PaymentVerificationError::InvalidSignature(e.to_string()))?;
    if recovered == authorization.from {
        Ok(signature)
    } else {
        Err(PaymentVerificationError::InvalidSignature(format!(
            "signed by {recovered}, not {}",
            authorization.from
        )))
    }
}

/// Requires the authorized value to cover the required amount.
///
/// # Errors
///
/// [`PaymentVerificationError::InvalidValue`] when `sent < required`.
pub fn assert_enough_value(sent: U256, required: U256) -> Result<(), PaymentVerificationError> {
    if sent < required {
        Err(PaymentVerificationError::InvalidValue)
    } else {
        Ok(())
    }
}

/// Reads the payer's token balance.
///
/// # Errors
///
/// [`PaymentVerificationError::InsufficientFunds`] as a verification error, or
/// the RPC failure.
pub async fn assert_enough_balance<C: EvmChain + ?Sized>(
    chain: &C,
    asset: Address,
    payer: Address,
    required: U256,
) -> Result<(), super::EvmExactError> {
    let balance = chain.balance_of(asset, payer).await?;
    if balance < required {
        return Err(PaymentVerificationError::InsufficientFunds.into());
    }
    Ok(())
}
