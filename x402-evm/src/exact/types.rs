//! Typed views of the chain-agnostic `exact` payload for EVM.
//!
//! The wire payload carries addresses, nonces and signatures as strings.
//! [`EvmAuthorization::parse`] turns them into alloy types once, so that
//! verification and settlement never re-parse.

use std::str::FromStr;

use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain, sol};
use serde::{Deserialize, Serialize};
use x402_core::error::PaymentVerificationError;
use x402_core::timestamp::UnixTimestamp;
use x402_core::types::ExactPayload;

sol!(
    /// EIP-712 message signed by the payer for `transferWithAuthorization`.
    #[allow(missing_docs)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }

    /// EIP-712 message signed by the payer for `receiveWithAuthorization`.
    #[allow(missing_docs)]
    struct ReceiveWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
);

/// Which EIP-3009 entry point settles a payment.
///
/// The token checks the signature against the typehash of the function
/// called, so wallet and facilitator must agree on the method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettlementMethod {
    /// `transferWithAuthorization`; any account may submit.
    #[default]
    TransferWithAuthorization,
    /// `receiveWithAuthorization`; the submitting account must be the payee,
    /// so `payTo` has to be one of the facilitator's signers.
    ReceiveWithAuthorization,
}

/// A parsed ERC-3009 authorization and its signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmAuthorization {
    /// Payer.
    pub from: Address,
    /// Payee.
    pub to: Address,
    /// Atomic token units.
    pub value: U256,
    /// Earliest settlement time.
    pub valid_after: UnixTimestamp,
    /// Latest settlement time.
    pub valid_before: UnixTimestamp,
    /// Random 32-byte nonce, single use per payer.
    pub nonce: B256,
    /// Raw 65-byte `(r, s, v)` signature; empty before signing.
    pub signature: Bytes,
}

impl EvmAuthorization {
    /// # Errors
    ///
    /// [`PaymentVerificationError::InvalidPayload`] when an address, the
    /// nonce or the signature is not valid hex of the right shape.
    pub fn parse(payload: &ExactPayload) -> Result<Self, PaymentVerificationError> {
        let authorization = &payload.authorization;
        Ok(Self {
            from: parse_address("from", &authorization.from)?,
            to: parse_address("to", &authorization.to)?,
            value: authorization.value.as_u256(),
            valid_after: authorization.valid_after,
            valid_before: authorization.valid_before,
            nonce: B256::from_str(&authorization.nonce)
                .map_err(|e| PaymentVerificationError::InvalidPayload(format!("nonce: {e}")))?,
            signature: Bytes::from_str(&payload.signature)
                .map_err(|e| PaymentVerificationError::InvalidPayload(format!("signature: {e}")))?,
        })
    }

    /// The `transferWithAuthorization` EIP-712 message.
    #[must_use]
    pub fn message(&self) -> TransferWithAuthorization {
        TransferWithAuthorization {
            from: self.from,
            to: self.to,
            value: self.value,
            validAfter: U256::from(self.valid_after.as_secs()),
            validBefore: U256::from(self.valid_before.as_secs()),
            nonce: self.nonce,
        }
    }

    /// The `receiveWithAuthorization` EIP-712 message.
    #[must_use]
    pub fn receive_message(&self) -> ReceiveWithAuthorization {
        ReceiveWithAuthorization {
            from: self.from,
            to: self.to,
            value: self.value,
            validAfter: U256::from(self.valid_after.as_secs()),
            validBefore: U256::from(self.valid_before.as_secs()),
            nonce: self.nonce,
        }
    }

    /// The digest the payer signs for settlement through `method`.
    #[must_use]
    pub fn signing_hash(&self, method: SettlementMethod, domain: &Eip712Domain) -> B256 {
        match method {
            SettlementMethod::TransferWithAuthorization => self.message().eip712_signing_hash(domain),
            SettlementMethod::ReceiveWithAuthorization => {
                self.receive_message().eip712_signing_hash(domain)
            }
        }
    }
}

/// Parses a hex address, naming the field on failure.
///
/// # Errors
///
/// [`PaymentVerificationError::InvalidPayload`].
pub fn parse_address(field: &str, value: &str) -> Result<Address, PaymentVerificationError> {
    Address::from_str(value)
        .map_err(|e| PaymentVerificationError::InvalidPayload(format!("{field}: {e}")))
}

/// EIP-712 domain of an ERC-3009 token.
#[must_use]
pub fn token_domain(name: &str, version: &str, chain_id: u64, asset: Address) -> Eip712Domain {
    eip712_domain! {
        name: name.to_owned(),
        version: version.to_owned(),
        chain_id: chain_id,
        verifying_contract: asset,
    }
}
