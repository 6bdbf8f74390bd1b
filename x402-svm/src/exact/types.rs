//! Transaction helpers shared by the Solana signer and facilitator.

use serde::{Deserialize, Serialize};
use solana_pubkey::{Pubkey, pubkey};
use std::str::FromStr;
use x402_core::error::PaymentVerificationError;

#[cfg(any(feature = "client", feature = "facilitator"))]
use solana_signature::Signature;
#[cfg(any(feature = "client", feature = "facilitator"))]
use solana_signer::Signer;
#[cfg(any(feature = "client", feature = "facilitator"))]
use solana_transaction::versioned::VersionedTransaction;
#[cfg(any(feature = "client", feature = "facilitator"))]
use x402_core::encoding::Base64Bytes;

#[cfg(any(feature = "client", feature = "facilitator"))]
use super::SolanaExactError;

/// Associated Token Account program.
pub const ATA_PROGRAM_ID: Pubkey = pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// `extra` advertised by the facilitator and echoed in requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeePayerExtra {
    /// Base58 fee payer public key.
    pub fee_payer: String,
}

/// Parses a base58 public key, naming the field on failure.
///
/// # Errors
///
/// [`PaymentVerificationError::InvalidPayload`] for malformed keys.
pub fn parse_pubkey(field: &str, value: &str) -> Result<Pubkey, PaymentVerificationError> {
    Pubkey::from_str(value)
        .map_err(|e| PaymentVerificationError::InvalidPayload(format!("{field}: {e}")))
}

/// The associated token account of `owner` for `mint` under `token_program`.
#[must_use]
pub fn associated_token_account(owner: &Pubkey, token_program: &Pubkey, mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[owner.as_ref(), token_program.as_ref(), mint.as_ref()],
        &ATA_PROGRAM_ID,
    )
    .0
}

/// # Errors
///
/// [`PaymentVerificationError::InvalidPayload`] when the text is not base64
/// of a bincode transaction.
#[cfg(any(feature = "client", feature = "facilitator"))]
pub fn decode_transaction(encoded: &str) -> Result<VersionedTransaction, PaymentVerificationError> {
    let bytes = Base64Bytes::from(encoded)
        .decode()
        .map_err(|e| PaymentVerificationError::InvalidPayload(format!("transaction: {e}")))?;
    bincode::deserialize(&bytes)
        .map_err(|e| PaymentVerificationError::InvalidPayload(format!("transaction: {e}")))
}

/// # Errors
///
/// Serialization failure.
#[cfg(any(feature = "client", feature = "facilitator"))]
pub fn encode_transaction(transaction: &VersionedTransaction) -> Result<String, SolanaExactError> {
    let bytes =
        bincode::serialize(transaction).map_err(|e| SolanaExactError::Transaction(e.to_string()))?;
    Ok(Base64Bytes::encode(bytes).to_string())
}

/// Signs the message into `signer`'s slot among the required signers and
/// returns that slot.
///
/// # Errors
///
/// The signer is not a required signer, or signing fails.
#[cfg(any(feature = "client", feature = "facilitator"))]
pub fn sign_slot<S: Signer + ?Sized>(
    transaction: &mut VersionedTransaction,
    signer: &S,
) -> Result<usize, SolanaExactError> {
    let required = usize::from(transaction.message.header().num_required_signatures);
    let pubkey = signer.pubkey();
    let slot = transaction
        .message
        .static_account_keys()
        .iter()
        .take(required)
        .position(|key| *key == pubkey)
        .ok_or_else(|| SolanaExactError::Transaction(format!("{pubkey} is not a required signer")))?;
    let signature = signer
        .try_sign_message(&transaction.message.serialize())
        .map_err(|e| SolanaExactError::Transaction(e.to_string()))?;
    if transaction.signatures.len() < required {
        transaction.signatures.resize(required, Signature::default());
    }
    transaction.signatures[slot] = signature;
    Ok(slot)
}

/// Whether every required signature slot is filled.
#[cfg(any(feature = "client", feature = "facilitator"))]
#[must_use]
pub fn is_fully_signed(transaction: &VersionedTransaction) -> bool {
    let required = usize::from(transaction.message.header().num_required_signatures);
    transaction.signatures.len() >= required
        && transaction
            .signatures
            .iter()
            .all(|signature| *signature != Signature::default())
}

/// A decoded SPL Token or Token-2022 `TransferChecked` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferChecked {
    /// SPL Token or Token-2022.
    pub token_program: Pubkey,
    /// Payer's token account.
    pub source: Pubkey,
    /// Token mint.
    pub mint: Pubkey,
    /// Payee's token account.
    pub destination: Pubkey,
    /// Owner of `source`.
    pub authority: Pubkey,
    /// Atomic amount.
    pub amount: u64,
    /// Mint decimals.
    pub decimals: u8,
}

/// Finds the first `TransferChecked` instruction of either token program.
///
/// Both programs share the instruction layout, so Token's decoder reads both.
#[cfg(any(feature = "client", feature = "facilitator"))]
#[must_use]
pub fn find_transfer_checked(transaction: &VersionedTransaction) -> Option<TransferChecked> {
    let keys = transaction.message.static_account_keys();
    transaction.message.instructions().iter().find_map(|instruction| {
        let token_program = *instruction.program_id(keys);
        if token_program != spl_token::ID && token_program != spl_token_2022::ID {
            return None;
        }
        let spl_token::instruction::TokenInstruction::TransferChecked { amount, decimals } =
            spl_token::instruction::TokenInstruction::unpack(&instruction.data).ok()?
        else {
            return None;
        };
        let account = |index: usize| {
            instruction
                .accounts
                .get(index)
                .and_then(|key| keys.get(usize::from(*key)))
                .copied()
        };
        Some(TransferChecked {
            token_program,
            source: account(0)?,
            mint: account(1)?,
            destination: account(2)?,
            authority: account(3)?,
            amount,
            decimals,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_keys_name_the_field() {
        let err = parse_pubkey("payTo", "not-base58!").unwrap_err();
        assert!(matches!(err, PaymentVerificationError::InvalidPayload(message) if message.starts_with("payTo")));
    }

    #[cfg(any(feature = "client", feature = "facilitator"))]
    #[test]
    fn ata_depends_on_program() {
        let owner = Pubkey::new_from_array([1; 32]);
        let mint = Pubkey::new_from_array([2; 32]);
        assert_ne!(
            associated_token_account(&owner, &spl_token::ID, &mint),
            associated_token_account(&owner, &spl_token_2022::ID, &mint)
        );
    }

    #[test]
    fn fee_payer_extra_is_camel_case() {
        let extra = FeePayerExtra { fee_payer: "abc".into() };
        assert_eq!(serde_json::to_string(&extra).unwrap(), r#"{"feePayer":"abc"}"#);
    }
}
