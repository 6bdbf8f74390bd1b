//! Wallet-side construction of partially signed Solana transfers.
//!
//! [`SolanaPaymentSigner`] builds a `TransferChecked` from the wallet's
//! associated token account to the payee's, with the facilitator named in
//! `extra.feePayer` as fee payer. It signs only its own slot; slot 0 stays
//! empty for the facilitator.

use std::fmt;
use std::str::FromStr;

use rand::RngExt;
use rand::rng;
use solana_compute_budget_interface::ComputeBudgetInstruction;
use solana_message::VersionedMessage;
use solana_message::v0::Message as MessageV0;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_signer::Signer;
use solana_transaction::versioned::VersionedTransaction;
use spl_token::solana_program::program_pack::Pack;
use x402_core::encoding::Base64Bytes;
use x402_core::error::SchemeError;
use x402_core::scheme::PaymentSigner;
use x402_core::timestamp::UnixTimestamp;
use x402_core::types::{ExactPayload, PaymentAuthorization, PaymentRequirement};

#[cfg(feature = "telemetry")]
use tracing::instrument;

use super::types::{associated_token_account, encode_transaction, sign_slot};
use crate::rpc::SolanaRpc;

/// Default `validAfter` offset from now, in seconds.
pub const DEFAULT_VALID_AFTER_OFFSET: i64 = -60;
/// Default `validBefore` offset from now, in seconds.
pub const DEFAULT_VALID_BEFORE_OFFSET: i64 = 15 * 60;
/// Compute unit limit set on built transactions.
pub const DEFAULT_COMPUTE_UNIT_LIMIT: u32 = 50_000;
/// Priority fee in micro-lamports per compute unit.
pub const DEFAULT_COMPUTE_UNIT_PRICE: u64 = 1;

/// Token program and decimals of a mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintInfo {
    /// Program owning the mint account.
    pub token_program: Pubkey,
    /// Decimals used by `TransferChecked`.
    pub decimals: u8,
}

/// Reads the mint account and tells SPL Token from Token-2022 by its owner.
///
/// # Errors
///
/// RPC failure, or an account that is not an initialized mint.
pub async fn fetch_mint<R: SolanaRpc + ?Sized>(rpc: &R, mint: &Pubkey) -> Result<MintInfo, SchemeError> {
    let account = rpc.get_account(mint).await?;
    if account.owner != spl_token::ID && account.owner != spl_token_2022::ID {
        return Err(SchemeError::InvalidRequirement(format!(
            "{mint} is not owned by a token program"
        )));
    }
    // Token-2022 extensions follow the base layout, which both programs share.
    let base = account
        .data
        .get(..spl_token::state::Mint::LEN)
        .ok_or_else(|| SchemeError::InvalidRequirement(format!("{mint} is not a mint")))?;
    let state = spl_token::state::Mint::unpack(base)
        .map_err(|e| SchemeError::InvalidRequirement(format!("{mint}: {e}")))?;
    Ok(MintInfo {
        token_program: account.owner,
        decimals: state.decimals,
    })
}

/// Signs `exact` payments on Solana.
pub struct SolanaPaymentSigner<S, R> {
    signer: S,
    rpc: R,
    valid_after_offset: i64,
    valid_before_offset: i64,
    compute_unit_limit: u32,
    compute_unit_price: u64,
}

impl<S: Signer, R> fmt::Debug for SolanaPaymentSigner<S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolanaPaymentSigner")
            .field("pubkey", &self.signer.pubkey())
            .field("compute_unit_limit", &self.compute_unit_limit)
            .field("compute_unit_price", &self.compute_unit_price)
            .finish_non_exhaustive()
    }
}

impl<S: Signer, R: SolanaRpc> SolanaPaymentSigner<S, R> {
    /// Creates a signer with the default validity window and compute budget.
    pub const fn new(signer: S, rpc: R) -> Self {
        Self {
            signer,
            rpc,
            valid_after_offset: DEFAULT_VALID_AFTER_OFFSET,
            valid_before_offset: DEFAULT_VALID_BEFORE_OFFSET,
            compute_unit_limit: DEFAULT_COMPUTE_UNIT_LIMIT,
            compute_unit_price: DEFAULT_COMPUTE_UNIT_PRICE,
        }
    }

    /// Sets the `validAfter` and `validBefore` offsets from now, in seconds.
    #[must_use]
    pub const fn with_validity_window(mut self, after: i64, before: i64) -> Self {
        self.valid_after_offset = after;
        self.valid_before_offset = before;
        self
    }

    /// Sets the compute unit limit and the price in micro-lamports per unit.
    #[must_use]
    pub const fn with_compute_budget(mut self, limit: u32, micro_lamports: u64) -> Self {
        self.compute_unit_limit = limit;
        self.compute_unit_price = micro_lamports;
        self
    }

    /// Public key of the paying wallet.
    pub fn pubkey(&self) -> Pubkey {
        self.signer.pubkey()
    }

    async fn transaction(
        &self,
        fee_payer: &Pubkey,
        pay_to: &Pubkey,
        mint: &Pubkey,
        amount: u64,
    ) -> Result<VersionedTransaction, SchemeError> {
        let info = fetch_mint(&self.rpc, mint).await?;
        let owner = self.signer.pubkey();
        let source = associated_token_account(&owner, &info.token_program, mint);
        let destination = associated_token_account(pay_to, &info.token_program, mint);

        let transfer = if info.token_program == spl_token_2022::ID {
            spl_token_2022::instruction::transfer_checked(
                &info.token_program,
                &source,
                mint,
                &destination,
                &owner,
                &[],
                amount,
                info.decimals,
            )
            .map_err(|e| SchemeError::Signing(e.to_string()))?
        } else {
            spl_token::instruction::transfer_checked(
                &info.token_program,
                &source,
                mint,
                &destination,
                &owner,
                &[],
                amount,
                info.decimals,
            )
            .map_err(|e| SchemeError::Signing(e.to_string()))?
        };

        let instructions = [
            ComputeBudgetInstruction::set_compute_unit_limit(self.compute_unit_limit),
            ComputeBudgetInstruction::set_compute_unit_price(self.compute_unit_price),
            transfer,
        ];
        let blockhash = self.rpc.latest_blockhash().await?;
        let message = MessageV0::try_compile(fee_payer, &instructions, &[], blockhash)
            .map_err(|e| SchemeError::Signing(format!("{e:?}")))?;
        let message = VersionedMessage::V0(message);
        let required = usize::from(message.header().num_required_signatures);
        let mut transaction = VersionedTransaction {
            signatures: vec![Signature::default(); required],
            message,
        };
        sign_slot(&mut transaction, &self.signer)?;
        Ok(transaction)
    }
}

fn requirement_key(field: &str, value: &str) -> Result<Pubkey, SchemeError> {
    Pubkey::from_str(value).map_err(|e| SchemeError::InvalidRequirement(format!("{field}: {e}")))
}

#[async_trait::async_trait]
impl<S, R> PaymentSigner for SolanaPaymentSigner<S, R>
where
    S: Signer + Send + Sync,
    R: SolanaRpc,
{
    #[cfg_attr(feature = "telemetry", instrument(name = "x402.svm.sign", skip_all, err))]
    async fn sign(&self, requirement: &PaymentRequirement) -> Result<ExactPayload, SchemeError> {
        let fee_payer = requirement
            .fee_payer()
            .ok_or_else(|| SchemeError::InvalidRequirement("missing feePayer in extra".into()))?;
        let fee_payer = requirement_key("feePayer", fee_payer)?;
        let pay_to = requirement_key("payTo", &requirement.pay_to)?;
        let mint = requirement_key("asset", &requirement.asset)?;
        let amount = requirement
            .amount
            .to_u64()
            .ok_or_else(|| SchemeError::InvalidAmount(requirement.amount.to_string()))?;

        let transaction = self.transaction(&fee_payer, &pay_to, &mint, amount).await?;

        let now = UnixTimestamp::now();
        let nonce: [u8; 32] = rng().random();
        Ok(ExactPayload {
            signature: encode_transaction(&transaction)?,
            authorization: PaymentAuthorization {
                from: self.signer.pubkey().to_string(),
                to: pay_to.to_string(),
                value: requirement.amount,
                valid_after: now.offset(self.valid_after_offset),
                valid_before: now.offset(self.valid_before_offset),
                nonce: Base64Bytes::encode(nonce).to_string(),
            },
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::exact::SolanaExactError;
    use crate::exact::types::{decode_transaction, find_transfer_checked};
    use solana_account::Account;
    use solana_keypair::Keypair;
    use solana_message::Hash;
    use std::sync::Mutex;
    use x402_core::amount::TokenAmount;

    /// In-memory RPC: one mint account, a fixed blockhash, scripted simulation.
    pub(crate) struct FakeRpc {
        pub mint_owner: Pubkey,
        pub simulation_error: Option<String>,
        pub sent: Mutex<Vec<VersionedTransaction>>,
    }

    impl FakeRpc {
        pub(crate) fn new() -> Self {
            Self {
                mint_owner: spl_token::ID,
                simulation_error: None,
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl SolanaRpc for FakeRpc {
        async fn get_account(&self, _pubkey: &Pubkey) -> Result<Account, SolanaExactError> {
            let mut data = vec![0u8; spl_token::state::Mint::LEN];
            data[44] = 6;
            data[45] = 1;
            Ok(Account {
                lamports: 1_000_000,
                data,
                owner: self.mint_owner,
                executable: false,
                rent_epoch: 0,
            })
        }

        async fn latest_blockhash(&self) -> Result<Hash, SolanaExactError> {
            Ok(Hash::default())
        }

        async fn simulate(&self, _transaction: &VersionedTransaction) -> Result<Option<String>, SolanaExactError> {
            Ok(self.simulation_error.clone())
        }

        async fn send(&self, transaction: &VersionedTransaction) -> Result<Signature, SolanaExactError> {
            self.sent.lock().unwrap().push(transaction.clone());
            Ok(transaction.signatures[0])
        }
    }

    pub(crate) const MINT: &str = "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU";

    pub(crate) fn requirement(fee_payer: &Pubkey, pay_to: &Pubkey, amount: u64) -> PaymentRequirement {
        PaymentRequirement::exact("solana-devnet", MINT, pay_to.to_string(), TokenAmount::from(amount))
            .with_fee_payer(fee_payer.to_string())
    }

    #[tokio::test]
    async fn leaves_fee_payer_slot_empty() {
        let fee_payer = Keypair::new();
        let pay_to = Keypair::new().pubkey();
        let wallet = Keypair::new();
        let wallet_key = wallet.pubkey();
        let signer = SolanaPaymentSigner::new(wallet, FakeRpc::new());

        let payload = signer
            .sign(&requirement(&fee_payer.pubkey(), &pay_to, 2500))
            .await
            .unwrap();
        let transaction = decode_transaction(&payload.signature).unwrap();
        let keys = transaction.message.static_account_keys();
        assert_eq!(keys[0], fee_payer.pubkey());
        assert_eq!(transaction.signatures.len(), 2);
        assert_eq!(transaction.signatures[0], Signature::default());
        assert_ne!(transaction.signatures[1], Signature::default());

        let mint = Pubkey::from_str(MINT).unwrap();
        let transfer = find_transfer_checked(&transaction).unwrap();
        assert_eq!(transfer.amount, 2500);
        assert_eq!(transfer.decimals, 6);
        assert_eq!(transfer.authority, wallet_key);
        assert_eq!(
            transfer.destination,
            associated_token_account(&pay_to, &spl_token::ID, &mint)
        );
        assert_eq!(payload.authorization.from, wallet_key.to_string());
        assert_eq!(Base64Bytes::from(payload.authorization.nonce.as_str()).decode().unwrap().len(), 32);
        assert!(payload.authorization.valid_after < payload.authorization.valid_before);
    }

    #[tokio::test]
    async fn token_2022_mints_use_their_program() {
        let rpc = FakeRpc {
            mint_owner: spl_token_2022::ID,
            ..FakeRpc::new()
        };
        let signer = SolanaPaymentSigner::new(Keypair::new(), rpc);
        let payload = signer
            .sign(&requirement(&Keypair::new().pubkey(), &Keypair::new().pubkey(), 1))
            .await
            .unwrap();
        let transfer = find_transfer_checked(&decode_transaction(&payload.signature).unwrap()).unwrap();
        assert_eq!(transfer.token_program, spl_token_2022::ID);
    }

    #[tokio::test]
    async fn missing_fee_payer_is_rejected() {
        let signer = SolanaPaymentSigner::new(Keypair::new(), FakeRpc::new());
        let requirement = PaymentRequirement::exact(
            "solana-devnet",
            MINT,
            Keypair::new().pubkey().to_string(),
            TokenAmount::from(1),
        );
        assert!(matches!(
            signer.sign(&requirement).await,
            Err(SchemeError::InvalidRequirement(_))
        ));
    }

    #[tokio::test]
    async fn nonces_are_fresh() {
        let signer = SolanaPaymentSigner::new(Keypair::new(), FakeRpc::new());
        let requirement = requirement(&Keypair::new().pubkey(), &Keypair::new().pubkey(), 10);
        let a = signer.sign(&requirement).await.unwrap();
        let b = signer.sign(&requirement).await.unwrap();
        assert_ne!(a.authorization.nonce, b.authorization.nonce);
    }
}
