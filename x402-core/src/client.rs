//! Transport-agnostic core of the client retry handler.
//!
//! The HTTP layer owns the loop (send, see 402, retry); [`PaymentClient`]
//! owns every decision inside it:
//!
//! 1. read the 402 demand ([`PaymentClient::parse_payment_required`])
//! 2. keep the requirements a registered signer can pay
//! 3. let the [`PaymentSelector`] pick one against local allowances
//! 4. ask the optional `before_payment` callback
//! 5. sign and encode the version-correct header ([`PaymentClient::payment_header`])
//!
//! Any `None` along the way means "do not retry, hand the 402 back".

use std::fmt;
use std::sync::Arc;

#[cfg(feature = "telemetry")]
use tracing::{debug, instrument};

use crate::error::SchemeError;
use crate::networks::NetworkRegistry;
use crate::proto::{AdapterError, ProtocolAdapter};
use crate::scheme::{PaymentSigner, SchemeRegistry};
use crate::selector::{FirstAffordable, PaymentSelector};
use crate::types::{AssetAllowance, PaymentPayload, PaymentRequired, PaymentRequirement};

/// Default number of paid retries per request.
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Callback consulted after selection. Returning `false` stops the retry.
pub type BeforePaymentHook = Arc<dyn Fn(&PaymentRequirement, &PaymentRequired) -> bool + Send + Sync>;

/// Why a payment header could not be produced for a payable demand.
#[derive(Debug, thiserror::Error)]
pub enum PaymentClientError {
    /// The scheme signer failed.
    #[error("failed to sign payment: {0}")]
    Signing(#[from] SchemeError),
    /// The signed payment could not be put on the wire.
    #[error("failed to encode payment: {0}")]
    Encoding(#[from] AdapterError),
}

/// A header to attach to the retried request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentHeader {
    /// Header name for the demand's version.
    pub name: &'static str,
    /// Base64-encoded payment payload.
    pub value: String,
    /// The requirement the payment was made for.
    pub requirement: PaymentRequirement,
}

/// Wallet-side decisions of the 402 handshake.
#[derive(Clone)]
pub struct PaymentClient {
    adapter: ProtocolAdapter,
    signers: SchemeRegistry<dyn PaymentSigner>,
    selector: Arc<dyn PaymentSelector>,
    allowances: Vec<AssetAllowance>,
    ignore_allowances: bool,
    max_retries: u32,
    before_payment: Option<BeforePaymentHook>,
}

impl fmt::Debug for PaymentClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentClient")
            .field("signers", &self.signers)
            .field("allowances", &self.allowances)
            .field("ignore_allowances", &self.ignore_allowances)
            .field("max_retries", &self.max_retries)
            .field("before_payment", &self.before_payment.as_ref().map(|_| "<fn>"))
            .finish_non_exhaustive()
    }
}

impl PaymentClient {
    /// A client with no signers, no allowances and the [`FirstAffordable`] selector.
    #[must_use]
    pub fn new(networks: Arc<NetworkRegistry>) -> Self {
        Self {
            adapter: ProtocolAdapter::new(Arc::clone(&networks)),
            signers: SchemeRegistry::new(networks),
            selector: Arc::new(FirstAffordable),
            allowances: Vec::new(),
            ignore_allowances: false,
            max_retries: DEFAULT_MAX_RETRIES,
            before_payment: None,
        }
    }

    /// Registers the signer used for `chain_id` (or a `namespace:*` id).
    #[must_use]
    pub fn with_signer(
        mut self,
        scheme: crate::types::Scheme,
        chain_id: crate::chain::ChainId,
        signer: Arc<dyn PaymentSigner>,
    ) -> Self {
        if chain_id.reference() == "*" {
            self.signers
                .register_namespace(scheme, chain_id.namespace(), signer);
        } else {
            self.signers.register(scheme, chain_id, signer);
        }
        self
    }

    /// Replaces the requirement selector.
    #[must_use]
    pub fn with_selector<S: PaymentSelector + 'static>(mut self, selector: S) -> Self {
        self.selector = Arc::new(selector);
        self
    }

    /// Adds a spending allowance for one asset.
    #[must_use]
    pub fn with_allowance(mut self, allowance: AssetAllowance) -> Self {
        self.allowances.push(allowance);
        self
    }

    /// Pays any offered requirement, ignoring allowances.
    #[must_use]
    pub const fn with_ignore_allowances(mut self, ignore: bool) -> Self {
        self.ignore_allowances = ignore;
        self
    }

    /// Bounds how many paid retries one request may make.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Runs `hook` before signing. Returning `false` declines the payment.
    #[must_use]
    pub fn with_before_payment<F>(mut self, hook: F) -> Self
    where
        F: Fn(&PaymentRequirement, &PaymentRequired) -> bool + Send + Sync + 'static,
    {
        self.before_payment = Some(Arc::new(hook));
        self
    }

    /// Paid retries allowed per request.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Wire codec used to read demands and encode payments.
    #[must_use]
    pub const fn adapter(&self) -> &ProtocolAdapter {
        &self.adapter
    }

    /// Reads a 402 demand. A `PAYMENT-REQUIRED` header wins over the body.
    ///
    /// Returns `None` when neither can be read; the caller must not retry.
    #[must_use]
    pub fn parse_payment_required(
        &self,
        required_header: Option<&str>,
        body: &[u8],
    ) -> Option<PaymentRequired> {
        let parsed = match required_header {
            Some(value) => self.adapter.decode_payment_required_header(value),
            None => self.adapter.decode_payment_required_body(body),
        };
        match parsed {
            Ok(required) => Some(required),
            Err(_error) => {
                #[cfg(feature = "telemetry")]
                debug!(error = %_error, "unreadable 402 demand");
                None
            }
        }
    }

    /// Picks, signs and encodes a payment for `required`.
    ///
    /// Returns `Ok(None)` when the demand is empty, nothing offered can be paid
    /// within the allowances, or `before_payment` declines.
    ///
    /// # Errors
    ///
    /// Signing or encoding failures for the selected requirement.
    #[cfg_attr(feature = "telemetry", instrument(name = "x402.client.payment_header", skip_all, err))]
    pub async fn payment_header(
        &self,
        required: &PaymentRequired,
    ) -> Result<Option<PaymentHeader>, PaymentClientError> {
        let candidates: Vec<PaymentRequirement> = required
            .accepts
            .iter()
            .filter(|r| self.signers.get(r.scheme, &r.network).is_some())
            .cloned()
            .collect();

        let Some(selected) = self
            .selector
            .select(&candidates, &self.allowances, self.ignore_allowances)
        else {
            #[cfg(feature = "telemetry")]
            debug!(offered = required.accepts.len(), "no payable requirement");
            return Ok(None);
        };

        if let Some(hook) = &self.before_payment
            && !hook(selected, required)
        {
            #[cfg(feature = "telemetry")]
            debug!("payment declined by before_payment");
            return Ok(None);
        }

        let Some(signer) = self.signers.get(selected.scheme, &selected.network) else {
            return Ok(None);
        };

        let mut requirement = selected.clone();
        if requirement.resource.is_none() {
            requirement.resource = required.resource.as_ref().map(|r| r.url.clone());
        }

        #[cfg(feature = "telemetry")]
        debug!(
            scheme = %requirement.scheme,
            network = %requirement.network,
            amount = %requirement.amount,
            "signing payment"
        );

        let payload = signer.sign(&requirement).await?;
        let payment = PaymentPayload::for_requirement(required.version, &requirement, payload);
        let value = self.adapter.encode_payment(&payment)?;
        Ok(Some(PaymentHeader {
            name: required.version.payment_header(),
            value,
            requirement,
        }))
    }
}
