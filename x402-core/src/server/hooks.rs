//! Callbacks a resource server can plug into the engine.
//!
//! `customize_requirements` and `on_settled` are fallible; their errors are
//! logged and the request proceeds as if they had not been set.
//! `before_settle` is a veto consulted once, after a successful verify.

use std::fmt;
use std::sync::Arc;

use crate::error::BoxError;
use crate::types::{
    PaymentPayload, PaymentRequirement, ResourceInfo, SettlementResult, VerificationResult,
};

/// Edits the requirements advertised in a 402 (descriptions, output schemas).
pub type CustomizeRequirementsHook =
    Arc<dyn Fn(&mut Vec<PaymentRequirement>, &ResourceInfo) -> Result<(), BoxError> + Send + Sync>;

/// Observes a completed settlement.
pub type OnSettledHook =
    Arc<dyn Fn(&SettlementResult, &PaymentRequirement) -> Result<(), BoxError> + Send + Sync>;

/// Returning `false` stops the request with 402 before settlement.
pub type BeforeSettleHook =
    Arc<dyn Fn(&PaymentPayload, &PaymentRequirement, &VerificationResult) -> bool + Send + Sync>;

/// Callbacks around requirement building and settlement.
#[derive(Clone, Default)]
pub struct ServerHooks {
    /// Edits the requirements before they are advertised or matched.
    pub customize_requirements: Option<CustomizeRequirementsHook>,
    /// Runs after a successful settlement.
    pub on_settled: Option<OnSettledHook>,
    /// Last check before settlement.
    pub before_settle: Option<BeforeSettleHook>,
}

impl fmt::Debug for ServerHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHooks")
            .field("customize_requirements", &self.customize_requirements.is_some())
            .field("on_settled", &self.on_settled.is_some())
            .field("before_settle", &self.before_settle.is_some())
            .finish()
    }
}

impl ServerHooks {
    /// Sets the requirement customizer.
    #[must_use]
    pub fn with_customize_requirements<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Vec<PaymentRequirement>, &ResourceInfo) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.customize_requirements = Some(Arc::new(hook));
        self
    }

    /// Sets the post-settlement callback.
    #[must_use]
    pub fn with_on_settled<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SettlementResult, &PaymentRequirement) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.on_settled = Some(Arc::new(hook));
        self
    }

    /// Sets the pre-settlement check.
    #[must_use]
    pub fn with_before_settle<F>(mut self, hook: F) -> Self
    where
        F: Fn(&PaymentPayload, &PaymentRequirement, &VerificationResult) -> bool + Send + Sync + 'static,
    {
        self.before_settle = Some(Arc::new(hook));
        self
    }

    /// Applies `customize_requirements` to a copy; on error the originals are kept.
    pub(crate) fn customized(
        &self,
        accepts: &[PaymentRequirement],
        resource: &ResourceInfo,
    ) -> Vec<PaymentRequirement> {
        let Some(hook) = &self.customize_requirements else {
            return accepts.to_vec();
        };
        let mut edited = accepts.to_vec();
        match hook(&mut edited, resource) {
            Ok(()) => edited,
            Err(_error) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(error = %_error, "customize_requirements hook failed");
                accepts.to_vec()
            }
        }
    }

    pub(crate) fn settled(&self, settlement: &SettlementResult, requirement: &PaymentRequirement) {
        if let Some(hook) = &self.on_settled
            && let Err(_error) = hook(settlement, requirement)
        {
            #[cfg(feature = "telemetry")]
            tracing::warn!(error = %_error, "on_settled hook failed");
        }
    }

    pub(crate) fn allow_settle(
        &self,
        payment: &PaymentPayload,
        requirement: &PaymentRequirement,
        verification: &VerificationResult,
    ) -> bool {
        self.before_settle
            .as_ref()
            .is_none_or(|hook| hook(payment, requirement, verification))
    }
}
