//! Choosing which offered requirement a wallet pays.
//!
//! The selector is pure: it looks at the server's list in order and at the
//! wallet's local [`AssetAllowance`]s, and returns the first requirement the
//! wallet may pay. `None` means the client cannot meet the demand and must
//! not retry.

use crate::assets::same_address;
use crate::types::{AssetAllowance, PaymentRequirement};

/// Picks one requirement from a 402 demand.
pub trait PaymentSelector: Send + Sync {
    /// Returns the requirement to pay, or `None` when nothing fits.
    /// `ignore_allowances` skips the allowance checks.
    fn select<'a>(
        &self,
        requirements: &'a [PaymentRequirement],
        allowances: &[AssetAllowance],
        ignore_allowances: bool,
    ) -> Option<&'a PaymentRequirement>;
}

/// First match in server order whose asset has an allowance covering the
/// amount both in total and per request.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstAffordable;

impl PaymentSelector for FirstAffordable {
    fn select<'a>(
        &self,
        requirements: &'a [PaymentRequirement],
        allowances: &[AssetAllowance],
        ignore_allowances: bool,
    ) -> Option<&'a PaymentRequirement> {
        if ignore_allowances {
            return requirements.first();
        }
        requirements.iter().find(|requirement| {
            allowances.iter().any(|allowance| {
                same_address(&allowance.asset, &requirement.asset) && allowance.covers(requirement.amount)
            })
        })
    }
}
