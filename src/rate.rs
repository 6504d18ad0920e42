//! Rate resolution.
//!
//! Turns a ledger entry into a billed line according to the project's
//! billing policy.  Policies form a closed enum so every new policy has
//! to be handled in [`resolve`] before the crate compiles.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::BillingError;
use crate::models::{ActivityLedgerEntry, BillingSummaryDetail, Project, QuantityKind};

/// How a project converts logged activity into money.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingPolicy {
    /// `rate` is currency per hour worked.
    Hourly,
    /// `rate` is currency per completed unit.  Units optionally count
    /// towards hours at `hours_per_unit` each.
    CountBased { hours_per_unit: Option<Decimal> },
}

impl BillingPolicy {
    /// Interpret the project's upstream billing type.
    ///
    /// Matching ignores case, `-`, `_` and spaces, so `"count_based"`,
    /// `"COUNT-BASED"` and `"CountBased"` are all accepted.
    pub fn from_project(project: &Project) -> Result<Self, BillingError> {
        let normalized: String = project
            .billing_type
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "hourly" => Ok(BillingPolicy::Hourly),
            "countbased" => Ok(BillingPolicy::CountBased {
                hours_per_unit: project.hours_per_unit,
            }),
            _ => Err(BillingError::UnknownBillingPolicy {
                project_id: project.id.clone(),
                billing_type: project.billing_type.clone(),
            }),
        }
    }

    fn expected_kind(&self) -> QuantityKind {
        match self {
            BillingPolicy::Hourly => QuantityKind::Hours,
            BillingPolicy::CountBased { .. } => QuantityKind::Units,
        }
    }
}

/// Round a monetary amount to cents, half to even.
pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

/// Price one ledger entry.  Hours are left unrounded.
pub fn resolve(
    project: &Project,
    entry: &ActivityLedgerEntry,
) -> Result<BillingSummaryDetail, BillingError> {
    let policy = BillingPolicy::from_project(project)?;
    if entry.quantity_kind != policy.expected_kind() {
        return Err(BillingError::QuantityKindMismatch {
            project_id: project.id.clone(),
            billing_type: project.billing_type.clone(),
            quantity_kind: entry.quantity_kind,
        });
    }

    let overflow = || BillingError::AmountOverflow {
        project_id: project.id.clone(),
    };
    let quantity = entry.billable_quantity;
    let (hours, units) = match policy {
        BillingPolicy::Hourly => (quantity, Decimal::ZERO),
        BillingPolicy::CountBased { hours_per_unit } => {
            let hours = match hours_per_unit {
                Some(per_unit) => quantity.checked_mul(per_unit).ok_or_else(overflow)?,
                None => Decimal::ZERO,
            };
            (hours, quantity)
        }
    };
    let amount = quantity.checked_mul(project.rate).ok_or_else(overflow)?;

    Ok(BillingSummaryDetail {
        project_id: project.id.clone(),
        project_name: project.name.clone(),
        hours,
        units,
        rate: project.rate,
        amount: round2(amount),
        count_based: matches!(policy, BillingPolicy::CountBased { .. }),
        client_name: project.client_name.clone(),
    })
}
