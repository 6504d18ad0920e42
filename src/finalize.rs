//! Finalization of billing summaries into billing records.
//!
//! Finalization runs in two phases.  Every detail line of every summary
//! is first staged as a pending [`NewBillingRecord`] and the whole batch
//! is checked against the duplicate-prevention key.  Only a batch with no
//! collisions is handed to [`BillingRecordStore::create_all`], which
//! writes it atomically.  Either every staged record is created or none
//! is.

use std::collections::HashSet;

use tracing::{error, info, warn};

use crate::error::{BillingError, StoreError};
use crate::models::{
    BillingKey, BillingPeriod, BillingRecord, BillingStatus, EmployeePeriodBillingSummary,
    NewBillingRecord,
};
use crate::store::BillingRecordStore;

pub struct FinalizationCommitter<'a> {
    pub records: &'a dyn BillingRecordStore,
}

/// Stage one pending record per detail line, in summary then detail
/// order.
pub fn stage(
    summaries: &[EmployeePeriodBillingSummary],
    period: &BillingPeriod,
) -> Vec<NewBillingRecord> {
    summaries
        .iter()
        .flat_map(|summary| {
            summary.details.iter().map(move |detail| NewBillingRecord {
                employee_id: summary.employee_id.clone(),
                project_id: detail.project_id.clone(),
                amount: detail.amount,
                hours: detail.hours,
                count_based: detail.count_based,
                client_name: detail.client_name.clone(),
                period_start: period.start(),
                period_end: period.end(),
                status: BillingStatus::Pending,
            })
        })
        .collect()
}

impl FinalizationCommitter<'_> {
    /// Persist `summaries` for `period` and return the created records in
    /// staging order.
    pub fn finalize(
        &self,
        summaries: &[EmployeePeriodBillingSummary],
        period: &BillingPeriod,
    ) -> Result<Vec<BillingRecord>, BillingError> {
        let staged = stage(summaries, period);
        if staged.is_empty() {
            info!(
                period_start = %period.start(),
                period_end = %period.end(),
                "nothing to finalize"
            );
            return Ok(Vec::new());
        }

        let collisions = self.collisions(&staged)?;
        if !collisions.is_empty() {
            warn!(count = collisions.len(), "finalize rejected: period already billed");
            return Err(BillingError::DuplicateBillingPeriod(collisions));
        }

        let count = staged.len();
        match self.records.create_all(staged) {
            Ok(created) => {
                info!(
                    records = created.len(),
                    period_start = %period.start(),
                    period_end = %period.end(),
                    "billing records created"
                );
                Ok(created)
            }
            Err(StoreError::Conflict(keys)) => {
                warn!(count = keys.len(), "finalize lost a race on the billing key");
                Err(BillingError::DuplicateBillingPeriod(keys))
            }
            Err(err) => {
                error!(staged = count, error = %err, "billing commit failed, nothing persisted");
                Err(BillingError::PersistenceFailure(err.to_string()))
            }
        }
    }

    /// Keys that collide with persisted records or appear twice in the
    /// batch, sorted and without repeats.
    fn collisions(&self, staged: &[NewBillingRecord]) -> Result<Vec<BillingKey>, BillingError> {
        let mut seen = HashSet::new();
        let mut collisions = Vec::new();
        for key in staged.iter().map(NewBillingRecord::key) {
            let repeated = !seen.insert(key.clone());
            let exists = self
                .records
                .exists_for_period(&key)
                .map_err(|err| BillingError::PersistenceFailure(err.to_string()))?;
            if repeated || exists {
                collisions.push(key);
            }
        }
        collisions.sort();
        collisions.dedup();
        Ok(collisions)
    }
}
