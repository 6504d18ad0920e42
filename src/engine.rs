//! Billing period computation engine.
//!
//! The `engine` module turns a billing period into one
//! [`EmployeePeriodBillingSummary`] per employee and, on request,
//! finalizes those summaries into billing records.  It uses the
//! [`rayon`] crate to compute employees in parallel; results are always
//! returned in employee-id order.  Data access goes through the store
//! traits in [`crate::store`], so any backend can be plugged in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::aggregate::ActivityAggregator;
use crate::error::{BillingError, StoreError};
use crate::finalize::FinalizationCommitter;
use crate::memory::InMemoryStore;
use crate::models::{
    BillingPeriod, BillingRecord, BillingRecordFilter, BillingWarning, Employee,
    EmployeePeriodBillingSummary,
};
use crate::rate;
use crate::store::{AttendanceStore, BillingRecordStore, Directory, LeaveStore, WorkLogStore};

/// The collaborators the engine reads from and writes to.
#[derive(Clone)]
pub struct BillingStores {
    pub directory: Arc<dyn Directory>,
    pub work_logs: Arc<dyn WorkLogStore>,
    pub leave: Arc<dyn LeaveStore>,
    pub attendance: Arc<dyn AttendanceStore>,
    pub records: Arc<dyn BillingRecordStore>,
}

impl BillingStores {
    /// Serve every collaborator from one in-memory store.
    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            directory: store.clone(),
            work_logs: store.clone(),
            leave: store.clone(),
            attendance: store.clone(),
            records: store,
        }
    }
}

/// Cooperative cancellation for [`BillingEngine::summarize`].  Clones
/// share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct BillingEngine {
    stores: BillingStores,
    parallel: bool,
}

impl BillingEngine {
    pub fn new(stores: BillingStores) -> Self {
        Self {
            stores,
            parallel: true,
        }
    }

    /// Toggle rayon for per-employee computation.  Output is identical
    /// either way.
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Compute summaries for every employee over `[start, end]`.
    pub fn calculate(
        &self,
        start: &str,
        end: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<EmployeePeriodBillingSummary>, BillingError> {
        let period = BillingPeriod::parse(start, end)?;
        self.summarize(&period, None, cancel)
    }

    /// Recompute summaries for `employee_ids` over `[start, end]` and
    /// commit them as billing records in one atomic step.
    pub fn finalize(
        &self,
        employee_ids: &[String],
        start: &str,
        end: &str,
    ) -> Result<Vec<BillingRecord>, BillingError> {
        let period = BillingPeriod::parse(start, end)?;
        // Finalization is never cancelled; a fresh token stays unset.
        let summaries = self.summarize(&period, Some(employee_ids), &CancellationToken::new())?;
        let partial = summaries.iter().filter(|s| s.partial).count();
        if partial > 0 {
            warn!(partial, "finalizing summaries with omitted lines");
        }
        FinalizationCommitter {
            records: self.stores.records.as_ref(),
        }
        .finalize(&summaries, &period)
    }

    pub fn list_records(
        &self,
        filter: &BillingRecordFilter,
    ) -> Result<Vec<BillingRecord>, BillingError> {
        self.stores
            .records
            .list(filter)
            .map_err(|err| BillingError::PersistenceFailure(err.to_string()))
    }

    /// Build one summary per target employee, ordered by employee id.
    ///
    /// `employee_filter` restricts the run to the given ids; ids unknown
    /// to the directory are ignored.  Failures reading one employee's
    /// activity are reported on that employee's summary and do not stop
    /// the run.
    pub fn summarize(
        &self,
        period: &BillingPeriod,
        employee_filter: Option<&[String]>,
        cancel: &CancellationToken,
    ) -> Result<Vec<EmployeePeriodBillingSummary>, BillingError> {
        let mut employees = self
            .stores
            .directory
            .list_employees()
            .map_err(|err| BillingError::DirectoryUnavailable(err.to_string()))?;
        if let Some(filter) = employee_filter {
            employees.retain(|e| filter.contains(&e.id));
        }
        employees.sort_by(|a, b| a.id.cmp(&b.id));
        employees.dedup_by(|a, b| a.id == b.id);

        info!(
            period_start = %period.start(),
            period_end = %period.end(),
            employees = employees.len(),
            "summarizing billing period"
        );

        let compute = |employee: &Employee| {
            if cancel.is_cancelled() {
                return Err(BillingError::Cancelled);
            }
            Ok(self.summarize_employee(employee, period))
        };
        let summaries: Vec<EmployeePeriodBillingSummary> = if self.parallel {
            employees.par_iter().map(compute).collect::<Result<_, _>>()?
        } else {
            employees.iter().map(compute).collect::<Result<_, _>>()?
        };

        // A cancel that lands after the last check still discards the run.
        if cancel.is_cancelled() {
            return Err(BillingError::Cancelled);
        }
        Ok(summaries)
    }

    fn summarize_employee(
        &self,
        employee: &Employee,
        period: &BillingPeriod,
    ) -> EmployeePeriodBillingSummary {
        let mut summary = EmployeePeriodBillingSummary::empty(employee);
        let aggregator = ActivityAggregator {
            work_logs: self.stores.work_logs.as_ref(),
            leave: self.stores.leave.as_ref(),
            attendance: self.stores.attendance.as_ref(),
        };
        let ledger = match aggregator.aggregate(&employee.id, period) {
            Ok(ledger) => ledger,
            Err(err) => {
                warn!(employee_id = %employee.id, error = %err, "activity unavailable");
                summary.push_warning(BillingWarning::ActivityUnavailable {
                    reason: err.to_string(),
                });
                return summary;
            }
        };
        summary.leave_days = ledger.leave_days;
        summary.anomalies = ledger.anomalies;
        for project_id in ledger.overflowed {
            summary.push_warning(BillingWarning::AmountOverflow { project_id });
        }

        for entry in &ledger.entries {
            let project = match self.stores.directory.get_project(&entry.project_id) {
                Ok(project) => project,
                Err(StoreError::NotFound { .. }) => {
                    summary.push_warning(BillingWarning::UnknownProject {
                        project_id: entry.project_id.clone(),
                    });
                    continue;
                }
                Err(err) => {
                    summary.push_warning(BillingWarning::ActivityUnavailable {
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            match rate::resolve(&project, entry) {
                Ok(detail) => {
                    let totals = summary
                        .total_hours
                        .checked_add(detail.hours)
                        .zip(summary.total_amount.checked_add(detail.amount));
                    match totals {
                        Some((total_hours, total_amount)) => {
                            summary.total_hours = total_hours;
                            summary.total_amount = total_amount;
                            summary.details.push(detail);
                        }
                        None => summary.push_warning(BillingWarning::AmountOverflow {
                            project_id: detail.project_id,
                        }),
                    }
                }
                Err(BillingError::UnknownBillingPolicy {
                    project_id,
                    billing_type,
                }) => summary.push_warning(BillingWarning::UnknownBillingPolicy {
                    project_id,
                    billing_type,
                }),
                Err(BillingError::QuantityKindMismatch {
                    project_id,
                    billing_type,
                    quantity_kind,
                }) => summary.push_warning(BillingWarning::QuantityKindMismatch {
                    project_id,
                    billing_type,
                    quantity_kind,
                }),
                Err(BillingError::AmountOverflow { project_id }) => {
                    summary.push_warning(BillingWarning::AmountOverflow { project_id })
                }
                Err(other) => summary.push_warning(BillingWarning::ActivityUnavailable {
                    reason: other.to_string(),
                }),
            }
        }

        for warning in &summary.warnings {
            warn!(employee_id = %employee.id, ?warning, "billing line omitted");
        }
        if !summary.anomalies.is_empty() {
            warn!(
                employee_id = %employee.id,
                anomalies = summary.anomalies.len(),
                "activity anomalies detected"
            );
        }
        debug!(
            employee_id = %employee.id,
            lines = summary.details.len(),
            total_hours = %summary.total_hours,
            total_amount = %summary.total_amount,
            "employee summarized"
        );
        summary
    }
}
