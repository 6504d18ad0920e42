//! Store traits and dataset loading.
//!
//! The engine never talks to a database directly.  It reads employees,
//! projects, work logs, leave and attendance through the read-only
//! traits below and writes billing records through
//! [`BillingRecordStore`].  Any backend (a SQL database, a remote
//! service, the in-memory [`crate::memory::InMemoryStore`]) can be
//! plugged in by implementing them.
//!
//! All traits must be thread-safe (`Send + Sync`) because the engine
//! calls them concurrently from multiple rayon worker threads.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::{
    AttendanceRecord, BillingKey, BillingPeriod, BillingRecord, BillingRecordFilter, Employee,
    LeaveInterval, NewBillingRecord, Project, WorkLogEntry,
};

/// Employee and project lookups.
pub trait Directory: Send + Sync {
    fn list_employees(&self) -> Result<Vec<Employee>, StoreError>;
    /// Fails with [`StoreError::NotFound`] for an unknown id.
    fn get_project(&self, id: &str) -> Result<Project, StoreError>;
}

pub trait WorkLogStore: Send + Sync {
    /// Work logs for `employee_id` dated inside `period`, each with its
    /// line items in reported order.
    fn list_work_logs(
        &self,
        employee_id: &str,
        period: &BillingPeriod,
    ) -> Result<Vec<WorkLogEntry>, StoreError>;
}

pub trait LeaveStore: Send + Sync {
    /// Approved leave intervals that overlap `period`.  Intervals are
    /// returned unclipped.
    fn list_approved_leave(
        &self,
        employee_id: &str,
        period: &BillingPeriod,
    ) -> Result<Vec<LeaveInterval>, StoreError>;
}

pub trait AttendanceStore: Send + Sync {
    fn list_attendance(
        &self,
        employee_id: &str,
        period: &BillingPeriod,
    ) -> Result<Vec<AttendanceRecord>, StoreError>;
}

/// Write-once storage for billing records.
pub trait BillingRecordStore: Send + Sync {
    fn exists_for_period(&self, key: &BillingKey) -> Result<bool, StoreError>;

    /// Create every record in `records` or none of them.
    ///
    /// Implementations must re-check the uniqueness key of every record
    /// inside the same transaction that performs the writes and fail with
    /// [`StoreError::Conflict`] if any key is already taken.  On any error
    /// no record from the batch may be visible.  Created records are
    /// returned in input order.
    fn create_all(&self, records: Vec<NewBillingRecord>) -> Result<Vec<BillingRecord>, StoreError>;

    fn list(&self, filter: &BillingRecordFilter) -> Result<Vec<BillingRecord>, StoreError>;
}

/// A complete snapshot of the upstream data a store serves, as loaded
/// from a JSON file.  Missing sections default to empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingDataset {
    pub employees: Vec<Employee>,
    pub projects: Vec<Project>,
    pub work_logs: Vec<WorkLogEntry>,
    pub leave: Vec<LeaveInterval>,
    pub attendance: Vec<AttendanceRecord>,
    pub billing_records: Vec<BillingRecord>,
}

/// Load a [`BillingDataset`] from a JSON file.
///
/// A missing file yields an empty dataset so that a fresh deployment can
/// start without seed data.  A file that exists but does not parse is an
/// error.
pub fn load_dataset(path: &Path) -> Result<BillingDataset> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "dataset file not found, starting empty");
        return Ok(BillingDataset::default());
    }
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading dataset {}", path.display()))?;
    let dataset: BillingDataset = serde_json::from_str(&data)
        .with_context(|| format!("parsing dataset {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        employees = dataset.employees.len(),
        projects = dataset.projects.len(),
        work_logs = dataset.work_logs.len(),
        billing_records = dataset.billing_records.len(),
        "dataset loaded"
    );
    Ok(dataset)
}

/// Read the persisted billing records at `path`, or `None` if none have
/// been written there yet.
pub fn load_records(path: &Path) -> Result<Option<Vec<BillingRecord>>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading billing records {}", path.display()))?;
    let records: Vec<BillingRecord> = serde_json::from_str(&data)
        .with_context(|| format!("parsing billing records {}", path.display()))?;
    tracing::info!(path = %path.display(), records = records.len(), "billing records loaded");
    Ok(Some(records))
}

/// Replace the billing records at `path` with `records`.
///
/// The new set is written and synced to a sibling file that is then
/// renamed over `path`, so a crash leaves either the old set or the new
/// one on disk.
pub fn save_records(path: &Path, records: &[BillingRecord]) -> Result<()> {
    let staging = path.with_extension("tmp");
    let data = serde_json::to_vec_pretty(records).context("serializing billing records")?;
    let mut file = File::create(&staging)
        .with_context(|| format!("creating {}", staging.display()))?;
    file.write_all(&data)
        .and_then(|()| file.sync_all())
        .with_context(|| format!("writing {}", staging.display()))?;
    std::fs::rename(&staging, path)
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}
