//! In-memory implementation of every store trait.
//!
//! Upstream data sits behind a `RwLock` and is only ever read by the
//! engine.  Billing records sit behind a single `Mutex`; holding that
//! lock across the uniqueness check and the writes is what makes
//! [`BillingRecordStore::create_all`] serializable on the billing key
//! space.
//!
//! A store opened with [`InMemoryStore::open`] also keeps its billing
//! records in a file.  The file is rewritten inside that same critical
//! section before a batch becomes visible, so a batch that cannot be
//! made durable is rolled back.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};

use anyhow::Result;
use chrono::Utc;

use crate::error::StoreError;
use crate::models::{
    AttendanceRecord, BillingKey, BillingPeriod, BillingRecord, BillingRecordFilter, Employee,
    LeaveInterval, LeaveStatus, NewBillingRecord, Project, WorkLogEntry,
};
use crate::store::{
    load_dataset, load_records, save_records, AttendanceStore, BillingDataset, BillingRecordStore,
    Directory, LeaveStore, WorkLogStore,
};

#[derive(Default)]
pub struct InMemoryStore {
    data: RwLock<Upstream>,
    records: Mutex<Vec<BillingRecord>>,
    records_file: Option<PathBuf>,
    /// When set, the next `create_all` writes this many records and then
    /// fails, exercising the rollback path.
    fail_commit_after: Mutex<Option<usize>>,
    /// Employees whose activity reads fail with `Unavailable`.
    unavailable_employees: RwLock<HashSet<String>>,
    directory_down: AtomicBool,
    activity_reads: AtomicUsize,
}

#[derive(Default)]
struct Upstream {
    employees: Vec<Employee>,
    projects: Vec<Project>,
    work_logs: Vec<WorkLogEntry>,
    leave: Vec<LeaveInterval>,
    attendance: Vec<AttendanceRecord>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dataset(dataset: BillingDataset) -> Self {
        let store = Self::default();
        {
            let mut data = store.write_data();
            data.employees = dataset.employees;
            data.projects = dataset.projects;
            data.work_logs = dataset.work_logs;
            data.leave = dataset.leave;
            data.attendance = dataset.attendance;
        }
        *store.lock_records_unchecked() = dataset.billing_records;
        store
    }

    /// Seed a store from the dataset at `dataset_path` and keep billing
    /// records in `records_path`.  Records already saved there take the
    /// place of the dataset's own `billing_records`.
    pub fn open(dataset_path: &Path, records_path: &Path) -> Result<Self> {
        let mut dataset = load_dataset(dataset_path)?;
        if let Some(records) = load_records(records_path)? {
            dataset.billing_records = records;
        }
        Ok(Self::from_dataset(dataset).with_records_file(records_path))
    }

    /// Write every committed batch through to `path`.
    pub fn with_records_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.records_file = Some(path.into());
        self
    }

    pub fn add_employee(&self, employee: Employee) {
        self.write_data().employees.push(employee);
    }

    pub fn add_project(&self, project: Project) {
        self.write_data().projects.push(project);
    }

    pub fn add_work_log(&self, entry: WorkLogEntry) {
        self.write_data().work_logs.push(entry);
    }

    pub fn add_leave(&self, leave: LeaveInterval) {
        self.write_data().leave.push(leave);
    }

    pub fn add_attendance(&self, record: AttendanceRecord) {
        self.write_data().attendance.push(record);
    }

    /// Make the next `create_all` fail after writing `n` records.
    pub fn fail_next_commit_after(&self, n: usize) {
        if let Ok(mut slot) = self.fail_commit_after.lock() {
            *slot = Some(n);
        }
    }

    pub fn make_employee_unavailable(&self, employee_id: &str) {
        if let Ok(mut set) = self.unavailable_employees.write() {
            set.insert(employee_id.to_string());
        }
    }

    pub fn set_directory_down(&self, down: bool) {
        self.directory_down.store(down, Ordering::SeqCst);
    }

    /// Number of work log / leave / attendance reads served so far.
    pub fn activity_reads(&self) -> usize {
        self.activity_reads.load(Ordering::SeqCst)
    }

    /// Count of persisted billing records.
    pub fn record_count(&self) -> usize {
        self.lock_records_unchecked().len()
    }

    fn write_data(&self) -> std::sync::RwLockWriteGuard<'_, Upstream> {
        // Seeding a poisoned store is a test bug; recover the data anyway.
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_records_unchecked(&self) -> MutexGuard<'_, Vec<BillingRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_data(&self) -> Result<std::sync::RwLockReadGuard<'_, Upstream>, StoreError> {
        self.data
            .read()
            .map_err(|_| StoreError::Unavailable("upstream data lock poisoned".into()))
    }

    fn lock_records(&self) -> Result<MutexGuard<'_, Vec<BillingRecord>>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Unavailable("billing record lock poisoned".into()))
    }

    fn check_activity_read(&self, employee_id: &str) -> Result<(), StoreError> {
        self.activity_reads.fetch_add(1, Ordering::SeqCst);
        let unavailable = self
            .unavailable_employees
            .read()
            .map(|set| set.contains(employee_id))
            .unwrap_or(false);
        if unavailable {
            return Err(StoreError::Unavailable(format!(
                "activity for employee {employee_id} is unreachable"
            )));
        }
        Ok(())
    }

    fn take_commit_fault(&self) -> Option<usize> {
        self.fail_commit_after.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl Directory for InMemoryStore {
    fn list_employees(&self) -> Result<Vec<Employee>, StoreError> {
        if self.directory_down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("directory offline".into()));
        }
        Ok(self.read_data()?.employees.clone())
    }

    fn get_project(&self, id: &str) -> Result<Project, StoreError> {
        self.read_data()?
            .projects
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "project",
                id: id.to_string(),
            })
    }
}

impl WorkLogStore for InMemoryStore {
    fn list_work_logs(
        &self,
        employee_id: &str,
        period: &BillingPeriod,
    ) -> Result<Vec<WorkLogEntry>, StoreError> {
        self.check_activity_read(employee_id)?;
        Ok(self
            .read_data()?
            .work_logs
            .iter()
            .filter(|w| w.employee_id == employee_id && period.contains(w.date))
            .cloned()
            .collect())
    }
}

impl LeaveStore for InMemoryStore {
    fn list_approved_leave(
        &self,
        employee_id: &str,
        period: &BillingPeriod,
    ) -> Result<Vec<LeaveInterval>, StoreError> {
        self.check_activity_read(employee_id)?;
        Ok(self
            .read_data()?
            .leave
            .iter()
            .filter(|l| {
                l.employee_id == employee_id
                    && l.status == LeaveStatus::Approved
                    && l.start_date <= period.end()
                    && l.end_date >= period.start()
            })
            .cloned()
            .collect())
    }
}

impl AttendanceStore for InMemoryStore {
    fn list_attendance(
        &self,
        employee_id: &str,
        period: &BillingPeriod,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        self.check_activity_read(employee_id)?;
        Ok(self
            .read_data()?
            .attendance
            .iter()
            .filter(|a| a.employee_id == employee_id && period.contains(a.date))
            .cloned()
            .collect())
    }
}

/// Writes made under the billing record lock.  Dropping it without
/// calling [`PendingCommit::commit`] truncates the vector back to where
/// it started, so an early return or a panic mid-batch leaves nothing
/// behind.
struct PendingCommit<'a> {
    records: MutexGuard<'a, Vec<BillingRecord>>,
    mark: usize,
    committed: bool,
}

impl<'a> PendingCommit<'a> {
    fn begin(records: MutexGuard<'a, Vec<BillingRecord>>) -> Self {
        let mark = records.len();
        Self {
            records,
            mark,
            committed: false,
        }
    }

    fn push(&mut self, record: BillingRecord) {
        self.records.push(record);
    }

    /// Everything in the store, including the uncommitted batch.
    fn all(&self) -> &[BillingRecord] {
        &self.records
    }

    fn commit(mut self) -> Vec<BillingRecord> {
        self.committed = true;
        self.records[self.mark..].to_vec()
    }
}

impl Drop for PendingCommit<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let mark = self.mark;
            self.records.truncate(mark);
        }
    }
}

impl BillingRecordStore for InMemoryStore {
    fn exists_for_period(&self, key: &BillingKey) -> Result<bool, StoreError> {
        Ok(self.lock_records()?.iter().any(|r| r.key() == *key))
    }

    fn create_all(&self, records: Vec<NewBillingRecord>) -> Result<Vec<BillingRecord>, StoreError> {
        let guard = self.lock_records()?;

        let existing: HashSet<BillingKey> = guard.iter().map(BillingRecord::key).collect();
        let mut seen = HashSet::new();
        let mut conflicts: Vec<BillingKey> = records
            .iter()
            .map(NewBillingRecord::key)
            .filter(|key| existing.contains(key) || !seen.insert(key.clone()))
            .collect();
        if !conflicts.is_empty() {
            conflicts.sort();
            conflicts.dedup();
            return Err(StoreError::Conflict(conflicts));
        }

        let fault = self.take_commit_fault();
        let created_at = Utc::now();
        let mut tx = PendingCommit::begin(guard);
        for (written, new) in records.into_iter().enumerate() {
            if fault == Some(written) {
                return Err(StoreError::Unavailable(format!(
                    "storage went away after {written} writes"
                )));
            }
            tx.push(BillingRecord::from_new(new, created_at));
        }
        if let Some(path) = &self.records_file {
            save_records(path, tx.all())
                .map_err(|err| StoreError::Unavailable(format!("{err:#}")))?;
        }
        Ok(tx.commit())
    }

    fn list(&self, filter: &BillingRecordFilter) -> Result<Vec<BillingRecord>, StoreError> {
        Ok(self
            .lock_records()?
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }
}
