//! Data models for the Billing Engine.
//!
//! The `models` module defines the serialisable structs and enums the
//! engine reads from upstream stores (employees, projects, work logs,
//! leave and attendance), the transient calculation results
//! (ledger entries and period summaries) and the persisted
//! [`BillingRecord`].  Upstream records are read-only inputs; summaries
//! are built fresh for every calculation and discarded afterwards.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BillingError;

/// Represents an employee known to the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    /// A globally unique identifier for the employee.
    pub id: String,
    /// The employee's display name.
    pub name: String,
}

/// A billable project.
///
/// `billing_type` is kept exactly as the upstream system stores it
/// (`"hourly"`, `"count_based"`, ...).  It is interpreted by
/// [`crate::rate::BillingPolicy::from_project`], which rejects values
/// it does not recognise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub billing_type: String,
    /// Currency per hour for hourly projects, currency per completed
    /// unit for count-based projects.
    pub rate: Decimal,
    /// Hours credited per completed unit on count-based projects.  When
    /// absent, count-based lines contribute no hours.
    #[serde(default)]
    pub hours_per_unit: Option<Decimal>,
    #[serde(default)]
    pub client_name: Option<String>,
}

/// The quantity recorded by a single line of a daily work log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineQuantity {
    /// Hours worked on the project that day.
    Hours(Decimal),
    /// Units or deliverables completed on the project that day.
    Units(Decimal),
}

impl LineQuantity {
    pub fn kind(&self) -> QuantityKind {
        match self {
            LineQuantity::Hours(_) => QuantityKind::Hours,
            LineQuantity::Units(_) => QuantityKind::Units,
        }
    }

    pub fn value(&self) -> Decimal {
        match self {
            LineQuantity::Hours(v) | LineQuantity::Units(v) => *v,
        }
    }
}

/// One project touched on a work log date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectLineItem {
    pub project_id: String,
    pub quantity: LineQuantity,
}

/// A daily work report for one employee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkLogEntry {
    pub employee_id: String,
    pub date: NaiveDate,
    /// Line items in the order they were reported.
    pub line_items: Vec<ProjectLineItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
}

/// A leave request covering the inclusive range `[start_date, end_date]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveInterval {
    pub employee_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: LeaveStatus,
}

impl LeaveInterval {
    /// Clip this interval to `period`, returning `None` when they do not
    /// overlap.
    pub fn clip_to(&self, period: &BillingPeriod) -> Option<BillingPeriod> {
        let start = self.start_date.max(period.start());
        let end = self.end_date.min(period.end());
        (start <= end).then(|| BillingPeriod { start, end })
    }
}

/// A clock-in/clock-out pair recorded on `date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub employee_id: String,
    pub date: NaiveDate,
    pub clock_in: NaiveDateTime,
    pub clock_out: NaiveDateTime,
}

impl AttendanceRecord {
    /// Clocked duration in hours, or `None` if `clock_out` precedes
    /// `clock_in`.
    pub fn attended_hours(&self) -> Option<Decimal> {
        let span: Duration = self.clock_out - self.clock_in;
        if span < Duration::zero() {
            return None;
        }
        Some(Decimal::from(span.num_seconds()) / Decimal::from(3600))
    }
}

/// An inclusive date range over which activity is aggregated.
///
/// The only way to obtain a `BillingPeriod` is through [`BillingPeriod::new`]
/// or [`BillingPeriod::parse`], both of which guarantee `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BillingPeriod {
    start: NaiveDate,
    end: NaiveDate,
}

impl BillingPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, BillingError> {
        if start > end {
            return Err(BillingError::InvalidDateRange(format!(
                "start date {start} is after end date {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse a period from two `YYYY-MM-DD` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, BillingError> {
        let parse = |label: &str, raw: &str| {
            NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|err| {
                BillingError::InvalidDateRange(format!("invalid {label} date {raw:?}: {err}"))
            })
        };
        Self::new(parse("start", start)?, parse("end", end)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Number of calendar dates in the period, both ends included.
    pub fn day_count(&self) -> u32 {
        ((self.end - self.start).num_days() + 1) as u32
    }
}

/// Whether a ledger entry counts hours or completed units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityKind {
    Hours,
    Units,
}

/// Per-employee, per-project accumulation of billable quantity for a
/// period.  Built by the aggregator and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLedgerEntry {
    pub employee_id: String,
    pub project_id: String,
    pub billable_quantity: Decimal,
    pub quantity_kind: QuantityKind,
}

/// One billed project line within an employee summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingSummaryDetail {
    pub project_id: String,
    pub project_name: String,
    /// Billable hours.  Zero for count-based projects without an
    /// hours-equivalent.
    pub hours: Decimal,
    /// Completed units on count-based projects, zero otherwise.
    pub units: Decimal,
    pub rate: Decimal,
    /// Rounded to two places, half to even.
    pub amount: Decimal,
    pub count_based: bool,
    #[serde(default)]
    pub client_name: Option<String>,
}

/// A non-fatal problem that removed a line (or all lines) from a summary.
/// Any warning marks the summary as partial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BillingWarning {
    UnknownBillingPolicy {
        project_id: String,
        billing_type: String,
    },
    QuantityKindMismatch {
        project_id: String,
        billing_type: String,
        quantity_kind: QuantityKind,
    },
    UnknownProject {
        project_id: String,
    },
    ActivityUnavailable {
        reason: String,
    },
    /// Quantity, amount or a running total exceeded the decimal range.
    AmountOverflow {
        project_id: String,
    },
}

/// Data-quality flags raised while cross-checking work logs against
/// leave and attendance.  They never change the computed amounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityAnomaly {
    WorkWithoutAttendance {
        date: NaiveDate,
        hours: Decimal,
    },
    HoursExceedAttendance {
        date: NaiveDate,
        logged: Decimal,
        attended: Decimal,
    },
    AttendanceWithoutWorkLog {
        date: NaiveDate,
    },
    WorkDuringLeave {
        date: NaiveDate,
        hours: Decimal,
    },
    MixedQuantityKind {
        date: NaiveDate,
        project_id: String,
    },
    InvalidAttendance {
        date: NaiveDate,
    },
}

/// The billing result for a single employee over one period.
///
/// `total_hours` and `total_amount` are always the exact sums of the
/// corresponding `details` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeePeriodBillingSummary {
    pub employee_id: String,
    pub employee_name: String,
    pub total_hours: Decimal,
    pub total_amount: Decimal,
    /// Ordered by project id.
    pub details: Vec<BillingSummaryDetail>,
    /// Set when at least one line was dropped; see `warnings`.
    pub partial: bool,
    pub warnings: Vec<BillingWarning>,
    pub anomalies: Vec<ActivityAnomaly>,
    /// Calendar days inside the period covered by approved leave.
    pub leave_days: u32,
}

impl EmployeePeriodBillingSummary {
    pub fn empty(employee: &Employee) -> Self {
        Self {
            employee_id: employee.id.clone(),
            employee_name: employee.name.clone(),
            total_hours: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            details: Vec::new(),
            partial: false,
            warnings: Vec::new(),
            anomalies: Vec::new(),
            leave_days: 0,
        }
    }

    pub fn push_warning(&mut self, warning: BillingWarning) {
        self.partial = true;
        self.warnings.push(warning);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingStatus {
    Pending,
    Approved,
    Paid,
}

/// The duplicate-prevention key of a billing record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BillingKey {
    pub employee_id: String,
    pub project_id: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

impl std::fmt::Display for BillingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} {}..{}",
            self.employee_id, self.project_id, self.period_start, self.period_end
        )
    }
}

/// A billing record staged for creation.  The store assigns `id` and
/// `created_at` when the batch commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBillingRecord {
    pub employee_id: String,
    pub project_id: String,
    pub amount: Decimal,
    pub hours: Decimal,
    pub count_based: bool,
    pub client_name: Option<String>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub status: BillingStatus,
}

impl NewBillingRecord {
    pub fn key(&self) -> BillingKey {
        BillingKey {
            employee_id: self.employee_id.clone(),
            project_id: self.project_id.clone(),
            period_start: self.period_start,
            period_end: self.period_end,
        }
    }
}

/// A persisted billing record.  Identity, amount and period never change
/// after creation; only `status` moves, through a separate approval
/// workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingRecord {
    pub id: Uuid,
    pub employee_id: String,
    pub project_id: String,
    pub amount: Decimal,
    pub hours: Decimal,
    pub count_based: bool,
    pub client_name: Option<String>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub status: BillingStatus,
    pub created_at: DateTime<Utc>,
}

impl BillingRecord {
    pub fn from_new(new: NewBillingRecord, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            employee_id: new.employee_id,
            project_id: new.project_id,
            amount: new.amount,
            hours: new.hours,
            count_based: new.count_based,
            client_name: new.client_name,
            period_start: new.period_start,
            period_end: new.period_end,
            status: new.status,
            created_at,
        }
    }

    pub fn key(&self) -> BillingKey {
        BillingKey {
            employee_id: self.employee_id.clone(),
            project_id: self.project_id.clone(),
            period_start: self.period_start,
            period_end: self.period_end,
        }
    }
}

/// Optional filters for listing billing records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillingRecordFilter {
    pub employee_id: Option<String>,
    pub project_id: Option<String>,
    pub status: Option<BillingStatus>,
}

impl BillingRecordFilter {
    pub fn matches(&self, record: &BillingRecord) -> bool {
        self.employee_id.as_ref().map_or(true, |id| *id == record.employee_id)
            && self.project_id.as_ref().map_or(true, |id| *id == record.project_id)
            && self.status.map_or(true, |status| status == record.status)
    }
}
