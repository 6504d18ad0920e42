//! Activity aggregation.
//!
//! Folds one employee's work logs, approved leave and attendance for a
//! billing period into a per-project ledger.  Leave takes precedence:
//! a date covered by approved leave accrues nothing, even if work was
//! logged for it.  Attendance never changes the ledger; it is only used
//! to raise data-quality anomalies.
//!
//! Only dates that carry a work log or an attendance record are visited,
//! so the cost of a period grows with its activity, not its length.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::StoreError;
use crate::models::{
    ActivityAnomaly, ActivityLedgerEntry, BillingPeriod, LeaveInterval, LeaveStatus, LineQuantity,
    QuantityKind, WorkLogEntry,
};
use crate::store::{AttendanceStore, LeaveStore, WorkLogStore};

/// The result of aggregating one employee over one period.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityLedger {
    /// One entry per project touched, ordered by project id.
    pub entries: Vec<ActivityLedgerEntry>,
    pub anomalies: Vec<ActivityAnomaly>,
    pub leave_days: u32,
    /// Projects whose accrued quantity left the decimal range.  They have
    /// no entry.
    pub overflowed: Vec<String>,
}

pub struct ActivityAggregator<'a> {
    pub work_logs: &'a dyn WorkLogStore,
    pub leave: &'a dyn LeaveStore,
    pub attendance: &'a dyn AttendanceStore,
}

/// Attendance folded per date: clocked hours from valid records, plus
/// whether any record on that date had its clock reversed.
#[derive(Default)]
struct DayAttendance {
    hours: Decimal,
    invalid: bool,
}

/// Approved leave clipped to the period and merged into disjoint
/// inclusive ranges, sorted by start date.
struct LeaveCalendar {
    ranges: Vec<(NaiveDate, NaiveDate)>,
}

impl LeaveCalendar {
    fn new(leave: &[LeaveInterval], period: &BillingPeriod) -> Self {
        let mut clipped: Vec<(NaiveDate, NaiveDate)> = leave
            .iter()
            .filter(|l| l.status == LeaveStatus::Approved)
            .filter_map(|l| l.clip_to(period))
            .map(|c| (c.start(), c.end()))
            .collect();
        clipped.sort();

        let mut ranges: Vec<(NaiveDate, NaiveDate)> = Vec::with_capacity(clipped.len());
        for (start, end) in clipped {
            match ranges.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => ranges.push((start, end)),
            }
        }
        Self { ranges }
    }

    fn covers(&self, date: NaiveDate) -> bool {
        let after = self.ranges.partition_point(|(start, _)| *start <= date);
        after > 0 && date <= self.ranges[after - 1].1
    }

    fn day_count(&self) -> u32 {
        self.ranges
            .iter()
            .map(|(start, end)| (*end - *start).num_days() as u32 + 1)
            .sum()
    }
}

impl ActivityAggregator<'_> {
    pub fn aggregate(
        &self,
        employee_id: &str,
        period: &BillingPeriod,
    ) -> Result<ActivityLedger, StoreError> {
        let work_logs = self.work_logs.list_work_logs(employee_id, period)?;
        let leave = self.leave.list_approved_leave(employee_id, period)?;
        let attendance = self.attendance.list_attendance(employee_id, period)?;

        let calendar = LeaveCalendar::new(&leave, period);

        let mut attended: BTreeMap<NaiveDate, DayAttendance> = BTreeMap::new();
        for record in attendance.iter().filter(|a| period.contains(a.date)) {
            let day = attended.entry(record.date).or_default();
            match record.attended_hours() {
                Some(hours) => day.hours = day.hours.saturating_add(hours),
                None => day.invalid = true,
            }
        }

        let mut logs_by_date: BTreeMap<NaiveDate, Vec<&WorkLogEntry>> = BTreeMap::new();
        for entry in work_logs.iter().filter(|w| period.contains(w.date)) {
            logs_by_date.entry(entry.date).or_default().push(entry);
        }

        let active_dates: BTreeSet<NaiveDate> = logs_by_date
            .keys()
            .chain(attended.keys())
            .copied()
            .collect();

        let mut accrued: BTreeMap<&str, (QuantityKind, Decimal)> = BTreeMap::new();
        let mut overflowed: BTreeSet<&str> = BTreeSet::new();
        let mut anomalies = Vec::new();

        for date in active_dates {
            let day_attendance = attended.get(&date);
            if day_attendance.map_or(false, |a| a.invalid) {
                anomalies.push(ActivityAnomaly::InvalidAttendance { date });
            }

            let items = logs_by_date
                .get(&date)
                .into_iter()
                .flatten()
                .flat_map(|entry| entry.line_items.iter());

            if calendar.covers(date) {
                let mut excluded = false;
                let mut hours = Decimal::ZERO;
                for item in items {
                    excluded = true;
                    if let LineQuantity::Hours(h) = item.quantity {
                        hours = hours.saturating_add(h);
                    }
                }
                if excluded {
                    anomalies.push(ActivityAnomaly::WorkDuringLeave { date, hours });
                }
                continue;
            }

            let mut logged_any = false;
            let mut day_hours = Decimal::ZERO;
            for item in items {
                logged_any = true;
                let kind = item.quantity.kind();
                let project_id = item.project_id.as_str();
                let (entry_kind, total) = accrued
                    .entry(project_id)
                    .or_insert((kind, Decimal::ZERO));
                if *entry_kind != kind {
                    anomalies.push(ActivityAnomaly::MixedQuantityKind {
                        date,
                        project_id: item.project_id.clone(),
                    });
                    continue;
                }
                if kind == QuantityKind::Hours {
                    day_hours = day_hours.saturating_add(item.quantity.value());
                }
                if overflowed.contains(project_id) {
                    continue;
                }
                match total.checked_add(item.quantity.value()) {
                    Some(sum) => *total = sum,
                    None => {
                        overflowed.insert(project_id);
                    }
                }
            }

            match day_attendance {
                None if day_hours > Decimal::ZERO => {
                    anomalies.push(ActivityAnomaly::WorkWithoutAttendance {
                        date,
                        hours: day_hours,
                    });
                }
                Some(attendance) if day_hours > attendance.hours => {
                    anomalies.push(ActivityAnomaly::HoursExceedAttendance {
                        date,
                        logged: day_hours,
                        attended: attendance.hours,
                    });
                }
                Some(_) if !logged_any => {
                    anomalies.push(ActivityAnomaly::AttendanceWithoutWorkLog { date });
                }
                _ => {}
            }
        }

        let entries = accrued
            .into_iter()
            .filter(|(project_id, _)| !overflowed.contains(project_id))
            .map(|(project_id, (quantity_kind, billable_quantity))| ActivityLedgerEntry {
                employee_id: employee_id.to_string(),
                project_id: project_id.to_string(),
                billable_quantity,
                quantity_kind,
            })
            .collect();

        Ok(ActivityLedger {
            entries,
            anomalies,
            leave_days: calendar.day_count(),
            overflowed: overflowed.into_iter().map(String::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::testutil::*;
    use rust_decimal_macros::dec;

    fn aggregate(store: &InMemoryStore, employee: &str, start: &str, end: &str) -> ActivityLedger {
        ActivityAggregator {
            work_logs: store,
            leave: store,
            attendance: store,
        }
        .aggregate(employee, &BillingPeriod::parse(start, end).unwrap())
        .unwrap()
    }

    #[test]
    fn folds_line_items_per_project() {
        let store = InMemoryStore::new();
        store.add_work_log(work_log("e1", "2024-01-02", &[("p2", hours(dec!(3.25))), ("p1", hours(dec!(4)))]));
        store.add_work_log(work_log("e1", "2024-01-03", &[("p1", hours(dec!(7.5)))]));
        store.add_work_log(work_log("e1", "2024-01-03", &[("p3", units(dec!(2)))]));
        store.add_work_log(work_log("e2", "2024-01-03", &[("p1", hours(dec!(9)))]));
        store.add_work_log(work_log("e1", "2024-02-01", &[("p1", hours(dec!(9)))]));

        let ledger = aggregate(&store, "e1", "2024-01-01", "2024-01-31");
        let totals: Vec<_> = ledger
            .entries
            .iter()
            .map(|e| (e.project_id.as_str(), e.billable_quantity, e.quantity_kind))
            .collect();
        assert_eq!(
            totals,
            vec![
                ("p1", dec!(11.5), QuantityKind::Hours),
                ("p2", dec!(3.25), QuantityKind::Hours),
                ("p3", dec!(2), QuantityKind::Units),
            ]
        );
        assert_eq!(ledger.leave_days, 0);
    }

    #[test]
    fn leave_days_accrue_nothing() {
        let store = InMemoryStore::new();
        store.add_work_log(work_log("e1", "2024-01-10", &[("p1", hours(dec!(8)))]));
        store.add_work_log(work_log("e1", "2024-01-11", &[("p1", hours(dec!(6)))]));
        store.add_leave(approved_leave("e1", "2024-01-11", "2024-01-12"));
        store.add_leave(leave_with_status("e1", "2024-01-10", "2024-01-10", LeaveStatus::Pending));

        let ledger = aggregate(&store, "e1", "2024-01-01", "2024-01-15");
        assert_eq!(ledger.entries.len(), 1);
        assert_eq!(ledger.entries[0].billable_quantity, dec!(8));
        assert_eq!(ledger.leave_days, 2);
        assert!(ledger.anomalies.contains(&ActivityAnomaly::WorkDuringLeave {
            date: date("2024-01-11"),
            hours: dec!(6),
        }));
    }

    #[test]
    fn leave_straddling_the_period_is_clipped() {
        let store = InMemoryStore::new();
        store.add_leave(approved_leave("e1", "2023-12-20", "2024-01-02"));
        store.add_leave(approved_leave("e1", "2024-01-30", "2024-02-05"));
        store.add_work_log(work_log("e1", "2024-01-02", &[("p1", hours(dec!(8)))]));
        store.add_work_log(work_log("e1", "2024-01-03", &[("p1", hours(dec!(8)))]));

        let ledger = aggregate(&store, "e1", "2024-01-01", "2024-01-31");
        assert_eq!(ledger.leave_days, 4);
        assert_eq!(ledger.entries[0].billable_quantity, dec!(8));
    }

    #[test]
    fn attendance_cross_validation_flags_anomalies() {
        let store = InMemoryStore::new();
        store.add_work_log(work_log("e1", "2024-01-08", &[("p1", hours(dec!(8)))]));
        store.add_work_log(work_log("e1", "2024-01-09", &[("p1", hours(dec!(9)))]));
        store.add_work_log(work_log("e1", "2024-01-10", &[("p1", hours(dec!(4)))]));
        store.add_attendance(attendance("e1", "2024-01-09", (9, 0), (17, 0)));
        store.add_attendance(attendance("e1", "2024-01-10", (8, 0), (12, 0)));
        store.add_attendance(attendance("e1", "2024-01-11", (9, 0), (17, 0)));

        let ledger = aggregate(&store, "e1", "2024-01-08", "2024-01-11");
        assert_eq!(
            ledger.anomalies,
            vec![
                ActivityAnomaly::WorkWithoutAttendance {
                    date: date("2024-01-08"),
                    hours: dec!(8),
                },
                ActivityAnomaly::HoursExceedAttendance {
                    date: date("2024-01-09"),
                    logged: dec!(9),
                    attended: dec!(8),
                },
                ActivityAnomaly::AttendanceWithoutWorkLog {
                    date: date("2024-01-11"),
                },
            ]
        );
        assert_eq!(ledger.entries[0].billable_quantity, dec!(21));
    }

    #[test]
    fn mixed_quantity_kinds_keep_the_first_kind() {
        let store = InMemoryStore::new();
        store.add_work_log(work_log("e1", "2024-01-02", &[("p1", units(dec!(1)))]));
        store.add_work_log(work_log("e1", "2024-01-03", &[("p1", hours(dec!(5)))]));
        store.add_attendance(attendance("e1", "2024-01-03", (9, 0), (17, 0)));

        let ledger = aggregate(&store, "e1", "2024-01-01", "2024-01-05");
        assert_eq!(ledger.entries[0].quantity_kind, QuantityKind::Units);
        assert_eq!(ledger.entries[0].billable_quantity, dec!(1));
        assert_eq!(
            ledger.anomalies,
            vec![ActivityAnomaly::MixedQuantityKind {
                date: date("2024-01-03"),
                project_id: "p1".into(),
            }]
        );
    }

    #[test]
    fn reversed_clock_is_flagged() {
        let store = InMemoryStore::new();
        store.add_attendance(attendance("e1", "2024-01-03", (17, 0), (9, 0)));
        let ledger = aggregate(&store, "e1", "2024-01-01", "2024-01-05");
        assert!(ledger
            .anomalies
            .contains(&ActivityAnomaly::InvalidAttendance { date: date("2024-01-03") }));
        assert!(ledger.entries.is_empty());
    }

    #[test]
    fn out_of_range_quantity_drops_only_that_project() {
        let store = InMemoryStore::new();
        store.add_work_log(work_log("e1", "2024-01-02", &[("big", units(Decimal::MAX)), ("p1", hours(dec!(2)))]));
        store.add_work_log(work_log("e1", "2024-01-03", &[("big", units(dec!(1)))]));

        let ledger = aggregate(&store, "e1", "2024-01-01", "2024-01-05");
        assert_eq!(ledger.overflowed, vec!["big".to_string()]);
        assert_eq!(ledger.entries.len(), 1);
        assert_eq!(ledger.entries[0].project_id, "p1");
        assert_eq!(ledger.entries[0].billable_quantity, dec!(2));
    }

    #[test]
    fn long_periods_cost_only_their_activity() {
        let store = InMemoryStore::new();
        store.add_leave(approved_leave("e1", "0001-01-01", "9999-12-31"));
        store.add_leave(approved_leave("e1", "2024-01-01", "2024-12-31"));
        store.add_work_log(work_log("e1", "2024-01-10", &[("p1", hours(dec!(8)))]));

        let ledger = aggregate(&store, "e1", "0001-01-01", "9999-12-31");
        assert_eq!(ledger.leave_days, 3_652_059);
        assert!(ledger.entries.is_empty());
        assert_eq!(
            ledger.anomalies,
            vec![ActivityAnomaly::WorkDuringLeave {
                date: date("2024-01-10"),
                hours: dec!(8),
            }]
        );
    }

    #[test]
    fn overlapping_leave_counts_each_date_once() {
        let store = InMemoryStore::new();
        store.add_leave(approved_leave("e1", "2024-01-03", "2024-01-06"));
        store.add_leave(approved_leave("e1", "2024-01-05", "2024-01-08"));
        store.add_leave(approved_leave("e1", "2024-01-09", "2024-01-09"));
        store.add_leave(approved_leave("e1", "2024-01-04", "2024-01-04"));

        let ledger = aggregate(&store, "e1", "2024-01-01", "2024-01-31");
        assert_eq!(ledger.leave_days, 7);
    }

    #[test]
    fn empty_period_yields_empty_ledger() {
        let store = InMemoryStore::new();
        let ledger = aggregate(&store, "nobody", "2024-01-01", "2024-01-31");
        assert_eq!(ledger, ActivityLedger::default());
    }
}
