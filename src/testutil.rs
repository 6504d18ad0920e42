//! Fixture builders shared by the unit tests.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::models::{
    AttendanceRecord, Employee, LeaveInterval, LeaveStatus, LineQuantity, Project,
    ProjectLineItem, WorkLogEntry,
};

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn hours(h: Decimal) -> LineQuantity {
    LineQuantity::Hours(h)
}

pub fn units(u: Decimal) -> LineQuantity {
    LineQuantity::Units(u)
}

pub fn employee(id: &str, name: &str) -> Employee {
    Employee {
        id: id.into(),
        name: name.into(),
    }
}

pub fn project(id: &str, billing_type: &str, rate: Decimal) -> Project {
    Project {
        id: id.into(),
        name: format!("Project {id}"),
        billing_type: billing_type.into(),
        rate,
        hours_per_unit: None,
        client_name: None,
    }
}

pub fn work_log(employee_id: &str, day: &str, items: &[(&str, LineQuantity)]) -> WorkLogEntry {
    WorkLogEntry {
        employee_id: employee_id.into(),
        date: date(day),
        line_items: items
            .iter()
            .map(|(project_id, quantity)| ProjectLineItem {
                project_id: (*project_id).into(),
                quantity: *quantity,
            })
            .collect(),
    }
}

pub fn leave_with_status(employee_id: &str, start: &str, end: &str, status: LeaveStatus) -> LeaveInterval {
    LeaveInterval {
        employee_id: employee_id.into(),
        start_date: date(start),
        end_date: date(end),
        status,
    }
}

pub fn approved_leave(employee_id: &str, start: &str, end: &str) -> LeaveInterval {
    leave_with_status(employee_id, start, end, LeaveStatus::Approved)
}

pub fn attendance(employee_id: &str, day: &str, clock_in: (u32, u32), clock_out: (u32, u32)) -> AttendanceRecord {
    let d = date(day);
    AttendanceRecord {
        employee_id: employee_id.into(),
        date: d,
        clock_in: d.and_hms_opt(clock_in.0, clock_in.1, 0).unwrap(),
        clock_out: d.and_hms_opt(clock_out.0, clock_out.1, 0).unwrap(),
    }
}
