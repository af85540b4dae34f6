use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, Duration, NaiveDate};

use crate::models::{LateRecord, StudentMonthAggregate};

pub const DEFAULT_MIN_LATE_DAYS: usize = 5;

/// Inclusive calendar-date range covering the month before the run date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportingWindow {
    pub first_day: NaiveDate,
    pub last_day: NaiveDate,
}

impl ReportingWindow {
    pub fn previous_month(as_of: NaiveDate) -> Self {
        let first_of_current = as_of.with_day(1).unwrap_or(as_of);
        let last_day = first_of_current - Duration::days(1);
        let first_day = last_day.with_day(1).unwrap_or(last_day);
        Self {
            first_day,
            last_day,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.first_day && date <= self.last_day
    }

    /// `June-2024` style label used in file names and subjects.
    pub fn label(&self) -> String {
        self.first_day.format("%B-%Y").to_string()
    }
}

pub fn late_date_key(date: NaiveDate) -> String {
    date.format("%d/%m/%y").to_string()
}

pub fn records_in_window<'a>(
    records: &'a [LateRecord],
    window: &ReportingWindow,
) -> Vec<&'a LateRecord> {
    records
        .iter()
        .filter(|record| window.contains(record.date))
        .collect()
}

/// Groups records by student and collects their distinct late dates.
///
/// Dates are compared on their `dd/mm/yy` string form and `repeated_dates`
/// keeps string order, so `05/01/24` sorts before `05/12/23`.
pub fn aggregate_students(records: &[&LateRecord]) -> Vec<StudentMonthAggregate> {
    let mut groups: BTreeMap<(String, String, String), BTreeSet<String>> = BTreeMap::new();

    for record in records {
        groups
            .entry((
                record.pin.clone(),
                record.name.clone(),
                record.department.clone(),
            ))
            .or_default()
            .insert(late_date_key(record.date));
    }

    groups
        .into_iter()
        .map(|((pin, name, department), dates)| StudentMonthAggregate {
            pin,
            name,
            department,
            late_count: dates.len(),
            repeated_dates: dates.into_iter().collect::<Vec<_>>().join(", "),
        })
        .collect()
}

pub fn repeat_latecomers(
    aggregates: Vec<StudentMonthAggregate>,
    min_late_days: usize,
) -> Vec<StudentMonthAggregate> {
    aggregates
        .into_iter()
        .filter(|student| student.late_count >= min_late_days)
        .collect()
}
