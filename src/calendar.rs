use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

use crate::models::Cohort;

/// Where a date falls inside a cohort's training cycle.
///
/// Cohort weeks are anchored to the cohort's start weekday, not the calendar
/// week: a cohort starting on a Wednesday runs Wednesday through Tuesday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleDay {
    /// `None` when the date is outside the cohort's start/end range.
    pub week_index: Option<i64>,
    pub day_of_week: u32,
    pub daily_target: u32,
    pub is_first_day_of_week: bool,
}

pub fn resolve(cohort: &Cohort, as_of: NaiveDate) -> CycleDay {
    let day = day_of_week(cohort, as_of);
    let week = week_index(cohort, as_of);

    CycleDay {
        week_index: week,
        day_of_week: day,
        daily_target: daily_target(cohort, week),
        is_first_day_of_week: day == 0,
    }
}

/// 0 on the cohort's start weekday, counting up to 6.
pub fn day_of_week(cohort: &Cohort, as_of: NaiveDate) -> u32 {
    let today = as_of.weekday().num_days_from_monday();
    let start = cohort.start_date.weekday().num_days_from_monday();
    (today + 7 - start) % 7
}

pub fn week_index(cohort: &Cohort, as_of: NaiveDate) -> Option<i64> {
    if as_of < cohort.start_date || as_of > cohort.end_date {
        return None;
    }

    Some((as_of - cohort.start_date).num_days().div_euclid(7))
}

/// Minutes per day expected during the given week. Anything outside the
/// configured targets, including an undefined week, falls back to the
/// cohort default.
pub fn daily_target(cohort: &Cohort, week_index: Option<i64>) -> u32 {
    week_index
        .and_then(|week| usize::try_from(week).ok())
        .and_then(|week| cohort.weekly_targets.get(week).copied())
        .unwrap_or(cohort.default_daily_target)
}

pub fn week_start(cohort: &Cohort, week_index: i64) -> NaiveDate {
    cohort.start_date + Duration::days(week_index * 7)
}
