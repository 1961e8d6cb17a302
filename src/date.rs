//! Survey date arithmetic.
//!
//! Survey dates are stored as days since 1900-01-01 so that date ranges can
//! be averaged cheaply; the geomagnetic model wants a decimal year.

use chrono::{Datelike, Duration, NaiveDate};

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).expect("valid epoch")
}

/// Days since 1900-01-01 (which is day 0). Returns `None` for an invalid
/// calendar date.
pub fn days_since_1900(year: i32, month: u32, day: u32) -> Option<i32> {
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some((date - epoch()).num_days() as i32)
}

/// Decimal year for a days-since-1900 count, e.g. mid-1979 is about 1979.5.
pub fn decimal_year(days: i32) -> f64 {
    let date = epoch() + Duration::days(days as i64);
    let year = date.year();
    let length = if is_leap_year(year) { 366.0 } else { 365.0 };
    year as f64 + date.ordinal0() as f64 / length
}

pub fn is_leap_year(year: i32) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

/// Inclusive date range of one survey trip, as days since 1900.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurveyDate {
    pub days1: i32,
    pub days2: i32,
}

impl SurveyDate {
    pub fn single(days: i32) -> Self {
        SurveyDate {
            days1: days,
            days2: days,
        }
    }

    /// Midpoint of the range, used for declination lookup.
    pub fn average_days(&self) -> i32 {
        (self.days1 + self.days2) / 2
    }
}
