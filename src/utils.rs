use crate::error::{Result, RevenueError};
use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};

pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let next_month = if month == 12 { 1 } else { month + 1 };
    let next_year = if month == 12 { year + 1 } else { year };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.checked_sub_days(Days::new(1))
}

pub fn end_of_month_timestamp(year: i32, month: u32) -> Result<NaiveDateTime> {
    validate_month(month)?;
    last_day_of_month(year, month)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| RevenueError::InvalidConfig(format!("No calendar month {}-{:02}", year, month)))
}

pub fn validate_month(month: u32) -> Result<()> {
    if !(1..=12).contains(&month) {
        return Err(RevenueError::InvalidMonth(month));
    }
    Ok(())
}

/// Percentage change from `base` to `current`, defined as zero when `base` is zero.
pub fn percent_change(base: f64, current: f64) -> f64 {
    if base == 0.0 {
        0.0
    } else {
        (current - base) / base * 100.0
    }
}

/// `numerator / denominator`, or zero when the denominator is zero.
pub fn ratio_or_zero(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Share of `part` in `whole` as a percentage; zero unless `whole` is positive.
pub fn share_percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];

/// Parses the timestamp layouts seen in the spreadsheet exports.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Parses a reporting period such as "2024-02" (or a full date within it)
/// into `(year, month)`.
pub fn parse_period(raw: &str) -> Option<(i32, u32)> {
    let raw = raw.trim();
    let start = format!("{}-01", raw);
    if let Ok(date) = NaiveDate::parse_from_str(&start, "%Y-%m-%d") {
        return Some((date.year(), date.month()));
    }

    parse_timestamp(raw).map(|ts| (ts.year(), ts.month()))
}

pub fn first_of_month(year: i32, month: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}
