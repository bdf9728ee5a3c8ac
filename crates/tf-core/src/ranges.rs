//! # Range expressions
//!
//! Parsers for the textual bounds accepted by the query model: dates
//! (absolute or relative to "now") and integer intervals in bracket
//! notation. Both fail with [`AppError::ValidationError`] so a malformed
//! filter is rejected before any query runs.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::error::{AppError, Result};

/// The interval that means "no restriction" for counters.
pub const DEFAULT_NUMERIC_RANGE: &str = "[0, 10000000)";

/// Parses `YYYY-MM-DD` or a relative offset such as `-7d`, `2w`, `+1y`,
/// `-3天`. Unsigned and negative offsets point to the past and snap to the
/// start of that day; positive offsets point to the future and snap to its
/// end. Blank input means "no bound".
pub fn parse_time(input: Option<&str>, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    let Some(raw) = input.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    if let Some(date) = parse_absolute_date(raw)? {
        return Ok(Some(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))));
    }

    parse_relative(raw, now)
        .map(Some)
        .ok_or_else(|| AppError::ValidationError(format!("unrecognized time format: {raw}")))
}

fn parse_absolute_date(raw: &str) -> Result<Option<NaiveDate>> {
    let parts: Vec<&str> = raw.split('-').collect();
    let shape_ok = parts.len() == 3
        && parts[0].len() == 4
        && (1..=2).contains(&parts[1].len())
        && (1..=2).contains(&parts[2].len())
        && parts.iter().all(|p| p.chars().all(|c| c.is_ascii_digit()));
    if !shape_ok {
        return Ok(None);
    }

    let invalid = || AppError::ValidationError(format!("invalid date: {raw}"));
    let year: i32 = parts[0].parse().map_err(|_| invalid())?;
    let month: u32 = parts[1].parse().map_err(|_| invalid())?;
    let day: u32 = parts[2].parse().map_err(|_| invalid())?;
    NaiveDate::from_ymd_opt(year, month, day)
        .map(Some)
        .ok_or_else(invalid)
}

fn parse_relative(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (future, rest) = match raw.chars().next()? {
        '+' => (true, &raw[1..]),
        '-' => (false, &raw[1..]),
        _ => (false, raw),
    };
    let rest = rest.trim_start();
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }
    let amount: i64 = rest[..digits_end].parse().ok()?;
    let unit = rest[digits_end..].trim().to_lowercase();

    let days_per_unit = match unit.as_str() {
        "d" | "day" | "天" => 1,
        "w" | "week" | "周" | "星期" => 7,
        "y" | "year" | "年" => 365,
        _ => return None,
    };
    let offset = Duration::try_days(amount.checked_mul(days_per_unit)?)?;

    if future {
        let target = now.checked_add_signed(offset)?.date_naive();
        let end_of_day = target.and_hms_micro_opt(23, 59, 59, 999_999)?;
        Some(Utc.from_utc_datetime(&end_of_day))
    } else {
        let target = now.checked_sub_signed(offset)?.date_naive();
        Some(Utc.from_utc_datetime(&target.and_time(NaiveTime::MIN)))
    }
}

/// An integer interval such as `[10, 100)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumericRange {
    pub min: i64,
    pub max: i64,
    pub min_inclusive: bool,
    pub max_inclusive: bool,
}

impl NumericRange {
    /// Accepts half- and full-width brackets and commas. `min > max` is
    /// rejected.
    pub fn parse(input: &str) -> Result<Self> {
        let normalized: String = input
            .trim()
            .chars()
            .map(|c| match c {
                '，' => ',',
                '（' => '(',
                '）' => ')',
                '【' => '[',
                '】' => ']',
                other => other,
            })
            .collect();

        let format_error = || {
            AppError::ValidationError(format!(
                "bad range {input:?}; expected e.g. `[10, 100)` or `(50, 200]`"
            ))
        };

        let min_inclusive = match normalized.chars().next() {
            Some('[') => true,
            Some('(') => false,
            _ => return Err(format_error()),
        };
        let max_inclusive = match normalized.chars().last() {
            Some(']') => true,
            Some(')') => false,
            _ => return Err(format_error()),
        };
        if normalized.len() < 2 {
            return Err(format_error());
        }

        let inner = &normalized[1..normalized.len() - 1];
        let (lo, hi) = inner.split_once(',').ok_or_else(format_error)?;
        let min: i64 = lo.trim().parse().map_err(|_| format_error())?;
        let max: i64 = hi.trim().parse().map_err(|_| format_error())?;

        if min > max {
            return Err(AppError::ValidationError(format!(
                "range start {min} is greater than its end {max}"
            )));
        }

        Ok(Self {
            min,
            max,
            min_inclusive,
            max_inclusive,
        })
    }

    /// Parses an optional range; the default interval and blank input both
    /// mean "unrestricted".
    pub fn parse_filter(input: Option<&str>) -> Result<Option<Self>> {
        let Some(raw) = input.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        let range = Self::parse(raw)?;
        let unrestricted = Self::parse(DEFAULT_NUMERIC_RANGE)?;
        Ok((range != unrestricted).then_some(range))
    }

    pub fn contains(&self, value: i64) -> bool {
        let above = if self.min_inclusive { value >= self.min } else { value > self.min };
        let below = if self.max_inclusive { value <= self.max } else { value < self.max };
        above && below
    }
}
