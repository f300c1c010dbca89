use chrono::NaiveDate;

use crate::engine::EngineError;

/// Whole calendar days from `start` to `end`. Negative when `end` precedes `start`.
///
/// `NaiveDate` carries no time-of-day or zone, so there is no DST skew to round away.
pub fn days_between(start: NaiveDate, end: NaiveDate) -> i64 {
    end.signed_duration_since(start).num_days()
}

/// Closed-interval overlap: `[a_start, a_end]` and `[b_start, b_end]` intersect
/// iff neither starts after the other ends. Touching endpoints overlap.
pub fn ranges_overlap(a_start: NaiveDate, a_end: NaiveDate, b_start: NaiveDate, b_end: NaiveDate) -> bool {
    a_start <= b_end && b_start <= a_end
}

/// Parse a strict `YYYY-MM-DD` date. `field` names the argument in the error.
pub fn parse_date(value: &str, field: &str) -> Result<NaiveDate, EngineError> {
    let bytes = value.as_bytes();
    let shape_ok = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !shape_ok {
        return Err(EngineError::InvalidDateRange(format!(
            "{field} must be formatted as YYYY-MM-DD, got {value:?}"
        )));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        EngineError::InvalidDateRange(format!("{field} is not a calendar date: {value}"))
    })
}
