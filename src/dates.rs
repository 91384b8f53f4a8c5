//! Date normalization shared by transformers, the validator and the partitioner.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde_json::Value;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Parses the date formats upstream sources are known to emit.
///
/// Accepts ISO dates and datetimes (with or without offset), `MM/DD/YYYY`,
/// written-out month names, `YYYY-MM` (first of month) and a bare `YYYY`
/// (January 1st).
pub fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }

    if s.len() == 7 {
        if let Ok(d) = NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d") {
            return Some(d);
        }
    }
    if s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit()) {
        let year: i32 = s.parse().ok()?;
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }

    None
}

/// [`normalize_date`] over a JSON value; integer values are read as years.
pub fn normalize_value(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => normalize_date(s),
        Value::Number(n) => {
            let year = n.as_i64()?;
            if (1000..=9999).contains(&year) {
                NaiveDate::from_ymd_opt(year as i32, 1, 1)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Strict `YYYY-MM-DD`, the only shape standardized records carry.
pub fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    if raw.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// `"{year}-Q{ceil(month/3)}"`.
pub fn quarter_key(date: NaiveDate) -> String {
    let quarter = (date.month() + 2) / 3;
    format!("{}-Q{}", date.year(), quarter)
}

/// True for names shaped like `2024-Q3`.
pub fn is_quarter_key(name: &str) -> bool {
    let Some((year, quarter)) = name.split_once("-Q") else {
        return false;
    };
    year.len() == 4
        && year.bytes().all(|b| b.is_ascii_digit())
        && matches!(quarter, "1" | "2" | "3" | "4")
}
