//! Per-source transformers from raw payload rows to standardized [`Record`]s.
//!
//! Transformers are pure: they never log or touch the clock. Recoverable
//! problems (an unparseable date, a non-numeric count) drop the offending
//! field and are reported in [`Transformed::warnings`].

pub mod goodshepherd;
pub mod hdx;
pub mod worldbank;

use chrono::NaiveDate;
use serde_json::{Map, Number, Value};

use crate::dates::normalize_value;
use crate::parser::{PayloadError, RawPayload};
use crate::record::{Record, Transformed};

type Row = Map<String, Value>;

/// Runs `map` over every row of `payload`, collecting records and warnings.
/// A count-only payload produces no records and one warning.
pub(crate) fn map_rows<F>(payload: &RawPayload, mut map: F) -> Result<Transformed, PayloadError>
where
    F: FnMut(&Row, &mut RowContext) -> Record,
{
    let mut out = Transformed::default();

    if let RawPayload::MetadataCount(n) = payload {
        out.warn(format!("payload carries only a record count ({n}), no records"));
        return Ok(out);
    }

    for (index, row) in payload.rows()?.iter().enumerate() {
        let mut ctx = RowContext {
            index,
            warnings: Vec::new(),
        };
        let record = map(row, &mut ctx);
        out.warnings.append(&mut ctx.warnings);
        out.records.push(record);
    }

    Ok(out)
}

/// Per-row helpers that turn field problems into warnings.
pub(crate) struct RowContext {
    index: usize,
    warnings: Vec<String>,
}

impl RowContext {
    /// First candidate that holds a date. A present but unparseable value is
    /// dropped with a warning.
    pub fn date(&mut self, row: &Row, candidates: &[&str]) -> Option<NaiveDate> {
        let (field, value) = pick_entry(row, candidates)?;
        let parsed = normalize_value(value);
        if parsed.is_none() {
            self.warnings.push(format!(
                "row {}: unparseable date in '{field}': {value}",
                self.index
            ));
        }
        parsed
    }

    /// First candidate as a non-negative integer count.
    pub fn count(&mut self, row: &Row, candidates: &[&str]) -> Option<i64> {
        let (field, value) = pick_entry(row, candidates)?;
        let parsed = as_f64(value).filter(|v| v.is_finite()).map(|v| v.round() as i64);
        if parsed.is_none() {
            self.warnings.push(format!(
                "row {}: non-numeric value in '{field}': {value}",
                self.index
            ));
        }
        parsed
    }

    pub fn float(&mut self, row: &Row, candidates: &[&str]) -> Option<f64> {
        let (field, value) = pick_entry(row, candidates)?;
        let parsed = as_f64(value).filter(|v| v.is_finite());
        if parsed.is_none() {
            self.warnings.push(format!(
                "row {}: non-numeric value in '{field}': {value}",
                self.index
            ));
        }
        parsed
    }
}

/// First candidate field (case-insensitive) holding a non-blank value.
pub(crate) fn pick<'a>(row: &'a Row, candidates: &[&str]) -> Option<&'a Value> {
    pick_entry(row, candidates).map(|(_, v)| v)
}

fn pick_entry<'a>(row: &'a Row, candidates: &[&str]) -> Option<(&'a str, &'a Value)> {
    candidates.iter().find_map(|candidate| {
        row.iter()
            .find(|(key, value)| key.eq_ignore_ascii_case(candidate) && !is_blank(value))
            .map(|(key, value)| (key.as_str(), value))
    })
}

/// First candidate rendered as a trimmed string.
pub(crate) fn pick_str(row: &Row, candidates: &[&str]) -> Option<String> {
    match pick(row, candidates)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Numbers, and strings like `"1,234"` or `" 12.5 "`.
pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    }
}

pub(crate) fn float_value(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

/// Stamps the shared fields every record carries.
pub(crate) fn base_record(source: &str, date: Option<NaiveDate>, location: Option<String>) -> Record {
    let mut record = Record::new(source);
    if let Some(date) = date {
        record.set_date("date", date);
    }
    record.set_opt("location", location);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_pick_is_case_insensitive_and_skips_blanks() {
        let r = row(json!({"Event_Date": "", "DATE": "2024-01-02"}));
        assert_eq!(pick(&r, &["event_date", "date"]), Some(&json!("2024-01-02")));
    }

    #[test]
    fn test_as_f64_handles_formatted_strings() {
        assert_eq!(as_f64(&json!("1,234")), Some(1234.0));
        assert_eq!(as_f64(&json!(" 12.5 ")), Some(12.5));
        assert_eq!(as_f64(&json!("n/a")), None);
        assert_eq!(as_f64(&json!(7)), Some(7.0));
    }

    #[test]
    fn test_row_context_warns_on_bad_values() {
        let r = row(json!({"date": "someday", "killed": "many"}));
        let mut ctx = RowContext {
            index: 3,
            warnings: Vec::new(),
        };
        assert_eq!(ctx.date(&r, &["date"]), None);
        assert_eq!(ctx.count(&r, &["killed"]), None);
        assert_eq!(ctx.warnings.len(), 2);
        assert!(ctx.warnings[0].starts_with("row 3"));
    }

    #[test]
    fn test_missing_fields_do_not_warn() {
        let r = row(json!({}));
        let mut ctx = RowContext {
            index: 0,
            warnings: Vec::new(),
        };
        assert_eq!(ctx.date(&r, &["date"]), None);
        assert!(ctx.warnings.is_empty());
    }

    #[test]
    fn test_metadata_count_payload_yields_warning_only() {
        let out = map_rows(&RawPayload::MetadataCount(10), |_, _| Record::new("x")).unwrap();
        assert!(out.records.is_empty());
        assert_eq!(out.warnings.len(), 1);
    }
}
