//! Standardized record shape shared by every source.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dates::{format_date, parse_iso_date};

/// A standardized record: `date` (`YYYY-MM-DD`), `location`, `source`, plus the
/// category fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new(source: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("source".to_string(), Value::String(source.to_string()));
        Self(fields)
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.0.insert(field.to_string(), value.into());
    }

    /// Sets `field` only when `value` is present.
    pub fn set_opt<V: Into<Value>>(&mut self, field: &str, value: Option<V>) {
        if let Some(value) = value {
            self.set(field, value);
        }
    }

    pub fn set_date(&mut self, field: &str, date: NaiveDate) {
        self.set(field, format_date(date));
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// `field` when it holds something other than null or a blank string.
    pub fn present(&self, field: &str) -> Option<&Value> {
        self.get(field).filter(|value| match value {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        })
    }

    /// Parsed `YYYY-MM-DD` value of `field`, if present and well formed.
    pub fn date(&self, field: &str) -> Option<NaiveDate> {
        self.get(field)?.as_str().and_then(parse_iso_date)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Output of a transformer: the records plus per-record problems that were
/// recovered from (dropped records, dropped fields).
#[derive(Debug, Default)]
pub struct Transformed {
    pub records: Vec<Record>,
    pub warnings: Vec<String>,
}

impl Transformed {
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_record_carries_source() {
        let record = Record::new("hdx");
        assert_eq!(record.get("source"), Some(&json!("hdx")));
    }

    #[test]
    fn test_date_roundtrips_through_iso_string() {
        let mut record = Record::new("hdx");
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        record.set_date("date", date);
        assert_eq!(record.get("date"), Some(&json!("2024-02-29")));
        assert_eq!(record.date("date"), Some(date));
    }

    #[test]
    fn test_set_opt_skips_none() {
        let mut record = Record::new("hdx");
        record.set_opt::<i64>("killed", None);
        record.set_opt("injured", Some(4));
        assert!(record.get("killed").is_none());
        assert_eq!(record.get("injured"), Some(&json!(4)));
    }

    #[test]
    fn test_present_ignores_blank_values() {
        let mut record = Record::new("hdx");
        record.set("location", "  ");
        record.set("killed", Value::Null);
        record.set("injured", 0);
        assert!(record.present("location").is_none());
        assert!(record.present("killed").is_none());
        assert!(record.present("injured").is_some());
    }

    #[test]
    fn test_serializes_as_flat_object() {
        let mut record = Record::new("worldbank");
        record.set("value", 1.5);
        let out = serde_json::to_value(&record).unwrap();
        assert_eq!(out, json!({"source": "worldbank", "value": 1.5}));
    }
}
