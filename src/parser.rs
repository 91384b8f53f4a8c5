//! Boundary parser for raw API payloads.
//!
//! Upstream sources return records in a handful of shapes. Each payload is
//! classified into a [`RawPayload`] once, right after download, and everything
//! downstream matches on the variant.

use serde_json::{Map, Value};
use thiserror::Error;

/// The closed set of payload shapes the pipeline understands.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    /// A top-level JSON array.
    Array(Vec<Value>),
    /// `{"data": [...]}` or `{"data": {"data": [...]}}`.
    NestedData(Vec<Value>),
    /// `{"metadata": {"record_count": n}}` with no records attached.
    MetadataCount(u64),
    /// CSV text, either the whole body or a JSON string field.
    EmbeddedCsv(String),
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is empty")]
    Empty,
    #[error("unrecognized payload shape: {0}")]
    Unrecognized(String),
    #[error("CSV parse failed: {0}")]
    Csv(#[from] csv::Error),
}

/// Classifies a downloaded body as JSON (any known shape) or CSV.
///
/// # Errors
///
/// Returns an error if the body is empty, or is neither a recognized JSON
/// shape nor CSV text.
pub fn parse_payload(bytes: &[u8]) -> Result<RawPayload, PayloadError> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim_start_matches('\u{feff}').trim();
    if trimmed.is_empty() {
        return Err(PayloadError::Empty);
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => classify(value),
        Err(_) if looks_like_csv(trimmed) => Ok(RawPayload::EmbeddedCsv(trimmed.to_string())),
        Err(e) => Err(PayloadError::Unrecognized(format!("not JSON or CSV: {e}"))),
    }
}

/// Classifies an already-parsed JSON document.
pub fn classify(value: Value) -> Result<RawPayload, PayloadError> {
    match value {
        Value::Array(items) => Ok(RawPayload::Array(items)),
        Value::String(s) if looks_like_csv(&s) => Ok(RawPayload::EmbeddedCsv(s)),
        Value::Object(mut obj) => {
            match obj.remove("data") {
                Some(Value::Array(items)) => return Ok(RawPayload::NestedData(items)),
                Some(Value::Object(mut inner)) => {
                    if let Some(Value::Array(items)) = inner.remove("data") {
                        return Ok(RawPayload::NestedData(items));
                    }
                }
                Some(Value::String(s)) if looks_like_csv(&s) => {
                    return Ok(RawPayload::EmbeddedCsv(s));
                }
                _ => {}
            }

            if let Some(count) = obj
                .get("metadata")
                .and_then(|m| m.get("record_count"))
                .and_then(Value::as_u64)
            {
                return Ok(RawPayload::MetadataCount(count));
            }

            if let Some(Value::String(s)) = obj.remove("csv") {
                return Ok(RawPayload::EmbeddedCsv(s));
            }

            let keys: Vec<&str> = obj.keys().map(String::as_str).collect();
            Err(PayloadError::Unrecognized(format!(
                "object with keys [{}]",
                keys.join(", ")
            )))
        }
        other => Err(PayloadError::Unrecognized(json_kind(&other).to_string())),
    }
}

impl RawPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            RawPayload::Array(_) => "array",
            RawPayload::NestedData(_) => "nested_data",
            RawPayload::MetadataCount(_) => "metadata_count",
            RawPayload::EmbeddedCsv(_) => "embedded_csv",
        }
    }

    /// Number of records the payload represents.
    pub fn record_count(&self) -> u64 {
        match self {
            RawPayload::Array(items) | RawPayload::NestedData(items) => items.len() as u64,
            RawPayload::MetadataCount(n) => *n,
            RawPayload::EmbeddedCsv(text) => csv_rows(text).map(|r| r.len() as u64).unwrap_or(0),
        }
    }

    /// Record rows as JSON objects. Non-object array items are skipped and a
    /// count-only payload yields no rows.
    pub fn rows(&self) -> Result<Vec<Map<String, Value>>, PayloadError> {
        match self {
            RawPayload::Array(items) | RawPayload::NestedData(items) => Ok(items
                .iter()
                .filter_map(|item| item.as_object().cloned())
                .collect()),
            RawPayload::MetadataCount(_) => Ok(Vec::new()),
            RawPayload::EmbeddedCsv(text) => csv_rows(text),
        }
    }
}

/// Parses CSV text with a header row into string-valued objects. An HXL
/// hashtag row (`#date,#adm1+name,...`) directly under the header is skipped.
fn csv_rows(text: &str) -> Result<Vec<Map<String, Value>>, PayloadError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();

    for result in reader.records() {
        let record = result?;
        if is_hxl_row(&record) {
            continue;
        }
        let mut row = Map::new();
        for (name, value) in headers.iter().zip(record.iter()) {
            if name.is_empty() {
                continue;
            }
            row.insert(name.to_string(), Value::String(value.to_string()));
        }
        rows.push(row);
    }

    Ok(rows)
}

fn is_hxl_row(record: &csv::StringRecord) -> bool {
    let mut tagged = false;
    for cell in record.iter() {
        if cell.is_empty() {
            continue;
        }
        if !cell.starts_with('#') {
            return false;
        }
        tagged = true;
    }
    tagged
}

fn looks_like_csv(text: &str) -> bool {
    let first_line = text.lines().next().unwrap_or("");
    text.contains('\n') && first_line.contains(',') && !first_line.trim_start().starts_with(['{', '['])
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_top_level_array() {
        let payload = parse_payload(br#"[{"a":1},{"a":2}]"#).unwrap();
        assert_eq!(payload.kind(), "array");
        assert_eq!(payload.record_count(), 2);
    }

    #[test]
    fn test_data_wrapped_array() {
        let payload = classify(json!({"data": [{"a": 1}], "meta": {}})).unwrap();
        assert_eq!(payload, RawPayload::NestedData(vec![json!({"a": 1})]));
    }

    #[test]
    fn test_doubly_nested_data() {
        let payload = classify(json!({"data": {"data": [{"a": 1}, {"a": 2}, {"a": 3}]}})).unwrap();
        assert_eq!(payload.kind(), "nested_data");
        assert_eq!(payload.record_count(), 3);
    }

    #[test]
    fn test_metadata_only() {
        let payload = classify(json!({"metadata": {"record_count": 42}})).unwrap();
        assert_eq!(payload, RawPayload::MetadataCount(42));
        assert!(payload.rows().unwrap().is_empty());
    }

    #[test]
    fn test_csv_body_with_hxl_row() {
        let body = b"date,location,killed\n#date,#adm1+name,#affected+killed\n2024-01-01,Gaza,5\n2024-01-02,Rafah,3\n";
        let payload = parse_payload(body).unwrap();
        assert_eq!(payload.kind(), "embedded_csv");
        assert_eq!(payload.record_count(), 2);

        let rows = payload.rows().unwrap();
        assert_eq!(rows[0]["location"], json!("Gaza"));
        assert_eq!(rows[1]["killed"], json!("3"));
    }

    #[test]
    fn test_csv_inside_json_field() {
        let payload = classify(json!({"csv": "a,b\n1,2\n3,4\n"})).unwrap();
        assert_eq!(payload.record_count(), 2);
    }

    #[test]
    fn test_unrecognized_shapes() {
        assert!(matches!(
            classify(json!({"foo": 1})),
            Err(PayloadError::Unrecognized(_))
        ));
        assert!(matches!(classify(json!(7)), Err(PayloadError::Unrecognized(_))));
        assert!(matches!(parse_payload(b"   "), Err(PayloadError::Empty)));
        assert!(parse_payload(b"<html>oops</html>").is_err());
    }

    #[test]
    fn test_rows_skip_non_objects() {
        let payload = RawPayload::Array(vec![json!({"a": 1}), json!(3), json!("x")]);
        assert_eq!(payload.rows().unwrap().len(), 1);
    }
}
