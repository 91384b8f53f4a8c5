//! World Bank indicator API (v2) responses.
//!
//! A successful response is `[page_info, observations]`; an error is
//! `[{"message": [...]}]`. Both are parsed into typed structs before any
//! transformation happens.

use serde::Deserialize;
use serde_json::Value;

use crate::dates::normalize_date;
use crate::parser::PayloadError;
use crate::record::{Record, Transformed};

pub const SOURCE: &str = "World Bank";

#[derive(Debug, Clone, Deserialize)]
pub struct PageInfo {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub pages: u32,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub lastupdated: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Reference {
    pub id: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Observation {
    pub indicator: Reference,
    pub country: Reference,
    #[serde(default)]
    pub countryiso3code: Option<String>,
    pub date: String,
    pub value: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone)]
pub enum IndicatorResponse {
    Data {
        page: PageInfo,
        observations: Vec<Observation>,
    },
    ApiError(String),
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

/// Parses a raw indicator response body.
///
/// # Errors
///
/// Returns an error if the body is not the `[page, observations]` shape.
pub fn parse_indicator_response(bytes: &[u8]) -> Result<IndicatorResponse, PayloadError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| PayloadError::Unrecognized(format!("World Bank response is not JSON: {e}")))?;

    let Value::Array(mut parts) = value else {
        return Err(PayloadError::Unrecognized(
            "World Bank response is not an array".to_string(),
        ));
    };
    if parts.is_empty() {
        return Err(PayloadError::Empty);
    }

    let head = parts.remove(0);
    if let Some(messages) = head.get("message") {
        let messages: Vec<ApiMessage> = serde_json::from_value(messages.clone()).unwrap_or_default();
        let text = messages
            .into_iter()
            .map(|m| {
                format!(
                    "{}: {}",
                    m.key.unwrap_or_default(),
                    m.value.unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        return Ok(IndicatorResponse::ApiError(text));
    }

    let page: PageInfo = serde_json::from_value(head)
        .map_err(|e| PayloadError::Unrecognized(format!("World Bank page info: {e}")))?;
    let observations = match parts.into_iter().next() {
        None | Some(Value::Null) => Vec::new(),
        Some(rows) => serde_json::from_value(rows)
            .map_err(|e| PayloadError::Unrecognized(format!("World Bank observations: {e}")))?,
    };

    Ok(IndicatorResponse::Data { page, observations })
}

/// One record per non-null observation, oldest first. Null values are
/// missing data points, not errors, and are skipped silently.
pub fn transform_indicator(observations: &[Observation]) -> Transformed {
    let mut out = Transformed::default();

    for obs in observations {
        let Some(value) = obs.value else {
            continue;
        };
        let mut record = Record::new(SOURCE);
        match normalize_date(&obs.date) {
            Some(date) => record.set_date("date", date),
            None => out.warn(format!(
                "{}: unparseable observation date '{}'",
                obs.indicator.id, obs.date
            )),
        }
        if let Ok(year) = obs.date.get(..4).unwrap_or_default().parse::<i64>() {
            record.set("year", year);
        }
        record.set("indicator", obs.indicator.id.as_str());
        record.set("indicator_name", obs.indicator.value.as_str());
        record.set("value", super::float_value(value));
        record.set("location", obs.country.value.as_str());
        record.set_opt("country_code", obs.countryiso3code.as_deref().filter(|c| !c.is_empty()));
        record.set_opt("unit", obs.unit.as_deref().filter(|u| !u.is_empty()));
        out.records.push(record);
    }

    out.records.sort_by(|a, b| {
        let left = a.get("date").and_then(Value::as_str).unwrap_or("");
        let right = b.get("date").and_then(Value::as_str).unwrap_or("");
        left.cmp(right)
    });
    out
}
