//! Schema-driven dataset validation and quality scoring.
//!
//! A failing dataset is never rejected: the [`ValidationResult`] is stored next
//! to the data so consumers can see the quality flag.

pub mod schema;
pub mod score;

pub use schema::Schema;
pub use score::{QualityScores, ValidationThresholds, grade, mean};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::dates::{normalize_value, parse_iso_date};
use crate::record::Record;
use score::ratio;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingRequiredField,
    TypeMismatch,
    InvalidDate,
    OutOfRange,
    InvalidEnum,
    EmptyDataset,
    UnknownSchema,
}

impl IssueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueKind::MissingRequiredField => "missing_required_field",
            IssueKind::TypeMismatch => "type_mismatch",
            IssueKind::InvalidDate => "invalid_date",
            IssueKind::OutOfRange => "out_of_range",
            IssueKind::InvalidEnum => "invalid_enum",
            IssueKind::EmptyDataset => "empty_dataset",
            IssueKind::UnknownSchema => "unknown_schema",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
    pub severity: Severity,
    pub affected_records: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub dataset_type: String,
    /// Schema actually applied; `generic` when the type was unknown.
    pub schema: String,
    pub record_count: usize,
    pub is_valid: bool,
    pub quality: QualityScores,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

pub struct Validator {
    thresholds: ValidationThresholds,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(ValidationThresholds::default())
    }
}

impl Validator {
    pub fn new(thresholds: ValidationThresholds) -> Self {
        Self { thresholds }
    }

    /// Validates `records` against the schema registered for `dataset_type`.
    /// Unknown types fall back to the generic schema with a warning.
    pub fn validate_dataset(&self, records: &[Record], dataset_type: &str) -> ValidationResult {
        let (schema, fallback) = match schema::lookup(dataset_type) {
            Some(schema) => (schema, false),
            None => {
                warn!(dataset_type, "Unknown dataset type, validating against generic schema");
                (&schema::GENERIC, true)
            }
        };

        let mut issues = validate_data_structure(records, schema);
        if fallback {
            issues.push(ValidationIssue {
                kind: IssueKind::UnknownSchema,
                field: None,
                message: format!("unknown dataset type '{dataset_type}', generic schema applied"),
                severity: Severity::Warning,
                affected_records: 0,
            });
        }

        let quality = if records.is_empty() {
            issues.push(ValidationIssue {
                kind: IssueKind::EmptyDataset,
                field: None,
                message: "dataset has no records".to_string(),
                severity: Severity::Warning,
                affected_records: 0,
            });
            QualityScores::perfect()
        } else {
            validate_data_quality(records, schema)
        };

        let (warnings, errors): (Vec<_>, Vec<_>) = issues
            .into_iter()
            .partition(|issue| issue.severity == Severity::Warning);

        ValidationResult {
            dataset_type: dataset_type.to_string(),
            schema: schema.name.to_string(),
            record_count: records.len(),
            is_valid: self.thresholds.passes(&quality),
            quality,
            errors,
            warnings,
        }
    }
}

/// Validates with the default thresholds.
pub fn validate_dataset(records: &[Record], dataset_type: &str) -> ValidationResult {
    Validator::default().validate_dataset(records, dataset_type)
}

/// Structural issues, one per (kind, field, severity), each with the number of
/// records affected.
///
/// A required field missing from more than half the records is `critical`,
/// from any record `error`. Coercible type mismatches and out-of-range values
/// are warnings.
pub fn validate_data_structure(records: &[Record], schema: &Schema) -> Vec<ValidationIssue> {
    let total = records.len();
    let mut counts: BTreeMap<(IssueKind, &str, Severity), usize> = BTreeMap::new();

    for field in schema.required_fields {
        let missing = records.iter().filter(|r| r.present(field).is_none()).count();
        if missing > 0 {
            let severity = if missing * 2 > total {
                Severity::Critical
            } else {
                Severity::Error
            };
            counts.insert((IssueKind::MissingRequiredField, *field, severity), missing);
        }
    }

    for record in records {
        for range in schema.numeric_ranges {
            let Some(value) = record.present(range.field) else {
                continue;
            };
            match check_numeric(value) {
                NumericCheck::Exact(v) | NumericCheck::Coercible(v)
                    if v < range.min || v > range.max =>
                {
                    *counts
                        .entry((IssueKind::OutOfRange, range.field, Severity::Warning))
                        .or_default() += 1;
                }
                _ => {}
            }
            match check_numeric(value) {
                NumericCheck::Exact(_) => {}
                NumericCheck::Coercible(_) => {
                    *counts
                        .entry((IssueKind::TypeMismatch, range.field, Severity::Warning))
                        .or_default() += 1;
                }
                NumericCheck::Invalid => {
                    *counts
                        .entry((IssueKind::TypeMismatch, range.field, Severity::Error))
                        .or_default() += 1;
                }
            }
        }

        for field in schema.date_fields {
            let Some(value) = record.present(field) else {
                continue;
            };
            let severity = match check_date(value) {
                DateCheck::Exact => continue,
                DateCheck::Coercible => Severity::Warning,
                DateCheck::Invalid => Severity::Error,
            };
            *counts
                .entry((IssueKind::InvalidDate, *field, severity))
                .or_default() += 1;
        }

        for enum_field in schema.enum_fields {
            let Some(value) = record.present(enum_field.field) else {
                continue;
            };
            if !enum_allows(enum_field.allowed, value) {
                *counts
                    .entry((IssueKind::InvalidEnum, enum_field.field, Severity::Warning))
                    .or_default() += 1;
            }
        }
    }

    counts
        .into_iter()
        .map(|((kind, field, severity), affected)| ValidationIssue {
            kind,
            field: Some(field.to_string()),
            message: describe(kind, field, severity, affected, total, schema),
            severity,
            affected_records: affected,
        })
        .collect()
}

/// Fraction of (record, required field) pairs that are present and non-empty.
pub fn validate_data_completeness(records: &[Record], schema: &Schema) -> f64 {
    let pairs = records.len() * schema.required_fields.len();
    let present: usize = records
        .iter()
        .map(|record| {
            schema
                .required_fields
                .iter()
                .filter(|field| record.present(field).is_some())
                .count()
        })
        .sum();
    ratio(present, pairs)
}

/// Completeness, consistency (exact types and `YYYY-MM-DD` dates) and
/// accuracy (ranges and enums), weighted into an overall score.
pub fn validate_data_quality(records: &[Record], schema: &Schema) -> QualityScores {
    let completeness = validate_data_completeness(records, schema);
    let consistent = records.iter().filter(|r| is_consistent(r, schema)).count();
    let accurate = records.iter().filter(|r| is_accurate(r, schema)).count();

    QualityScores::new(
        completeness,
        ratio(consistent, records.len()),
        ratio(accurate, records.len()),
    )
}

fn is_consistent(record: &Record, schema: &Schema) -> bool {
    let numbers_ok = schema.numeric_ranges.iter().all(|range| {
        record
            .present(range.field)
            .is_none_or(|v| matches!(check_numeric(v), NumericCheck::Exact(_)))
    });
    let dates_ok = schema.date_fields.iter().all(|field| {
        record
            .present(field)
            .is_none_or(|v| matches!(check_date(v), DateCheck::Exact))
    });
    numbers_ok && dates_ok
}

fn is_accurate(record: &Record, schema: &Schema) -> bool {
    let in_range = schema.numeric_ranges.iter().all(|range| {
        match record.present(range.field).map(check_numeric) {
            Some(NumericCheck::Exact(v)) | Some(NumericCheck::Coercible(v)) => {
                v >= range.min && v <= range.max
            }
            _ => true,
        }
    });
    let enums_ok = schema.enum_fields.iter().all(|e| {
        record
            .present(e.field)
            .is_none_or(|v| enum_allows(e.allowed, v))
    });
    in_range && enums_ok
}

enum NumericCheck {
    Exact(f64),
    Coercible(f64),
    Invalid,
}

fn check_numeric(value: &Value) -> NumericCheck {
    match value {
        Value::Number(n) => n.as_f64().map_or(NumericCheck::Invalid, NumericCheck::Exact),
        Value::String(s) => s
            .trim()
            .replace(',', "")
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map_or(NumericCheck::Invalid, NumericCheck::Coercible),
        _ => NumericCheck::Invalid,
    }
}

enum DateCheck {
    Exact,
    Coercible,
    Invalid,
}

fn check_date(value: &Value) -> DateCheck {
    if value.as_str().and_then(parse_iso_date).is_some() {
        DateCheck::Exact
    } else if normalize_value(value).is_some() {
        DateCheck::Coercible
    } else {
        DateCheck::Invalid
    }
}

fn enum_allows(allowed: &[&str], value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|s| allowed.iter().any(|a| a.eq_ignore_ascii_case(s.trim())))
}

fn describe(
    kind: IssueKind,
    field: &str,
    severity: Severity,
    affected: usize,
    total: usize,
    schema: &Schema,
) -> String {
    match (kind, severity) {
        (IssueKind::MissingRequiredField, _) => {
            format!("required field '{field}' missing in {affected} of {total} records")
        }
        (IssueKind::TypeMismatch, Severity::Warning) => {
            format!("'{field}' holds numeric strings in {affected} records")
        }
        (IssueKind::TypeMismatch, _) => format!("'{field}' is not numeric in {affected} records"),
        (IssueKind::InvalidDate, Severity::Warning) => {
            format!("'{field}' is not YYYY-MM-DD in {affected} records")
        }
        (IssueKind::InvalidDate, _) => {
            format!("'{field}' holds unparseable dates in {affected} records")
        }
        (IssueKind::OutOfRange, _) => match schema.range_for(field) {
            Some(r) => format!(
                "'{field}' outside [{}, {}] in {affected} records",
                r.min, r.max
            ),
            None => format!("'{field}' out of range in {affected} records"),
        },
        (IssueKind::InvalidEnum, _) => {
            format!("'{field}' has unexpected values in {affected} records")
        }
        (kind, _) => format!("{} on '{field}' in {affected} records", kind.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn casualty(date: &str, killed: Value, injured: Value) -> Record {
        let mut r = Record::new("test");
        r.set("date", date);
        r.set("killed", killed);
        r.set("injured", injured);
        r
    }

    fn clean_dataset() -> Vec<Record> {
        (1..=10)
            .map(|d| casualty(&format!("2024-01-{d:02}"), json!(d), json!(d * 2)))
            .collect()
    }

    #[test]
    fn test_clean_dataset_scores_perfect() {
        let result = validate_dataset(&clean_dataset(), "casualties");
        assert_eq!(result.quality.overall, 1.0);
        assert_eq!(result.quality.completeness, 1.0);
        assert!(result.is_valid);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
        assert_eq!(result.record_count, 10);
    }

    #[test]
    fn test_missing_required_field_everywhere_fails() {
        let records: Vec<Record> = clean_dataset()
            .into_iter()
            .map(|r| {
                let mut fields = r.fields().clone();
                fields.remove("killed");
                Record::from(fields)
            })
            .collect();

        let result = validate_dataset(&records, "casualties");
        assert!(!result.is_valid);
        assert!(result.quality.completeness < 0.95);

        let issue = &result.errors[0];
        assert_eq!(issue.kind, IssueKind::MissingRequiredField);
        assert_eq!(issue.field.as_deref(), Some("killed"));
        assert_eq!(issue.severity, Severity::Critical);
        assert_eq!(issue.affected_records, 10);
    }

    #[test]
    fn test_all_required_fields_missing_scores_zero_completeness() {
        let records = vec![Record::new("test"), Record::new("test")];
        let result = validate_dataset(&records, "casualties");
        assert_eq!(result.quality.completeness, 0.0);
        assert!(!result.is_valid);
    }

    #[test]
    fn test_missing_on_minority_is_error_not_critical() {
        let mut records = clean_dataset();
        records[0] = casualty("2024-01-01", Value::Null, json!(1));

        let result = validate_dataset(&records, "casualties");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].severity, Severity::Error);
        assert_eq!(result.quality.completeness, round(29.0 / 30.0));
    }

    #[test]
    fn test_out_of_range_and_coercible_are_warnings() {
        let mut records = clean_dataset();
        records[0] = casualty("2024-01-01", json!(250_000), json!(1));
        records[1] = casualty("2024-01-02", json!("12"), json!(1));

        let result = validate_dataset(&records, "casualties");
        assert!(result.errors.is_empty());
        let kinds: Vec<IssueKind> = result.warnings.iter().map(|w| w.kind).collect();
        assert!(kinds.contains(&IssueKind::OutOfRange));
        assert!(kinds.contains(&IssueKind::TypeMismatch));
        assert_eq!(result.quality.accuracy, 0.9);
        assert_eq!(result.quality.consistency, 0.9);
    }

    #[test]
    fn test_unparseable_numeric_is_error() {
        let mut records = clean_dataset();
        records[0] = casualty("2024-01-01", json!("lots"), json!(1));
        let result = validate_dataset(&records, "casualties");
        assert_eq!(result.errors[0].kind, IssueKind::TypeMismatch);
        assert_eq!(result.errors[0].severity, Severity::Error);
    }

    #[test]
    fn test_enum_check() {
        let mut ok = Record::new("test");
        ok.set("date", "2024-01-01");
        ok.set("event_type", "battles");
        ok.set("location", "Gaza");
        let mut bad = ok.clone();
        bad.set("event_type", "Picnic");

        let result = validate_dataset(&[ok, bad], "conflict");
        assert_eq!(result.quality.accuracy, 0.5);
        assert_eq!(result.warnings[0].kind, IssueKind::InvalidEnum);
    }

    #[test]
    fn test_unknown_type_uses_generic_schema() {
        let result = validate_dataset(&clean_dataset(), "weather");
        assert_eq!(result.schema, "generic");
        assert!(result.is_valid);
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.kind == IssueKind::UnknownSchema)
        );
    }

    #[test]
    fn test_empty_dataset_is_vacuously_valid() {
        let result = validate_dataset(&[], "worldbank");
        assert!(result.is_valid);
        assert_eq!(result.quality.overall, 1.0);
        assert_eq!(result.warnings[0].kind, IssueKind::EmptyDataset);
    }

    #[test]
    fn test_non_iso_date_hurts_consistency() {
        let mut records = clean_dataset();
        records[0].set("date", "01/01/2024");
        let result = validate_dataset(&records, "casualties");
        assert_eq!(result.quality.consistency, 0.9);
        assert_eq!(result.warnings[0].kind, IssueKind::InvalidDate);
    }

    #[test]
    fn test_custom_thresholds() {
        let lenient = Validator::new(ValidationThresholds {
            min_overall: 0.0,
            min_completeness: 0.0,
            min_consistency: 0.0,
            min_accuracy: 0.0,
        });
        let records = vec![Record::new("test")];
        assert!(lenient.validate_dataset(&records, "casualties").is_valid);
    }

    fn round(v: f64) -> f64 {
        score::round4(v)
    }
}
