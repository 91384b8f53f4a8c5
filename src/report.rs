//! Global validation report built from every `validation.json` on disk.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::sources::persist::{VALIDATION_FILE, ValidationDocument};
use crate::storage::{StorageError, read_json, write_json_atomic};
use crate::validate::{IssueKind, QualityScores, grade, mean};

pub const REPORT_FILE: &str = "validation-report.json";

/// A dataset is flagged when any of these trip.
const MIN_QUALITY: f64 = 0.85;
/// Records affected by error-level issues, summed over every issue.
const MAX_ERROR_RECORDS: usize = 10;
const MIN_COMPLETENESS: f64 = 0.95;

/// How many common errors the report lists.
const TOP_ERRORS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetQuality {
    pub dataset_id: String,
    pub source: String,
    pub category: String,
    /// Directory relative to the data directory.
    pub path: String,
    pub record_count: usize,
    pub is_valid: bool,
    pub quality: QualityScores,
    pub grade: String,
    /// Distinct error issues, one per (kind, field).
    pub error_count: usize,
    pub error_records: usize,
    pub warning_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonError {
    pub kind: IssueKind,
    pub field: Option<String>,
    /// Datasets reporting this error.
    pub occurrences: usize,
    pub affected_records: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub dataset_id: String,
    pub source: String,
    pub path: String,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AverageScores {
    pub overall: f64,
    pub completeness: f64,
    pub consistency: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceQuality {
    pub datasets: usize,
    pub passed: usize,
    pub average_overall: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_datasets: usize,
    pub passed: usize,
    pub failed: usize,
    /// Percentage, 0–100.
    pub pass_rate: f64,
    pub average_scores: AverageScores,
    pub average_grade: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalValidationReport {
    pub generated_at: DateTime<Utc>,
    pub summary: ReportSummary,
    pub by_source: BTreeMap<String, SourceQuality>,
    pub common_errors: Vec<CommonError>,
    pub quality_issues: Vec<QualityIssue>,
    pub datasets: Vec<DatasetQuality>,
}

/// Finds every `validation.json` under `data_dir`. Unreadable files are
/// logged and skipped.
pub fn collect_validations(data_dir: &Path) -> Vec<(String, ValidationDocument)> {
    WalkDir::new(data_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && e.file_name() == VALIDATION_FILE)
        .filter_map(|e| {
            let dir = e.path().parent()?;
            let rel = dir
                .strip_prefix(data_dir)
                .unwrap_or(dir)
                .to_string_lossy()
                .replace('\\', "/");
            match read_json::<ValidationDocument>(e.path()) {
                Ok(doc) => Some((rel, doc)),
                Err(err) => {
                    warn!(path = %e.path().display(), error = %err, "Skipping unreadable validation file");
                    None
                }
            }
        })
        .collect()
}

/// Aggregates validation results into a report.
pub fn build_report(
    validations: &[(String, ValidationDocument)],
    now: DateTime<Utc>,
) -> GlobalValidationReport {
    let mut datasets = Vec::with_capacity(validations.len());
    let mut by_source: BTreeMap<String, (SourceQuality, Vec<f64>)> = BTreeMap::new();
    let mut errors: BTreeMap<(IssueKind, Option<String>), (usize, usize)> = BTreeMap::new();
    let mut quality_issues = Vec::new();

    for (path, doc) in validations {
        let result = &doc.result;
        let label = &doc.label;

        for issue in &result.errors {
            let entry = errors
                .entry((issue.kind, issue.field.clone()))
                .or_insert((0, 0));
            entry.0 += 1;
            entry.1 += issue.affected_records;
        }

        let error_records: usize = result.errors.iter().map(|e| e.affected_records).sum();
        let reasons = flag_reasons(&result.quality, error_records, result.is_valid);
        if !reasons.is_empty() {
            quality_issues.push(QualityIssue {
                dataset_id: label.dataset_id.clone(),
                source: label.source.clone(),
                path: path.clone(),
                reasons,
            });
        }

        let (source_quality, scores) = by_source.entry(label.source.clone()).or_default();
        source_quality.datasets += 1;
        source_quality.passed += usize::from(result.is_valid);
        scores.push(result.quality.overall);

        datasets.push(DatasetQuality {
            dataset_id: label.dataset_id.clone(),
            source: label.source.clone(),
            category: label.category.clone(),
            path: path.clone(),
            record_count: result.record_count,
            is_valid: result.is_valid,
            quality: result.quality,
            grade: result.quality.grade().to_string(),
            error_count: result.errors.len(),
            error_records,
            warning_count: result.warnings.len(),
        });
    }

    let mut common_errors: Vec<CommonError> = errors
        .into_iter()
        .map(|((kind, field), (occurrences, affected_records))| CommonError {
            kind,
            field,
            occurrences,
            affected_records,
        })
        .collect();
    common_errors.sort_by(|a, b| {
        b.affected_records
            .cmp(&a.affected_records)
            .then(b.occurrences.cmp(&a.occurrences))
    });
    common_errors.truncate(TOP_ERRORS);

    let passed = datasets.iter().filter(|d| d.is_valid).count();
    let column = |f: fn(&QualityScores) -> f64| -> f64 {
        round2(mean(&datasets.iter().map(|d| f(&d.quality)).collect::<Vec<_>>()))
    };
    let average_scores = AverageScores {
        overall: column(|q| q.overall),
        completeness: column(|q| q.completeness),
        consistency: column(|q| q.consistency),
        accuracy: column(|q| q.accuracy),
    };

    let summary = ReportSummary {
        total_datasets: datasets.len(),
        passed,
        failed: datasets.len() - passed,
        pass_rate: if datasets.is_empty() {
            0.0
        } else {
            round2(passed as f64 / datasets.len() as f64 * 100.0)
        },
        average_grade: grade(average_scores.overall).to_string(),
        average_scores,
    };

    GlobalValidationReport {
        generated_at: now,
        summary,
        by_source: by_source
            .into_iter()
            .map(|(source, (mut quality, scores))| {
                quality.average_overall = round2(mean(&scores));
                (source, quality)
            })
            .collect(),
        common_errors,
        quality_issues,
        datasets,
    }
}

fn flag_reasons(quality: &QualityScores, error_records: usize, is_valid: bool) -> Vec<String> {
    let mut reasons = Vec::new();
    if quality.overall < MIN_QUALITY {
        reasons.push(format!("quality score {:.2} below {MIN_QUALITY}", quality.overall));
    }
    if error_records > MAX_ERROR_RECORDS {
        reasons.push(format!(
            "{error_records} records with errors (more than {MAX_ERROR_RECORDS})"
        ));
    }
    if quality.completeness < MIN_COMPLETENESS {
        reasons.push(format!(
            "completeness {:.2} below {MIN_COMPLETENESS}",
            quality.completeness
        ));
    }
    if !is_valid {
        reasons.push("failed validation".to_string());
    }
    reasons
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Collects, aggregates and writes `validation-report.json`.
pub fn generate_validation_report(
    data_dir: &Path,
    now: DateTime<Utc>,
) -> Result<GlobalValidationReport, StorageError> {
    let validations = collect_validations(data_dir);
    let report = build_report(&validations, now);
    write_json_atomic(&data_dir.join(REPORT_FILE), &report)?;
    info!(
        datasets = report.summary.total_datasets,
        passed = report.summary.passed,
        pass_rate = report.summary.pass_rate,
        quality_issues = report.quality_issues.len(),
        "Validation report written"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::DatasetLabel;
    use crate::validate::{Severity, ValidationIssue, ValidationResult};

    fn doc(source: &str, id: &str, quality: QualityScores, errors: Vec<ValidationIssue>) -> ValidationDocument {
        ValidationDocument {
            label: DatasetLabel {
                dataset_id: id.into(),
                source: source.into(),
                category: "casualties".into(),
            },
            validated_at: Utc::now(),
            result: ValidationResult {
                dataset_type: "casualties".into(),
                schema: "casualties".into(),
                record_count: 100,
                is_valid: crate::validate::ValidationThresholds::default().passes(&quality),
                quality,
                errors,
                warnings: Vec::new(),
            },
        }
    }

    fn missing(field: &str, affected: usize) -> ValidationIssue {
        ValidationIssue {
            kind: IssueKind::MissingRequiredField,
            field: Some(field.into()),
            message: format!("{field} missing"),
            severity: Severity::Error,
            affected_records: affected,
        }
    }

    #[test]
    fn test_report_aggregates() {
        let validations = vec![
            ("a/x".to_string(), doc("goodshepherd", "x", QualityScores::perfect(), vec![])),
            (
                "a/y".to_string(),
                doc(
                    "goodshepherd",
                    "y",
                    QualityScores::new(0.5, 1.0, 1.0),
                    vec![missing("killed", 50), missing("injured", 5)],
                ),
            ),
            (
                "b/z".to_string(),
                doc("hdx", "z", QualityScores::new(0.9, 1.0, 1.0), vec![missing("injured", 10)]),
            ),
        ];

        let report = build_report(&validations, Utc::now());

        assert_eq!(report.summary.total_datasets, 3);
        assert_eq!(report.summary.passed, 1);
        assert_eq!(report.summary.pass_rate, 33.33);
        assert_eq!(report.common_errors[0].field.as_deref(), Some("killed"));
        assert_eq!(report.common_errors[1].field.as_deref(), Some("injured"));
        assert_eq!(report.common_errors[1].affected_records, 15);
        assert_eq!(report.common_errors[1].occurrences, 2);

        let flagged: Vec<_> = report.quality_issues.iter().map(|q| q.dataset_id.as_str()).collect();
        assert_eq!(flagged, vec!["y", "z"]);
        assert_eq!(report.by_source["goodshepherd"].datasets, 2);
        assert_eq!(report.datasets[0].grade, "A+");
        assert_eq!(report.datasets[1].grade, "B");
        assert_eq!(report.datasets[1].error_count, 2);
        assert_eq!(report.datasets[1].error_records, 55);
    }

    #[test]
    fn test_single_issue_on_many_records_is_flagged() {
        let validations = vec![(
            "a/x".to_string(),
            doc(
                "hdx",
                "x",
                QualityScores::new(0.96, 1.0, 1.0),
                vec![missing("injured", 12)],
            ),
        )];

        let report = build_report(&validations, Utc::now());

        assert_eq!(report.quality_issues.len(), 1);
        assert_eq!(
            report.quality_issues[0].reasons,
            vec!["12 records with errors (more than 10)".to_string()]
        );
    }

    #[test]
    fn test_empty_report() {
        let report = build_report(&[], Utc::now());
        assert_eq!(report.summary.total_datasets, 0);
        assert_eq!(report.summary.pass_rate, 0.0);
        assert!(report.common_errors.is_empty());
    }

    #[test]
    fn test_flag_reasons() {
        assert!(flag_reasons(&QualityScores::perfect(), 0, true).is_empty());
        assert_eq!(flag_reasons(&QualityScores::perfect(), 11, true).len(), 1);
        assert_eq!(flag_reasons(&QualityScores::new(0.94, 1.0, 1.0), 0, false).len(), 2);
    }
}
