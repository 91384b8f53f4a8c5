//! Writing a validated dataset and the per-source catalog file.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::partition::{DateRange, DatasetLabel, PartitionPolicy, partition_and_save};
use crate::record::Record;
use crate::storage::{StorageError, write_json_atomic};
use crate::validate::ValidationResult;

use super::Stage;

pub const VALIDATION_FILE: &str = "validation.json";

/// `validation.json`: the dataset's [`ValidationResult`] plus its identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationDocument {
    #[serde(flatten)]
    pub label: DatasetLabel,
    pub validated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub result: ValidationResult,
}

/// Catalog entry for one saved dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub category: String,
    /// Directory relative to the source directory.
    pub path: String,
    /// Records published on disk; undated records of a partitioned dataset
    /// are counted in `excluded_records` instead.
    pub record_count: usize,
    #[serde(default)]
    pub excluded_records: usize,
    pub date_range: Option<DateRange>,
    pub partitioned: bool,
    pub partition_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_records: Option<usize>,
    pub is_valid: bool,
    pub quality_score: f64,
    pub quality_grade: String,
    pub transform_warnings: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_url: Option<String>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub id: String,
    pub category: String,
    pub stage: Stage,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceSummary {
    pub total_datasets: usize,
    pub total_records: usize,
    pub failed: usize,
    pub no_data: usize,
}

/// `metadata.json` (or `catalog.json` for HDX): what one fetcher produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub source: String,
    pub generated_at: DateTime<Utc>,
    pub summary: SourceSummary,
    pub datasets: Vec<DatasetEntry>,
    pub errors: Vec<ItemFailure>,
    /// Items that answered successfully but had no data points.
    pub no_data: Vec<String>,
}

impl SourceMetadata {
    pub fn new(source: &str, generated_at: DateTime<Utc>) -> Self {
        Self {
            source: source.to_string(),
            generated_at,
            summary: SourceSummary::default(),
            datasets: Vec::new(),
            errors: Vec::new(),
            no_data: Vec::new(),
        }
    }

    pub fn push_dataset(&mut self, entry: DatasetEntry) {
        self.summary.total_datasets += 1;
        self.summary.total_records += entry.record_count;
        self.datasets.push(entry);
    }

    pub fn push_failure(&mut self, failure: ItemFailure) {
        self.summary.failed += 1;
        self.errors.push(failure);
    }

    pub fn push_no_data(&mut self, id: impl Into<String>) {
        self.summary.no_data += 1;
        self.no_data.push(id.into());
    }

    pub fn write(&self, path: &Path) -> Result<u64, StorageError> {
        write_json_atomic(path, self)
    }
}

/// How one dataset is laid out on disk.
#[derive(Debug, Clone)]
pub struct SaveOptions<'a> {
    pub date_field: &'a str,
    /// Dated series also get `recent.json` when they are not partitioned.
    pub time_series: bool,
    pub policy: &'a PartitionPolicy,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavedDataset {
    pub record_count: usize,
    pub excluded_records: usize,
    pub date_range: Option<DateRange>,
    pub partitioned: bool,
    pub partition_count: usize,
    pub recent_records: Option<usize>,
    pub warnings: Vec<String>,
}

/// Partitions `records` into `dir` and writes `validation.json` beside them.
pub fn save_dataset(
    records: &[Record],
    validation: &ValidationResult,
    dir: &Path,
    label: &DatasetLabel,
    opts: &SaveOptions<'_>,
) -> Result<SavedDataset, StorageError> {
    let outcome = partition_and_save(
        records,
        dir,
        opts.date_field,
        label,
        opts.policy,
        opts.now,
        opts.time_series,
    )?;

    write_json_atomic(
        &dir.join(VALIDATION_FILE),
        &ValidationDocument {
            label: label.clone(),
            validated_at: opts.now,
            result: validation.clone(),
        },
    )?;

    Ok(SavedDataset {
        record_count: outcome.record_count(),
        excluded_records: outcome.excluded_records,
        date_range: outcome.date_range(),
        partitioned: outcome.is_partitioned(),
        partition_count: outcome.partition_count(),
        recent_records: outcome.recent_records,
        warnings: outcome.warnings,
    })
}

/// Builds the catalog entry for a dataset that reached the disk. Callers
/// fill in `title`, `upstream_url` and `transform_warnings` when they have them.
pub fn entry_for(
    label: &DatasetLabel,
    relative_path: String,
    saved: &SavedDataset,
    validation: &ValidationResult,
    now: DateTime<Utc>,
) -> DatasetEntry {
    DatasetEntry {
        id: label.dataset_id.clone(),
        title: None,
        category: label.category.clone(),
        path: relative_path,
        record_count: saved.record_count,
        excluded_records: saved.excluded_records,
        date_range: saved.date_range.clone(),
        partitioned: saved.partitioned,
        partition_count: saved.partition_count,
        recent_records: saved.recent_records,
        is_valid: validation.is_valid,
        quality_score: validation.quality.overall,
        quality_grade: validation.quality.grade().to_string(),
        transform_warnings: 0,
        upstream_url: None,
        last_updated: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::RECENT_FILE;
    use crate::storage::read_json;
    use crate::validate::Validator;
    use chrono::{NaiveDate, TimeZone};
    use tempfile::tempdir;

    fn records() -> Vec<Record> {
        ["2024-09-01", "2024-01-15"]
            .iter()
            .map(|d| {
                let mut r = Record::new("test");
                r.set_date("date", NaiveDate::parse_from_str(d, "%Y-%m-%d").unwrap());
                r.set("location", "Gaza");
                r.set("type", "airstrike");
                r
            })
            .collect()
    }

    fn label() -> DatasetLabel {
        DatasetLabel {
            dataset_id: "healthcare-attacks".into(),
            source: "goodshepherd".into(),
            category: "healthcare".into(),
        }
    }

    #[test]
    fn test_save_dataset_writes_validation_and_recent() {
        let dir = tempdir().unwrap();
        let records = records();
        let validation = Validator::default().validate_dataset(&records, "healthcare");
        let opts = SaveOptions {
            date_field: "date",
            time_series: true,
            policy: &PartitionPolicy::default(),
            now: Utc.with_ymd_and_hms(2024, 9, 30, 0, 0, 0).unwrap(),
        };

        let saved = save_dataset(&records, &validation, dir.path(), &label(), &opts).unwrap();

        assert!(!saved.partitioned);
        assert_eq!(saved.recent_records, Some(1));
        assert_eq!(
            saved.date_range,
            Some(DateRange {
                start: "2024-01-15".into(),
                end: "2024-09-01".into()
            })
        );
        assert!(dir.path().join(RECENT_FILE).exists());

        let doc: ValidationDocument = read_json(&dir.path().join(VALIDATION_FILE)).unwrap();
        assert_eq!(doc.label.dataset_id, "healthcare-attacks");
        assert_eq!(doc.result.record_count, 2);
        assert!(doc.result.is_valid);
    }

    #[test]
    fn test_non_series_gets_no_recent_file() {
        let dir = tempdir().unwrap();
        let records = records();
        let validation = Validator::default().validate_dataset(&records, "generic");
        let opts = SaveOptions {
            date_field: "date",
            time_series: false,
            policy: &PartitionPolicy::default(),
            now: Utc::now(),
        };

        let saved = save_dataset(&records, &validation, dir.path(), &label(), &opts).unwrap();
        assert_eq!(saved.recent_records, None);
        assert!(!dir.path().join(RECENT_FILE).exists());
    }

    fn dated(count: usize) -> Vec<Record> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..count)
            .map(|i| {
                let mut r = Record::new("test");
                r.set_date("date", start + chrono::Duration::days(i as i64 * 7));
                r.set("location", "Gaza");
                r.set("type", "airstrike");
                r
            })
            .collect()
    }

    #[test]
    fn test_catalog_count_matches_manifest_when_undated_rows_are_dropped() {
        let data_dir = tempdir().unwrap();
        let dir = data_dir.path().join("goodshepherd/healthcare/healthcare-attacks");
        let mut records = dated(20);
        records.extend((0..5).map(|_| Record::new("test")));
        let validation = Validator::default().validate_dataset(&records, "healthcare");
        let policy = PartitionPolicy {
            threshold: 10,
            recent_days: 90,
        };
        let opts = SaveOptions {
            date_field: "date",
            time_series: false,
            policy: &policy,
            now: Utc.with_ymd_and_hms(2024, 9, 30, 0, 0, 0).unwrap(),
        };

        let saved = save_dataset(&records, &validation, &dir, &label(), &opts).unwrap();
        let entry = entry_for(&label(), "healthcare/healthcare-attacks".into(), &saved, &validation, opts.now);

        assert!(saved.partitioned);
        assert_eq!(entry.record_count, 20);
        assert_eq!(entry.excluded_records, 5);
        let stats = crate::stats::scan_source(data_dir.path(), "goodshepherd");
        assert_eq!(stats.total_records, entry.record_count as u64);
    }

    #[test]
    fn test_shrinking_non_series_drops_old_recent_file() {
        let dir = tempdir().unwrap();
        let policy = PartitionPolicy {
            threshold: 10,
            recent_days: 90,
        };
        let opts = SaveOptions {
            date_field: "date",
            time_series: false,
            policy: &policy,
            now: Utc.with_ymd_and_hms(2024, 9, 30, 0, 0, 0).unwrap(),
        };

        let large = dated(20);
        let validation = Validator::default().validate_dataset(&large, "generic");
        save_dataset(&large, &validation, dir.path(), &label(), &opts).unwrap();
        assert!(dir.path().join(RECENT_FILE).exists());

        let small = dated(3);
        let validation = Validator::default().validate_dataset(&small, "generic");
        let saved = save_dataset(&small, &validation, dir.path(), &label(), &opts).unwrap();

        assert_eq!(saved.recent_records, None);
        assert!(!dir.path().join(RECENT_FILE).exists());
    }

    #[test]
    fn test_source_metadata_counters() {
        let mut meta = SourceMetadata::new("worldbank", Utc::now());
        meta.push_no_data("SP.POP.TOTL");
        meta.push_failure(ItemFailure {
            id: "NY.GDP.MKTP.CD".into(),
            category: "economic".into(),
            stage: Stage::Fetching,
            error: "boom".into(),
        });
        assert_eq!(meta.summary.failed, 1);
        assert_eq!(meta.summary.no_data, 1);
        assert_eq!(meta.summary.total_datasets, 0);
    }
}
