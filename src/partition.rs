//! Quarter partitioning, the rolling recent window and the partition index.
//!
//! Layout of one dataset directory:
//!
//! ```text
//! {dataset}/data.json          single file (dataset at or under the threshold)
//! {dataset}/2024-Q3.json ...   one file per quarter (over the threshold)
//! {dataset}/index.json         partition listing, only when partitioned
//! {dataset}/recent.json        last N days, derived, always regenerated
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dates::{format_date, is_quarter_key, quarter_key};
use crate::record::Record;
use crate::storage::{StorageError, remove_file, write_json_atomic};

pub const SINGLE_FILE: &str = "data.json";
pub const INDEX_FILE: &str = "index.json";
pub const RECENT_FILE: &str = "recent.json";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartitionPolicy {
    /// Datasets with more records than this are split by quarter.
    pub threshold: usize,
    pub recent_days: i64,
}

impl Default for PartitionPolicy {
    fn default() -> Self {
        Self {
            threshold: 1000,
            recent_days: 90,
        }
    }
}

/// Identity stamped into every file's `metadata` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetLabel {
    pub dataset_id: String,
    pub source: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

impl DateRange {
    fn from_dates(dates: impl IntoIterator<Item = NaiveDate>) -> Option<Self> {
        let (min, max) = dates.into_iter().fold(None, |acc, d| match acc {
            None => Some((d, d)),
            Some((lo, hi)) => Some((d.min(lo), d.max(hi))),
        })?;
        Some(Self {
            start: format_date(min),
            end: format_date(max),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionEntry {
    pub file: String,
    pub quarter: String,
    pub record_count: usize,
    pub date_range: DateRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionIndex {
    pub dataset_id: String,
    pub date_field: String,
    /// Records that landed in a partition; equals the sum over `partitions`.
    pub total_records: usize,
    /// Records left out because their date was missing or unparseable.
    pub excluded_records: usize,
    pub date_range: Option<DateRange>,
    pub partitions: Vec<PartitionEntry>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(flatten)]
    pub label: DatasetLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarter: Option<String>,
    pub record_count: usize,
    pub date_range: Option<DateRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_days: Option<i64>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct DataFile<'a> {
    metadata: FileMetadata,
    data: Vec<&'a Record>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Layout {
    Single {
        file: String,
        record_count: usize,
        date_range: Option<DateRange>,
    },
    Partitioned(PartitionIndex),
}

#[derive(Debug)]
pub struct PartitionOutcome {
    pub layout: Layout,
    /// Present when the call also wrote `recent.json`.
    pub recent_records: Option<usize>,
    /// Undated records left out of a partitioned layout.
    pub excluded_records: usize,
    pub warnings: Vec<String>,
    pub bytes_written: u64,
}

impl PartitionOutcome {
    pub fn is_partitioned(&self) -> bool {
        matches!(self.layout, Layout::Partitioned(_))
    }

    pub fn partition_count(&self) -> usize {
        match &self.layout {
            Layout::Single { .. } => 0,
            Layout::Partitioned(index) => index.partitions.len(),
        }
    }

    /// Records actually published: the partition sum, or the whole single file.
    pub fn record_count(&self) -> usize {
        match &self.layout {
            Layout::Single { record_count, .. } => *record_count,
            Layout::Partitioned(index) => index.total_records,
        }
    }

    pub fn date_range(&self) -> Option<DateRange> {
        match &self.layout {
            Layout::Single { date_range, .. } => date_range.clone(),
            Layout::Partitioned(index) => index.date_range.clone(),
        }
    }
}

/// Groups records by the quarter of `date_field`. Returns the buckets (in
/// quarter order) and the positions of records that had no usable date.
pub fn partition_by_quarter<'a>(
    records: &'a [Record],
    date_field: &str,
) -> (BTreeMap<String, Vec<&'a Record>>, Vec<usize>) {
    let mut buckets: BTreeMap<String, Vec<&Record>> = BTreeMap::new();
    let mut excluded = Vec::new();

    for (pos, record) in records.iter().enumerate() {
        match record.date(date_field) {
            Some(date) => buckets.entry(quarter_key(date)).or_default().push(record),
            None => excluded.push(pos),
        }
    }

    (buckets, excluded)
}

/// Records whose `date_field` falls in `[today - days, today]`.
pub fn recent_window<'a>(
    records: &'a [Record],
    date_field: &str,
    today: NaiveDate,
    days: i64,
) -> Vec<&'a Record> {
    let start = today - Duration::days(days);
    records
        .iter()
        .filter(|r| r.date(date_field).is_some_and(|d| d >= start && d <= today))
        .collect()
}

/// Persists a dataset under `output_dir`.
///
/// Over `policy.threshold` records it writes one file per quarter, an
/// `index.json` and `recent.json`; otherwise a single `data.json`, plus
/// `recent.json` when `time_series` is set. Files left over from a previous
/// run, `recent.json` included, are removed after the new ones exist.
pub fn partition_and_save(
    records: &[Record],
    output_dir: &Path,
    date_field: &str,
    label: &DatasetLabel,
    policy: &PartitionPolicy,
    now: DateTime<Utc>,
    time_series: bool,
) -> Result<PartitionOutcome, StorageError> {
    let mut warnings = Vec::new();
    let mut bytes_written = 0;
    let mut keep: BTreeSet<String> = BTreeSet::new();

    let mut excluded_records = 0;

    let outcome_layout = if records.len() > policy.threshold {
        let (buckets, excluded) = partition_by_quarter(records, date_field);
        excluded_records = excluded.len();
        if !excluded.is_empty() {
            warn!(
                dataset_id = %label.dataset_id,
                excluded = excluded.len(),
                "Records without a usable date left out of partitions"
            );
            warnings.extend(excluded.iter().map(|pos| {
                format!("record {pos}: no usable '{date_field}', excluded from partitions")
            }));
        }

        let mut partitions = Vec::with_capacity(buckets.len());
        for (quarter, bucket) in buckets {
            let file = format!("{quarter}.json");
            let date_range = DateRange::from_dates(bucket.iter().filter_map(|r| r.date(date_field)));
            let metadata = FileMetadata {
                label: label.clone(),
                quarter: Some(quarter.clone()),
                record_count: bucket.len(),
                date_range: date_range.clone(),
                window_days: None,
                generated_at: now,
            };
            let record_count = bucket.len();
            bytes_written += write_json_atomic(
                &output_dir.join(&file),
                &DataFile {
                    metadata,
                    data: bucket,
                },
            )?;
            debug!(dataset_id = %label.dataset_id, quarter, record_count, "Wrote partition");

            if let Some(date_range) = date_range {
                partitions.push(PartitionEntry {
                    file: file.clone(),
                    quarter,
                    record_count,
                    date_range,
                });
            }
            keep.insert(file);
        }

        let index = PartitionIndex {
            dataset_id: label.dataset_id.clone(),
            date_field: date_field.to_string(),
            total_records: partitions.iter().map(|p| p.record_count).sum(),
            excluded_records: excluded.len(),
            date_range: DateRange::from_dates(records.iter().filter_map(|r| r.date(date_field))),
            partitions,
            generated_at: now,
        };
        bytes_written += write_json_atomic(&output_dir.join(INDEX_FILE), &index)?;
        keep.insert(INDEX_FILE.to_string());

        Layout::Partitioned(index)
    } else {
        let date_range = DateRange::from_dates(records.iter().filter_map(|r| r.date(date_field)));
        let metadata = FileMetadata {
            label: label.clone(),
            quarter: None,
            record_count: records.len(),
            date_range: date_range.clone(),
            window_days: None,
            generated_at: now,
        };
        bytes_written += write_json_atomic(
            &output_dir.join(SINGLE_FILE),
            &DataFile {
                metadata,
                data: records.iter().collect(),
            },
        )?;
        keep.insert(SINGLE_FILE.to_string());

        Layout::Single {
            file: SINGLE_FILE.to_string(),
            record_count: records.len(),
            date_range,
        }
    };

    let recent_records = if time_series || matches!(outcome_layout, Layout::Partitioned(_)) {
        let (count, bytes) = write_recent(records, output_dir, date_field, label, policy, now)?;
        bytes_written += bytes;
        keep.insert(RECENT_FILE.to_string());
        Some(count)
    } else {
        None
    };

    remove_stale_partitions(output_dir, &keep)?;

    Ok(PartitionOutcome {
        layout: outcome_layout,
        recent_records,
        excluded_records,
        warnings,
        bytes_written,
    })
}

fn write_recent(
    records: &[Record],
    output_dir: &Path,
    date_field: &str,
    label: &DatasetLabel,
    policy: &PartitionPolicy,
    now: DateTime<Utc>,
) -> Result<(usize, u64), StorageError> {
    let recent = recent_window(records, date_field, now.date_naive(), policy.recent_days);
    let count = recent.len();
    let metadata = FileMetadata {
        label: label.clone(),
        quarter: None,
        record_count: count,
        date_range: DateRange::from_dates(recent.iter().filter_map(|r| r.date(date_field))),
        window_days: Some(policy.recent_days),
        generated_at: now,
    };
    let bytes = write_json_atomic(
        &output_dir.join(RECENT_FILE),
        &DataFile {
            metadata,
            data: recent,
        },
    )?;
    Ok((count, bytes))
}

/// True for files the partitioner owns: `data.json`, `index.json`, `YYYY-Qn.json`.
pub fn is_partition_file(name: &str) -> bool {
    match name.strip_suffix(".json") {
        Some(stem) => stem == "data" || stem == "index" || is_quarter_key(stem),
        None => false,
    }
}

fn remove_stale_partitions(output_dir: &Path, keep: &BTreeSet<String>) -> Result<(), StorageError> {
    let entries = match fs::read_dir(output_dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(()),
    };

    let stale: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            let owned = is_partition_file(&name) || name == RECENT_FILE;
            (owned && !keep.contains(&name)).then(|| entry.path())
        })
        .collect();

    for path in stale {
        debug!(path = %path.display(), "Removing stale partition file");
        remove_file(&path)?;
    }
    Ok(())
}
