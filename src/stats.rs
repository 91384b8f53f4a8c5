//! On-disk dataset statistics: format-aware record counting and source
//! directory scans.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::parser::parse_payload;
use crate::partition::{INDEX_FILE, RECENT_FILE, SINGLE_FILE, is_partition_file};
use crate::sources::persist::VALIDATION_FILE;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Files that describe data rather than hold it. Never counted as datasets.
const DESCRIPTOR_FILES: &[&str] = &[
    "metadata.json",
    "catalog.json",
    MANIFEST_FILE,
    INDEX_FILE,
    RECENT_FILE,
    VALIDATION_FILE,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetStats {
    /// Path relative to the source directory, without `.json` for loose files.
    pub id: String,
    pub record_count: u64,
    pub size_bytes: u64,
    pub file_count: usize,
    pub partitioned: bool,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceStats {
    pub source: String,
    pub exists: bool,
    pub dataset_count: usize,
    pub total_records: u64,
    /// Every file under the source except generated manifests.
    pub total_size_bytes: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub datasets: Vec<DatasetStats>,
}

/// Counts the records in one file, whatever its shape. Unreadable or
/// unrecognized content counts as 0 and is logged.
pub fn count_records(path: &Path) -> u64 {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read file for record count");
            return 0;
        }
    };
    match parse_payload(&bytes) {
        Ok(payload) => {
            debug!(path = %path.display(), kind = payload.kind(), "Counted records");
            payload.record_count()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unrecognized data shape, counting 0 records");
            0
        }
    }
}

struct FileInfo {
    path: PathBuf,
    name: String,
    size: u64,
    modified: Option<DateTime<Utc>>,
}

/// Scans `{data_dir}/{source}`.
///
/// A directory holding `data.json`, `index.json` or `validation.json` is one
/// dataset; its records are `data.json` or the sum of its quarter files.
/// Any other data file (for example a flat `casualties.json`) is a dataset
/// on its own. `recent.json` is derived and not counted.
pub fn scan_source(data_dir: &Path, source: &str) -> SourceStats {
    let root = data_dir.join(source);
    let mut stats = SourceStats {
        source: source.to_string(),
        exists: root.is_dir(),
        ..SourceStats::default()
    };
    if !stats.exists {
        debug!(source, "Source directory missing");
        return stats;
    }

    let mut by_dir: BTreeMap<PathBuf, Vec<FileInfo>> = BTreeMap::new();
    for entry in WalkDir::new(&root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(source, error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name == MANIFEST_FILE || name.ends_with(".tmp") {
            continue;
        }
        let meta = entry.metadata().ok();
        let info = FileInfo {
            path: entry.path().to_path_buf(),
            name,
            size: meta.as_ref().map(|m| m.len()).unwrap_or(0),
            modified: meta
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from),
        };
        stats.total_size_bytes += info.size;
        stats.last_updated = stats.last_updated.max(info.modified);
        let parent = entry.path().parent().unwrap_or(&root).to_path_buf();
        by_dir.entry(parent).or_default().push(info);
    }

    for (dir, files) in by_dir {
        let is_dataset_dir = files
            .iter()
            .any(|f| f.name == SINGLE_FILE || f.name == INDEX_FILE || f.name == VALIDATION_FILE);

        if is_dataset_dir {
            stats.datasets.push(dataset_dir_stats(&root, &dir, &files));
        } else {
            for file in files.iter().filter(|f| is_loose_data_file(&f.name)) {
                stats.datasets.push(DatasetStats {
                    id: relative(&root, &file.path)
                        .trim_end_matches(".json")
                        .to_string(),
                    record_count: count_records(&file.path),
                    size_bytes: file.size,
                    file_count: 1,
                    partitioned: false,
                    last_modified: file.modified,
                });
            }
        }
    }

    stats.dataset_count = stats.datasets.len();
    stats.total_records = stats.datasets.iter().map(|d| d.record_count).sum();
    stats
}

fn dataset_dir_stats(root: &Path, dir: &Path, files: &[FileInfo]) -> DatasetStats {
    let partitioned = files.iter().any(|f| f.name == INDEX_FILE);
    let record_count = files
        .iter()
        .filter(|f| {
            if partitioned {
                is_partition_file(&f.name) && f.name != INDEX_FILE && f.name != SINGLE_FILE
            } else {
                f.name == SINGLE_FILE
            }
        })
        .map(|f| count_records(&f.path))
        .sum();

    DatasetStats {
        id: relative(root, dir),
        record_count,
        size_bytes: files.iter().map(|f| f.size).sum(),
        file_count: files.len(),
        partitioned,
        last_modified: files.iter().filter_map(|f| f.modified).max(),
    }
}

fn is_loose_data_file(name: &str) -> bool {
    (name.ends_with(".json") || name.ends_with(".csv")) && !DESCRIPTOR_FILES.contains(&name)
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
