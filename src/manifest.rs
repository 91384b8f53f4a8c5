//! Per-source and global manifests, regenerated from a directory scan.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::stats::{DatasetStats, MANIFEST_FILE, SourceStats, scan_source};
use crate::storage::{StorageError, write_json_atomic};

pub const MANIFEST_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceManifest {
    pub source: String,
    pub generated_at: DateTime<Utc>,
    pub last_updated: Option<DateTime<Utc>>,
    pub dataset_count: usize,
    pub record_count: u64,
    pub size_bytes: u64,
    pub datasets: Vec<DatasetStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ManifestSummary {
    pub total_sources: usize,
    pub total_datasets: usize,
    pub total_records: u64,
    pub total_size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOverview {
    pub dataset_count: usize,
    pub record_count: u64,
    pub size_bytes: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub manifest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalManifest {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub summary: ManifestSummary,
    pub sources: BTreeMap<String, SourceOverview>,
}

impl SourceManifest {
    fn from_stats(stats: SourceStats, generated_at: DateTime<Utc>) -> Self {
        Self {
            source: stats.source,
            generated_at,
            last_updated: stats.last_updated,
            dataset_count: stats.dataset_count,
            record_count: stats.total_records,
            size_bytes: stats.total_size_bytes,
            datasets: stats.datasets,
        }
    }
}

/// Scans each source directory and writes `{source}/manifest.json` plus the
/// global `manifest.json`. Sources without a directory are skipped. Reads
/// never modify dataset files.
pub fn generate_all_manifests(
    data_dir: &Path,
    sources: &[&str],
    now: DateTime<Utc>,
) -> Result<GlobalManifest, StorageError> {
    let mut summary = ManifestSummary::default();
    let mut overviews = BTreeMap::new();

    for &source in sources {
        let stats = scan_source(data_dir, source);
        if !stats.exists {
            info!(source, "No data directory, skipping");
            continue;
        }

        let manifest = SourceManifest::from_stats(stats, now);
        write_json_atomic(&data_dir.join(source).join(MANIFEST_FILE), &manifest)?;
        info!(
            source,
            datasets = manifest.dataset_count,
            records = manifest.record_count,
            size_bytes = manifest.size_bytes,
            "Source manifest written"
        );

        summary.total_sources += 1;
        summary.total_datasets += manifest.dataset_count;
        summary.total_records += manifest.record_count;
        summary.total_size_bytes += manifest.size_bytes;
        overviews.insert(
            source.to_string(),
            SourceOverview {
                dataset_count: manifest.dataset_count,
                record_count: manifest.record_count,
                size_bytes: manifest.size_bytes,
                last_updated: manifest.last_updated,
                manifest: format!("{source}/{MANIFEST_FILE}"),
            },
        );
    }

    let global = GlobalManifest {
        version: MANIFEST_VERSION.to_string(),
        generated_at: now,
        summary,
        sources: overviews,
    };
    write_json_atomic(&data_dir.join(MANIFEST_FILE), &global)?;
    info!(
        sources = global.summary.total_sources,
        datasets = global.summary.total_datasets,
        records = global.summary.total_records,
        "Global manifest written"
    );
    Ok(global)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::read_json;
    use std::fs;
    use tempfile::tempdir;

    fn seed(dir: &Path) {
        let write = |rel: &str, content: &str| {
            let path = dir.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        };
        write("goodshepherd/healthcare/attacks/data.json", r#"{"data": [{}, {}]}"#);
        write("goodshepherd/metadata.json", r#"{"datasets": []}"#);
        write("tech4palestine/killed-in-gaza.json", "[{}, {}, {}]");
    }

    #[test]
    fn test_manifest_summaries() {
        let dir = tempdir().unwrap();
        seed(dir.path());

        let manifest = generate_all_manifests(
            dir.path(),
            &["hdx", "goodshepherd", "worldbank", "tech4palestine"],
            Utc::now(),
        )
        .unwrap();

        assert_eq!(manifest.summary.total_sources, 2);
        assert_eq!(manifest.summary.total_datasets, 2);
        assert_eq!(manifest.summary.total_records, 5);
        assert!(!manifest.sources.contains_key("hdx"));

        let per_source: SourceManifest =
            read_json(&dir.path().join("goodshepherd/manifest.json")).unwrap();
        assert_eq!(per_source.record_count, 2);
        let global: GlobalManifest = read_json(&dir.path().join("manifest.json")).unwrap();
        assert_eq!(global.summary, manifest.summary);
    }

    #[test]
    fn test_regeneration_is_idempotent() {
        let dir = tempdir().unwrap();
        seed(dir.path());
        let sources = ["goodshepherd", "tech4palestine"];

        let first = generate_all_manifests(dir.path(), &sources, Utc::now()).unwrap();
        let second = generate_all_manifests(dir.path(), &sources, Utc::now()).unwrap();

        assert_eq!(first.summary, second.summary);
        assert_eq!(
            first.sources["goodshepherd"].size_bytes,
            second.sources["goodshepherd"].size_bytes
        );
    }
}
