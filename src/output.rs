//! Output formatting and persistence for run results.
//!
//! Supports JSON logging of any result and CSV append for the run history.

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

/// Logs a result as pretty-printed JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Appends `row` to a CSV file, writing the header only when the file is new.
pub fn append_record<T: Serialize>(path: &Path, row: &T) -> Result<()> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "Appending CSV record");

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);

    writer.serialize(row)?;
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[derive(Serialize)]
    struct Row {
        timestamp: &'static str,
        records: u64,
    }

    const ROW: Row = Row {
        timestamp: "2024-09-30T00:00:00Z",
        records: 12,
    };

    #[test]
    fn test_print_json_does_not_panic() {
        print_json(&ROW).unwrap();
    }

    #[test]
    fn test_append_record_creates_file_and_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/history.csv");

        append_record(&path, &ROW).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("timestamp,records"));
    }

    #[test]
    fn test_append_record_writes_header_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.csv");

        append_record(&path, &ROW).unwrap();
        append_record(&path, &ROW).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let header_count = content.lines().filter(|l| l.contains("timestamp")).count();
        assert_eq!(header_count, 1);
        // 1 header + 2 data rows
        assert_eq!(content.lines().count(), 3);
    }
}
