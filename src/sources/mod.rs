//! Source fetchers: fetch, transform, validate and partition each configured
//! item in order, isolating failures to the item that caused them.
//!
//! Each item moves `pending → fetching → transforming → validating →
//! partitioning → saved`. An error at any stage marks only that item failed
//! and the fetcher moves on. A [`StorageError`] is the exception: it aborts
//! the fetcher, since later writes would fail the same way.

pub mod goodshepherd;
pub mod hdx;
pub mod persist;
pub mod worldbank;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::storage::StorageError;

pub use persist::{DatasetEntry, ItemFailure, SourceMetadata};

pub const HDX: &str = "hdx";
pub const GOODSHEPHERD: &str = "goodshepherd";
pub const WORLDBANK: &str = "worldbank";
pub const TECH4PALESTINE: &str = "tech4palestine";

/// Source directories under the data directory, in run order.
/// Tech4Palestine is written by its own upstream job and only scanned.
pub const ALL_SOURCES: [&str; 4] = [HDX, GOODSHEPHERD, WORLDBANK, TECH4PALESTINE];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetching,
    Transforming,
    Validating,
    Partitioning,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Fetching => "fetching",
            Stage::Transforming => "transforming",
            Stage::Validating => "validating",
            Stage::Partitioning => "partitioning",
        })
    }
}

/// Lifecycle of one configured item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemState {
    Pending,
    Running(Stage),
    Saved,
    /// Answered, but with zero data points. Not an error.
    NoData,
    Failed { stage: Stage, error: String },
}

#[derive(Debug)]
pub enum ItemError {
    /// Recoverable: recorded against the item, siblings continue.
    Failed { stage: Stage, error: anyhow::Error },
    /// Aborts the fetcher.
    Storage(StorageError),
}

impl From<StorageError> for ItemError {
    fn from(e: StorageError) -> Self {
        ItemError::Storage(e)
    }
}

/// Tags a stage failure onto a result.
pub(crate) trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, ItemError>;
}

impl<T, E> AtStage<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn at(self, stage: Stage) -> Result<T, ItemError> {
        self.map_err(|e| ItemError::Failed {
            stage,
            error: e.into(),
        })
    }
}

/// Tracks the state of one item and logs each transition.
#[derive(Debug)]
pub(crate) struct ItemProgress<'a> {
    id: &'a str,
    state: ItemState,
}

impl<'a> ItemProgress<'a> {
    pub(crate) fn new(id: &'a str) -> Self {
        Self {
            id,
            state: ItemState::Pending,
        }
    }

    pub(crate) fn enter(&mut self, stage: Stage) {
        debug!(item = self.id, %stage, "Stage started");
        self.state = ItemState::Running(stage);
    }

    pub(crate) fn finish(&mut self, state: ItemState) {
        debug!(item = self.id, state = ?state, "Item finished");
        self.state = state;
    }

    pub(crate) fn state(&self) -> &ItemState {
        &self.state
    }
}

/// Outcome of a processed item, before it is folded into [`SourceMetadata`].
#[derive(Debug)]
pub(crate) enum ItemOutcome {
    Saved(Box<DatasetEntry>),
    NoData,
}

/// Folds one item's result into `meta`. Returns the storage error that must
/// abort the fetcher, if any.
pub(crate) fn record_outcome(
    meta: &mut SourceMetadata,
    log: &crate::logging::RunLogger,
    id: &str,
    category: &str,
    result: Result<ItemOutcome, ItemError>,
) -> Result<ItemState, StorageError> {
    match result {
        Ok(ItemOutcome::Saved(entry)) => {
            log.success(&format!(
                "Saved {id}: {} records, grade {}",
                entry.record_count, entry.quality_grade
            ));
            meta.push_dataset(*entry);
            Ok(ItemState::Saved)
        }
        Ok(ItemOutcome::NoData) => {
            log.warn(&format!("No data for {id}"));
            meta.push_no_data(id);
            Ok(ItemState::NoData)
        }
        Err(ItemError::Failed { stage, error }) => {
            log.error(&format!("{id} failed while {stage}"), Some(&format!("{error:#}")));
            meta.push_failure(ItemFailure {
                id: id.to_string(),
                category: category.to_string(),
                stage,
                error: format!("{error:#}"),
            });
            Ok(ItemState::Failed {
                stage,
                error: format!("{error:#}"),
            })
        }
        Err(ItemError::Storage(e)) => {
            log.error(&format!("Storage failure while saving {id}, aborting"), Some(&e));
            Err(e)
        }
    }
}

/// Directory-safe form of an upstream id, e.g. `NY.GDP.MKTP.CD` → `ny-gdp-mktp-cd`.
pub fn slug(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for c in id.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::RunLogger;
    use chrono::Utc;

    #[test]
    fn test_slug() {
        assert_eq!(slug("NY.GDP.MKTP.CD"), "ny-gdp-mktp-cd");
        assert_eq!(slug("gaza--conflict events"), "gaza-conflict-events");
        assert_eq!(slug("  x  "), "x");
    }

    #[test]
    fn test_at_stage_tags_errors() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::other("nope"));
        match result.at(Stage::Transforming) {
            Err(ItemError::Failed { stage, error }) => {
                assert_eq!(stage, Stage::Transforming);
                assert_eq!(error.to_string(), "nope");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_failed_item_is_recorded_and_not_fatal() {
        let mut meta = SourceMetadata::new(HDX, Utc::now());
        let log = RunLogger::new(HDX);

        let state = record_outcome(
            &mut meta,
            &log,
            "ds-2",
            "conflict",
            Err(ItemError::Failed {
                stage: Stage::Fetching,
                error: anyhow::anyhow!("HTTP 500"),
            }),
        )
        .unwrap();

        assert!(matches!(state, ItemState::Failed { stage: Stage::Fetching, .. }));
        assert_eq!(meta.errors[0].id, "ds-2");
        assert_eq!(log.counts().failure, 1);
    }

    #[test]
    fn test_storage_error_aborts() {
        let mut meta = SourceMetadata::new(HDX, Utc::now());
        let log = RunLogger::new(HDX);
        let err = StorageError::Io {
            path: "x".into(),
            source: std::io::Error::other("disk full"),
        };

        assert!(record_outcome(&mut meta, &log, "ds", "conflict", Err(err.into())).is_err());
    }

    #[test]
    fn test_progress_tracks_state() {
        let mut progress = ItemProgress::new("ds-1");
        assert_eq!(progress.state(), &ItemState::Pending);
        progress.enter(Stage::Validating);
        assert_eq!(progress.state(), &ItemState::Running(Stage::Validating));
        progress.finish(ItemState::Saved);
        assert_eq!(progress.state(), &ItemState::Saved);
    }
}
