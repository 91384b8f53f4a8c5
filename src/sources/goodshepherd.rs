//! Good Shepherd Collective fetcher. One endpoint per category, published
//! under `goodshepherd/{category}/{endpoint}/`.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{Instrument, info, info_span, warn};

use super::persist::{SaveOptions, SourceMetadata, entry_for, save_dataset};
use super::{
    AtStage, DatasetEntry, GOODSHEPHERD, ItemError, ItemOutcome, ItemProgress, Stage,
    record_outcome, slug,
};
use crate::fetch::{HttpClient, RetryPolicy, fetch_bytes};
use crate::logging::RunLogger;
use crate::parser::parse_payload;
use crate::partition::{DatasetLabel, PartitionPolicy};
use crate::transform::goodshepherd::GoodShepherdCategory;
use crate::validate::Validator;

pub const METADATA_FILE: &str = "metadata.json";

/// Upstream endpoint name for a category.
pub fn endpoint(category: GoodShepherdCategory) -> &'static str {
    match category {
        GoodShepherdCategory::Healthcare => "healthcare_attacks",
        GoodShepherdCategory::Demolitions => "home_demolitions",
        GoodShepherdCategory::Prisoners => "child_prisoners",
        GoodShepherdCategory::Ngo => "ngo_data",
    }
}

pub struct GoodShepherdFetcher<'a> {
    pub http: &'a dyn HttpClient,
    pub base_url: String,
    pub policy: RetryPolicy,
    pub partition: PartitionPolicy,
    pub validator: Validator,
    /// `{data_dir}/goodshepherd`
    pub output_dir: PathBuf,
}

impl GoodShepherdFetcher<'_> {
    pub fn url_for(&self, category: GoodShepherdCategory) -> String {
        format!("{}/{}.json", self.base_url.trim_end_matches('/'), endpoint(category))
    }

    /// Collects `categories` in order and writes `metadata.json`.
    pub async fn run(
        &self,
        categories: &[GoodShepherdCategory],
        log: &RunLogger,
        now: DateTime<Utc>,
    ) -> Result<SourceMetadata> {
        info!(categories = categories.len(), "Starting Good Shepherd collection");
        let mut meta = SourceMetadata::new(GOODSHEPHERD, now);

        for &category in categories {
            let id = slug(endpoint(category));
            let item_log = log.child(category);
            let span = info_span!("goodshepherd_category", %category);
            let mut progress = ItemProgress::new(&id);

            let result = self
                .process(category, &id, &item_log, &mut progress, now)
                .instrument(span)
                .await;
            let state = record_outcome(&mut meta, &item_log, &id, category.as_str(), result)?;
            progress.finish(state);
        }

        meta.write(&self.output_dir.join(METADATA_FILE))?;
        Ok(meta)
    }

    async fn process(
        &self,
        category: GoodShepherdCategory,
        id: &str,
        log: &RunLogger,
        progress: &mut ItemProgress<'_>,
        now: DateTime<Utc>,
    ) -> Result<ItemOutcome, ItemError> {
        progress.enter(Stage::Fetching);
        let url = self.url_for(category);
        let bytes = fetch_bytes(self.http, &url, &self.policy)
            .await
            .at(Stage::Fetching)?;

        progress.enter(Stage::Transforming);
        let payload = parse_payload(&bytes).at(Stage::Transforming)?;
        let transformed = category.transform(&payload).at(Stage::Transforming)?;
        if !transformed.warnings.is_empty() {
            warn!(count = transformed.warnings.len(), first = %transformed.warnings[0], "Transform warnings");
        }
        if transformed.records.is_empty() {
            return Ok(ItemOutcome::NoData);
        }

        progress.enter(Stage::Validating);
        let validation = self
            .validator
            .validate_dataset(&transformed.records, category.schema());
        if !validation.is_valid {
            log.warn(&format!(
                "{category} failed {} validation (overall {:.2}), saving anyway",
                category.schema(),
                validation.quality.overall
            ));
        }

        progress.enter(Stage::Partitioning);
        let label = DatasetLabel {
            dataset_id: id.to_string(),
            source: GOODSHEPHERD.to_string(),
            category: category.to_string(),
        };
        let dir = self.output_dir.join(category.as_str()).join(id);
        let saved = save_dataset(
            &transformed.records,
            &validation,
            &dir,
            &label,
            &SaveOptions {
                date_field: "date",
                time_series: category.is_time_series(),
                policy: &self.partition,
                now,
            },
        )?;

        let entry = DatasetEntry {
            upstream_url: Some(url),
            transform_warnings: transformed.warnings.len() + saved.warnings.len(),
            ..entry_for(&label, format!("{category}/{id}"), &saved, &validation, now)
        };
        Ok(ItemOutcome::Saved(Box::new(entry)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::MockClient;
    use crate::partition::RECENT_FILE;
    use chrono::TimeZone;
    use tempfile::tempdir;

    const BASE: &str = "https://gs.test/api";

    fn fetcher<'a>(http: &'a MockClient, dir: &std::path::Path) -> GoodShepherdFetcher<'a> {
        GoodShepherdFetcher {
            http,
            base_url: format!("{BASE}/"),
            policy: RetryPolicy {
                max_retries: 1,
                initial_delay_ms: 1,
                backoff_multiplier: 1.0,
                max_delay_ms: 1,
            },
            partition: PartitionPolicy::default(),
            validator: Validator::default(),
            output_dir: dir.join("goodshepherd"),
        }
    }

    #[test]
    fn test_url_for() {
        let http = MockClient::new();
        let dir = tempdir().unwrap();
        assert_eq!(
            fetcher(&http, dir.path()).url_for(GoodShepherdCategory::Demolitions),
            "https://gs.test/api/home_demolitions.json"
        );
    }

    #[tokio::test]
    async fn test_categories_are_isolated_and_series_get_recent() {
        let http = MockClient::new()
            .route(
                &format!("{BASE}/healthcare_attacks.json"),
                200,
                r#"{"data": [
                    {"date": "2024-09-20", "location": "Gaza City", "type": "airstrike", "killed": 2},
                    {"date": "09/01/2024", "location": "Rafah", "type": "raid"}
                ]}"#,
            )
            .route(&format!("{BASE}/home_demolitions.json"), 404, "")
            .route(
                &format!("{BASE}/ngo_data.json"),
                200,
                r#"[{"organization": "PCRF", "type": "medical"}]"#,
            );
        let dir = tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 9, 30, 0, 0, 0).unwrap();

        let meta = fetcher(&http, dir.path())
            .run(
                &[
                    GoodShepherdCategory::Healthcare,
                    GoodShepherdCategory::Demolitions,
                    GoodShepherdCategory::Ngo,
                ],
                &RunLogger::new(GOODSHEPHERD),
                now,
            )
            .await
            .unwrap();

        assert_eq!(meta.datasets.len(), 2);
        assert_eq!(meta.errors.len(), 1);
        assert_eq!(meta.errors[0].category, "demolitions");
        assert_eq!(http.calls_to(&format!("{BASE}/home_demolitions.json")), 1);

        let healthcare = dir.path().join("goodshepherd/healthcare/healthcare-attacks");
        assert!(healthcare.join("data.json").exists());
        assert!(healthcare.join(RECENT_FILE).exists());
        assert!(!dir.path().join("goodshepherd/ngo/ngo-data").join(RECENT_FILE).exists());
        assert!(dir.path().join("goodshepherd/metadata.json").exists());
        assert_eq!(meta.datasets[0].record_count, 2);
        assert_eq!(meta.datasets[0].recent_records, Some(2));
    }
}
