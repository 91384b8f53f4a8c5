//! HDX fetcher: resolve each configured dataset in the catalog, download its
//! preferred resource and publish it under `hdx/{category}/{dataset}/`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, info, info_span, warn};

use super::persist::{SaveOptions, SourceMetadata, entry_for, save_dataset};
use super::{AtStage, HDX, ItemError, ItemOutcome, ItemProgress, Stage, record_outcome, slug};
use crate::fetch::{HttpClient, RetryPolicy, fetch_bytes};
use crate::logging::RunLogger;
use crate::parser::parse_payload;
use crate::partition::{DatasetLabel, PartitionPolicy};
use crate::services::catalog_api::CatalogApi;
use crate::transform::hdx::HdxCategory;
use crate::validate::Validator;

pub const CATALOG_FILE: &str = "catalog.json";

/// One dataset to collect.
///
/// The override file (`HDX_DATASETS_FILE`) is a JSON list of these:
/// ```json
/// [
///   { "id": "acled-data-for-palestine", "category": "conflict" },
///   { "id": "opt-idp-sites", "category": "refugees", "title": "IDP sites" }
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HdxDatasetSpec {
    pub id: String,
    pub category: HdxCategory,
    #[serde(default)]
    pub title: Option<String>,
}

impl HdxDatasetSpec {
    fn new(id: &str, category: HdxCategory) -> Self {
        Self {
            id: id.to_string(),
            category,
            title: None,
        }
    }
}

/// Built-in list, one or more datasets per category, in priority order.
pub fn builtin_datasets() -> Vec<HdxDatasetSpec> {
    vec![
        HdxDatasetSpec::new("acled-data-for-palestine", HdxCategory::Conflict),
        HdxDatasetSpec::new("state-of-palestine-education-facilities", HdxCategory::Education),
        HdxDatasetSpec::new("state-of-palestine-water-sanitation-and-hygiene", HdxCategory::Water),
        HdxDatasetSpec::new("gaza-strip-damage-assessment", HdxCategory::Infrastructure),
        HdxDatasetSpec::new("state-of-palestine-displacement-data", HdxCategory::Refugees),
        HdxDatasetSpec::new("state-of-palestine-humanitarian-needs", HdxCategory::Humanitarian),
    ]
}

/// Loads the dataset list from `path`, or the built-in list without one.
pub fn load_datasets(path: Option<&Path>) -> Result<Vec<HdxDatasetSpec>> {
    let Some(path) = path else {
        return Ok(builtin_datasets());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read HDX dataset list {}", path.display()))?;
    let datasets: Vec<HdxDatasetSpec> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid HDX dataset list {}", path.display()))?;
    Ok(datasets)
}

pub struct HdxFetcher<'a> {
    pub http: &'a dyn HttpClient,
    pub catalog: &'a dyn CatalogApi,
    pub policy: RetryPolicy,
    pub partition: PartitionPolicy,
    pub validator: Validator,
    /// `{data_dir}/hdx`
    pub output_dir: PathBuf,
}

impl HdxFetcher<'_> {
    /// Processes every dataset in order and writes `catalog.json`.
    ///
    /// # Errors
    ///
    /// Only storage failures; everything else is recorded per dataset.
    pub async fn run(
        &self,
        datasets: &[HdxDatasetSpec],
        log: &RunLogger,
        now: DateTime<Utc>,
    ) -> Result<SourceMetadata> {
        info!(datasets = datasets.len(), "Starting HDX collection");
        let mut meta = SourceMetadata::new(HDX, now);

        for spec in datasets {
            let item_log = log.child(spec.category);
            let span = info_span!("hdx_dataset", dataset_id = %spec.id, category = %spec.category);
            let mut progress = ItemProgress::new(&spec.id);

            let result = self
                .process(spec, &item_log, &mut progress, now)
                .instrument(span)
                .await;
            let state = record_outcome(&mut meta, &item_log, &spec.id, spec.category.as_str(), result)?;
            progress.finish(state);
        }

        meta.write(&self.output_dir.join(CATALOG_FILE))?;
        Ok(meta)
    }

    async fn process(
        &self,
        spec: &HdxDatasetSpec,
        log: &RunLogger,
        progress: &mut ItemProgress<'_>,
        now: DateTime<Utc>,
    ) -> Result<ItemOutcome, ItemError> {
        progress.enter(Stage::Fetching);
        let info = self.catalog.dataset(&spec.id).await.at(Stage::Fetching)?;
        let resource = info
            .preferred_resource()
            .ok_or_else(|| anyhow!("dataset '{}' has no JSON or CSV resource", spec.id))
            .at(Stage::Fetching)?
            .clone();
        log.debug(&format!("Downloading {} ({})", resource.name, resource.url));
        let bytes = fetch_bytes(self.http, &resource.url, &self.policy)
            .await
            .at(Stage::Fetching)?;

        progress.enter(Stage::Transforming);
        let payload = parse_payload(&bytes).at(Stage::Transforming)?;
        let attribution = match &info.organization {
            Some(org) => format!("HDX / {org}"),
            None => "HDX".to_string(),
        };
        let transformed = spec
            .category
            .transform(&payload, &attribution)
            .at(Stage::Transforming)?;
        if !transformed.warnings.is_empty() {
            warn!(count = transformed.warnings.len(), first = %transformed.warnings[0], "Transform warnings");
        }
        if transformed.records.is_empty() {
            return Ok(ItemOutcome::NoData);
        }

        progress.enter(Stage::Validating);
        let validation = self
            .validator
            .validate_dataset(&transformed.records, spec.category.schema());
        if !validation.is_valid {
            log.warn(&format!(
                "{} failed validation (overall {:.2}), saving anyway",
                spec.id, validation.quality.overall
            ));
        }

        progress.enter(Stage::Partitioning);
        let dataset_dir = slug(&spec.id);
        let label = DatasetLabel {
            dataset_id: spec.id.clone(),
            source: HDX.to_string(),
            category: spec.category.to_string(),
        };
        let dir = self.output_dir.join(spec.category.as_str()).join(&dataset_dir);
        let saved = save_dataset(
            &transformed.records,
            &validation,
            &dir,
            &label,
            &SaveOptions {
                date_field: "date",
                time_series: true,
                policy: &self.partition,
                now,
            },
        )?;

        let entry = super::DatasetEntry {
            title: spec.title.clone().or(Some(info.title)),
            upstream_url: Some(resource.url),
            transform_warnings: transformed.warnings.len() + saved.warnings.len(),
            ..entry_for(
                &label,
                format!("{}/{}", spec.category, dataset_dir),
                &saved,
                &validation,
                now,
            )
        };
        Ok(ItemOutcome::Saved(Box::new(entry)))
    }
}
