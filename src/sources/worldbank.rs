//! World Bank fetcher. Indicator requests are fetched as one bounded batch,
//! then processed one at a time in declared order.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::{info, info_span};

use super::persist::{SaveOptions, SourceMetadata, entry_for, save_dataset};
use super::{
    AtStage, DatasetEntry, ItemError, ItemOutcome, ItemProgress, Stage, WORLDBANK,
    record_outcome, slug,
};
use crate::fetch::{FetchError, FetchedBody, HttpClient, RetryPolicy, batch_fetch_with_retry};
use crate::logging::RunLogger;
use crate::partition::{DatasetLabel, PartitionPolicy};
use crate::transform::worldbank::{IndicatorResponse, parse_indicator_response, transform_indicator};
use crate::validate::Validator;

pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indicator {
    pub code: &'static str,
    pub name: &'static str,
    pub category: &'static str,
}

const fn indicator(code: &'static str, name: &'static str, category: &'static str) -> Indicator {
    Indicator {
        code,
        name,
        category,
    }
}

pub const INDICATORS: &[Indicator] = &[
    indicator("NY.GDP.MKTP.CD", "GDP (current US$)", "economic"),
    indicator("NY.GDP.PCAP.CD", "GDP per capita (current US$)", "economic"),
    indicator("NY.GDP.MKTP.KD.ZG", "GDP growth (annual %)", "economic"),
    indicator("FP.CPI.TOTL.ZG", "Inflation, consumer prices (annual %)", "economic"),
    indicator("SL.UEM.TOTL.ZS", "Unemployment, total (% of labor force)", "economic"),
    indicator("NE.TRD.GNFS.ZS", "Trade (% of GDP)", "economic"),
    indicator("SP.POP.TOTL", "Population, total", "social"),
    indicator("SP.DYN.LE00.IN", "Life expectancy at birth", "social"),
    indicator("SE.PRM.ENRR", "School enrollment, primary (% gross)", "social"),
    indicator("SI.POV.NAHC", "Poverty headcount ratio at national poverty lines", "social"),
    indicator("SH.H2O.BASW.ZS", "People using at least basic drinking water services (%)", "infrastructure"),
    indicator("EG.ELC.ACCS.ZS", "Access to electricity (% of population)", "infrastructure"),
    indicator("IT.NET.USER.ZS", "Individuals using the Internet (% of population)", "infrastructure"),
];

pub struct WorldBankFetcher<'a> {
    pub http: &'a dyn HttpClient,
    pub base_url: String,
    /// ISO3 country code, e.g. `PSE`.
    pub country: String,
    pub policy: RetryPolicy,
    pub concurrency: usize,
    pub partition: PartitionPolicy,
    pub validator: Validator,
    /// `{data_dir}/worldbank`
    pub output_dir: PathBuf,
}

impl WorldBankFetcher<'_> {
    pub fn url_for(&self, code: &str) -> String {
        format!(
            "{}/country/{}/indicator/{}?format=json&per_page=1000",
            self.base_url.trim_end_matches('/'),
            self.country,
            code
        )
    }

    /// Fetches every indicator, records per-indicator failures and "no data"
    /// results, and writes `metadata.json`.
    pub async fn run(
        &self,
        indicators: &[Indicator],
        log: &RunLogger,
        now: DateTime<Utc>,
    ) -> Result<SourceMetadata> {
        info!(
            indicators = indicators.len(),
            country = %self.country,
            concurrency = self.concurrency,
            "Starting World Bank collection"
        );
        let mut meta = SourceMetadata::new(WORLDBANK, now);

        let urls: Vec<String> = indicators.iter().map(|i| self.url_for(i.code)).collect();
        let responses =
            batch_fetch_with_retry(self.http, &urls, self.concurrency, &self.policy).await;

        for (indicator, (_, fetched)) in indicators.iter().zip(responses) {
            let item_log = log.child(indicator.code);
            let _span = info_span!("worldbank_indicator", code = indicator.code).entered();
            let mut progress = ItemProgress::new(indicator.code);

            let result = self.process(indicator, fetched, &mut progress, now);
            let state = record_outcome(&mut meta, &item_log, indicator.code, indicator.category, result)?;
            progress.finish(state);
        }

        meta.write(&self.output_dir.join(METADATA_FILE))?;
        Ok(meta)
    }

    fn process(
        &self,
        indicator: &Indicator,
        fetched: Result<FetchedBody, FetchError>,
        progress: &mut ItemProgress<'_>,
        now: DateTime<Utc>,
    ) -> Result<ItemOutcome, ItemError> {
        progress.enter(Stage::Fetching);
        let body = fetched.at(Stage::Fetching)?;

        progress.enter(Stage::Transforming);
        let observations = match parse_indicator_response(&body.body).at(Stage::Transforming)? {
            IndicatorResponse::Data { observations, .. } => observations,
            IndicatorResponse::ApiError(message) => {
                return Err(anyhow!("World Bank API error: {message}")).at(Stage::Fetching);
            }
        };
        let transformed = transform_indicator(&observations);
        if transformed.records.is_empty() {
            return Ok(ItemOutcome::NoData);
        }

        progress.enter(Stage::Validating);
        let validation = self
            .validator
            .validate_dataset(&transformed.records, "worldbank");

        progress.enter(Stage::Partitioning);
        let id = slug(indicator.code);
        let label = DatasetLabel {
            dataset_id: indicator.code.to_string(),
            source: WORLDBANK.to_string(),
            category: indicator.category.to_string(),
        };
        let dir = self.output_dir.join(indicator.category).join(&id);
        let saved = save_dataset(
            &transformed.records,
            &validation,
            &dir,
            &label,
            &SaveOptions {
                date_field: "date",
                time_series: false,
                policy: &self.partition,
                now,
            },
        )?;

        let entry = DatasetEntry {
            title: Some(indicator.name.to_string()),
            upstream_url: Some(body.url),
            transform_warnings: transformed.warnings.len() + saved.warnings.len(),
            ..entry_for(
                &label,
                format!("{}/{id}", indicator.category),
                &saved,
                &validation,
                now,
            )
        };
        Ok(ItemOutcome::Saved(Box::new(entry)))
    }
}
