//! CLI entry point for the humanitarian data pipeline.
//!
//! Each fetcher is its own subcommand so `run-all` can launch them as child
//! processes; `manifest` and `validation-report` rebuild the derived files.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use humdata_pipeline::config::PipelineConfig;
use humdata_pipeline::fetch::{HttpClient, build_client};
use humdata_pipeline::infra::hdx::HdxClient;
use humdata_pipeline::logging::{RunLogger, init_tracing};
use humdata_pipeline::manifest::generate_all_manifests;
use humdata_pipeline::orchestrator::Orchestrator;
use humdata_pipeline::output::print_json;
use humdata_pipeline::report::generate_validation_report;
use humdata_pipeline::services::catalog_api::CatalogApi;
use humdata_pipeline::sources::goodshepherd::GoodShepherdFetcher;
use humdata_pipeline::sources::hdx::{HdxFetcher, load_datasets};
use humdata_pipeline::sources::worldbank::{INDICATORS, WorldBankFetcher};
use humdata_pipeline::sources::{
    ALL_SOURCES, GOODSHEPHERD, HDX, SourceMetadata, WORLDBANK,
};
use humdata_pipeline::transform::goodshepherd::GoodShepherdCategory;
use humdata_pipeline::validate::Validator;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "humdata_pipeline")]
#[command(about = "Collects, validates and partitions humanitarian datasets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the configured HDX datasets
    Hdx,
    /// Fetch every Good Shepherd category
    Goodshepherd,
    /// Fetch the World Bank indicators for the configured country
    Worldbank,
    /// Regenerate per-source and global manifests
    Manifest,
    /// Regenerate the global validation report
    ValidationReport,
    /// Run every fetcher, then the manifests and the validation report
    RunAll,
    /// Look up the configured HDX datasets without downloading them
    ListDatasets,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok(); // Load .env file

    let config = PipelineConfig::from_env()?;
    let _log_guard = init_tracing(&config.log);

    let cli = Cli::parse();

    match cli.command {
        Commands::Hdx => {
            run_hdx(&config).await?;
        }
        Commands::Goodshepherd => {
            run_goodshepherd(&config).await?;
        }
        Commands::Worldbank => {
            run_worldbank(&config).await?;
        }
        Commands::Manifest => {
            let manifest = generate_all_manifests(config.data_dir(), &ALL_SOURCES, Utc::now())?;
            print_json(&manifest.summary)?;
        }
        Commands::ValidationReport => {
            let report = generate_validation_report(config.data_dir(), Utc::now())?;
            print_json(&report.summary)?;
        }
        Commands::RunAll => {
            let mut orchestrator = Orchestrator::new(config.data_dir());
            let steps = orchestrator.default_steps()?;
            let summary = orchestrator.run(&steps).await?;
            if !summary.is_success() {
                warn!(failed_steps = summary.failed_steps(), "Run finished with failed steps");
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::ListDatasets => {
            list_datasets(&config).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[tracing::instrument(skip_all, fields(source = HDX))]
async fn run_hdx(config: &PipelineConfig) -> Result<()> {
    let http: Arc<dyn HttpClient> =
        Arc::from(build_client(config.timeout, config.hdx.api_key.as_deref())?);
    let catalog = HdxClient::new(&config.hdx.base_url, http.clone(), config.retry);
    let datasets = load_datasets(config.hdx.datasets_file.as_deref())?;

    let fetcher = HdxFetcher {
        http: http.as_ref(),
        catalog: &catalog,
        policy: config.retry,
        partition: config.partition,
        validator: Validator::new(config.thresholds),
        output_dir: config.source_dir(HDX),
    };

    let log = RunLogger::new(HDX);
    let meta = fetcher.run(&datasets, &log, Utc::now()).await?;
    report_source(&meta, &log);
    Ok(())
}

#[tracing::instrument(skip_all, fields(source = GOODSHEPHERD))]
async fn run_goodshepherd(config: &PipelineConfig) -> Result<()> {
    let http = build_client(config.timeout, None)?;
    let fetcher = GoodShepherdFetcher {
        http: http.as_ref(),
        base_url: config.goodshepherd_base_url.clone(),
        policy: config.retry,
        partition: config.partition,
        validator: Validator::new(config.thresholds),
        output_dir: config.source_dir(GOODSHEPHERD),
    };

    let log = RunLogger::new(GOODSHEPHERD);
    let meta = fetcher
        .run(&GoodShepherdCategory::ALL, &log, Utc::now())
        .await?;
    report_source(&meta, &log);
    Ok(())
}

#[tracing::instrument(skip_all, fields(source = WORLDBANK))]
async fn run_worldbank(config: &PipelineConfig) -> Result<()> {
    let http = build_client(config.timeout, None)?;
    let fetcher = WorldBankFetcher {
        http: http.as_ref(),
        base_url: config.worldbank.base_url.clone(),
        country: config.worldbank.country.clone(),
        policy: config.retry,
        concurrency: config.concurrency,
        partition: config.partition,
        validator: Validator::new(config.thresholds),
        output_dir: config.source_dir(WORLDBANK),
    };

    let log = RunLogger::new(WORLDBANK);
    let meta = fetcher.run(INDICATORS, &log, Utc::now()).await?;
    report_source(&meta, &log);
    Ok(())
}

fn report_source(meta: &SourceMetadata, log: &RunLogger) {
    let counts = log.log_summary();
    info!(
        source = %meta.source,
        datasets = meta.summary.total_datasets,
        records = meta.summary.total_records,
        failed = meta.summary.failed,
        no_data = meta.summary.no_data,
        success_rate = counts.success_rate(),
        "Source collection finished"
    );
}

async fn list_datasets(config: &PipelineConfig) -> Result<()> {
    let http: Arc<dyn HttpClient> =
        Arc::from(build_client(config.timeout, config.hdx.api_key.as_deref())?);
    let catalog = HdxClient::new(&config.hdx.base_url, http, config.retry);
    let datasets = load_datasets(config.hdx.datasets_file.as_deref())?;

    info!(total = datasets.len(), "Dataset list loaded");

    let mut available = 0;
    for spec in &datasets {
        match catalog.dataset(&spec.id).await {
            Ok(info) => {
                let resource = info.preferred_resource();
                available += usize::from(resource.is_some());
                info!(
                    dataset_id = %spec.id,
                    category = %spec.category,
                    title = %info.title,
                    organization = info.organization.as_deref().unwrap_or("unknown"),
                    resource = resource.map(|r| r.name.as_str()).unwrap_or("none"),
                    format = resource.map(|r| r.format.as_str()).unwrap_or("-"),
                    "Dataset"
                );
            }
            Err(e) => {
                warn!(dataset_id = %spec.id, error = %e, "Catalog lookup failed");
            }
        }
    }

    info!(
        total = datasets.len(),
        available,
        "Dataset list summary"
    );
    Ok(())
}
