//! Runs the collection steps in order, then summarizes the run.
//!
//! A step failing is recorded and the next step still runs. The run ends
//! `completed` or `completed_with_errors`; callers exit non-zero on the latter.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, error, info, info_span};

use crate::manifest::generate_all_manifests;
use crate::output::append_record;
use crate::report::{GlobalValidationReport, REPORT_FILE, ReportSummary, generate_validation_report};
use crate::sources::{ALL_SOURCES, SourceMetadata, hdx::CATALOG_FILE};
use crate::stats::scan_source;
use crate::storage::{read_json, write_json_atomic};

pub const SUMMARY_FILE: &str = "data-collection-summary.json";
pub const HISTORY_FILE: &str = "data-collection-history.csv";

/// One unit of work in a run.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self) -> Result<()>;
}

/// Runs this binary again with a subcommand, so a crash in one fetcher
/// cannot take the run down with it.
pub struct ChildProcessStep {
    name: String,
    program: PathBuf,
    args: Vec<String>,
}

impl ChildProcessStep {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// The same executable with `subcommand`.
    pub fn subcommand(subcommand: &str) -> Result<Self> {
        let exe = std::env::current_exe().context("Cannot locate current executable")?;
        Ok(Self::new(subcommand, exe, &[subcommand]))
    }
}

#[async_trait]
impl Step for ChildProcessStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<()> {
        let status = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .status()
            .await
            .with_context(|| format!("Failed to start {}", self.program.display()))?;
        if status.success() {
            Ok(())
        } else {
            Err(anyhow!("exited with {status}"))
        }
    }
}

/// Regenerates all manifests in-process.
pub struct ManifestStep {
    pub data_dir: PathBuf,
}

#[async_trait]
impl Step for ManifestStep {
    fn name(&self) -> &str {
        "manifest"
    }

    async fn run(&self) -> Result<()> {
        generate_all_manifests(&self.data_dir, &ALL_SOURCES, Utc::now())?;
        Ok(())
    }
}

/// Regenerates `validation-report.json` in-process.
pub struct ValidationReportStep {
    pub data_dir: PathBuf,
}

#[async_trait]
impl Step for ValidationReportStep {
    fn name(&self) -> &str {
        "validation-report"
    }

    async fn run(&self) -> Result<()> {
        generate_validation_report(&self.data_dir, Utc::now())?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    Running(usize),
    Completed,
    CompletedWithErrors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataTotals {
    pub datasets: usize,
    pub records: u64,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub state: RunState,
    pub steps: Vec<StepResult>,
    pub totals: DataTotals,
    pub sources: BTreeMap<String, DataTotals>,
    /// Failed steps and failed items reported by the fetchers.
    pub errors: Vec<String>,
    /// Items with no data and datasets failing validation.
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ReportSummary>,
}

impl RunSummary {
    pub fn failed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed
    }
}

/// One row of `data-collection-history.csv`.
#[derive(Debug, Serialize)]
struct HistoryRow<'a> {
    timestamp: DateTime<Utc>,
    state: &'a str,
    steps: usize,
    failed_steps: usize,
    datasets: usize,
    records: u64,
    size_bytes: u64,
    pass_rate: Option<f64>,
    duration_secs: f64,
}

pub struct Orchestrator {
    data_dir: PathBuf,
    state: RunState,
}

impl Orchestrator {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            state: RunState::NotStarted,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// The standard run: each fetcher as a child process, then manifests and
    /// the validation report.
    pub fn default_steps(&self) -> Result<Vec<Box<dyn Step>>> {
        let steps: Vec<Box<dyn Step>> = vec![
            Box::new(ChildProcessStep::subcommand("hdx")?),
            Box::new(ChildProcessStep::subcommand("goodshepherd")?),
            Box::new(ChildProcessStep::subcommand("worldbank")?),
            Box::new(ManifestStep {
                data_dir: self.data_dir.clone(),
            }),
            Box::new(ValidationReportStep {
                data_dir: self.data_dir.clone(),
            }),
        ];
        Ok(steps)
    }

    /// Runs `steps` in order, writes the run summary and appends the history row.
    ///
    /// # Errors
    ///
    /// Only when the summary itself cannot be written. Step failures are
    /// reported in the returned summary.
    pub async fn run(&mut self, steps: &[Box<dyn Step>]) -> Result<RunSummary> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut results = Vec::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            self.state = RunState::Running(index);
            results.push(run_step(step.as_ref()).await);
        }

        let any_failed = results.iter().any(|r| r.status == StepStatus::Failed);
        self.state = if any_failed {
            RunState::CompletedWithErrors
        } else {
            RunState::Completed
        };

        let mut errors: Vec<String> = results
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| format!("step {}: {e}", r.name)))
            .collect();
        let mut warnings = Vec::new();

        let mut totals = DataTotals::default();
        let mut sources = BTreeMap::new();
        for source in ALL_SOURCES {
            let stats = scan_source(&self.data_dir, source);
            if !stats.exists {
                continue;
            }
            totals.datasets += stats.dataset_count;
            totals.records += stats.total_records;
            totals.size_bytes += stats.total_size_bytes;
            sources.insert(
                source.to_string(),
                DataTotals {
                    datasets: stats.dataset_count,
                    records: stats.total_records,
                    size_bytes: stats.total_size_bytes,
                },
            );

            if let Some((file, meta)) = read_source_metadata(&self.data_dir, source) {
                // Left over from an earlier run when this run's fetcher never wrote it.
                if meta.generated_at < started_at {
                    warnings.push(format!(
                        "{source}/{file} is from {}, item results not included",
                        meta.generated_at.to_rfc3339()
                    ));
                    continue;
                }
                errors.extend(
                    meta.errors
                        .iter()
                        .map(|f| format!("{source}/{}: {} failed: {}", f.id, f.stage, f.error)),
                );
                warnings.extend(meta.no_data.iter().map(|id| format!("{source}/{id}: no data")));
            }
        }

        let report_path = self.data_dir.join(REPORT_FILE);
        let validation = if report_path.exists() {
            match read_json::<GlobalValidationReport>(&report_path) {
                Ok(report) => {
                    warnings.extend(
                        report
                            .quality_issues
                            .iter()
                            .map(|q| format!("{}: {}", q.path, q.reasons.join(", "))),
                    );
                    Some(report.summary)
                }
                Err(e) => {
                    warnings.push(format!("unreadable {REPORT_FILE}: {e}"));
                    None
                }
            }
        } else {
            None
        };

        let summary = RunSummary {
            started_at,
            finished_at: Utc::now(),
            duration_secs: clock.elapsed().as_secs_f64(),
            state: self.state,
            steps: results,
            totals,
            sources,
            errors,
            warnings,
            validation,
        };

        write_json_atomic(&self.data_dir.join(SUMMARY_FILE), &summary)?;
        append_record(
            &self.data_dir.join(HISTORY_FILE),
            &HistoryRow {
                timestamp: summary.finished_at,
                state: if summary.is_success() {
                    "completed"
                } else {
                    "completed_with_errors"
                },
                steps: summary.steps.len(),
                failed_steps: summary.failed_steps(),
                datasets: summary.totals.datasets,
                records: summary.totals.records,
                size_bytes: summary.totals.size_bytes,
                pass_rate: summary.validation.as_ref().map(|v| v.pass_rate),
                duration_secs: summary.duration_secs,
            },
        )?;

        info!(
            state = ?summary.state,
            steps = summary.steps.len(),
            failed_steps = summary.failed_steps(),
            datasets = summary.totals.datasets,
            records = summary.totals.records,
            duration_secs = summary.duration_secs,
            "Data collection run finished"
        );
        Ok(summary)
    }
}

async fn run_step(step: &dyn Step) -> StepResult {
    let started_at = Utc::now();
    let clock = Instant::now();
    info!(step = step.name(), "Step started");

    let outcome = step
        .run()
        .instrument(info_span!("step", name = step.name()))
        .await;
    let duration_secs = clock.elapsed().as_secs_f64();

    let (status, error) = match outcome {
        Ok(()) => {
            info!(step = step.name(), duration_secs, "Step succeeded");
            (StepStatus::Success, None)
        }
        Err(e) => {
            let message = format!("{e:#}");
            error!(step = step.name(), duration_secs, error = %message, "Step failed");
            (StepStatus::Failed, Some(message))
        }
    };

    StepResult {
        name: step.name().to_string(),
        status,
        started_at,
        finished_at: Utc::now(),
        duration_secs,
        error,
    }
}

fn read_source_metadata(data_dir: &Path, source: &str) -> Option<(&'static str, SourceMetadata)> {
    let dir = data_dir.join(source);
    let name = [CATALOG_FILE, "metadata.json"]
        .into_iter()
        .find(|name| dir.join(name).exists())?;
    read_json(&dir.join(name)).ok().map(|meta| (name, meta))
}
