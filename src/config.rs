//! Pipeline configuration read from environment variables.
//!
//! Every setting is optional; `main` loads `.env` first through `dotenvy`.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::fetch::RetryPolicy;
use crate::logging::LogSettings;
use crate::partition::PartitionPolicy;
use crate::validate::ValidationThresholds;

pub const DEFAULT_DATA_DIR: &str = "public/data";
pub const DEFAULT_HDX_BASE_URL: &str = "https://data.humdata.org/api/3/action";
pub const DEFAULT_GOODSHEPHERD_BASE_URL: &str = "https://goodshepherdcollective.org/api";
pub const DEFAULT_WORLDBANK_BASE_URL: &str = "https://api.worldbank.org/v2";

#[derive(Debug, Clone, PartialEq)]
pub struct HdxSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    /// JSON list replacing the built-in dataset list.
    pub datasets_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorldBankSettings {
    pub base_url: String,
    /// ISO3 country code the indicators are requested for.
    pub country: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub hdx: HdxSettings,
    pub goodshepherd_base_url: String,
    pub worldbank: WorldBankSettings,
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub concurrency: usize,
    pub partition: PartitionPolicy,
    pub thresholds: ValidationThresholds,
    pub log: LogSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            hdx: HdxSettings {
                base_url: DEFAULT_HDX_BASE_URL.to_string(),
                api_key: None,
                datasets_file: None,
            },
            goodshepherd_base_url: DEFAULT_GOODSHEPHERD_BASE_URL.to_string(),
            worldbank: WorldBankSettings {
                base_url: DEFAULT_WORLDBANK_BASE_URL.to_string(),
                country: "PSE".to_string(),
            },
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
            concurrency: 5,
            partition: PartitionPolicy::default(),
            thresholds: ValidationThresholds::default(),
            log: LogSettings::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Blank values
    /// count as unset; malformed numbers are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let retry = RetryPolicy {
            max_retries: parse_or(&get, "FETCH_MAX_RETRIES", defaults.retry.max_retries)?,
            initial_delay_ms: parse_or(&get, "FETCH_INITIAL_DELAY_MS", defaults.retry.initial_delay_ms)?,
            backoff_multiplier: parse_or(
                &get,
                "FETCH_BACKOFF_MULTIPLIER",
                defaults.retry.backoff_multiplier,
            )?,
            max_delay_ms: parse_or(&get, "FETCH_MAX_DELAY_MS", defaults.retry.max_delay_ms)?,
        };
        if retry.max_retries == 0 {
            bail!("FETCH_MAX_RETRIES must be at least 1");
        }

        let concurrency: usize = parse_or(&get, "FETCH_CONCURRENCY", defaults.concurrency)?;
        if concurrency == 0 {
            bail!("FETCH_CONCURRENCY must be at least 1");
        }

        Ok(Self {
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            hdx: HdxSettings {
                base_url: get("HDX_BASE_URL").unwrap_or(defaults.hdx.base_url),
                api_key: get("HDX_API_KEY"),
                datasets_file: get("HDX_DATASETS_FILE").map(PathBuf::from),
            },
            goodshepherd_base_url: get("GOODSHEPHERD_BASE_URL")
                .unwrap_or(defaults.goodshepherd_base_url),
            worldbank: WorldBankSettings {
                base_url: get("WORLDBANK_BASE_URL").unwrap_or(defaults.worldbank.base_url),
                country: get("WORLDBANK_COUNTRY").unwrap_or(defaults.worldbank.country),
            },
            retry,
            timeout: Duration::from_secs(parse_or(
                &get,
                "FETCH_TIMEOUT_SECS",
                defaults.timeout.as_secs(),
            )?),
            concurrency,
            partition: PartitionPolicy {
                threshold: parse_or(&get, "PARTITION_THRESHOLD", defaults.partition.threshold)?,
                recent_days: parse_or(&get, "RECENT_WINDOW_DAYS", defaults.partition.recent_days)?,
            },
            thresholds: defaults.thresholds,
            log: LogSettings {
                level: get("LOG_LEVEL").unwrap_or(defaults.log.level),
                file: get("LOG_FILE").map(PathBuf::from).unwrap_or(defaults.log.file),
                enable_console: parse_flag(&get, "LOG_CONSOLE", defaults.log.enable_console)?,
                enable_file: parse_flag(&get, "LOG_TO_FILE", defaults.log.enable_file)?,
            },
        })
    }

    /// Directory owned by one source, e.g. `public/data/hdx`.
    pub fn source_dir(&self, source: &str) -> PathBuf {
        self.data_dir.join(source)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("invalid value for {key}: '{raw}'")),
    }
}

fn parse_flag<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => bail!("invalid value for {key}: '{v}' (expected true/false)"),
        },
    }
}
