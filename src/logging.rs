//! Logging setup and the per-run operation logger.
//!
//! Two sinks: a colored stderr layer and a JSON layer appended to
//! `data-collection.log`. [`RunLogger`] sits on top and adds a context tag and
//! success/failure counters shared between a logger and its children.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    pub file: PathBuf,
    pub enable_console: bool,
    pub enable_file: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: PathBuf::from("data-collection.log"),
            enable_console: true,
            enable_file: true,
        }
    }
}

/// Installs the global subscriber. Keep the returned guard alive until exit
/// so buffered file lines get flushed.
///
/// A log file that cannot be opened only disables the file sink.
pub fn init_tracing(settings: &LogSettings) -> Option<WorkerGuard> {
    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = settings.enable_console.then(|| {
        fmt::layer()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(true)
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
    });

    let (file_writer, guard, file_error) = if settings.enable_file {
        match open_file_appender(&settings.file) {
            Ok(appender) => {
                let (writer, guard) = tracing_appender::non_blocking(appender);
                (Some(writer), Some(guard), None)
            }
            Err(e) => (None, None, Some(e)),
        }
    } else {
        (None, None, None)
    };

    let json_layer = file_writer.map(|writer| {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(writer)
            .with_filter(
                EnvFilter::try_from_env("RUST_LOG_JSON").unwrap_or_else(|_| EnvFilter::new("debug")),
            )
    });

    // A subscriber may already be set (tests, embedding); keep the first one.
    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .try_init();

    if let Some(e) = file_error {
        warn!(path = %settings.file.display(), error = %e, "Log file unavailable, logging to console only");
    }

    guard
}

fn open_file_appender(path: &Path) -> anyhow::Result<RollingFileAppender> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("data-collection.log");

    std::fs::create_dir_all(&dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(dir)?;
    Ok(appender)
}

#[derive(Debug, Default)]
struct Counters {
    success: AtomicU64,
    failure: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationCounts {
    pub success: u64,
    pub failure: u64,
}

impl OperationCounts {
    pub fn total(&self) -> u64 {
        self.success + self.failure
    }

    /// Percentage of successful operations; 100 when nothing was counted.
    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            100.0
        } else {
            (self.success as f64 / self.total() as f64 * 1000.0).round() / 10.0
        }
    }
}

/// Context-tagged logger passed explicitly through a fetcher run.
#[derive(Debug, Clone)]
pub struct RunLogger {
    context: String,
    counters: Arc<Counters>,
    started: Instant,
}

impl RunLogger {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            counters: Arc::new(Counters::default()),
            started: Instant::now(),
        }
    }

    /// Logger for a nested scope. Counters and start time are shared with the parent.
    pub fn child(&self, context: impl Display) -> Self {
        Self {
            context: format!("{}/{}", self.context, context),
            counters: Arc::clone(&self.counters),
            started: self.started,
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Logs a failed operation and counts it.
    pub fn error(&self, message: &str, err: Option<&dyn Display>) {
        self.counters.failure.fetch_add(1, Ordering::Relaxed);
        match err {
            Some(e) => error!(context = %self.context, error = %e, "{message}"),
            None => error!(context = %self.context, "{message}"),
        }
    }

    pub fn warn(&self, message: &str) {
        warn!(context = %self.context, "{message}");
    }

    pub fn info(&self, message: &str) {
        info!(context = %self.context, "{message}");
    }

    pub fn debug(&self, message: &str) {
        debug!(context = %self.context, "{message}");
    }

    /// Logs a completed operation and counts it.
    pub fn success(&self, message: &str) {
        self.counters.success.fetch_add(1, Ordering::Relaxed);
        info!(context = %self.context, outcome = "success", "{message}");
    }

    pub fn counts(&self) -> OperationCounts {
        OperationCounts {
            success: self.counters.success.load(Ordering::Relaxed),
            failure: self.counters.failure.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) -> OperationCounts {
        let counts = self.counts();
        let elapsed = self.started.elapsed();
        info!(
            context = %self.context,
            succeeded = counts.success,
            failed = counts.failure,
            total = counts.total(),
            elapsed_secs = elapsed.as_secs_f64(),
            success_rate = counts.success_rate(),
            "Run summary"
        );
        counts
    }
}
