//! Logging system for the pocket hedge fund
//!
//! This module installs the process-wide tracing subscriber:
//! - An `EnvFilter` honouring `RUST_LOG`, falling back to the configured level
//! - A console layer in pretty, compact or JSON format
//! - An optional rolling file layer written through a non-blocking worker
//! - Microsecond timestamps and per-thread correlation IDs
//!
//! Library crates only emit `tracing` events; binaries call [`init_logging`] once.

pub mod timing;

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::path::PathBuf;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};
use uuid::Uuid;

pub use timing::{timer_stats, HighResTimer, TimerStatsSnapshot};

/// Set once the global subscriber has been installed
static INITIALIZED: OnceCell<()> = OnceCell::new();

thread_local! {
    static CORRELATION_ID: RefCell<Option<String>> = RefCell::new(None);
}

/// High-precision timestamp formatter
struct MicrosecondTimestamp;

impl FormatTime for MicrosecondTimestamp {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let now = chrono::Utc::now();
        write!(
            w,
            "{}.{:06}",
            now.format("%Y-%m-%d %H:%M:%S"),
            now.timestamp_subsec_micros()
        )
    }
}

/// Output format for logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Multi-line human readable format
    Pretty,
    /// Single-line text format
    Compact,
    /// Newline delimited JSON
    Json,
}

/// Log file rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPolicy {
    /// Hourly rotation
    Hourly,
    /// Daily rotation
    Daily,
    /// Single file
    Never,
}

impl RotationPolicy {
    fn to_appender_rotation(self) -> Rotation {
        match self {
            RotationPolicy::Hourly => Rotation::HOURLY,
            RotationPolicy::Daily => Rotation::DAILY,
            RotationPolicy::Never => Rotation::NEVER,
        }
    }
}

/// File output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLogConfig {
    /// Directory the log files are written to
    pub directory: PathBuf,
    /// File name prefix
    pub file_name: String,
    /// Rotation policy
    pub rotation: RotationPolicy,
    /// Level for the file, defaults to the global level
    pub level: Option<String>,
    /// Output format
    pub format: OutputFormat,
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            file_name: "pocket-hedge.log".to_string(),
            rotation: RotationPolicy::Daily,
            level: None,
            format: OutputFormat::Json,
        }
    }
}

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level or filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Console output format
    pub format: OutputFormat,
    /// Whether to write to the console at all
    pub console: bool,
    /// Whether to use ANSI colours on the console
    pub ansi: bool,
    /// Whether to include file and line information
    pub include_file_line: bool,
    /// Whether to include the event target (module path)
    pub include_target: bool,
    /// Whether to include thread ID
    pub include_thread_id: bool,
    /// Whether to use microsecond timestamps
    pub high_precision_timestamps: bool,
    /// Optional file output
    pub file: Option<FileLogConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: OutputFormat::Compact,
            console: true,
            ansi: true,
            include_file_line: false,
            include_target: true,
            include_thread_id: false,
            high_precision_timestamps: true,
            file: None,
        }
    }
}

/// Keeps the non-blocking file writers alive. Dropping it flushes pending records.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _guards: Vec<WorkerGuard>,
}

/// Logging error types
#[derive(thiserror::Error, Debug)]
pub enum LoggingError {
    #[error("Logging system already initialized")]
    AlreadyInitialized,

    #[error("Invalid log filter '{directive}': {message}")]
    InvalidFilter { directive: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Log file error: {0}")]
    File(String),

    #[error("Tracing error: {0}")]
    Tracing(String),
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Install the global tracing subscriber
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    let (layers, guards) = build_layers(config)?;

    INITIALIZED
        .set(())
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| LoggingError::Tracing(e.to_string()))?;

    Ok(LoggingGuard { _guards: guards })
}

/// Whether [`init_logging`] has already succeeded in this process
pub fn is_initialized() -> bool {
    INITIALIZED.get().is_some()
}

fn build_layers(config: &LoggingConfig) -> Result<(Vec<BoxedLayer>, Vec<WorkerGuard>), LoggingError> {
    let mut layers = Vec::new();
    let mut guards = Vec::new();

    if config.console {
        let filter = build_filter(&config.level)?;
        let layer = fmt_layer(config, config.format, config.ansi, io::stderr);
        layers.push(layer.with_filter(filter).boxed());
    }

    if let Some(file) = &config.file {
        std::fs::create_dir_all(&file.directory)?;
        let appender = RollingFileAppender::builder()
            .rotation(file.rotation.to_appender_rotation())
            .filename_prefix(file.file_name.clone())
            .build(&file.directory)
            .map_err(|e| LoggingError::File(e.to_string()))?;
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);

        let filter = build_filter(file.level.as_deref().unwrap_or(&config.level))?;
        let layer = fmt_layer(config, file.format, false, writer);
        layers.push(layer.with_filter(filter).boxed());
    }

    Ok((layers, guards))
}

fn build_filter(directive: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(directive).map_err(|e| LoggingError::InvalidFilter {
        directive: directive.to_string(),
        message: e.to_string(),
    })
}

fn fmt_layer<S, W>(config: &LoggingConfig, format: OutputFormat, ansi: bool, writer: W) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let base = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_id)
        .with_file(config.include_file_line)
        .with_line_number(config.include_file_line)
        .with_ansi(ansi);

    match (format, config.high_precision_timestamps) {
        (OutputFormat::Pretty, true) => base.pretty().with_timer(MicrosecondTimestamp).boxed(),
        (OutputFormat::Pretty, false) => base.pretty().boxed(),
        (OutputFormat::Compact, true) => base.compact().with_timer(MicrosecondTimestamp).boxed(),
        (OutputFormat::Compact, false) => base.compact().boxed(),
        (OutputFormat::Json, true) => base.json().with_timer(MicrosecondTimestamp).boxed(),
        (OutputFormat::Json, false) => base.json().boxed(),
    }
}

/// Set the correlation ID for the current thread
pub fn set_correlation_id(id: impl Into<String>) {
    CORRELATION_ID.with(|cell| *cell.borrow_mut() = Some(id.into()));
}

/// Clear the correlation ID for the current thread
pub fn clear_correlation_id() {
    CORRELATION_ID.with(|cell| *cell.borrow_mut() = None);
}

/// Correlation ID for the current thread
pub fn correlation_id() -> Option<String> {
    CORRELATION_ID.with(|cell| cell.borrow().clone())
}

/// Generate a new correlation ID
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Module version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, OutputFormat::Compact);
        assert!(config.console);
        assert!(config.high_precision_timestamps);
        assert!(config.file.is_none());
    }

    #[test]
    fn test_logging_config_from_json() {
        let config: LoggingConfig = serde_json::from_str(
            r#"{"level": "debug", "format": "json", "file": {"directory": "/tmp/ph", "rotation": "hourly"}}"#,
        )
        .unwrap();

        assert_eq!(config.level, "debug");
        assert_eq!(config.format, OutputFormat::Json);
        let file = config.file.unwrap();
        assert_eq!(file.rotation, RotationPolicy::Hourly);
        assert_eq!(file.file_name, "pocket-hedge.log");
    }

    #[test]
    fn test_invalid_filter_is_reported() {
        std::env::remove_var("RUST_LOG");
        assert!(matches!(
            build_filter("pocket_hedge=loud"),
            Err(LoggingError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_init_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            console: false,
            file: Some(FileLogConfig {
                directory: dir.path().to_path_buf(),
                rotation: RotationPolicy::Never,
                ..FileLogConfig::default()
            }),
            ..LoggingConfig::default()
        };

        let guard = init_logging(&config).unwrap();
        assert!(is_initialized());
        tracing::info!("file logging ready");

        assert!(matches!(
            init_logging(&config),
            Err(LoggingError::AlreadyInitialized)
        ));
        drop(guard);
        assert!(dir.path().join("pocket-hedge.log").exists());
    }

    #[test]
    fn test_correlation_id() {
        let id = generate_correlation_id();
        assert_ne!(id, generate_correlation_id());

        set_correlation_id(id.clone());
        assert_eq!(correlation_id(), Some(id));
        clear_correlation_id();
        assert_eq!(correlation_id(), None);
    }
}
