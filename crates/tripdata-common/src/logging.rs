//! Logging Configuration and Initialization
//!
//! Centralized logging for all tripdata components. Supports console and
//! file output targets (daily-rotated), text or JSON formats, and
//! environment-based configuration.
//!
//! Use the structured logging macros (`trace!`, `debug!`, `info!`, `warn!`,
//! `error!`) with fields rather than `println!`:
//!
//! ```rust
//! use tracing::info;
//!
//! info!(table = "green_2022_tripdata", rows = 120_433, "batch loaded");
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Log level for filtering messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(anyhow::anyhow!("Invalid log level: {}", s)),
        }
    }
}

/// Output target for logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl std::str::FromStr for LogOutput {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" | "all" => Ok(LogOutput::Both),
            _ => Err(anyhow::anyhow!("Invalid log output: {}", s)),
        }
    }
}

/// Log format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow::anyhow!("Invalid log format: {}", s)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,

    /// Output target (console, file, or both)
    pub output: LogOutput,

    /// Log format (text or JSON)
    pub format: LogFormat,

    /// Directory for log files (only used when output includes file)
    pub log_dir: PathBuf,

    /// Log file name prefix (e.g., "tripdata" -> "tripdata.2026-08-06.log")
    pub log_file_prefix: String,

    /// Additional filter directives (e.g., "sqlx=warn,hyper=info")
    pub filter_directives: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "tripdata".to_string(),
            filter_directives: None,
        }
    }
}

impl LogConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `LOG_LEVEL`: Log level (trace, debug, info, warn, error)
    /// - `LOG_OUTPUT`: Output target (console, file, both)
    /// - `LOG_FORMAT`: Log format (text, json)
    /// - `LOG_DIR`: Directory for log files
    /// - `LOG_FILE_PREFIX`: Prefix for log files
    /// - `LOG_FILTER`: Additional filter directives
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.level = level.parse()?;
        }

        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            config.output = output.parse()?;
        }

        if let Ok(format) = std::env::var("LOG_FORMAT") {
            config.format = format.parse()?;
        }

        if let Ok(dir) = std::env::var("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }

        if let Ok(prefix) = std::env::var("LOG_FILE_PREFIX") {
            config.log_file_prefix = prefix;
        }

        if let Ok(filter) = std::env::var("LOG_FILTER") {
            config.filter_directives = Some(filter);
        }

        Ok(config)
    }
}

/// Initialize logging with the given configuration
///
/// Sets up the global tracing subscriber; call once at startup.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let mut filter =
        EnvFilter::from_default_env().add_directive(config.level.to_tracing_level().into());

    if let Some(ref directives) = config.filter_directives {
        for directive in directives.split(',') {
            filter = filter.add_directive(
                directive
                    .parse()
                    .context("Failed to parse filter directive")?,
            );
        }
    }

    match config.output {
        LogOutput::Console => init_console_logging(config, filter),
        LogOutput::File => init_file_logging(config, filter),
        LogOutput::Both => init_both_logging(config, filter),
    }
}

/// Initialize console-only logging
fn init_console_logging(config: &LogConfig, filter: EnvFilter) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_span_events(FmtSpan::CLOSE);

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        },
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer.json())
                .try_init()?;
        },
    }

    Ok(())
}

/// Initialize file-only logging
fn init_file_logging(config: &LogConfig, filter: EnvFilter) -> Result<()> {
    let non_blocking = file_writer(config)?;

    let fmt_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false);

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        },
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer.json())
                .try_init()?;
        },
    }

    Ok(())
}

/// Initialize both console and file logging
fn init_both_logging(config: &LogConfig, filter: EnvFilter) -> Result<()> {
    let non_blocking = file_writer(config)?;

    // Subscriber type that the boxed layers are attached to (registry + filter).
    type BothS = tracing_subscriber::layer::Layered<EnvFilter, tracing_subscriber::Registry>;

    let layers: Vec<Box<dyn Layer<BothS> + Send + Sync>> = match config.format {
        LogFormat::Text => vec![
            Box::new(
                fmt::layer()
                    .with_writer(std::io::stdout)
                    .with_span_events(FmtSpan::CLOSE),
            ),
            Box::new(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_ansi(false),
            ),
        ],
        LogFormat::Json => vec![
            Box::new(
                fmt::layer()
                    .with_writer(std::io::stdout)
                    .with_span_events(FmtSpan::CLOSE)
                    .json(),
            ),
            Box::new(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_ansi(false)
                    .json(),
            ),
        ],
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init()?;

    Ok(())
}

/// Build the non-blocking daily-rotating file writer
fn file_writer(config: &LogConfig) -> Result<tracing_appender::non_blocking::NonBlocking> {
    std::fs::create_dir_all(&config.log_dir).context("Failed to create log directory")?;

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The guard must outlive the subscriber; leak it for the process lifetime.
    std::mem::forget(guard);

    Ok(non_blocking)
}
