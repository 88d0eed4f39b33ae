//! Logging subsystem
//!
//! Structured logging via tracing with JSON (production) and plaintext
//! (development) output, to stdout or to a size-rotated file. Every line
//! passes through a redacting writer.
//!
//! # Log Targets
//!
//! - `server` - startup and shutdown
//! - `http` - request handling
//! - `hooks` - hook management and triggers
//! - `auth` - admin and trigger authentication
//! - `config` - configuration loading
//!
//! # Environment Variables
//!
//! - `WEBHOOK_FORGE_LOG` - Primary log level/filter (takes precedence)
//! - `RUST_LOG` - Fallback log level/filter

pub mod redact;
pub mod rotate;

use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::config::LogSettings;
use crate::logging::redact::RedactingMakeWriter;
use crate::logging::rotate::RotatingFileWriter;
use tracing::Level;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Env var holding the primary log filter
pub const LOG_FILTER_ENV: &str = "WEBHOOK_FORGE_LOG";

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Guard to track if logging has been initialized
static INIT_GUARD: OnceLock<()> = OnceLock::new();

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON format for production (structured logs)
    #[default]
    Json,
    /// Human-readable plaintext for development
    Plaintext,
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogOutput {
    /// Write to stdout
    #[default]
    Stdout,
    /// Write to a file, rotated by size
    File {
        path: PathBuf,
        max_bytes: u64,
        max_backups: usize,
    },
}

/// Configuration for the logging subsystem
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub output: LogOutput,
    /// Default log level when no env filter is set
    pub default_level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            output: LogOutput::Stdout,
            default_level: Level::INFO,
        }
    }
}

impl LogConfig {
    /// Build from the `log` section of the config file.
    /// Unknown values fall back to the defaults (validation reports them).
    pub fn from_settings(settings: &LogSettings) -> Self {
        let format = match settings.format.to_ascii_lowercase().as_str() {
            "text" => LogFormat::Plaintext,
            _ => LogFormat::Json,
        };

        let output = if settings.file_path.trim().is_empty() {
            LogOutput::Stdout
        } else {
            LogOutput::File {
                path: PathBuf::from(&settings.file_path),
                max_bytes: settings.max_size.saturating_mul(BYTES_PER_MB),
                max_backups: settings.max_backups,
            }
        };

        Self {
            format,
            output,
            default_level: parse_level(&settings.level).unwrap_or(Level::INFO),
        }
    }
}

/// Parse a configured level name. `fatal` maps to `error`.
pub fn parse_level(level: &str) -> Option<Level> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" | "fatal" => Some(Level::ERROR),
        _ => None,
    }
}

/// Error type for logging initialization
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to open log file: {0}")]
    FileCreation(#[from] io::Error),
    #[error("failed to parse log filter: {0}")]
    FilterParse(#[from] tracing_subscriber::filter::ParseError),
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("failed to initialize subscriber: {0}")]
    TryInit(#[from] tracing_subscriber::util::TryInitError),
}

/// Build an EnvFilter from environment variables or default level.
fn build_env_filter(default_level: Level) -> Result<EnvFilter, LoggingError> {
    for var in [LOG_FILTER_ENV, "RUST_LOG"] {
        if let Ok(filter) = std::env::var(var) {
            if !filter.trim().is_empty() {
                return Ok(EnvFilter::try_new(filter)?);
            }
        }
    }

    Ok(EnvFilter::try_new(
        default_level.as_str().to_lowercase(),
    )?)
}

fn make_writer(output: &LogOutput) -> Result<BoxMakeWriter, LoggingError> {
    let writer = match output {
        LogOutput::Stdout => BoxMakeWriter::new(RedactingMakeWriter::new(io::stdout)),
        LogOutput::File {
            path,
            max_bytes,
            max_backups,
        } => {
            let file = RotatingFileWriter::open(path, *max_bytes, *max_backups)?;
            BoxMakeWriter::new(RedactingMakeWriter::new(file))
        }
    };
    Ok(writer)
}

/// Initialize the logging subsystem.
///
/// Call once at startup; later calls return `AlreadyInitialized`.
pub fn init_logging(config: LogConfig) -> Result<(), LoggingError> {
    if INIT_GUARD.set(()).is_err() {
        return Err(LoggingError::AlreadyInitialized);
    }

    let filter = build_env_filter(config.default_level)?;
    let writer = make_writer(&config.output)?;
    let timer = UtcTime::rfc_3339();

    match config.format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_timer(timer)
                .with_target(true)
                .with_current_span(true)
                .with_span_list(false)
                .with_writer(writer)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).try_init()?;
        }
        LogFormat::Plaintext => {
            let layer = tracing_subscriber::fmt::layer()
                .with_timer(timer)
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .with_writer(writer)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).try_init()?;
        }
    }

    Ok(())
}

/// Log target constants for consistent naming across the codebase
pub mod targets {
    pub const SERVER: &str = "server";
    pub const HTTP: &str = "http";
    pub const HOOKS: &str = "hooks";
    pub const AUTH: &str = "auth";
    pub const CONFIG: &str = "config";
}
