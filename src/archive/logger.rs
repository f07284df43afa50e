//! Structured Logging for the archiver
//!
//! Builds one `tracing` subscriber for the whole process:
//! 1. An `EnvFilter` taken from `RUST_LOG`, or the configured level
//! 2. An optional terminal layer on stderr
//! 3. An optional daily rolling file in JSON or line format

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::Layered,
    prelude::*,
    EnvFilter, Layer, Registry,
};

use crate::archive::AppConfig;

/// Error types for logging
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type for logging operations
pub type LoggerResult<T> = Result<T, LoggerError>;

type FilteredRegistry = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// Keeps the non-blocking file writer alive. Dropping it flushes the file.
pub struct Logger {
    log_file_dir: Option<PathBuf>,
    _guard: Option<WorkerGuard>,
}

impl Logger {
    /// Directory holding the rolling log file, when file logging is active.
    pub fn log_file_dir(&self) -> Option<&Path> {
        self.log_file_dir.as_deref()
    }
}

fn level_filter(level: &str) -> LoggerResult<EnvFilter> {
    EnvFilter::try_new(level).map_err(|e| LoggerError::Filter(e.to_string()))
}

fn build_filter(level: &str) -> LoggerResult<EnvFilter> {
    EnvFilter::try_from_default_env().or_else(|_| level_filter(level))
}

fn file_layer(log_dir: &Path, format: &str) -> LoggerResult<(BoxedLayer, WorkerGuard)> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("yiff_dl")
        .filename_suffix("log")
        .build(log_dir)
        .map_err(|e| LoggerError::Logging(e.to_string()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let layer = match format {
        "json" => fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
        _ => fmt::layer()
            .with_ansi(false)
            .with_writer(non_blocking)
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
    };

    Ok((layer, guard))
}

/// Initialize the global subscriber from the logging section of the config.
///
/// A file layer that cannot be created is reported on the terminal and skipped,
/// so logging never prevents an archive run.
pub fn init_logger(config: &AppConfig) -> LoggerResult<Logger> {
    let logging = &config.logging;
    let filter = build_filter(&logging.log_level)?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;
    let mut log_file_dir = None;
    let mut file_error = None;

    if logging.log_to_terminal {
        layers.push(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .boxed(),
        );
    }

    if logging.log_to_file {
        let log_dir = PathBuf::from(&config.paths.log_directory);
        match file_layer(&log_dir, &logging.log_format) {
            Ok((layer, file_guard)) => {
                layers.push(layer);
                guard = Some(file_guard);
                log_file_dir = Some(log_dir);
            }
            Err(e) => file_error = Some(e),
        }
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init()
        .map_err(|e| LoggerError::Logging(e.to_string()))?;

    if let Some(e) = file_error {
        warn!(error = %e, "File logging disabled, continuing with terminal output only");
    }

    info!(
        log_format = %logging.log_format,
        log_level = %logging.log_level,
        "Logger initialized"
    );

    Ok(Logger {
        log_file_dir,
        _guard: guard,
    })
}
