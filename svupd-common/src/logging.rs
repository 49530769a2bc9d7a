//! Logging setup.
//!
//! Everything is reported twice: to stderr for whoever runs the command and
//! to an append-only log file that survives on the device. Both sinks share
//! one level filter.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::EnvParser;
use crate::error::{Result, SupervisorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    pub stderr: bool,
    pub file: Option<PathBuf>,
}

impl LogConfig {
    /// Read `SVUPD_LOG_LEVEL`, `SVUPD_LOG_FORMAT` and `SVUPD_LOG_FILE`.
    ///
    /// Invalid values fall back to the defaults. No sink is enabled unless
    /// requested here or through the builder methods.
    pub fn from_env(default_level: &str) -> Self {
        let mut parser = EnvParser::new();
        let level = parser
            .get_log_level("LOG_LEVEL")
            .unwrap_or_else(|| default_level.to_string());
        let format = match parser.get_string("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        let file = parser.get_path("LOG_FILE");
        Self {
            level,
            format,
            stderr: false,
            file,
        }
    }

    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }

    /// Log to `path` unless a file was already chosen through the
    /// environment.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        if self.file.is_none() {
            self.file = Some(path.into());
        }
        self
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            stderr: true,
            file: None,
        }
    }
}

/// Keeps the background file writer alive; drop it last so buffered lines
/// are flushed.
#[must_use = "dropping the guards stops file logging"]
pub struct LoggingGuards {
    _file: Option<WorkerGuard>,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber.
///
/// A log file that cannot be opened is reported and skipped; stderr logging
/// still works. Fails only if a subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards> {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;
    let mut file_error = None;

    if config.stderr {
        let layer = fmt::layer().with_writer(io::stderr).with_target(false);
        layers.push(match config.format {
            LogFormat::Pretty => layer.boxed(),
            LogFormat::Json => layer.json().boxed(),
        });
    }

    if let Some(path) = &config.file {
        match open_log_file(path) {
            Ok(file) => {
                let (writer, file_guard) = tracing_appender::non_blocking(file);
                let layer = fmt::layer().with_writer(writer).with_ansi(false);
                layers.push(match config.format {
                    LogFormat::Pretty => layer.boxed(),
                    LogFormat::Json => layer.json().boxed(),
                });
                guard = Some(file_guard);
            }
            Err(err) => file_error = Some((path.clone(), err)),
        }
    }

    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|err| SupervisorError::Config(format!("failed to initialise logging: {err}")))?;

    if let Some((path, err)) = file_error {
        warn!("Logging to {} is disabled: {}", path.display(), err);
    }
    Ok(LoggingGuards { _file: guard })
}

fn open_log_file(path: &Path) -> io::Result<fs::File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
