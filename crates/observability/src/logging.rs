//! Logging initialization and configuration
//!
//! This module provides utilities for initializing the tracing-based
//! logging system with various output formats, writing to stdout and/or a
//! rotating file inside a log directory.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

/// Name of the log file created inside the configured log directory.
pub const LOG_FILE_NAME: &str = "dbutils.log";

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    #[default]
    Pretty,
    /// JSON format for structured logging (better for log aggregation)
    Json,
    /// Compact format (less verbose than pretty)
    Compact,
}

impl LogFormat {
    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown log format: {}", s))
    }
}

/// Where and how log lines are written.
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub format: LogFormat,
    /// Directory for `dbutils.log`; `None` disables file output.
    pub log_dir: Option<PathBuf>,
    /// Also write to stdout.
    pub print_logs: bool,
    /// Rotated copies of the previous log file to keep.
    pub backup_count: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            log_dir: None,
            print_logs: true,
            backup_count: 3,
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

fn format_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(ansi)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(writer)
            .with_ansi(ansi)
            .boxed(),
    }
}

/// Initialize the logging system
///
/// The log level can be controlled via the `RUST_LOG` environment variable
/// (defaults to `info`). When a log directory is given, the directory is
/// created if needed and the previous log file is rotated before a fresh
/// one is opened.
///
/// Calling this twice in one process returns an error instead of panicking.
///
/// # Example
///
/// ```ignore
/// use observability::{init_logging, LogFormat, LogOptions};
///
/// init_logging("dbutil", &LogOptions { log_dir: Some("logs".into()), ..Default::default() })?;
/// tracing::info!("Logger initialized");
/// ```
pub fn init_logging(service_name: &str, options: &LogOptions) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if options.print_logs {
        layers.push(format_layer(options.format, io::stdout, true));
    }

    let log_file = match options.log_dir {
        Some(ref dir) => {
            let file = open_log_file(dir, options.backup_count)?;
            layers.push(format_layer(options.format, Arc::new(file), false));
            Some(dir.join(LOG_FILE_NAME))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()?;

    tracing::info!(
        service = service_name,
        format = ?options.format,
        log_file = ?log_file,
        "Logging initialized"
    );

    Ok(())
}

/// Initialize logging with default settings (pretty format, stdout, info level)
pub fn init_default_logging(service_name: &str) -> anyhow::Result<()> {
    init_logging(service_name, &LogOptions::default())
}

/// Create `dir`, rotate the previous log file and open a fresh one.
pub fn open_log_file(dir: &Path, backup_count: usize) -> io::Result<File> {
    fs::create_dir_all(dir)?;
    rotate_log_files(dir, LOG_FILE_NAME, backup_count)?;

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))
}

/// Shift `name` to `name.1`, `name.1` to `name.2`, ... dropping anything past
/// `backup_count`. With `backup_count == 0` the old file is removed.
pub fn rotate_log_files(dir: &Path, name: &str, backup_count: usize) -> io::Result<()> {
    let current = dir.join(name);
    if !current.exists() {
        return Ok(());
    }

    if backup_count == 0 {
        return fs::remove_file(current);
    }

    let backup = |n: usize| dir.join(format!("{}.{}", name, n));

    let oldest = backup(backup_count);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }

    for n in (1..backup_count).rev() {
        let from = backup(n);
        if from.exists() {
            fs::rename(&from, backup(n + 1))?;
        }
    }

    fs::rename(current, backup(1))
}
