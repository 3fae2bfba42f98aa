// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Logging initialization for trial-sdk applications
//!
//! Console output is always installed, as human-readable text or JSON lines.
//! With the `file-logging` feature and `logging.file_path` set, a daily-rotated
//! JSON log file is written as well.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};
use trial_config::{LogFormat, LoggingConfig};

use crate::cli::CrateDebugFlags;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps the background log writer alive; drop it last.
pub struct LoggingGuard {
    #[cfg(feature = "file-logging")]
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
    log_file: Option<PathBuf>,
}

impl LoggingGuard {
    /// Log file being written, if file logging is active
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

/// Build the `EnvFilter` for `config.level` plus any per-crate debug flags.
pub fn build_filter(config: &LoggingConfig, debug_flags: &CrateDebugFlags) -> Result<EnvFilter> {
    let directives = debug_flags.to_filter_string(&config.level);
    EnvFilter::try_new(&directives)
        .with_context(|| format!("Invalid log filter: {}", directives))
}

/// Install the global tracing subscriber
///
/// # Errors
/// Fails if the filter does not parse, the log directory cannot be created,
/// or a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig, debug_flags: &CrateDebugFlags) -> Result<LoggingGuard> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    let console_layer = match config.format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(build_filter(config, debug_flags)?)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_filter(build_filter(config, debug_flags)?)
            .boxed(),
    };
    layers.push(console_layer);

    #[cfg(feature = "file-logging")]
    let (file_guard, log_file) = match &config.file_path {
        Some(path) => {
            let (layer, guard) = file_layer(path, build_filter(config, debug_flags)?)?;
            layers.push(layer);
            (Some(guard), Some(path.clone()))
        }
        None => (None, None),
    };

    #[cfg(not(feature = "file-logging"))]
    let log_file: Option<PathBuf> = None;

    Registry::default()
        .with(layers)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    #[cfg(not(feature = "file-logging"))]
    {
        if let Some(path) = &config.file_path {
            tracing::warn!(
                "logging.file_path = {} ignored: built without the file-logging feature",
                path.display()
            );
        }
    }

    Ok(LoggingGuard {
        #[cfg(feature = "file-logging")]
        _file_guard: file_guard,
        log_file,
    })
}

#[cfg(feature = "file-logging")]
fn file_layer(
    path: &Path,
    filter: EnvFilter,
) -> Result<(BoxedLayer, tracing_appender::non_blocking::WorkerGuard)> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .with_context(|| format!("Log path does not name a file: {}", path.display()))?;

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

    let appender = tracing_appender::rolling::daily(&dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .json()
        .with_filter(filter)
        .boxed();

    Ok((layer, guard))
}
