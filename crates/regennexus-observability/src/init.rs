// Copyright 2025 RegenNexus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Logging initialization
//!
//! Installs a console layer (text or JSON) and, with the `file-logging`
//! feature, a daily-rolling JSON file in `logging.log_dir`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regennexus_config::{LogFormat, LoggingConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::cli::CrateDebugFlags;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps background log writers alive; drop it last.
pub struct LoggingGuard {
    #[cfg(feature = "file-logging")]
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
    log_dir: Option<PathBuf>,
    installed: bool,
}

impl LoggingGuard {
    /// Directory receiving log files, if file logging is active
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    /// `false` when another global subscriber was already installed
    pub fn installed(&self) -> bool {
        self.installed
    }
}

/// Initialize the global `tracing` subscriber
///
/// Calling this more than once (or after another subscriber was set, as
/// happens in test binaries) is not an error: the existing subscriber is kept
/// and the returned guard reports `installed() == false`.
///
/// # Arguments
/// * `debug_flags` - Per-crate debug flags raised to `debug`
/// * `config` - Level, format and optional log directory
pub fn init_logging(debug_flags: &CrateDebugFlags, config: &LoggingConfig) -> Result<LoggingGuard> {
    let filter = debug_flags.to_filter_string(&config.level);

    let console_layer: BoxedLayer = match config.format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .with_filter(make_filter(&filter)?)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_filter(make_filter(&filter)?)
            .boxed(),
    };
    #[cfg_attr(not(feature = "file-logging"), allow(unused_mut))]
    let mut layers: Vec<BoxedLayer> = vec![console_layer];

    #[cfg(feature = "file-logging")]
    let mut file_guard = None;
    #[cfg(feature = "file-logging")]
    if let Some(dir) = &config.log_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(dir, "regennexus.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);

        layers.push(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .with_filter(make_filter(&filter)?)
                .boxed(),
        );
    }

    let installed = Registry::default().with(layers).try_init().is_ok();

    #[cfg(not(feature = "file-logging"))]
    if let Some(dir) = &config.log_dir {
        tracing::warn!(
            "logging.log_dir = {} ignored: built without the file-logging feature",
            dir.display()
        );
    }

    Ok(LoggingGuard {
        #[cfg(feature = "file-logging")]
        _file_guard: file_guard,
        log_dir: if cfg!(feature = "file-logging") {
            config.log_dir.clone()
        } else {
            None
        },
        installed,
    })
}

/// Initialize logging from `REGENNEXUS_DEBUG`/process arguments and default settings
pub fn init_logging_default() -> Result<LoggingGuard> {
    init_logging(&crate::cli::parse_debug_flags(), &LoggingConfig::default())
}

fn make_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives).with_context(|| format!("Invalid log filter '{}'", directives))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        let flags = CrateDebugFlags::default();
        let config = LoggingConfig::default();

        let first = init_logging(&flags, &config).unwrap();
        let second = init_logging(&flags, &config).unwrap();

        assert!(!(first.installed() && second.installed()));
        assert!(second.log_dir().is_none());
    }

    #[test]
    fn test_invalid_level_is_reported() {
        let config = LoggingConfig {
            level: "regennexus=verbose".to_string(),
            ..LoggingConfig::default()
        };
        assert!(init_logging(&CrateDebugFlags::default(), &config).is_err());
    }
}
