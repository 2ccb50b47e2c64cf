// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::Layer;

/// An environment variable choosing whether to log to the console.
/// If "0", don't log to the console.
/// Otherwise, do log to the console.
pub const CONSOLE_LOG_ENV: &str = "COMBINER_LOG_CONSOLE";

/// A guard object to perform cleanups with RAII.
pub struct LogGuard {
    _span_guard: tracing::span::EnteredSpan,
}

/// The configuration for the logger.
pub struct LoggingConfig {
    /// The path to dump the logs to. If None, logs will not be written to a
    /// file.
    pub log_file: Option<PathBuf>,
    /// The default level for the console logger. Overridable with RUST_LOG.
    /// If None, logs will not be written to the console.
    pub console_level: Option<LevelFilter>,
}

impl LoggingConfig {
    /// The standard configuration: INFO to the console (DEBUG when `verbose`
    /// is set), optionally duplicated to a log file.
    pub fn new(verbose: bool, log_file: Option<PathBuf>) -> Self {
        let level = if verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        let console_level = match std::env::var(CONSOLE_LOG_ENV).ok().as_deref() {
            Some("0") => None,
            _ => Some(level),
        };
        Self {
            log_file,
            console_level,
        }
    }

    /// Sets up the standard tracing subscriber in accordance with the config,
    /// and starts a span named "main".
    pub fn setup(self) -> Result<LogGuard> {
        let mut layers = Vec::new();

        if let Some(level) = self.console_level {
            let filter = EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env()?;
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_ansi(true)
                    .with_writer(std::io::stderr)
                    .with_filter(filter)
                    .boxed(),
            );
        }

        if let Some(log_file) = &self.log_file {
            let f = std::fs::File::create(log_file)
                .with_context(|| format!("Failed to open log file {log_file:?}"))?;
            let filter = EnvFilter::builder()
                .with_default_directive(LevelFilter::DEBUG.into())
                .from_env()?;
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(f)
                    .with_filter(filter)
                    .boxed(),
            );
        }

        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .context(
                "Failed to start tracing. You probably already have either a trace or log
                subscriber running.",
            )?;

        let span_guard = tracing::trace_span!("main").entered();

        Ok(LogGuard {
            _span_guard: span_guard,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use fileutil::SafeTempDir;

    #[test]
    fn setup_logging_works() -> Result<()> {
        const INFO_MESSAGE: &str = "log at level info";
        const WARN_MESSAGE: &str = "log at level warn";

        let dir = SafeTempDir::new()?;
        let log_file = dir.path().join("out.log");
        // We can't really verify console output very easily and it'll just
        // pollute stderr.
        std::env::set_var(CONSOLE_LOG_ENV, "0");

        {
            // Unfortunately we can't run multiple tests, because the tracing
            // library attempts to subscribe to a global logger, and only one
            // thing can subscribe to a global logger.
            let _guard = LoggingConfig::new(false, Some(log_file.clone())).setup()?;

            tracing::warn!("{}", WARN_MESSAGE);
            tracing::info!("{}", INFO_MESSAGE);
        }

        let log_content = std::fs::read_to_string(log_file)?;
        assert!(
            log_content.contains(INFO_MESSAGE),
            "Unable to find info message in {}",
            log_content
        );
        assert!(
            log_content.contains(WARN_MESSAGE),
            "Unable to find warn message in {}",
            log_content
        );

        Ok(())
    }
}
