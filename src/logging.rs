//! Tracing subscriber setup.
//!
//! Log lines go to stderr and to a daily rolling file under
//! `<data_path>/logs`. `RUST_LOG` wins over the configured level.

use anyhow::Result;
use std::path::Path;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

const LOG_PREFIX: &str = "sysdeck";
const MAX_LOG_FILES: usize = 7;

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}={level}", env!("CARGO_PKG_NAME"))))
}

/// Install the global subscriber with a rolling file appender.
pub fn enable_logging(data_path: &Path, level: &str) -> Result<()> {
    let appender = tracing_appender::rolling::Builder::new()
        .rotation(Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix("log")
        .build(data_path.join("logs"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_writer(std::io::stderr.and(appender))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

/// Install a stderr-only subscriber, for short-lived CLI commands.
pub fn enable_console_logging(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_writer(std::io::stderr)
        .try_init();
}
