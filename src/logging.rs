//! `tracing` subscriber setup.

use crate::config::{LogFormat, LoggingConfig};
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Level used when neither the command line nor the config names a valid one.
const FALLBACK_LEVEL: &str = "info";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over everything; otherwise `level_override` (from the
/// command line) wins over the configured level. Logs go to the configured
/// file, appended, or to stderr so they never mix with console output.
pub fn init(config: &LoggingConfig, level_override: Option<&str>) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = effective_level(config, level_override);
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(FALLBACK_LEVEL))
    });

    let (writer, ansi) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (BoxMakeWriter::new(Arc::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(false);

    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
    installed.map_err(std::io::Error::other)
}

fn effective_level<'a>(config: &'a LoggingConfig, level_override: Option<&'a str>) -> &'a str {
    level_override
        .filter(|level| !level.trim().is_empty())
        .unwrap_or(&config.level)
}
