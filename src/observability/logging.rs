//! Process-wide tracing subscriber.

use anyhow::Context;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Keeps the file writer flushing until process exit.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Map a level name to an `EnvFilter` directive. Accepts the usual aliases
/// (`WARNING`, `CRITICAL`) and passes full directives through untouched.
fn filter_directive(level: &str) -> String {
    let trimmed = level.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "" => "info".to_string(),
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        lower @ ("trace" | "debug" | "info" | "warn" | "error" | "off") => lower.to_string(),
        _ => trimmed.to_string(),
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over
/// `config.level`. Fails if a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directive(&config.level))
            .with_context(|| format!("invalid log level {:?}", config.level))?,
    };

    let (json_layer, console_layer) = match config.format {
        LogFormat::Json => (
            Some(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_target(true),
            ),
            None,
        ),
        LogFormat::Console => (None, Some(fmt::layer().with_target(true))),
    };

    let file_layer = match &config.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let file_name = path
                .file_name()
                .with_context(|| format!("log file path has no file name: {}", path.display()))?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(())
}
