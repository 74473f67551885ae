//! Shared logging utilities for tagdex binaries.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "tagdex=info,tagdex_db=info";
const VERBOSE_LOG_FILTER: &str = "tagdex=debug,tagdex_db=debug";

/// Logging configuration shared by tagdex binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Mirror the full filter on stderr instead of warnings only
    pub verbose: bool,
    /// Also write a daily-rolling log file under [`logs_dir`]
    pub log_to_file: bool,
}

/// Initialize tracing with stderr output and an optional daily log file.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the process.
pub fn init_logging(config: LogConfig<'_>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if config.verbose {
            EnvFilter::new(VERBOSE_LOG_FILTER)
        } else {
            EnvFilter::new(DEFAULT_LOG_FILTER)
        }
    });

    let mut guard = None;
    let file_layer = if config.log_to_file {
        match ensure_logs_dir() {
            Ok(log_dir) => {
                let file_appender =
                    tracing_appender::rolling::daily(log_dir, format!("{}.log", config.app_name));
                let (file_writer, worker_guard) = tracing_appender::non_blocking(file_appender);
                guard = Some(worker_guard);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(file_writer)
                        .with_ansi(false)
                        .with_filter(env_filter.clone()),
                )
            }
            Err(err) => {
                eprintln!("Warning: failed to create logs directory: {:#}", err);
                None
            }
        }
    } else {
        None
    };

    let console_filter = if config.verbose {
        env_filter
    } else {
        EnvFilter::new("warn")
    };
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(BoxMakeWriter::new(std::io::stderr))
        .with_target(false)
        .with_filter(console_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

/// Get the tagdex home directory: ~/.tagdex (or `$TAGDEX_HOME`)
pub fn tagdex_home() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var("TAGDEX_HOME") {
        return Ok(PathBuf::from(override_path));
    }
    dirs::home_dir()
        .map(|home| home.join(".tagdex"))
        .context("Could not determine home directory")
}

/// Get the logs directory: ~/.tagdex/logs
pub fn logs_dir() -> Result<PathBuf> {
    Ok(tagdex_home()?.join("logs"))
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir()?;
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_home_override() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::env::set_var("TAGDEX_HOME", tmp.path());

        assert_eq!(tagdex_home().unwrap(), tmp.path());
        let logs = ensure_logs_dir().unwrap();
        assert_eq!(logs, tmp.path().join("logs"));
        assert!(logs.is_dir());

        std::env::remove_var("TAGDEX_HOME");
    }
}
