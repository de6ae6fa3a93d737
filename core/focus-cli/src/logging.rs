//! File logging for the CLI.
//!
//! Logs go to a daily-rotated file under `~/.focusquest/logs/` so command
//! output on stdout stays clean. Set `FOCUS_DEBUG_LOG=1` for debug level or
//! `RUST_LOG` for a custom filter.

use std::env;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "focus-cli.log";

/// Keeps the background log writer alive; drop it last.
pub struct LoggingGuard {
    _worker: Option<WorkerGuard>,
}

pub fn init() -> LoggingGuard {
    let Some(dir) = log_dir() else {
        return LoggingGuard { _worker: None };
    };
    if fs_err::create_dir_all(&dir).is_err() {
        return LoggingGuard { _worker: None };
    }

    let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let initialized = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .is_ok();

    LoggingGuard {
        _worker: initialized.then_some(guard),
    }
}

fn filter() -> EnvFilter {
    let debug_enabled = env::var("FOCUS_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn log_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".focusquest").join("logs"))
}
