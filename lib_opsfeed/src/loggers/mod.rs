//! # Loggers
//!
//! Tracing setup for binaries built on this library: an `EnvFilter` (with
//! `RUST_LOG` taking precedence over the configured level), a console layer and
//! a non-blocking JSON file layer.
//!
//! Each run writes a fresh `<app>_<timestamp>.log`. Before that, older logs of
//! the same app are pruned so only the most recent previous run survives.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Failures while setting up logging.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The log directory could not be created or listed.
    #[error("log directory {path}: {source}")]
    Directory {
        /// Offending directory.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The level string is not a valid filter directive.
    #[error("invalid log level `{0}`")]
    Level(String),
    /// A global subscriber is already installed.
    #[error("tracing subscriber already installed: {0}")]
    Install(String),
}

/// Installs the global subscriber. Keep the returned guard alive for the life
/// of the process, or buffered file output is lost.
pub fn init_tracing(
    log_dir: &Path,
    log_level: &str,
    app_name: &str,
) -> Result<WorkerGuard, LoggingError> {
    fs::create_dir_all(log_dir).map_err(|source| LoggingError::Directory {
        path: log_dir.to_path_buf(),
        source,
    })?;
    cleanup_old_logs(log_dir, app_name)?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|_| LoggingError::Level(log_level.to_string()))?;

    let file_name = log_file_name(app_name);
    let (non_blocking_appender, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, &file_name));

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_appender)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::Install(e.to_string()))?;

    tracing::info!(log_level, file = %log_dir.join(&file_name).display(), "Logging initialized");
    Ok(guard)
}

fn log_file_name(app_name: &str) -> String {
    format!(
        "{}_{}.log",
        app_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    )
}

/// Deletes all `<app_name>_*.log` files in `log_dir` except the newest one.
/// Files of other apps are left alone. Returns how many were removed.
pub fn cleanup_old_logs(log_dir: &Path, app_name: &str) -> Result<usize, LoggingError> {
    let prefix = format!("{}_", app_name);
    let entries = fs::read_dir(log_dir).map_err(|source| LoggingError::Directory {
        path: log_dir.to_path_buf(),
        source,
    })?;

    let mut logs: Vec<(PathBuf, std::time::SystemTime)> = entries
        .filter_map(|res| res.ok())
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with(&prefix) && name.ends_with(".log")
        })
        .filter_map(|e| {
            let modified = e.metadata().and_then(|m| m.modified()).ok()?;
            Some((e.path(), modified))
        })
        .collect();

    // Newest first
    logs.sort_by_key(|(_, modified)| std::cmp::Reverse(*modified));

    let mut removed = 0;
    for (path, _) in logs.iter().skip(1) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::{Duration, SystemTime};

    fn touch(dir: &Path, name: &str, age_secs: u64) {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
    }

    #[test]
    fn test_cleanup_keeps_newest_of_same_app() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "sync_client_a.log", 300);
        touch(dir.path(), "sync_client_b.log", 10);
        touch(dir.path(), "sync_client_c.log", 200);
        touch(dir.path(), "other_app_x.log", 500);
        touch(dir.path(), "sync_client_notes.txt", 500);

        let removed = cleanup_old_logs(dir.path(), "sync_client").unwrap();

        assert_eq!(removed, 2);
        assert!(dir.path().join("sync_client_b.log").exists());
        assert!(!dir.path().join("sync_client_a.log").exists());
        assert!(dir.path().join("other_app_x.log").exists());
        assert!(dir.path().join("sync_client_notes.txt").exists());
    }

    #[test]
    fn test_cleanup_on_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            cleanup_old_logs(&missing, "x"),
            Err(LoggingError::Directory { .. })
        ));
    }

    #[test]
    fn test_init_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let guard = init_tracing(&log_dir, "info", "unit_test").unwrap();
        tracing::info!("hello");
        drop(guard);

        let count = fs::read_dir(&log_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("unit_test_"))
            .count();
        assert_eq!(count, 1);
    }
}
