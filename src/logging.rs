//! Structured logging: console plus a daily rolling file.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{PosError, PosResult};

/// Maximum number of rolled log files to keep.
const MAX_LOG_FILES: usize = 10;

const LOG_FILE_PREFIX: &str = "cashcut";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Plain,
    /// One JSON object per line in the log file.
    Json,
}

/// `$XDG_DATA_HOME/pos-cashcut/logs`, falling back to `~/.local/share`.
pub fn default_log_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                .join(".local")
                .join("share")
        });
    base.join("pos-cashcut").join("logs")
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the default filter. Fails if a subscriber is already
/// installed.
pub fn init(log_dir: &Path, format: LogFormat) -> PosResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pos_cashcut=debug"));

    fs::create_dir_all(log_dir)
        .map_err(|e| PosError::Storage(format!("create log dir: {e}")))?;
    prune_old_logs(log_dir);

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let plain_file = (format == LogFormat::Plain).then(|| {
        fmt::layer()
            .with_writer(non_blocking.clone())
            .with_ansi(false)
            .with_target(true)
    });
    let json_file = (format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_target(true)
    });
    let console_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(plain_file)
        .with(json_file)
        .try_init()
        .map_err(|e| PosError::Storage(format!("install log subscriber: {e}")))?;

    // The guard flushes on drop; logging lives until process exit.
    std::mem::forget(guard);

    info!(
        log_dir = %log_dir.display(),
        "pos-cashcut v{} logging started",
        env!("CARGO_PKG_VERSION")
    );
    Ok(())
}

/// Delete all but the newest [`MAX_LOG_FILES`] log files in `log_dir`.
pub fn prune_old_logs(log_dir: &Path) {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return;
    };

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter(|entry| {
            entry.path().is_file()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX))
        })
        .map(|entry| {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::UNIX_EPOCH);
            (entry.path(), modified)
        })
        .collect();

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "pos-cashcut-{name}-{}",
            uuid::Uuid::new_v4()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_prune_keeps_newest_log_files() {
        let dir = scratch_dir("prune");
        let base = SystemTime::now() - Duration::from_secs(3600);
        for i in 0..(MAX_LOG_FILES + 3) {
            let path = dir.join(format!("{LOG_FILE_PREFIX}.2026-03-{:02}", i + 1));
            let file = fs::File::create(&path).unwrap();
            file.set_modified(base + Duration::from_secs(i as u64 * 60))
                .unwrap();
        }
        fs::write(dir.join("notes.txt"), "keep me").unwrap();

        prune_old_logs(&dir);

        let remaining: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .flatten()
            .filter_map(|e| e.file_name().to_str().map(String::from))
            .collect();
        assert_eq!(
            remaining.iter().filter(|n| n.starts_with(LOG_FILE_PREFIX)).count(),
            MAX_LOG_FILES
        );
        assert!(remaining.contains(&"notes.txt".to_string()));
        assert!(!remaining.contains(&format!("{LOG_FILE_PREFIX}.2026-03-01")));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_prune_missing_dir_is_noop() {
        prune_old_logs(Path::new("/definitely/not/a/log/dir"));
    }

    #[test]
    fn test_default_log_dir_ends_in_app_folder() {
        assert!(default_log_dir().ends_with("pos-cashcut/logs"));
    }
}
