//! Log files for the plugin host
//!
//! One file per day under the log directory, pruned after a retention window

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_RETENTION_DAYS: u64 = 7;
const LOG_PREFIX: &str = "rrbot";

pub struct LogManager {
    log_dir: PathBuf,
}

impl LogManager {
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir }
    }

    pub fn current_log_path(&self) -> PathBuf {
        let today = chrono::Local::now().format("%Y-%m-%d");
        self.log_dir.join(format!("{}.{}.log", LOG_PREFIX, today))
    }

    fn is_log_file(path: &Path) -> bool {
        path.is_file()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(LOG_PREFIX) && name.ends_with(".log"))
    }

    /// Newest first.
    pub fn log_files(&self) -> Result<Vec<PathBuf>> {
        if !self.log_dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.log_dir)? {
            let path = entry?.path();
            if Self::is_log_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        files.reverse();
        Ok(files)
    }

    /// Delete log files not modified within `days`. Returns how many went.
    /// A window reaching past the epoch deletes nothing.
    pub fn cleanup_older_than(&self, days: u64) -> Result<usize> {
        let Some(cutoff) = days
            .checked_mul(24 * 60 * 60)
            .and_then(|secs| SystemTime::now().checked_sub(Duration::from_secs(secs)))
        else {
            return Ok(0);
        };
        let mut deleted = 0;
        for path in self.log_files()? {
            let modified = fs::metadata(&path)?.modified()?;
            if modified >= cutoff {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) => eprintln!("Failed to delete old log {}: {}", path.display(), e),
            }
        }
        Ok(deleted)
    }

    pub fn total_size(&self) -> Result<u64> {
        Ok(self
            .log_files()?
            .iter()
            .filter_map(|file| fs::metadata(file).ok())
            .map(|metadata| metadata.len())
            .sum())
    }

    pub fn format_size(bytes: u64) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        if bytes >= MB {
            format!("{:.2} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.2} KB", bytes as f64 / KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }
}

pub struct LoggingGuard {
    _guard: WorkerGuard,
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Install a file layer and a stderr layer. Keep the guard alive for the
/// lifetime of the process or buffered lines are lost.
pub fn init_logging(log_dir: &Path, log_level: &str) -> Result<LoggingGuard> {
    fs::create_dir_all(log_dir)?;
    let manager = LogManager::new(log_dir.to_path_buf());
    let deleted = manager.cleanup_older_than(LOG_RETENTION_DAYS)?;

    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(manager.current_log_path())?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .with_filter(env_filter(log_level));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .with_filter(env_filter(log_level));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;

    if deleted > 0 {
        tracing::info!("Cleaned up {} old log file(s)", deleted);
    }

    Ok(LoggingGuard { _guard: guard })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn temp_log_dir(name: &str) -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!("rrbot-logs-{}-{}", name, ts))
    }

    #[test]
    fn format_size_picks_unit() {
        assert_eq!(LogManager::format_size(512), "512 B");
        assert_eq!(LogManager::format_size(2048), "2.00 KB");
        assert_eq!(LogManager::format_size(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn only_prefixed_log_files_are_listed() {
        let dir = temp_log_dir("list");
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join("rrbot.2026-01-01.log"), "a").expect("write");
        fs::write(dir.join("rrbot.2026-01-02.log"), "bb").expect("write");
        fs::write(dir.join("other.log"), "ccc").expect("write");

        let manager = LogManager::new(dir);
        let files = manager.log_files().expect("list");
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("rrbot.2026-01-02.log"));
        assert_eq!(manager.total_size().expect("size"), 3);
        assert_eq!(manager.cleanup_older_than(1).expect("cleanup"), 0);
    }

    #[test]
    fn huge_retention_window_deletes_nothing() {
        let dir = temp_log_dir("huge");
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join("rrbot.2026-01-01.log"), "a").expect("write");

        let manager = LogManager::new(dir);
        assert_eq!(manager.cleanup_older_than(u64::MAX).expect("cleanup"), 0);
        assert_eq!(manager.cleanup_older_than(u64::MAX / 1000).expect("cleanup"), 0);
        assert_eq!(manager.log_files().expect("list").len(), 1);
    }

    #[test]
    fn missing_log_dir_lists_nothing() {
        let manager = LogManager::new(temp_log_dir("missing"));
        assert!(manager.log_files().expect("list").is_empty());
    }
}
