// SPDX-License-Identifier: Apache-2.0

//! Logging setup for hosts embedding the firewall.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::{Duration, SystemTime};

use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_PREFIX: &str = "qore-firewall.log";
const LOG_RETENTION_DAYS: u64 = 14;
const DEFAULT_FILTER: &str = "qore_firewall=info,qore_fingerprint=info";

static PANIC_HOOK: Once = Once::new();

/// Where log records go
#[derive(Debug, Clone)]
pub enum LogTarget {
    Stderr,
    /// Daily rolling JSON files
    Directory(PathBuf),
}

/// Installs the global subscriber and a panic hook. Calling it again is a
/// no-op for both.
pub fn init_tracing(target: LogTarget) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match &target {
        LogTarget::Stderr => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .with_target(true)
                .try_init();
        }
        LogTarget::Directory(log_dir) => {
            let _ = fs::create_dir_all(log_dir);
            if let Err(e) = cleanup_old_logs(log_dir, LOG_RETENTION_DAYS) {
                eprintln!("Failed to clean up old logs: {}", e);
            }

            let file_appender: RollingFileAppender =
                tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(file_appender)
                .json()
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_current_span(true)
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE)
                .try_init();
        }
    }

    PANIC_HOOK.call_once(install_panic_hook);

    tracing::info!(?target, "Tracing initialized");
}

fn install_panic_hook() {
    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown cause".to_string()
        };

        tracing::error!(target: "panic", location = %location, message = %message, "Firewall host panicked");
        previous_hook(panic_info);
    }));
}

/// Removes rolled log files older than `retention_days`.
pub fn cleanup_old_logs(log_dir: &Path, retention_days: u64) -> io::Result<usize> {
    let now = SystemTime::now();
    let retention = Duration::from_secs(retention_days * 24 * 60 * 60);
    let mut removed = 0;

    for entry in fs::read_dir(log_dir)? {
        let path = entry?.path();
        let is_log = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX));
        if !is_log {
            continue;
        }

        let age = fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if age.is_some_and(|age| age > retention) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => eprintln!("Failed to remove old log file {:?}: {}", path, e),
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backdate(path: &Path, days: u64) {
        let file = fs::File::options().write(true).open(path).unwrap();
        let then = SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60);
        file.set_modified(then).unwrap();
    }

    #[test]
    fn cleanup_keeps_recent_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join(format!("{LOG_FILE_PREFIX}.2026-01-01"));
        let recent = dir.path().join(format!("{LOG_FILE_PREFIX}.2026-10-01"));
        let foreign = dir.path().join("notes.txt");
        for path in [&stale, &recent, &foreign] {
            fs::write(path, "{}").unwrap();
        }
        backdate(&stale, 30);
        backdate(&recent, 2);
        backdate(&foreign, 30);

        assert_eq!(cleanup_old_logs(dir.path(), 14).unwrap(), 1);
        assert!(!stale.exists());
        assert!(recent.exists());
        assert!(foreign.exists());
        assert_eq!(cleanup_old_logs(dir.path(), 14).unwrap(), 0);
    }

    #[test]
    fn init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        init_tracing(LogTarget::Directory(dir.path().join("logs")));
        init_tracing(LogTarget::Stderr);
        assert!(dir.path().join("logs").is_dir());
    }
}
