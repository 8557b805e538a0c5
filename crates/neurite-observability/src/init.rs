// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Logging initialization
//!
//! Console output always; with `file-logging`, a timestamped run folder:
//! ```text
//! ./logs/
//!   └── run_20250101_120000/
//!       └── neurite.log
//! ```

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDateTime, Utc};
use tracing_subscriber::EnvFilter;

use crate::cli::CrateDebugFlags;

const RUN_PREFIX: &str = "run_";
const RUN_STAMP: &str = "%Y%m%d_%H%M%S";

/// Folder name for a run started now
pub fn run_folder_name() -> String {
    format!("{}{}", RUN_PREFIX, Utc::now().format(RUN_STAMP))
}

/// Start time encoded in a run folder name
pub fn parse_run_folder(name: &str) -> Option<NaiveDateTime> {
    let stamp = name.strip_prefix(RUN_PREFIX)?;
    NaiveDateTime::parse_from_str(stamp, RUN_STAMP).ok()
}

/// `RUST_LOG` when set, otherwise `base_level` plus the per-crate flags
pub fn build_filter(debug_flags: &CrateDebugFlags, base_level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directives = debug_flags.to_filter_string(base_level);
    EnvFilter::try_new(&directives).with_context(|| format!("Invalid log filter '{}'", directives))
}

/// Initialize console logging
///
/// # Errors
/// Fails on an invalid level or when a global subscriber is already set.
pub fn init_console(debug_flags: &CrateDebugFlags, base_level: &str) -> Result<()> {
    let filter = build_filter(debug_flags, base_level)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to install console subscriber: {}", e))
}

#[cfg(feature = "file-logging")]
pub use file::{init_logging, LoggingGuard};

#[cfg(feature = "file-logging")]
mod file {
    use super::*;
    use std::path::{Path, PathBuf};
    use tracing_appender::rolling;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{Layer, Registry};

    /// Keeps the file writer alive; logs are flushed on drop
    pub struct LoggingGuard {
        _file_guard: tracing_appender::non_blocking::WorkerGuard,
        log_dir: PathBuf,
    }

    impl LoggingGuard {
        pub fn log_dir(&self) -> &Path {
            &self.log_dir
        }
    }

    /// Initialize console plus file logging under `log_dir/run_<stamp>/`
    ///
    /// Only the `retention_runs` most recent run folders are kept.
    pub fn init_logging(
        debug_flags: &CrateDebugFlags,
        base_level: &str,
        log_dir: &Path,
        retention_runs: usize,
    ) -> Result<LoggingGuard> {
        let run_folder = log_dir.join(run_folder_name());
        std::fs::create_dir_all(&run_folder)
            .with_context(|| format!("Failed to create log directory: {}", run_folder.display()))?;
        cleanup_old_runs(log_dir, retention_runs)?;

        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_filter(build_filter(debug_flags, base_level)?)
            .boxed();

        let appender = rolling::daily(&run_folder, "neurite.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(build_filter(debug_flags, base_level)?)
            .boxed();

        Registry::default()
            .with(vec![console_layer, file_layer])
            .try_init()
            .map_err(|e| anyhow!("Failed to install logging subscriber: {}", e))?;

        Ok(LoggingGuard {
            _file_guard: guard,
            log_dir: run_folder,
        })
    }

    /// Remove all but the `keep` most recent run folders
    pub(crate) fn cleanup_old_runs(base_log_dir: &Path, keep: usize) -> Result<()> {
        if !base_log_dir.exists() {
            return Ok(());
        }
        let mut runs: Vec<(PathBuf, NaiveDateTime)> = Vec::new();
        for entry in std::fs::read_dir(base_log_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let stamp = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_run_folder);
            if let Some(dt) = stamp {
                runs.push((path, dt));
            }
        }
        runs.sort_by_key(|(_, dt)| std::cmp::Reverse(*dt));
        for (path, _) in runs.iter().skip(keep.max(1)) {
            if let Err(e) = std::fs::remove_dir_all(path) {
                eprintln!("Warning: Failed to remove old log directory {}: {}", path.display(), e);
            }
        }
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_cleanup_keeps_most_recent() {
            let dir = tempfile::tempdir().unwrap();
            for stamp in ["20240101_000000", "20240301_000000", "20240201_000000"] {
                std::fs::create_dir(dir.path().join(format!("run_{}", stamp))).unwrap();
            }
            std::fs::create_dir(dir.path().join("unrelated")).unwrap();
            cleanup_old_runs(dir.path(), 2).unwrap();
            assert!(!dir.path().join("run_20240101_000000").exists());
            assert!(dir.path().join("run_20240201_000000").exists());
            assert!(dir.path().join("run_20240301_000000").exists());
            assert!(dir.path().join("unrelated").exists());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_folder_round_trip() {
        let name = run_folder_name();
        assert!(name.starts_with("run_"));
        assert!(parse_run_folder(&name).is_some());
        assert!(parse_run_folder("run_yesterday").is_none());
        assert!(parse_run_folder("logs").is_none());
    }

    #[test]
    fn test_invalid_level_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(build_filter(&CrateDebugFlags::default(), "info").is_ok());
        assert!(build_filter(&CrateDebugFlags::default(), "neurite=loudest").is_err());
    }
}
