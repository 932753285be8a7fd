//! Tracing setup for the CLI and the demo worker.
//!
//! Everything goes to stderr and to a daily file under the log directory.
//! The file layer records thread names so UI and worker lines can be told
//! apart.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "emulator-bridge.log";
const LOG_DIR_ENV: &str = "EMULATOR_BRIDGE_LOG_PATH";
const SECS_PER_DAY: u64 = 60 * 60 * 24;

/// Install the global subscriber described by `config`.
///
/// Hold the returned guard until exit; dropping it flushes the file writer.
pub fn init_logging(config: &LoggingConfig) -> Result<WorkerGuard> {
    let filter = build_filter(std::env::var("RUST_LOG").ok().as_deref(), &config.level)?;

    let log_dir = log_dir(std::env::var_os(LOG_DIR_ENV), config.directory.as_deref())?;
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {:?}", log_dir))?;

    let pruned = match retention(config.retention_days) {
        Some(max_age) => prune_old_logs(&log_dir, max_age),
        None => 0,
    };

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_thread_names(true),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    info!("Logging to {:?}", log_dir);
    if pruned > 0 {
        debug!("Removed {} expired log files", pruned);
    }
    Ok(guard)
}

/// `RUST_LOG` wins over the configured level. A bad directive is an error
/// rather than a silent fallback.
fn build_filter(from_env: Option<&str>, configured: &str) -> Result<EnvFilter> {
    match from_env.filter(|directive| !directive.trim().is_empty()) {
        Some(directive) => EnvFilter::try_new(directive)
            .with_context(|| format!("Invalid RUST_LOG directive: {:?}", directive)),
        None => EnvFilter::try_new(configured)
            .with_context(|| format!("Invalid logging.level: {:?}", configured)),
    }
}

fn log_dir(from_env: Option<OsString>, configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = from_env.filter(|dir| !dir.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    if let Some(dir) = configured {
        return Ok(dir.to_path_buf());
    }

    let dirs = ProjectDirs::from("dev", "emulator-bridge", "bridge")
        .context("Failed to determine project directories for log path")?;
    Ok(dirs.state_dir().unwrap_or_else(|| dirs.data_local_dir()).join("logs"))
}

fn retention(days: u64) -> Option<Duration> {
    (days > 0).then(|| Duration::from_secs(days.saturating_mul(SECS_PER_DAY)))
}

/// Delete our rolled files older than `max_age`. Returns how many went.
fn prune_old_logs(log_dir: &Path, max_age: Duration) -> usize {
    let (Ok(entries), Some(cutoff)) = (
        std::fs::read_dir(log_dir),
        SystemTime::now().checked_sub(max_age),
    ) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let ours = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX));
        let expired = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .is_ok_and(|modified| modified < cutoff);

        if ours && expired && entry.path().is_file() && std::fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    removed
}
