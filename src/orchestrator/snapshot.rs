//! External process checkpoint utility invocation.
//!
//! The utility (CRIU by default) is handed a snapshot directory derived from
//! the query id and engine pid. A non-zero exit is reported, never retried.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, info_span, Instrument};

use super::launcher::{describe_exit, render_args};
use crate::config::CheckpointConfig;
use crate::{AppError, Result};

/// Snapshot directory for one engine process: `<root>/<query>_<pid>`.
#[must_use]
pub fn snapshot_dir(root: &Path, query: &str, pid: u32) -> PathBuf {
    root.join(format!("{query}_{pid}"))
}

/// Rendered utility argument list.
#[must_use]
pub fn checkpoint_args(config: &CheckpointConfig, dir: &Path, query: &str, pid: u32) -> Vec<String> {
    render_args(
        &config.args,
        &[
            ("{snapshot_dir}", dir.to_string_lossy().into_owned()),
            ("{pid}", pid.to_string()),
            ("{query}", query.to_owned()),
        ],
    )
}

/// Snapshot process `pid` and return the snapshot directory.
///
/// # Errors
///
/// Returns `AppError::CheckpointUtility` if the directory cannot be created,
/// the utility cannot be started, or it exits unsuccessfully.
pub async fn take_snapshot(config: &CheckpointConfig, query: &str, pid: u32) -> Result<PathBuf> {
    let dir = snapshot_dir(&config.snapshot_root, query, pid);
    let span = info_span!("take_snapshot", query, pid, dir = %dir.display());

    async {
        tokio::fs::create_dir_all(&dir).await.map_err(|err| {
            AppError::CheckpointUtility(format!(
                "failed to create snapshot directory {}: {err}",
                dir.display()
            ))
        })?;

        let args = checkpoint_args(config, &dir, query, pid);
        let status = Command::new(&config.program)
            .args(&args)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|err| {
                AppError::CheckpointUtility(format!(
                    "failed to start {}: {err}",
                    config.program
                ))
            })?;

        if !status.success() {
            return Err(AppError::CheckpointUtility(format!(
                "{} {} for pid {pid}",
                config.program,
                describe_exit(status)
            )));
        }

        info!("process snapshot written");
        Ok(dir.clone())
    }
    .instrument(span)
    .await
}
