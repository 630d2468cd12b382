//! Query engine launcher.
//!
//! Renders the engine command template for one run and spawns it with
//! `kill_on_drop(true)`. The shared segment names are exported to the
//! child so the engine attaches to the same handshake channel.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{info, info_span, warn};

use crate::config::EngineConfig;
use crate::handshake::{Field, SegmentNames};
use crate::models::query::QueryProfile;
use crate::{AppError, Result};

/// Environment variables carrying the segment names to the engine.
pub const SEGMENT_ENV_VARS: [(Field, &str); 4] = [
    (Field::Ready, "RIVETER_SHM_READY"),
    (Field::Strategy, "RIVETER_SHM_STRATEGY"),
    (Field::StateSize, "RIVETER_SHM_STATE_SIZE"),
    (Field::Sequence, "RIVETER_SHM_SEQUENCE"),
];

/// How long a stopped engine gets to exit after `SIGTERM` before it is killed.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Parameters of one engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Benchmark suite identifier.
    pub benchmark: String,
    /// Query identifier.
    pub query: String,
    /// Database location, or `memory`.
    pub database: String,
    /// Dataset directory.
    pub data_source: PathBuf,
    /// Engine scratch directory.
    pub temp_dir: PathBuf,
    /// Engine worker threads.
    pub threads: u32,
    /// Pipeline state persistence path.
    pub persistence_location: PathBuf,
}

impl RunRequest {
    /// Request for `query` using the engine defaults from configuration.
    #[must_use]
    pub fn from_config(engine: &EngineConfig, query: &str, profile: &QueryProfile) -> Self {
        Self {
            benchmark: profile.benchmark.clone(),
            query: query.to_owned(),
            database: engine.database.clone(),
            data_source: engine.data_source.clone(),
            temp_dir: engine.temp_dir.clone(),
            threads: engine.threads,
            persistence_location: engine.persistence_location.clone(),
        }
    }

    fn placeholders(&self) -> [(&'static str, String); 7] {
        [
            ("{benchmark}", self.benchmark.clone()),
            ("{query}", self.query.clone()),
            ("{database}", self.database.clone()),
            ("{data_source}", path_arg(&self.data_source)),
            ("{temp_dir}", path_arg(&self.temp_dir)),
            ("{threads}", self.threads.to_string()),
            ("{persistence_location}", path_arg(&self.persistence_location)),
        ]
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Substitute `{name}` placeholders in every template argument.
///
/// Unknown placeholders are left untouched.
#[must_use]
pub fn render_args<S: AsRef<str>>(template: &[String], vars: &[(&str, S)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (key, value)| {
                acc.replace(key, value.as_ref())
            })
        })
        .collect()
}

/// Rendered engine argument list for `request`.
#[must_use]
pub fn engine_args(engine: &EngineConfig, request: &RunRequest) -> Vec<String> {
    render_args(&engine.args, &request.placeholders())
}

/// Spawn the engine for `request`.
///
/// # Errors
///
/// Returns `AppError::LaunchFailure` if the process cannot be started.
pub fn launch(
    engine: &EngineConfig,
    request: &RunRequest,
    segments: &SegmentNames,
) -> Result<Child> {
    let span = info_span!("launch", query = %request.query, benchmark = %request.benchmark);
    let _guard = span.enter();

    let args = engine_args(engine, request);
    let mut cmd = Command::new(&engine.program);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    for (field, var) in SEGMENT_ENV_VARS {
        cmd.env(var, segments.name(field));
    }
    if let Some(dir) = &engine.working_dir {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(|err| {
        AppError::LaunchFailure(format!("failed to spawn {}: {err}", engine.program))
    })?;

    info!(
        pid = child.id().unwrap_or(0),
        program = %engine.program,
        ?args,
        "engine process spawned"
    );
    Ok(child)
}

/// Human-readable exit description.
#[must_use]
pub fn describe_exit(status: ExitStatus) -> String {
    if status.success() {
        "exited normally (code 0)".to_owned()
    } else {
        status.code().map_or_else(
            || "terminated by signal".to_owned(),
            |code| format!("exited with code {code}"),
        )
    }
}

/// Stop the engine: `SIGTERM` first on Unix, then a hard kill after
/// [`STOP_GRACE`].
pub async fn stop_engine(child: &mut Child) -> Option<ExitStatus> {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => {
                if let Ok(Ok(status)) = tokio::time::timeout(STOP_GRACE, child.wait()).await {
                    return Some(status);
                }
                warn!(pid, "engine ignored SIGTERM, killing");
            }
            Err(err) => warn!(pid, %err, "failed to send SIGTERM to engine"),
        }
    }

    if let Err(err) = child.kill().await {
        warn!(%err, "failed to kill engine process");
    }
    child.try_wait().ok().flatten()
}
