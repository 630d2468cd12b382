//! Global configuration parsing and validation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cost_model::{validate_probe_step, CostModelConfig};
use crate::estimator::DeviceProfile;
use crate::handshake::SegmentNames;
use crate::models::query::{QueryProfile, QueryRegistry};
use crate::models::strategy::{Strategy, TerminationWindow};
use crate::{AppError, Result};

/// How the query engine is launched.
///
/// `args` may contain the placeholders `{benchmark}`, `{query}`,
/// `{database}`, `{data_source}`, `{temp_dir}`, `{threads}` and
/// `{persistence_location}`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Engine executable.
    pub program: String,
    /// Argument template.
    #[serde(default)]
    pub args: Vec<String>,
    /// Database location, or `memory`.
    #[serde(default = "default_database")]
    pub database: String,
    /// Directory holding the benchmark dataset.
    pub data_source: PathBuf,
    /// Scratch directory for the engine.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    /// Engine worker threads.
    #[serde(default = "default_threads")]
    pub threads: u32,
    /// Where the engine persists pipeline state.
    pub persistence_location: PathBuf,
    /// Working directory for the engine process.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_database() -> String {
    "memory".into()
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("tmp")
}

fn default_threads() -> u32 {
    1
}

/// How the external process checkpoint utility is invoked.
///
/// `args` may contain `{snapshot_dir}`, `{pid}` and `{query}`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CheckpointConfig {
    /// Utility executable.
    #[serde(default = "default_checkpoint_program")]
    pub program: String,
    /// Argument template.
    #[serde(default = "default_checkpoint_args")]
    pub args: Vec<String>,
    /// Parent directory of per-run snapshot directories.
    #[serde(default = "default_snapshot_root")]
    pub snapshot_root: PathBuf,
}

fn default_checkpoint_program() -> String {
    "criu".into()
}

fn default_checkpoint_args() -> Vec<String> {
    [
        "dump",
        "-D",
        "{snapshot_dir}",
        "-t",
        "{pid}",
        "--shell-job",
        "--leave-running",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_snapshot_root() -> PathBuf {
    PathBuf::from("snapshots")
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            program: default_checkpoint_program(),
            args: default_checkpoint_args(),
            snapshot_root: default_snapshot_root(),
        }
    }
}

/// Decision audit log settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub struct AuditConfig {
    /// Directory for `decisions-YYYY-MM-DD.jsonl`; disabled when absent.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_time_probe_step() -> f64 {
    1.0
}

/// Global configuration parsed from `riveter.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Storage throughput used by both estimators.
    pub device: DeviceProfile,
    /// Preemption window, seconds since engine launch.
    pub termination: TerminationWindow,
    /// Spacing of probed process snapshot instants, in seconds.
    #[serde(default = "default_time_probe_step")]
    pub time_probe_step: f64,
    /// Handshake poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Historical records for the size regression (`.toml` or `.json`).
    #[serde(default)]
    pub training_data: Option<PathBuf>,
    /// Strategy used when the size regression cannot be fitted. Without it
    /// the dispatcher refuses to run.
    #[serde(default)]
    pub fallback_strategy: Option<Strategy>,
    /// Shared segment names.
    #[serde(default)]
    pub segments: SegmentNames,
    /// Engine launch settings.
    pub engine: EngineConfig,
    /// Checkpoint utility settings.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    /// Audit log settings.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Registered queries keyed by identifier.
    pub queries: BTreeMap<String, QueryProfile>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Handshake poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Cost model inputs derived from this configuration.
    #[must_use]
    pub fn cost_model_config(&self) -> CostModelConfig {
        CostModelConfig {
            device: self.device,
            window: self.termination,
            time_probe_step: self.time_probe_step,
        }
    }

    /// Build the query registry.
    #[must_use]
    pub fn query_registry(&self) -> QueryRegistry {
        QueryRegistry::new(self.queries.clone())
    }

    fn validate(&self) -> Result<()> {
        self.device.validate()?;
        self.termination.validate()?;
        self.segments.validate()?;

        validate_probe_step(&self.termination, self.time_probe_step)?;
        if self.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.engine.program.trim().is_empty() {
            return Err(AppError::Config("engine.program must not be empty".into()));
        }
        if self.engine.threads == 0 {
            return Err(AppError::Config(
                "engine.threads must be greater than zero".into(),
            ));
        }
        if self.checkpoint.program.trim().is_empty() {
            return Err(AppError::Config(
                "checkpoint.program must not be empty".into(),
            ));
        }
        if self.queries.is_empty() {
            return Err(AppError::Config(
                "at least one query must be registered under [queries]".into(),
            ));
        }
        Ok(())
    }
}
