//! Dispatcher run model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::strategy::StrategyDecision;

/// Lifecycle state of one dispatched query run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Engine not yet launched.
    NotStarted,
    /// Engine process is running.
    Running,
    /// Polling the handshake channel for a pause point.
    AwaitingPause,
    /// Pause point observed; cost model running.
    Deciding,
    /// Decision written back; follow-up action in progress.
    Dispatched,
    /// Engine exited with code 0.
    Completed,
    /// Termination window elapsed before a usable pause point.
    Terminated,
    /// Engine, checkpoint utility, or decision failed.
    Failed,
}

impl RunState {
    /// Whether the run has reached a final state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Terminated | Self::Failed)
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Running | Self::Failed)
                | (Self::Running, Self::AwaitingPause | Self::Failed)
                | (
                    Self::AwaitingPause,
                    Self::Deciding | Self::Completed | Self::Terminated | Self::Failed
                )
                | (Self::Deciding, Self::Dispatched | Self::Terminated | Self::Failed)
                | (Self::Dispatched, Self::Completed | Self::Failed)
        )
    }
}

/// Final report for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct RunReport {
    /// Unique run identifier.
    pub run_id: String,
    /// Query that was executed.
    pub query: String,
    /// Terminal lifecycle state.
    pub state: RunState,
    /// Decision taken at the pause point, if one was reached.
    pub decision: Option<StrategyDecision>,
    /// Engine exit code (`None` if killed by a signal or never observed).
    pub exit_code: Option<i32>,
    /// Snapshot directory written by the checkpoint utility.
    pub snapshot_dir: Option<String>,
    /// Wall-clock seconds from launch to the terminal state.
    pub elapsed: f64,
    /// Failure description for `Failed` runs.
    pub error: Option<String>,
    /// Launch timestamp.
    pub started_at: DateTime<Utc>,
    /// Terminal-state timestamp.
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Start a report for a freshly created run.
    #[must_use]
    pub fn new(query: String) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            query,
            state: RunState::NotStarted,
            decision: None,
            exit_code: None,
            snapshot_dir: None,
            elapsed: 0.0,
            error: None,
            started_at: now,
            finished_at: now,
        }
    }
}
