//! Structured audit logging for dispatcher decisions.
//!
//! Provides the [`AuditLogger`] trait and associated types. The primary
//! implementation, [`JsonlAuditWriter`], appends JSONL records to
//! daily-rotating files so every decision can be replayed offline.

pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::run::RunState;
use crate::models::strategy::{Strategy, StrategyDecision};

/// Event type classification for audit log entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Engine launched.
    RunStart,
    /// Strategy decided at a pause point.
    Decision,
    /// Process checkpoint utility invoked.
    Checkpoint,
    /// Run reached a terminal state.
    RunEnd,
}

/// A structured record of one dispatcher event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// ISO 8601 timestamp with timezone.
    pub timestamp: DateTime<Utc>,
    /// Run identifier.
    pub run_id: String,
    /// Query executed by the run.
    pub query: String,
    /// Event classification.
    pub event_type: AuditEventType,
    /// Strategy involved (decision and checkpoint events).
    pub strategy: Option<Strategy>,
    /// Full decision record (decision events).
    pub decision: Option<StrategyDecision>,
    /// Terminal state (run end events).
    pub state: Option<RunState>,
    /// Seconds since launch when the event happened.
    pub elapsed: Option<f64>,
    /// Free-form detail, e.g. an error message or snapshot directory.
    pub detail: Option<String>,
}

impl AuditEntry {
    /// Construct a minimal audit entry for the given event type.
    #[must_use]
    pub fn new(event_type: AuditEventType, run_id: &str, query: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id: run_id.to_owned(),
            query: query.to_owned(),
            event_type,
            strategy: None,
            decision: None,
            state: None,
            elapsed: None,
            detail: None,
        }
    }

    /// Attach a decision; also records its strategy and elapsed time.
    #[must_use]
    pub fn with_decision(mut self, decision: StrategyDecision) -> Self {
        self.strategy = Some(decision.chosen);
        self.elapsed = Some(decision.elapsed);
        self.decision = Some(decision);
        self
    }

    /// Set the strategy for this entry.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Set the terminal state for this entry.
    #[must_use]
    pub fn with_state(mut self, state: RunState) -> Self {
        self.state = Some(state);
        self
    }

    /// Set the elapsed time for this entry.
    #[must_use]
    pub fn with_elapsed(mut self, elapsed: f64) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    /// Set the detail text for this entry.
    #[must_use]
    pub fn with_detail(mut self, detail: String) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Writes structured audit entries to a persistent store.
///
/// Implementations must be [`Send`] and [`Sync`] to allow sharing across
/// async task boundaries via [`std::sync::Arc`].
pub trait AuditLogger: Send + Sync {
    /// Record a single audit entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write operation fails.
    fn log_entry(&self, entry: AuditEntry) -> crate::Result<()>;
}

pub use writer::JsonlAuditWriter;
