//! Historical execution records used to train the size regression.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// One historical run of a query that was suspended at a known instant.
///
/// Field names on the wire follow the training files produced by earlier
/// benchmark runs (`num_join`, `persistence_size`, ...).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    /// Number of join operators in the plan.
    #[serde(rename = "num_join")]
    pub num_joins: u32,
    /// Number of group-by operators in the plan.
    #[serde(rename = "num_groupby")]
    pub num_groupbys: u32,
    /// Rows read from the base tables.
    pub input_cardinality: u64,
    /// Seconds since start at which the run was suspended.
    pub suspension_point: f64,
    /// Bytes persisted by the suspension.
    #[serde(rename = "persistence_size")]
    pub persisted_bytes: u64,
}

#[derive(Debug, Deserialize)]
struct TomlCorpus {
    #[serde(default)]
    records: Vec<ExecutionRecord>,
}

/// Materialized list of historical records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingCorpus {
    records: Vec<ExecutionRecord>,
}

impl TrainingCorpus {
    /// Wrap an already-parsed record list.
    #[must_use]
    pub fn new(records: Vec<ExecutionRecord>) -> Self {
        Self { records }
    }

    /// Load records from a `.toml` (`[[records]]` tables) or `.json`
    /// (top-level array) file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be read and
    /// `AppError::Config` for an unknown extension or malformed content.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            AppError::Io(format!(
                "failed to read training data {}: {err}",
                path.display()
            ))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&raw),
            Some("json") => Self::from_json_str(&raw),
            other => Err(AppError::Config(format!(
                "unsupported training data format {other:?} for {}",
                path.display()
            ))),
        }
    }

    /// Parse `[[records]]` tables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` on malformed TOML.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let parsed: TomlCorpus = toml::from_str(raw)?;
        Ok(Self::new(parsed.records))
    }

    /// Parse a JSON array of records.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` on malformed JSON.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let records: Vec<ExecutionRecord> = serde_json::from_str(raw)?;
        Ok(Self::new(records))
    }

    /// Borrow the records.
    #[must_use]
    pub fn records(&self) -> &[ExecutionRecord] {
        &self.records
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the corpus holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
