//! Query registry: explicit table from query identifier to plan features.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::estimator::process::PlanFeatures;
use crate::{AppError, Result};

/// Plan features of one registered query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct QueryProfile {
    /// Benchmark suite the query belongs to (e.g. `tpch`).
    #[serde(default = "default_benchmark")]
    pub benchmark: String,
    /// Number of join operators in the plan.
    pub num_joins: u32,
    /// Number of group-by operators in the plan.
    pub num_groupbys: u32,
    /// Rows read from the base tables.
    pub input_cardinality: u64,
}

impl QueryProfile {
    /// Regression inputs for this plan.
    #[must_use]
    pub fn features(&self) -> PlanFeatures {
        PlanFeatures {
            num_joins: self.num_joins,
            num_groupbys: self.num_groupbys,
            input_cardinality: self.input_cardinality,
        }
    }
}

fn default_benchmark() -> String {
    "tpch".into()
}

/// Lookup table built once at startup from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRegistry {
    entries: BTreeMap<String, QueryProfile>,
}

impl QueryRegistry {
    /// Build the registry from `(id, profile)` pairs.
    #[must_use]
    pub fn new(entries: BTreeMap<String, QueryProfile>) -> Self {
        Self { entries }
    }

    /// Resolve a query identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the identifier is not registered.
    pub fn resolve(&self, query_id: &str) -> Result<&QueryProfile> {
        self.entries.get(query_id).ok_or_else(|| {
            AppError::Config(format!(
                "unknown query '{query_id}' (registered: {})",
                self.ids().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    /// Registered identifiers in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of registered queries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no query is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
