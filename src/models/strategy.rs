//! Recovery strategies, the termination window, and decision records.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Recovery strategy selected at a pause point.
///
/// The discriminants are the strategy selector values written into the
/// shared handshake segment; `0` is reserved for "undecided".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Abandon in-progress state and re-run the query if terminated.
    Redo = 1,
    /// Snapshot the whole engine process with the external utility.
    ProcessCheckpoint = 2,
    /// Let the engine persist its pipeline-local state.
    PipelinePersist = 3,
}

impl Strategy {
    /// Exact-tie resolution order, most preferred first.
    pub const TIE_BREAK_ORDER: [Self; 3] =
        [Self::Redo, Self::ProcessCheckpoint, Self::PipelinePersist];

    /// Wire value for the 16-bit strategy selector.
    #[must_use]
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Decode a strategy selector; `0` (undecided) yields `None`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Handshake` for selector values outside `0..=3`.
    pub fn from_code(code: u16) -> Result<Option<Self>> {
        match code {
            0 => Ok(None),
            1 => Ok(Some(Self::Redo)),
            2 => Ok(Some(Self::ProcessCheckpoint)),
            3 => Ok(Some(Self::PipelinePersist)),
            other => Err(AppError::Handshake(format!(
                "unknown strategy selector {other}"
            ))),
        }
    }
}

impl Display for Strategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Redo => "redo",
            Self::ProcessCheckpoint => "process_checkpoint",
            Self::PipelinePersist => "pipeline_persist",
        };
        f.write_str(name)
    }
}

/// Period during which the engine may be preempted, in seconds since launch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct TerminationWindow {
    /// Earliest instant at which termination may occur.
    pub start: f64,
    /// Latest instant at which termination may occur.
    pub end: f64,
    /// Likelihood of termination inside the window.
    pub probability: f64,
}

impl TerminationWindow {
    /// Construct and validate a window.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if any bound is non-finite, `start > end`,
    /// or `probability` lies outside `[0, 1]`.
    pub fn new(start: f64, end: f64, probability: f64) -> Result<Self> {
        let window = Self {
            start,
            end,
            probability,
        };
        window.validate()?;
        Ok(window)
    }

    /// Check window invariants.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when an invariant is violated.
    pub fn validate(&self) -> Result<()> {
        if !(self.start.is_finite() && self.end.is_finite() && self.probability.is_finite()) {
            return Err(AppError::Config(
                "termination window values must be finite".into(),
            ));
        }
        if self.start > self.end {
            return Err(AppError::Config(format!(
                "termination window start {} is after end {}",
                self.start, self.end
            )));
        }
        if !(0.0..=1.0).contains(&self.probability) {
            return Err(AppError::Config(format!(
                "termination probability {} outside [0, 1]",
                self.probability
            )));
        }
        Ok(())
    }

    /// Termination likelihood evaluated at instant `t`.
    ///
    /// A certain termination (`probability == 1`) decays linearly towards
    /// the window end as `(end - t) / end`; any other probability is
    /// constant. The decaying form is not clamped, so it goes negative past
    /// `end`.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn current_term_prob(&self, t: f64) -> f64 {
        if self.probability == 1.0 {
            (self.end - t) / self.end
        } else {
            self.probability
        }
    }
}

/// Expected cost of every strategy at one pause point.
///
/// Infeasible strategies carry `f64::INFINITY`. Non-finite costs serialize
/// as the strings `"inf"`, `"-inf"`, and `"nan"`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StrategyCosts {
    /// Cost of abandoning the work done so far.
    #[serde(with = "cost_value")]
    pub redo: f64,
    /// Best probed cost of a whole-process snapshot.
    #[serde(with = "cost_value")]
    pub process_checkpoint: f64,
    /// Cost of persisting the pipeline-local state now.
    #[serde(with = "cost_value")]
    pub pipeline_persist: f64,
}

impl StrategyCosts {
    /// Cost for one strategy.
    #[must_use]
    pub fn get(&self, strategy: Strategy) -> f64 {
        match strategy {
            Strategy::Redo => self.redo,
            Strategy::ProcessCheckpoint => self.process_checkpoint,
            Strategy::PipelinePersist => self.pipeline_persist,
        }
    }

    /// Cheapest feasible strategy, or `None` when every cost is infinite or NaN.
    ///
    /// Comparison runs in [`Strategy::TIE_BREAK_ORDER`] with a strict
    /// less-than, so exact ties keep the earlier strategy.
    #[must_use]
    pub fn cheapest(&self) -> Option<(Strategy, f64)> {
        let mut best: Option<(Strategy, f64)> = None;
        for strategy in Strategy::TIE_BREAK_ORDER {
            let cost = self.get(strategy);
            if !cost.is_finite() {
                continue;
            }
            match best {
                Some((_, best_cost)) if cost >= best_cost => {}
                _ => best = Some((strategy, cost)),
            }
        }
        best
    }
}

/// How a decision was reached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionBasis {
    /// Minimum over the cost model.
    CostModel,
    /// Configured fallback used because no size regression was available.
    Fallback,
}

/// Outcome of one decision cycle. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StrategyDecision {
    /// Selected strategy.
    pub chosen: Strategy,
    /// Cost of the selected strategy (`NaN` for fallback decisions).
    #[serde(with = "cost_value")]
    pub expected_cost: f64,
    /// Per-strategy breakdown.
    pub costs: StrategyCosts,
    /// Seconds since launch at which a process snapshot should be taken.
    pub checkpoint_at: Option<f64>,
    /// Number of candidate instants the process probe evaluated.
    pub probed_instants: usize,
    /// Seconds since launch at the pause point.
    pub elapsed: f64,
    /// Engine-reported persisted state size in bytes.
    pub observed_bytes: u64,
    /// How the strategy was chosen.
    pub basis: DecisionBasis,
}

impl StrategyDecision {
    /// Decision produced without consulting the cost model.
    #[must_use]
    pub fn fallback(strategy: Strategy, elapsed: f64, observed_bytes: u64) -> Self {
        Self {
            chosen: strategy,
            expected_cost: f64::NAN,
            costs: StrategyCosts {
                redo: f64::NAN,
                process_checkpoint: f64::NAN,
                pipeline_persist: f64::NAN,
            },
            checkpoint_at: if strategy == Strategy::ProcessCheckpoint {
                Some(elapsed)
            } else {
                None
            },
            probed_instants: 0,
            elapsed,
            observed_bytes,
            basis: DecisionBasis::Fallback,
        }
    }
}

mod cost_value {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(cost: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if cost.is_finite() {
            serializer.serialize_f64(*cost)
        } else if cost.is_nan() {
            serializer.serialize_str("nan")
        } else if cost.is_sign_positive() {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(cost) => Ok(cost),
            Repr::Text(text) => match text.as_str() {
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                "nan" => Ok(f64::NAN),
                other => Err(de::Error::invalid_value(
                    de::Unexpected::Str(other),
                    &"a number, \"inf\", \"-inf\", or \"nan\"",
                )),
            },
        }
    }
}
