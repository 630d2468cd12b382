//! Strategy cost model.
//!
//! Prices the three recovery strategies at a pause point and picks the
//! cheapest. All instants are seconds since the engine was launched.
//!
//! * **Redo** costs the work already done, weighted by the termination
//!   likelihood: `p(elapsed) · elapsed`.
//! * **Pipeline persistence** costs the observed state's suspend + resume
//!   time, plus `p(elapsed) · elapsed` if persisting would run past the
//!   window start.
//! * **Process checkpoint** probes snapshot instants `elapsed, elapsed +
//!   step, …` up to the window end and keeps the cheapest predicted suspend
//!   + resume time, again with an overrun penalty `p(t) · t`.
//!
//! Exact ties resolve as redo, then process checkpoint, then pipeline
//! persistence.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::config::GlobalConfig;
use crate::estimator::pipeline::PipelineLatencyEstimator;
use crate::estimator::process::{PlanFeatures, ProcessLatencyEstimator};
use crate::estimator::DeviceProfile;
use crate::models::record::TrainingCorpus;
use crate::models::strategy::{
    DecisionBasis, Strategy, StrategyCosts, StrategyDecision, TerminationWindow,
};
use crate::{AppError, Result};

/// Most process snapshot instants a single decision may probe.
pub const MAX_PROBE_INSTANTS: usize = 100_000;

/// Inputs fixed for the lifetime of a cost model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct CostModelConfig {
    /// Storage throughput.
    pub device: DeviceProfile,
    /// Preemption window for this run.
    pub window: TerminationWindow,
    /// Spacing of probed process snapshot instants, in seconds.
    pub time_probe_step: f64,
}

/// Cheapest probed process snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOutcome {
    /// Instants evaluated.
    pub candidates: usize,
    /// Best instant and its cost, if any instant was evaluated.
    pub best: Option<(f64, f64)>,
}

/// Per-run cost model.
#[derive(Debug, Clone)]
pub struct CostModel {
    config: CostModelConfig,
    pipeline: PipelineLatencyEstimator,
    process: Option<ProcessLatencyEstimator>,
}

impl CostModel {
    /// Build a model. `process` is `None` when no size regression could be
    /// fitted; process checkpoints are then priced as infeasible.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the window is invalid or the probe step
    /// fails [`validate_probe_step`].
    pub fn new(config: CostModelConfig, process: Option<ProcessLatencyEstimator>) -> Result<Self> {
        config.window.validate()?;
        validate_probe_step(&config.window, config.time_probe_step)?;
        Ok(Self {
            pipeline: PipelineLatencyEstimator::new(config.device),
            config,
            process,
        })
    }

    /// Build a model from configuration, training the size regression on
    /// `training_data` when it is set.
    ///
    /// A regression that cannot be fitted is tolerated only when a
    /// `fallback_strategy` is configured.
    ///
    /// # Errors
    ///
    /// Returns corpus loading errors, and `AppError::InsufficientData` or
    /// `AppError::SingularFit` when fitting fails without a fallback.
    pub fn from_config(config: &GlobalConfig) -> Result<Self> {
        let process = match &config.training_data {
            Some(path) => {
                let corpus = TrainingCorpus::load_from_path(path)?;
                match ProcessLatencyEstimator::train(corpus.records(), config.device) {
                    Ok(estimator) => {
                        info!(
                            records = corpus.len(),
                            coefficients = ?estimator.model().coefficients,
                            "size regression fitted"
                        );
                        Some(estimator)
                    }
                    Err(err) if err.is_fit_failure() && config.fallback_strategy.is_some() => {
                        warn!(%err, "size regression unavailable, fallback strategy in effect");
                        None
                    }
                    Err(err) => return Err(err),
                }
            }
            None => None,
        };
        Self::new(config.cost_model_config(), process)
    }

    /// The configuration this model was built with.
    #[must_use]
    pub fn config(&self) -> &CostModelConfig {
        &self.config
    }

    /// Whether a process-level estimator is available.
    #[must_use]
    pub fn has_process_estimator(&self) -> bool {
        self.process.is_some()
    }

    /// Cost of abandoning the work done so far.
    #[must_use]
    pub fn redo_cost(&self, elapsed: f64) -> f64 {
        self.config.window.current_term_prob(elapsed) * elapsed
    }

    /// Cost of persisting the observed pipeline state now.
    #[must_use]
    pub fn pipeline_cost(&self, elapsed: f64, observed_bytes: u64) -> f64 {
        let latency = self.pipeline.estimate(observed_bytes);
        latency.round_trip() + self.overrun_penalty(elapsed, latency.suspend)
    }

    /// Number of snapshot instants probed from `elapsed`:
    /// `floor((end - elapsed) / step) + 1`, or zero once `elapsed ≥ end`.
    ///
    /// Never more than [`MAX_PROBE_INSTANTS`]. A validated step stays under
    /// that bound for any `elapsed ≥ 0`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn probe_count(&self, elapsed: f64) -> usize {
        let end = self.config.window.end;
        if !elapsed.is_finite() || elapsed >= end {
            return 0;
        }
        let count = ((end - elapsed) / self.config.time_probe_step).floor() + 1.0;
        if count >= MAX_PROBE_INSTANTS as f64 {
            MAX_PROBE_INSTANTS
        } else {
            count as usize
        }
    }

    /// Probe process snapshot instants and keep the cheapest (earliest on
    /// ties).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn probe_process_checkpoint(&self, elapsed: f64, features: PlanFeatures) -> ProbeOutcome {
        let Some(process) = self.process.as_ref() else {
            return ProbeOutcome {
                candidates: 0,
                best: None,
            };
        };

        let candidates = self.probe_count(elapsed);
        let mut best: Option<(f64, f64)> = None;
        for i in 0..candidates {
            let t = elapsed + i as f64 * self.config.time_probe_step;
            let latency = process.estimate(features, t);
            let cost = latency.round_trip() + self.overrun_penalty(t, latency.suspend);
            if cost.is_nan() {
                continue;
            }
            match best {
                Some((_, best_cost)) if cost >= best_cost => {}
                _ => best = Some((t, cost)),
            }
        }
        ProbeOutcome { candidates, best }
    }

    /// Price every strategy and pick the cheapest.
    ///
    /// # Errors
    ///
    /// Returns `AppError::CostModelUnresolved` if every strategy's cost is
    /// infinite or undefined.
    pub fn decide(
        &self,
        elapsed: f64,
        observed_bytes: u64,
        features: PlanFeatures,
    ) -> Result<StrategyDecision> {
        let span = info_span!("decide", elapsed, observed_bytes);
        let _guard = span.enter();

        let probe = self.probe_process_checkpoint(elapsed, features);
        let costs = StrategyCosts {
            redo: self.redo_cost(elapsed),
            process_checkpoint: probe.best.map_or(f64::INFINITY, |(_, cost)| cost),
            pipeline_persist: self.pipeline_cost(elapsed, observed_bytes),
        };
        debug!(?costs, probed = probe.candidates, "strategy costs computed");

        let Some((chosen, expected_cost)) = costs.cheapest() else {
            return Err(AppError::CostModelUnresolved(format!(
                "no feasible strategy at elapsed {elapsed:.3}s with {observed_bytes} bytes \
                 (redo {}, process {}, pipeline {})",
                costs.redo, costs.process_checkpoint, costs.pipeline_persist
            )));
        };

        Ok(StrategyDecision {
            chosen,
            expected_cost,
            costs,
            checkpoint_at: if chosen == Strategy::ProcessCheckpoint {
                probe.best.map(|(t, _)| t)
            } else {
                None
            },
            probed_instants: probe.candidates,
            elapsed,
            observed_bytes,
            basis: DecisionBasis::CostModel,
        })
    }

    /// `p(t) · t` when an operation starting at `t` and lasting `suspend`
    /// would end inside the termination window, zero otherwise.
    fn overrun_penalty(&self, t: f64, suspend: f64) -> f64 {
        if t + suspend > self.config.window.start {
            self.config.window.current_term_prob(t) * t
        } else {
            0.0
        }
    }
}

/// Check that `step` is positive, finite, and probes at most
/// [`MAX_PROBE_INSTANTS`] instants between launch and the window end.
///
/// # Errors
///
/// Returns `AppError::Config` naming the step and the instant count it
/// would need.
#[allow(clippy::cast_precision_loss)]
pub fn validate_probe_step(window: &TerminationWindow, step: f64) -> Result<()> {
    if !(step.is_finite() && step > 0.0) {
        return Err(AppError::Config(format!(
            "time_probe_step must be positive and finite, got {step}"
        )));
    }
    let instants = (window.end.max(0.0) / step).floor() + 1.0;
    if instants > MAX_PROBE_INSTANTS as f64 {
        return Err(AppError::Config(format!(
            "time_probe_step {step} needs {instants} probes to reach window end {}, \
             limit is {MAX_PROBE_INSTANTS}",
            window.end
        )));
    }
    Ok(())
}
