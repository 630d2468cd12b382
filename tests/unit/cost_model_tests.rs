//! Unit tests for strategy pricing and selection.

use riveter::cost_model::{validate_probe_step, CostModel, CostModelConfig, MAX_PROBE_INSTANTS};
use riveter::estimator::process::{PlanFeatures, ProcessLatencyEstimator, RegressionModel};
use riveter::estimator::DeviceProfile;
use riveter::models::strategy::{DecisionBasis, Strategy, TerminationWindow};
use riveter::AppError;

const DEVICE: DeviceProfile = DeviceProfile {
    write_bytes_per_sec: 2500.0,
    read_bytes_per_sec: 2500.0,
};

fn features() -> PlanFeatures {
    PlanFeatures {
        num_joins: 3,
        num_groupbys: 1,
        input_cardinality: 150_000,
    }
}

/// Process estimator that always predicts `bytes`.
fn constant_size(bytes: f64) -> ProcessLatencyEstimator {
    ProcessLatencyEstimator::new(
        RegressionModel {
            coefficients: [0.0, 0.0, 0.0, 0.0, bytes],
        },
        DEVICE,
    )
}

fn model(
    start: f64,
    end: f64,
    probability: f64,
    process: Option<ProcessLatencyEstimator>,
) -> CostModel {
    CostModel::new(
        CostModelConfig {
            device: DEVICE,
            window: TerminationWindow::new(start, end, probability).expect("window"),
            time_probe_step: 1.0,
        },
        process,
    )
    .expect("cost model")
}

#[test]
fn rejects_non_positive_probe_step() {
    let err = CostModel::new(
        CostModelConfig {
            device: DEVICE,
            window: TerminationWindow::new(0.0, 10.0, 0.5).expect("window"),
            time_probe_step: 0.0,
        },
        None,
    )
    .expect_err("zero step");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn rejects_step_finer_than_instant_budget() {
    let err = CostModel::new(
        CostModelConfig {
            device: DEVICE,
            window: TerminationWindow::new(0.0, 1.0e6, 0.5).expect("window"),
            time_probe_step: 1.0e-9,
        },
        None,
    )
    .expect_err("unbounded probing");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn instant_budget_boundary() {
    let window = TerminationWindow::new(0.0, 99_999.0, 0.5).expect("window");
    validate_probe_step(&window, 1.0).expect("exactly at the limit");

    let window = TerminationWindow::new(0.0, 100_000.0, 0.5).expect("window");
    assert!(validate_probe_step(&window, 1.0).is_err());
    validate_probe_step(&window, 2.0).expect("coarser step");
}

#[test]
fn instant_count_never_exceeds_budget() {
    let costs = model(5.0, 20.0, 0.7, Some(constant_size(100.0)));
    assert_eq!(costs.probe_count(-1.0e12), MAX_PROBE_INSTANTS);
}

#[test]
fn pipeline_wins_for_small_observed_state() {
    let costs = model(5.0, 20.0, 0.7, Some(constant_size(5000.0)));
    let decision = costs.decide(4.0, 500, features()).expect("decide");

    assert_eq!(decision.chosen, Strategy::PipelinePersist);
    assert!((decision.expected_cost - 0.4).abs() < 1e-9);
    assert!((decision.costs.pipeline_persist - 0.4).abs() < 1e-9);
    assert!((decision.costs.redo - 2.8).abs() < 1e-9);
    assert!(decision.costs.process_checkpoint > 0.4);
    assert_eq!(decision.checkpoint_at, None);
    assert_eq!(decision.basis, DecisionBasis::CostModel);
}

#[test]
fn redo_is_free_at_end_of_certain_window() {
    let costs = model(0.0, 20.0, 1.0, Some(constant_size(5000.0)));
    let decision = costs.decide(20.0, 1000, features()).expect("decide");

    assert_eq!(decision.chosen, Strategy::Redo);
    assert!(decision.expected_cost.abs() < 1e-12);
    assert_eq!(decision.probed_instants, 0);
    assert!(decision.costs.process_checkpoint.is_infinite());
}

#[test]
fn exact_tie_between_redo_and_pipeline_picks_redo() {
    let costs = model(100.0, 200.0, 0.5, None);
    let decision = costs.decide(0.0, 0, features()).expect("decide");
    assert_eq!(decision.chosen, Strategy::Redo);
    assert!(decision.expected_cost.abs() < 1e-12);
}

#[test]
fn exact_tie_between_process_and_pipeline_picks_process() {
    let costs = model(100.0, 200.0, 0.5, Some(constant_size(1000.0)));
    let decision = costs.decide(10.0, 1000, features()).expect("decide");

    assert_eq!(decision.chosen, Strategy::ProcessCheckpoint);
    assert_eq!(
        decision.costs.process_checkpoint.to_bits(),
        decision.costs.pipeline_persist.to_bits()
    );
    assert_eq!(decision.checkpoint_at, Some(10.0));
}

#[test]
fn decisions_are_deterministic() {
    let costs = model(5.0, 30.0, 0.4, Some(constant_size(2500.0)));
    let first = costs.decide(7.25, 4096, features()).expect("decide");
    let second = costs.decide(7.25, 4096, features()).expect("decide");
    assert_eq!(first.chosen, second.chosen);
    assert_eq!(first.expected_cost.to_bits(), second.expected_cost.to_bits());
    assert_eq!(first.checkpoint_at, second.checkpoint_at);
    assert_eq!(first.probed_instants, second.probed_instants);
}

#[test]
fn probe_count_covers_elapsed_through_window_end() {
    let costs = model(5.0, 20.0, 0.7, None);
    assert_eq!(costs.probe_count(4.0), 17);
    assert_eq!(costs.probe_count(19.5), 1);
    assert_eq!(costs.probe_count(0.0), 21);
}

#[test]
fn probe_count_respects_step() {
    let costs = CostModel::new(
        CostModelConfig {
            device: DEVICE,
            window: TerminationWindow::new(5.0, 20.0, 0.7).expect("window"),
            time_probe_step: 3.0,
        },
        None,
    )
    .expect("cost model");
    assert_eq!(costs.probe_count(4.0), 6);
}

#[test]
fn probe_range_is_empty_at_or_after_window_end() {
    let costs = model(5.0, 20.0, 0.7, Some(constant_size(100.0)));
    assert_eq!(costs.probe_count(20.0), 0);
    assert_eq!(costs.probe_count(25.0), 0);

    let outcome = costs.probe_process_checkpoint(25.0, features());
    assert_eq!(outcome.candidates, 0);
    assert_eq!(outcome.best, None);
}

#[test]
fn probe_keeps_earliest_instant_on_ties() {
    let costs = model(100.0, 200.0, 0.5, Some(constant_size(1000.0)));
    let outcome = costs.probe_process_checkpoint(10.0, features());
    let (at, cost) = outcome.best.expect("best instant");
    assert!((at - 10.0).abs() < 1e-12);
    assert!((cost - 0.8).abs() < 1e-9);
    assert_eq!(outcome.candidates, 191);
}

#[test]
fn probe_prefers_instants_before_the_window() {
    // Size grows over time, so the earliest instant is cheapest and carries
    // no overrun penalty.
    let growing = ProcessLatencyEstimator::new(
        RegressionModel {
            coefficients: [0.0, 0.0, 0.0, 100.0, 100.0],
        },
        DEVICE,
    );
    let costs = model(10.0, 20.0, 0.5, Some(growing));
    let outcome = costs.probe_process_checkpoint(2.0, features());
    let (at, cost) = outcome.best.expect("best instant");
    assert!((at - 2.0).abs() < 1e-12);
    assert!((cost - 0.24).abs() < 1e-9);
}

#[test]
fn process_checkpoint_is_infeasible_without_estimator() {
    let costs = model(5.0, 20.0, 0.7, None);
    assert!(!costs.has_process_estimator());
    let decision = costs.decide(6.0, 100, features()).expect("decide");
    assert!(decision.costs.process_checkpoint.is_infinite());
    assert_eq!(decision.probed_instants, 0);
}

#[test]
fn pipeline_pays_overrun_penalty_inside_window() {
    let costs = model(5.0, 20.0, 0.5, None);
    // 2500 bytes take one second to write, so persisting from 4.5 ends at 5.5.
    let cost = costs.pipeline_cost(4.5, 2500);
    assert!((cost - (2.0 + 0.5 * 4.5)).abs() < 1e-9);
    // From 3.0 it finishes at 4.0, before the window opens.
    assert!((costs.pipeline_cost(3.0, 2500) - 2.0).abs() < 1e-9);
}

#[test]
fn redo_cost_scales_with_elapsed() {
    let costs = model(5.0, 20.0, 0.7, None);
    assert!((costs.redo_cost(10.0) - 7.0).abs() < 1e-9);
    assert!(costs.redo_cost(0.0).abs() < 1e-12);
}

#[test]
fn undefined_costs_are_unresolved() {
    // A certain termination with a zero-length window makes p(t) = 0/0.
    let costs = model(0.0, 0.0, 1.0, None);
    let err = costs.decide(0.0, 1000, features()).expect_err("all NaN");
    assert!(matches!(err, AppError::CostModelUnresolved(_)));
}
