//! Unit tests for run lifecycle transitions and the run report.

use riveter::models::run::{RunReport, RunState};

const ALL: [RunState; 8] = [
    RunState::NotStarted,
    RunState::Running,
    RunState::AwaitingPause,
    RunState::Deciding,
    RunState::Dispatched,
    RunState::Completed,
    RunState::Terminated,
    RunState::Failed,
];

#[test]
fn happy_path_transitions_are_allowed() {
    let path = [
        RunState::NotStarted,
        RunState::Running,
        RunState::AwaitingPause,
        RunState::Deciding,
        RunState::Dispatched,
        RunState::Completed,
    ];
    for pair in path.windows(2) {
        assert!(
            pair[0].can_transition_to(pair[1]),
            "{:?} -> {:?} should be allowed",
            pair[0],
            pair[1]
        );
    }
}

#[test]
fn engine_may_exit_before_any_pause_point() {
    assert!(RunState::AwaitingPause.can_transition_to(RunState::Completed));
    assert!(RunState::AwaitingPause.can_transition_to(RunState::Failed));
}

#[test]
fn window_close_terminates_from_awaiting_or_deciding() {
    assert!(RunState::AwaitingPause.can_transition_to(RunState::Terminated));
    assert!(RunState::Deciding.can_transition_to(RunState::Terminated));
    assert!(!RunState::Dispatched.can_transition_to(RunState::Terminated));
}

#[test]
fn every_live_state_can_fail() {
    for state in ALL.into_iter().filter(|s| !s.is_terminal()) {
        assert!(state.can_transition_to(RunState::Failed), "{state:?}");
    }
}

#[test]
fn terminal_states_have_no_successors() {
    for state in ALL.into_iter().filter(|s| s.is_terminal()) {
        for next in ALL {
            assert!(!state.can_transition_to(next), "{state:?} -> {next:?}");
        }
    }
}

#[test]
fn states_cannot_be_skipped_or_reversed() {
    assert!(!RunState::NotStarted.can_transition_to(RunState::Deciding));
    assert!(!RunState::Running.can_transition_to(RunState::Dispatched));
    assert!(!RunState::Dispatched.can_transition_to(RunState::AwaitingPause));
    assert!(!RunState::Deciding.can_transition_to(RunState::Running));
}

#[test]
fn terminal_classification() {
    assert!(RunState::Completed.is_terminal());
    assert!(RunState::Terminated.is_terminal());
    assert!(RunState::Failed.is_terminal());
    assert!(!RunState::Dispatched.is_terminal());
}

#[test]
fn run_state_serializes_snake_case() {
    let json = serde_json::to_string(&RunState::AwaitingPause).expect("serialize");
    assert_eq!(json, "\"awaiting_pause\"");
}

#[test]
fn new_report_starts_not_started() {
    let report = RunReport::new("q1".into());
    assert_eq!(report.state, RunState::NotStarted);
    assert_eq!(report.query, "q1");
    assert!(report.decision.is_none());
    assert!(report.exit_code.is_none());
    assert!(report.error.is_none());
    assert!(uuid::Uuid::parse_str(&report.run_id).is_ok());
}

#[test]
fn reports_get_distinct_run_ids() {
    let a = RunReport::new("q1".into());
    let b = RunReport::new("q1".into());
    assert_ne!(a.run_id, b.run_id);
}
