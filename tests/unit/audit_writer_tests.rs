//! Unit tests for `JsonlAuditWriter`.

use std::fs;
use std::sync::Arc;

use chrono::Utc;
use riveter::audit::{AuditEntry, AuditEventType, AuditLogger, JsonlAuditWriter};
use riveter::models::run::RunState;
use riveter::models::strategy::{Strategy, StrategyDecision};

fn read_lines(writer: &JsonlAuditWriter) -> Vec<serde_json::Value> {
    let path = writer.path_for(Utc::now().date_naive());
    fs::read_to_string(path)
        .expect("read log")
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid json line"))
        .collect()
}

#[test]
fn new_creates_missing_directory() {
    let temp = tempfile::tempdir().expect("tempdir");
    let log_dir = temp.path().join("nested").join("decisions");
    assert!(!log_dir.exists());

    JsonlAuditWriter::new(log_dir.clone()).expect("writer");
    assert!(log_dir.is_dir());
}

#[test]
fn file_name_carries_the_date() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = JsonlAuditWriter::new(temp.path().to_path_buf()).expect("writer");
    let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 9).expect("date");
    assert_eq!(
        writer.path_for(date),
        temp.path().join("decisions-2024-03-09.jsonl")
    );
}

#[test]
fn entries_are_appended_one_per_line() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = JsonlAuditWriter::new(temp.path().to_path_buf()).expect("writer");

    writer
        .log_entry(AuditEntry::new(AuditEventType::RunStart, "run-1", "q1"))
        .expect("start");
    writer
        .log_entry(
            AuditEntry::new(AuditEventType::RunEnd, "run-1", "q1")
                .with_state(RunState::Completed)
                .with_elapsed(12.5),
        )
        .expect("end");

    let lines = read_lines(&writer);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["event_type"], "run_start");
    assert_eq!(lines[0]["run_id"], "run-1");
    assert_eq!(lines[1]["event_type"], "run_end");
    assert_eq!(lines[1]["state"], "completed");
    assert_eq!(lines[1]["elapsed"], 12.5);
}

#[test]
fn decision_entries_carry_strategy_and_costs() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = JsonlAuditWriter::new(temp.path().to_path_buf()).expect("writer");

    let decision = StrategyDecision::fallback(Strategy::PipelinePersist, 4.0, 500);
    writer
        .log_entry(AuditEntry::new(AuditEventType::Decision, "run-2", "q5").with_decision(decision))
        .expect("decision");

    let lines = read_lines(&writer);
    assert_eq!(lines[0]["strategy"], "pipeline_persist");
    assert_eq!(lines[0]["elapsed"], 4.0);
    assert_eq!(lines[0]["decision"]["observed_bytes"], 500);
    assert_eq!(lines[0]["decision"]["basis"], "fallback");
    assert_eq!(lines[0]["decision"]["expected_cost"], "nan");
}

#[test]
fn logged_decisions_can_be_read_back() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = JsonlAuditWriter::new(temp.path().to_path_buf()).expect("writer");

    let mut decision = StrategyDecision::fallback(Strategy::Redo, 2.0, 10);
    decision.costs.process_checkpoint = f64::INFINITY;
    writer
        .log_entry(AuditEntry::new(AuditEventType::Decision, "run-3", "q2").with_decision(decision))
        .expect("decision");

    let raw = fs::read_to_string(writer.path_for(Utc::now().date_naive())).expect("read log");
    let entry: AuditEntry = serde_json::from_str(raw.trim_end()).expect("replayable entry");
    let replayed = entry.decision.expect("decision");
    assert_eq!(replayed.chosen, Strategy::Redo);
    assert!(replayed.costs.process_checkpoint.is_infinite());
    assert!(replayed.expected_cost.is_nan());
}

#[test]
fn concurrent_writes_produce_valid_lines() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = Arc::new(JsonlAuditWriter::new(temp.path().to_path_buf()).expect("writer"));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let writer = Arc::clone(&writer);
            std::thread::spawn(move || {
                for j in 0..10 {
                    writer
                        .log_entry(
                            AuditEntry::new(AuditEventType::Checkpoint, &format!("run-{i}"), "q1")
                                .with_detail(format!("snapshot {j}")),
                        )
                        .expect("write");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread");
    }

    assert_eq!(read_lines(&writer).len(), 80);
}
