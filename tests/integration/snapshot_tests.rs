//! Integration tests for the external checkpoint utility invocation.

use riveter::config::CheckpointConfig;
use riveter::orchestrator::snapshot::take_snapshot;
use riveter::AppError;

fn utility(program: &str, args: &[&str], root: &std::path::Path) -> CheckpointConfig {
    CheckpointConfig {
        program: program.into(),
        args: args.iter().map(|arg| (*arg).to_owned()).collect(),
        snapshot_root: root.to_path_buf(),
    }
}

#[tokio::test]
async fn snapshot_directory_is_created_and_passed_to_utility() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = utility(
        "sh",
        &["-c", "echo {pid} {query} > {snapshot_dir}/meta.txt"],
        temp.path(),
    );

    let dir = take_snapshot(&config, "q9", 4321).await.expect("snapshot");

    assert_eq!(dir, temp.path().join("q9_4321"));
    let meta = std::fs::read_to_string(dir.join("meta.txt")).expect("meta");
    assert_eq!(meta.trim(), "4321 q9");
}

#[tokio::test]
async fn non_zero_exit_is_checkpoint_utility_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = utility("sh", &["-c", "exit 2"], temp.path());

    let err = take_snapshot(&config, "q1", 1).await.expect_err("utility fails");

    assert!(matches!(err, AppError::CheckpointUtility(_)));
    assert!(err.to_string().contains("exited with code 2"));
}

#[tokio::test]
async fn missing_utility_is_checkpoint_utility_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = utility("/nonexistent/criu", &[], temp.path());

    let err = take_snapshot(&config, "q1", 1).await.expect_err("no utility");
    assert!(matches!(err, AppError::CheckpointUtility(_)));
}
