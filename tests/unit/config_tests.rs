//! Unit tests for configuration parsing, defaults, and validation.

use std::path::PathBuf;
use std::time::Duration;

use riveter::config::GlobalConfig;
use riveter::models::strategy::Strategy;
use riveter::AppError;

fn sample_toml() -> String {
    r#"
time_probe_step = 0.5
poll_interval_ms = 25
training_data = "history/records.toml"
fallback_strategy = "pipeline_persist"

[device]
write_bytes_per_sec = 2500.0
read_bytes_per_sec = 5000.0

[termination]
start = 5.0
end = 20.0
probability = 0.7

[segments]
ready = "/bench_ready"
strategy = "/bench_strategy"
state_size = "/bench_size"

[engine]
program = "duckdb-runner"
args = ["--benchmark", "{benchmark}", "--query", "{query}", "--threads", "{threads}"]
database = "tpch.db"
data_source = "data/tpch-sf1"
temp_dir = "scratch"
threads = 8
persistence_location = "state/pipeline.bin"

[checkpoint]
program = "criu"
args = ["dump", "-D", "{snapshot_dir}", "-t", "{pid}"]
snapshot_root = "/var/lib/riveter"

[audit]
log_dir = "logs"

[queries.q1]
num_joins = 0
num_groupbys = 1
input_cardinality = 6001215

[queries.q21]
benchmark = "tpch"
num_joins = 5
num_groupbys = 1
input_cardinality = 8661245
"#
    .to_owned()
}

fn minimal_toml() -> String {
    r#"
[device]
write_bytes_per_sec = 1000.0
read_bytes_per_sec = 1000.0

[termination]
start = 0.0
end = 60.0
probability = 0.5

[engine]
program = "engine"
data_source = "data"
persistence_location = "state"

[queries.q6]
num_joins = 0
num_groupbys = 0
input_cardinality = 6001215
"#
    .to_owned()
}

#[test]
fn parses_full_configuration() {
    let config = GlobalConfig::from_toml_str(&sample_toml()).expect("valid config");

    assert!((config.time_probe_step - 0.5).abs() < f64::EPSILON);
    assert_eq!(config.poll_interval(), Duration::from_millis(25));
    assert_eq!(
        config.training_data,
        Some(PathBuf::from("history/records.toml"))
    );
    assert_eq!(config.fallback_strategy, Some(Strategy::PipelinePersist));
    assert_eq!(config.segments.ready, "/bench_ready");
    assert_eq!(config.segments.sequence, "/riveter_sequence");
    assert_eq!(config.engine.threads, 8);
    assert_eq!(config.engine.database, "tpch.db");
    assert_eq!(config.checkpoint.snapshot_root, PathBuf::from("/var/lib/riveter"));
    assert_eq!(config.audit.log_dir, Some(PathBuf::from("logs")));
    assert_eq!(config.queries.len(), 2);
}

#[test]
fn minimal_configuration_applies_defaults() {
    let config = GlobalConfig::from_toml_str(&minimal_toml()).expect("valid config");

    assert!((config.time_probe_step - 1.0).abs() < f64::EPSILON);
    assert_eq!(config.poll_interval_ms, 100);
    assert_eq!(config.training_data, None);
    assert_eq!(config.fallback_strategy, None);
    assert_eq!(config.segments.ready, "/riveter_ready_flag");
    assert_eq!(config.engine.database, "memory");
    assert_eq!(config.engine.temp_dir, PathBuf::from("tmp"));
    assert_eq!(config.engine.threads, 1);
    assert!(config.engine.args.is_empty());
    assert_eq!(config.engine.working_dir, None);
    assert_eq!(config.checkpoint.program, "criu");
    assert!(config.checkpoint.args.contains(&"{snapshot_dir}".to_owned()));
    assert!(config.checkpoint.args.contains(&"{pid}".to_owned()));
    assert_eq!(config.audit.log_dir, None);
    assert_eq!(config.queries["q6"].benchmark, "tpch");
}

#[test]
fn cost_model_config_mirrors_global_settings() {
    let config = GlobalConfig::from_toml_str(&sample_toml()).expect("valid config");
    let cost = config.cost_model_config();
    assert_eq!(cost.device, config.device);
    assert_eq!(cost.window, config.termination);
    assert!((cost.time_probe_step - 0.5).abs() < f64::EPSILON);
}

#[test]
fn query_registry_resolves_registered_queries() {
    let config = GlobalConfig::from_toml_str(&sample_toml()).expect("valid config");
    let registry = config.query_registry();

    assert_eq!(registry.len(), 2);
    assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["q1", "q21"]);

    let features = registry.resolve("q21").expect("q21").features();
    assert_eq!(features.num_joins, 5);
    assert_eq!(features.num_groupbys, 1);
    assert_eq!(features.input_cardinality, 8_661_245);
}

#[test]
fn query_registry_lists_known_ids_for_unknown_query() {
    let config = GlobalConfig::from_toml_str(&sample_toml()).expect("valid config");
    let err = config
        .query_registry()
        .resolve("q99")
        .expect_err("unregistered");
    let message = err.to_string();
    assert!(message.starts_with("config:"));
    assert!(message.contains("q99"));
    assert!(message.contains("q1, q21"));
}

#[test]
fn rejects_probability_above_one() {
    let raw = minimal_toml().replace("probability = 0.5", "probability = 1.5");
    assert!(matches!(
        GlobalConfig::from_toml_str(&raw),
        Err(AppError::Config(_))
    ));
}

#[test]
fn rejects_window_start_after_end() {
    let raw = minimal_toml().replace("start = 0.0", "start = 90.0");
    assert!(GlobalConfig::from_toml_str(&raw).is_err());
}

#[test]
fn rejects_zero_device_speed() {
    let raw = minimal_toml().replace("write_bytes_per_sec = 1000.0", "write_bytes_per_sec = 0.0");
    let err = GlobalConfig::from_toml_str(&raw).expect_err("zero speed");
    assert!(err.to_string().contains("write_bytes_per_sec"));
}

#[test]
fn rejects_zero_poll_interval() {
    let raw = format!("poll_interval_ms = 0\n{}", minimal_toml());
    assert!(GlobalConfig::from_toml_str(&raw).is_err());
}

#[test]
fn rejects_negative_probe_step() {
    let raw = format!("time_probe_step = -1.0\n{}", minimal_toml());
    assert!(GlobalConfig::from_toml_str(&raw).is_err());
}

#[test]
fn rejects_probe_step_too_fine_for_window() {
    let raw = format!("time_probe_step = 1e-9\n{}", minimal_toml());
    let err = GlobalConfig::from_toml_str(&raw).expect_err("too many probes");
    assert!(err.to_string().contains("time_probe_step"), "{err}");
}

#[test]
fn rejects_zero_engine_threads() {
    let raw = minimal_toml().replace("program = \"engine\"", "program = \"engine\"\nthreads = 0");
    assert!(GlobalConfig::from_toml_str(&raw).is_err());
}

#[test]
fn rejects_blank_engine_program() {
    let raw = minimal_toml().replace("program = \"engine\"", "program = \"  \"");
    assert!(GlobalConfig::from_toml_str(&raw).is_err());
}

#[test]
fn rejects_empty_query_registry() {
    let raw = r#"
[device]
write_bytes_per_sec = 1000.0
read_bytes_per_sec = 1000.0

[termination]
start = 0.0
end = 60.0
probability = 0.5

[engine]
program = "engine"
data_source = "data"
persistence_location = "state"

[queries]
"#;
    let err = GlobalConfig::from_toml_str(raw).expect_err("no queries");
    assert!(err.to_string().contains("at least one query"));
}

#[test]
fn rejects_malformed_segment_name() {
    let raw = format!("[segments]\nready = \"no_slash\"\n{}", minimal_toml());
    assert!(GlobalConfig::from_toml_str(&raw).is_err());
}

#[test]
fn rejects_unknown_fallback_strategy() {
    let raw = format!("fallback_strategy = \"retry\"\n{}", minimal_toml());
    let err = GlobalConfig::from_toml_str(&raw).expect_err("unknown strategy");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("riveter.toml");
    std::fs::write(&path, minimal_toml()).expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("load");
    assert!(config.queries.contains_key("q6"));
}

#[test]
fn load_from_missing_path_is_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = GlobalConfig::load_from_path(dir.path().join("missing.toml"))
        .expect_err("missing file");
    assert!(err.to_string().starts_with("config: failed to read config"));
}
