//! Unit tests for the pipeline and process latency estimators.

use riveter::estimator::pipeline::PipelineLatencyEstimator;
use riveter::estimator::process::{PlanFeatures, ProcessLatencyEstimator, RegressionModel};
use riveter::estimator::{DeviceProfile, HardwareProfile};
use riveter::AppError;

fn device(write: f64, read: f64) -> DeviceProfile {
    DeviceProfile {
        write_bytes_per_sec: write,
        read_bytes_per_sec: read,
    }
}

fn features() -> PlanFeatures {
    PlanFeatures {
        num_joins: 2,
        num_groupbys: 1,
        input_cardinality: 10_000,
    }
}

#[test]
fn device_rejects_non_positive_speeds() {
    assert!(matches!(
        device(0.0, 100.0).validate(),
        Err(AppError::Config(_))
    ));
    assert!(device(100.0, -1.0).validate().is_err());
    assert!(device(f64::INFINITY, 100.0).validate().is_err());
    assert!(device(100.0, 100.0).validate().is_ok());
}

#[test]
fn pipeline_latency_is_size_over_speed() {
    let estimator = PipelineLatencyEstimator::new(device(2500.0, 5000.0));
    let latency = estimator.estimate(500);
    assert!((latency.suspend - 0.2).abs() < 1e-12);
    assert!((latency.resume - 0.1).abs() < 1e-12);
    assert!((latency.round_trip() - 0.3).abs() < 1e-12);
}

#[test]
fn pipeline_latency_is_monotonic_in_size() {
    let estimator = PipelineLatencyEstimator::new(device(1000.0, 1000.0));
    let mut previous = estimator.suspend_latency(0);
    for bytes in [1, 10, 1_000, 1_000_000, u64::from(u32::MAX)] {
        let current = estimator.suspend_latency(bytes);
        assert!(current >= previous, "{bytes} bytes regressed");
        assert!(estimator.resume_latency(bytes) >= 0.0);
        previous = current;
    }
}

const SPEEDS: [f64; 4] = [500.0, 1000.0, 4000.0, 1.0e9];

#[test]
fn pipeline_suspend_latency_strictly_drops_with_write_speed() {
    for bytes in [1, 64, 4096, 1 << 30] {
        let latencies: Vec<f64> = SPEEDS
            .iter()
            .map(|&write| {
                PipelineLatencyEstimator::new(device(write, 1000.0)).suspend_latency(bytes)
            })
            .collect();
        for pair in latencies.windows(2) {
            assert!(pair[1] < pair[0], "{bytes} bytes: {latencies:?}");
        }
    }
}

#[test]
fn pipeline_resume_latency_strictly_drops_with_read_speed() {
    for bytes in [1, 64, 4096, 1 << 30] {
        let latencies: Vec<f64> = SPEEDS
            .iter()
            .map(|&read| {
                PipelineLatencyEstimator::new(device(1000.0, read)).resume_latency(bytes)
            })
            .collect();
        for pair in latencies.windows(2) {
            assert!(pair[1] < pair[0], "{bytes} bytes: {latencies:?}");
        }
    }
}

fn sized_model() -> RegressionModel {
    RegressionModel {
        coefficients: [10.0, 5.0, 0.01, 200.0, 1000.0],
    }
}

#[test]
fn process_suspend_latency_strictly_drops_with_write_speed() {
    for t in [0.0, 2.5, 30.0] {
        let latencies: Vec<f64> = SPEEDS
            .iter()
            .map(|&write| {
                ProcessLatencyEstimator::new(sized_model(), device(write, 1000.0))
                    .estimate_suspend_latency(features(), t)
            })
            .collect();
        assert!(latencies[0] > 0.0);
        for pair in latencies.windows(2) {
            assert!(pair[1] < pair[0], "t = {t}: {latencies:?}");
        }
    }
}

#[test]
fn process_resume_latency_strictly_drops_with_read_speed() {
    for t in [0.0, 2.5, 30.0] {
        let latencies: Vec<f64> = SPEEDS
            .iter()
            .map(|&read| {
                ProcessLatencyEstimator::new(sized_model(), device(1000.0, read))
                    .estimate_resume_latency(features(), t)
            })
            .collect();
        assert!(latencies[0] > 0.0);
        for pair in latencies.windows(2) {
            assert!(pair[1] < pair[0], "t = {t}: {latencies:?}");
        }
    }
}

#[test]
fn process_latency_follows_size_growth_over_time() {
    let estimator = ProcessLatencyEstimator::new(sized_model(), device(1000.0, 2000.0));

    let mut previous = estimator.estimate_suspend_latency(features(), 0.0);
    for t in [1.0, 2.5, 10.0, 60.0] {
        let current = estimator.estimate_suspend_latency(features(), t);
        assert!(current > previous);
        previous = current;
    }
}

#[test]
fn process_latency_uses_device_speeds() {
    let model = RegressionModel {
        coefficients: [0.0, 0.0, 0.0, 0.0, 4000.0],
    };
    let estimator = ProcessLatencyEstimator::new(model, device(1000.0, 2000.0));
    let latency = estimator.estimate(features(), 3.0);
    assert!((estimator.estimate_persisted_size(features(), 3.0) - 4000.0).abs() < 1e-9);
    assert!((latency.suspend - 4.0).abs() < 1e-12);
    assert!((latency.resume - 2.0).abs() < 1e-12);
    assert!((estimator.estimate_resume_latency(features(), 3.0) - 2.0).abs() < 1e-12);
}

#[cfg(target_os = "linux")]
#[test]
fn hardware_profile_reports_threads_and_memory() {
    let profile = HardwareProfile::detect();
    assert!(profile.hardware_threads.is_some_and(|threads| threads >= 1));

    let total = profile.total_memory_bytes.expect("total memory");
    let available = profile.available_memory_bytes.expect("available memory");
    assert!(total > 0);
    assert!(available <= total);
}
