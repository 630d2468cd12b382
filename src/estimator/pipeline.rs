//! Pipeline-level latency from the state size observed at a pause point.

use super::{DeviceProfile, LatencyEstimate};

/// Closed-form estimator for persisting only pipeline-local state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineLatencyEstimator {
    device: DeviceProfile,
}

impl PipelineLatencyEstimator {
    /// Build an estimator for the given device.
    #[must_use]
    pub fn new(device: DeviceProfile) -> Self {
        Self { device }
    }

    /// `observed_bytes / write speed`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn suspend_latency(&self, observed_bytes: u64) -> f64 {
        self.device.write_seconds(observed_bytes as f64)
    }

    /// `observed_bytes / read speed`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn resume_latency(&self, observed_bytes: u64) -> f64 {
        self.device.read_seconds(observed_bytes as f64)
    }

    /// Both latencies for one observation.
    #[must_use]
    pub fn estimate(&self, observed_bytes: u64) -> LatencyEstimate {
        LatencyEstimate {
            suspend: self.suspend_latency(observed_bytes),
            resume: self.resume_latency(observed_bytes),
        }
    }
}
