//! Suspend/resume latency estimators.
//!
//! [`process`] predicts the size of a whole-process snapshot from a
//! regression over historical runs; [`pipeline`] turns the size the engine
//! actually observed at a pause point into latencies.

pub mod pipeline;
pub mod process;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{AppError, Result};

/// Storage device throughput used by both estimators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct DeviceProfile {
    /// Random write throughput in bytes per second.
    pub write_bytes_per_sec: f64,
    /// Random read throughput in bytes per second.
    pub read_bytes_per_sec: f64,
}

impl DeviceProfile {
    /// Check that both speeds are positive and finite.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for a zero, negative, or non-finite speed.
    pub fn validate(&self) -> Result<()> {
        for (label, speed) in [
            ("write_bytes_per_sec", self.write_bytes_per_sec),
            ("read_bytes_per_sec", self.read_bytes_per_sec),
        ] {
            if !(speed.is_finite() && speed > 0.0) {
                return Err(AppError::Config(format!(
                    "device {label} must be positive and finite, got {speed}"
                )));
            }
        }
        Ok(())
    }

    /// Seconds needed to write `bytes`.
    #[must_use]
    pub fn write_seconds(&self, bytes: f64) -> f64 {
        bytes / self.write_bytes_per_sec
    }

    /// Seconds needed to read `bytes` back.
    #[must_use]
    pub fn read_seconds(&self, bytes: f64) -> f64 {
        bytes / self.read_bytes_per_sec
    }
}

/// Suspend and resume latency for one persistence operation, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct LatencyEstimate {
    /// Time to persist the state.
    pub suspend: f64,
    /// Time to restore the state.
    pub resume: f64,
}

impl LatencyEstimate {
    /// Combined suspend and resume time.
    #[must_use]
    pub fn round_trip(&self) -> f64 {
        self.suspend + self.resume
    }
}

/// Compute and memory resources of the host, logged at startup.
///
/// Fields the platform cannot report are `None`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HardwareProfile {
    /// Logical hardware threads.
    pub hardware_threads: Option<usize>,
    /// Installed memory in bytes.
    pub total_memory_bytes: Option<u64>,
    /// Memory not in use, in bytes.
    pub available_memory_bytes: Option<u64>,
}

impl HardwareProfile {
    /// Query the running host.
    #[must_use]
    pub fn detect() -> Self {
        let hardware_threads = match std::thread::available_parallelism() {
            Ok(threads) => Some(threads.get()),
            Err(err) => {
                warn!(%err, "hardware thread count unavailable");
                None
            }
        };
        let (total_memory_bytes, available_memory_bytes) = memory_bytes();
        Self {
            hardware_threads,
            total_memory_bytes,
            available_memory_bytes,
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn memory_bytes() -> (Option<u64>, Option<u64>) {
    match nix::sys::sysinfo::sysinfo() {
        Ok(info) => (Some(info.ram_total()), Some(info.ram_unused())),
        Err(err) => {
            warn!(%err, "memory profile unavailable");
            (None, None)
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn memory_bytes() -> (Option<u64>, Option<u64>) {
    (None, None)
}
