//! Process-level latency estimation from historical execution records.
//!
//! Fits `persisted_bytes ≈ a·joins + b·groupbys + c·cardinality + d·t + e`
//! by ordinary least squares. Predictions for inputs outside the training
//! range are returned as computed, including negative sizes.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{DeviceProfile, LatencyEstimate};
use crate::models::record::ExecutionRecord;
use crate::{AppError, Result};

/// Number of regression features, excluding the intercept.
const FEATURES: usize = 4;

/// Number of fitted coefficients, including the intercept.
pub const COEFFICIENTS: usize = FEATURES + 1;

/// Pivots smaller than this fraction of the sample count mark a singular system.
const PIVOT_TOLERANCE: f64 = 1e-10;

/// Plan features of the query being costed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct PlanFeatures {
    /// Number of join operators.
    pub num_joins: u32,
    /// Number of group-by operators.
    pub num_groupbys: u32,
    /// Rows read from the base tables.
    pub input_cardinality: u64,
}

/// Fitted linear size model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct RegressionModel {
    /// Weights for joins, group-bys, input cardinality, suspension point,
    /// followed by the intercept.
    pub coefficients: [f64; COEFFICIENTS],
}

#[allow(clippy::cast_precision_loss)]
fn feature_row(record: &ExecutionRecord) -> [f64; FEATURES] {
    [
        f64::from(record.num_joins),
        f64::from(record.num_groupbys),
        record.input_cardinality as f64,
        record.suspension_point,
    ]
}

/// Fit the size model over `corpus`.
///
/// Features are centred and scaled to unit variance before the normal
/// equations are solved, then the coefficients are mapped back to raw
/// units; the intercept comes from the centring.
///
/// # Errors
///
/// Returns `AppError::InsufficientData` with fewer than five records or
/// non-finite inputs, and `AppError::SingularFit` when a feature is constant
/// or the features are collinear.
#[allow(clippy::cast_precision_loss, clippy::needless_range_loop)]
pub fn fit(corpus: &[ExecutionRecord]) -> Result<RegressionModel> {
    if corpus.len() < COEFFICIENTS {
        return Err(AppError::InsufficientData(format!(
            "need at least {COEFFICIENTS} records to fit, got {}",
            corpus.len()
        )));
    }

    let rows: Vec<[f64; FEATURES]> = corpus.iter().map(feature_row).collect();
    let targets: Vec<f64> = corpus.iter().map(|r| r.persisted_bytes as f64).collect();
    if rows.iter().flatten().chain(&targets).any(|v| !v.is_finite()) {
        return Err(AppError::InsufficientData(
            "training records contain non-finite values".into(),
        ));
    }

    let n = corpus.len() as f64;
    let mut means = [0.0; FEATURES];
    for row in &rows {
        for j in 0..FEATURES {
            means[j] += row[j] / n;
        }
    }
    let target_mean = targets.iter().sum::<f64>() / n;

    let mut scales = [0.0; FEATURES];
    for row in &rows {
        for j in 0..FEATURES {
            scales[j] += (row[j] - means[j]).powi(2) / n;
        }
    }
    for j in 0..FEATURES {
        scales[j] = scales[j].sqrt();
        if scales[j] <= f64::EPSILON * means[j].abs().max(1.0) {
            return Err(AppError::SingularFit(format!(
                "feature {j} is constant across the corpus"
            )));
        }
    }

    // Normal equations over the standardized features.
    let mut gram = [[0.0; FEATURES]; FEATURES];
    let mut rhs = [0.0; FEATURES];
    for (row, target) in rows.iter().zip(&targets) {
        let mut z = [0.0; FEATURES];
        for j in 0..FEATURES {
            z[j] = (row[j] - means[j]) / scales[j];
        }
        for i in 0..FEATURES {
            rhs[i] += z[i] * (target - target_mean);
            for j in 0..FEATURES {
                gram[i][j] += z[i] * z[j];
            }
        }
    }

    let beta = solve(gram, rhs, n * PIVOT_TOLERANCE)?;

    let mut coefficients = [0.0; COEFFICIENTS];
    let mut intercept = target_mean;
    for j in 0..FEATURES {
        coefficients[j] = beta[j] / scales[j];
        intercept -= coefficients[j] * means[j];
    }
    coefficients[FEATURES] = intercept;

    debug!(?coefficients, samples = corpus.len(), "size regression fitted");
    Ok(RegressionModel { coefficients })
}

/// Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve(
    mut a: [[f64; FEATURES]; FEATURES],
    mut b: [f64; FEATURES],
    tolerance: f64,
) -> Result<[f64; FEATURES]> {
    for col in 0..FEATURES {
        let mut pivot = col;
        for row in col + 1..FEATURES {
            if a[row][col].abs() > a[pivot][col].abs() {
                pivot = row;
            }
        }
        if a[pivot][col].abs() < tolerance {
            return Err(AppError::SingularFit(format!(
                "feature matrix is rank-deficient at column {col}"
            )));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..FEATURES {
            let factor = a[row][col] / a[col][col];
            for k in col..FEATURES {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0; FEATURES];
    for row in (0..FEATURES).rev() {
        let mut acc = b[row];
        for k in row + 1..FEATURES {
            acc -= a[row][k] * x[k];
        }
        x[row] = acc / a[row][row];
    }
    Ok(x)
}

/// Predicted persisted size in bytes for a suspension at `suspension_point`.
///
/// Not clamped: extrapolated inputs can yield negative or implausible sizes.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn estimate_persisted_size(
    model: &RegressionModel,
    features: PlanFeatures,
    suspension_point: f64,
) -> f64 {
    let [a, b, c, d, e] = model.coefficients;
    a * f64::from(features.num_joins)
        + b * f64::from(features.num_groupbys)
        + c * features.input_cardinality as f64
        + d * suspension_point
        + e
}

/// Regression-backed estimator for whole-process snapshots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessLatencyEstimator {
    model: RegressionModel,
    device: DeviceProfile,
}

impl ProcessLatencyEstimator {
    /// Pair a fitted model with a device profile.
    #[must_use]
    pub fn new(model: RegressionModel, device: DeviceProfile) -> Self {
        Self { model, device }
    }

    /// Fit a model over `corpus` and wrap it.
    ///
    /// # Errors
    ///
    /// Propagates [`fit`] failures.
    pub fn train(corpus: &[ExecutionRecord], device: DeviceProfile) -> Result<Self> {
        Ok(Self::new(fit(corpus)?, device))
    }

    /// The fitted model.
    #[must_use]
    pub fn model(&self) -> &RegressionModel {
        &self.model
    }

    /// Predicted snapshot size at `suspension_point`.
    #[must_use]
    pub fn estimate_persisted_size(&self, features: PlanFeatures, suspension_point: f64) -> f64 {
        let size = estimate_persisted_size(&self.model, features, suspension_point);
        if size < 0.0 {
            warn!(
                size,
                suspension_point, "size regression extrapolated to a negative size"
            );
        }
        size
    }

    /// Predicted size divided by the write speed.
    #[must_use]
    pub fn estimate_suspend_latency(&self, features: PlanFeatures, suspension_point: f64) -> f64 {
        self.device
            .write_seconds(self.estimate_persisted_size(features, suspension_point))
    }

    /// Predicted size divided by the read speed.
    #[must_use]
    pub fn estimate_resume_latency(&self, features: PlanFeatures, suspension_point: f64) -> f64 {
        self.device
            .read_seconds(self.estimate_persisted_size(features, suspension_point))
    }

    /// Both latencies from a single size prediction.
    #[must_use]
    pub fn estimate(&self, features: PlanFeatures, suspension_point: f64) -> LatencyEstimate {
        let size = self.estimate_persisted_size(features, suspension_point);
        LatencyEstimate {
            suspend: self.device.write_seconds(size),
            resume: self.device.read_seconds(size),
        }
    }
}
