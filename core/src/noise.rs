//! Process and measurement noise covariances.
//!
//! The noise model is immutable configuration for a run: `Q` is added to the propagated
//! covariance on every predict and `R` to the projected covariance on every update. Both are
//! expected to be symmetric positive semi-definite. Only their shapes are checked here; an
//! indefinite matrix is accepted and will produce an unstable filter.

use nalgebra::{DMatrix, DVector};

use std::fmt::{self, Debug};

/// Fixed process noise (`Q`) and measurement noise (`R`) covariances.
#[derive(Clone, PartialEq)]
pub struct NoiseModel {
    process_noise: DMatrix<f64>,
    measurement_noise: DMatrix<f64>,
}
impl Debug for NoiseModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoiseModel")
            .field("process_noise", &self.process_noise)
            .field("measurement_noise", &self.measurement_noise)
            .finish()
    }
}
impl NoiseModel {
    /// Create a noise model from full covariance matrices.
    ///
    /// # Panics
    /// Panics if either matrix is not square.
    pub fn new(process_noise: DMatrix<f64>, measurement_noise: DMatrix<f64>) -> Self {
        assert!(
            process_noise.is_square(),
            "NoiseModel: process noise covariance must be square"
        );
        assert!(
            measurement_noise.is_square(),
            "NoiseModel: measurement noise covariance must be square"
        );
        NoiseModel {
            process_noise,
            measurement_noise,
        }
    }
    /// Create a noise model with independent channels from the diagonal variances.
    pub fn from_diagonals(process_variances: &[f64], measurement_variances: &[f64]) -> Self {
        NoiseModel::new(
            DMatrix::from_diagonal(&DVector::from_column_slice(process_variances)),
            DMatrix::from_diagonal(&DVector::from_column_slice(measurement_variances)),
        )
    }
    /// `Q = q·I(n)`, `R = r·I(m)`
    pub fn isotropic(
        state_dimension: usize,
        process_variance: f64,
        measurement_dimension: usize,
        measurement_variance: f64,
    ) -> Self {
        NoiseModel::new(
            DMatrix::identity(state_dimension, state_dimension) * process_variance,
            DMatrix::identity(measurement_dimension, measurement_dimension) * measurement_variance,
        )
    }
    /// Process noise covariance `Q`
    pub fn process_noise(&self) -> &DMatrix<f64> {
        &self.process_noise
    }
    /// Measurement noise covariance `R`
    pub fn measurement_noise(&self) -> &DMatrix<f64> {
        &self.measurement_noise
    }
    pub fn state_dimension(&self) -> usize {
        self.process_noise.nrows()
    }
    pub fn measurement_dimension(&self) -> usize {
        self.measurement_noise.nrows()
    }
}
