//! Extended Kalman Filter engine
//!
//! This module contains the discrete-time Extended Kalman Filter used to estimate the state of
//! a nonlinear plant from a stream of measurements. The engine is generic over a
//! [`ProcessModel`] and an [`ObservationModel`] and holds the fixed [`NoiseModel`] for the run.
//!
//! The engine is a small state machine. It starts [`EnginePhase::Uninitialized`] and becomes
//! [`EnginePhase::Ready`] once [`ExtendedKalmanFilter::initialize`] is called. In the ready
//! phase every tick consists of one [`predict`](ExtendedKalmanFilter::predict), which stages a
//! pending prior, followed by exactly one [`update`](ExtendedKalmanFilter::update), which turns
//! that prior into the new resident posterior. An update that fails leaves the resident
//! posterior untouched and keeps the pending prior, so the caller can skip the tick or retry.
//!
//! The engine performs no I/O, no logging and draws no random numbers.
use crate::dynamics::ProcessModel;
use crate::linalg::{InversionOptions, guarded_inverse, symmetrize};
use crate::measurements::ObservationModel;
use crate::noise::NoiseModel;

use std::error::Error;
use std::fmt::{self, Debug, Display};

use nalgebra::{Cholesky, DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Errors reported by the filter engine.
#[derive(Clone, Debug, PartialEq)]
pub enum EkfError {
    /// The innovation covariance `S` cannot be safely inverted. The tick is rejected and the
    /// previous posterior is kept.
    SingularInnovationCovariance {
        determinant: f64,
        condition_number: f64,
    },
    /// A vector or matrix does not have the shape the models require. Detected before any
    /// state is mutated.
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },
    /// Predict, update or query called before `initialize`
    UninitializedEngine,
    /// Update called without a pending prediction
    MissingPrediction,
    /// A measurement, model output or initial value contains NaN or infinity
    NonFinite { context: &'static str },
}
impl Display for EkfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EkfError::SingularInnovationCovariance {
                determinant,
                condition_number,
            } => write!(
                f,
                "innovation covariance is not safely invertible (determinant: {:e}, condition number: {:e})",
                determinant, condition_number
            ),
            EkfError::DimensionMismatch {
                context,
                expected,
                found,
            } => write!(
                f,
                "dimension mismatch in {}: expected {}, found {}",
                context, expected, found
            ),
            EkfError::UninitializedEngine => write!(f, "filter has not been initialized"),
            EkfError::MissingPrediction => {
                write!(f, "update requested without a pending prediction")
            }
            EkfError::NonFinite { context } => write!(f, "non-finite values in {}", context),
        }
    }
}
impl Error for EkfError {}

/// Form of the posterior covariance update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CovarianceUpdate {
    /// `P = (I - K H) P`
    Simple,
    /// `P = (I - K H) P (I - K H)ᵀ + K R Kᵀ`
    #[default]
    Joseph,
}
impl Display for CovarianceUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CovarianceUpdate::Simple => write!(f, "simple"),
            CovarianceUpdate::Joseph => write!(f, "joseph"),
        }
    }
}

/// Numerical options for the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FilterOptions {
    pub covariance_update: CovarianceUpdate,
    /// Thresholds used to decide whether `S` may be inverted
    pub inversion: InversionOptions,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnginePhase {
    Uninitialized,
    Ready,
}

/// Mean and covariance of a Gaussian state estimate.
#[derive(Clone, Debug, PartialEq)]
pub struct GaussianEstimate {
    pub mean: DVector<f64>,
    pub covariance: DMatrix<f64>,
}
impl GaussianEstimate {
    /// Normalized estimation error squared, `(x - x̂)ᵀ P⁻¹ (x - x̂)`, against a known true state.
    ///
    /// Returns `None` when the lengths differ or the covariance is not invertible.
    pub fn nees(&self, truth: &DVector<f64>) -> Option<f64> {
        if truth.len() != self.mean.len() {
            return None;
        }
        let error = truth - &self.mean;
        let inverse = match Cholesky::new(self.covariance.clone()) {
            Some(chol) => chol.inverse(),
            None => self.covariance.clone().try_inverse()?,
        };
        Some(error.dot(&(inverse * &error)))
    }
}

/// Diagnostic produced by a successful update.
#[derive(Clone, Debug, PartialEq)]
pub struct Innovation {
    /// `y = z - h(x̄)`
    pub residual: DVector<f64>,
    /// `S = H P̄ Hᵀ + R`
    pub covariance: DMatrix<f64>,
    /// Normalized innovation squared, `yᵀ S⁻¹ y`
    pub nis: f64,
}

/// Discrete-time Extended Kalman Filter.
///
/// Each tick propagates the posterior through the process model and then corrects it with one
/// measurement:
///
/// $$
/// \begin{aligned}
/// \bar{x} &= f(x), & \bar{P} &= F P F^T + Q, & F &= \partial f / \partial x \big|_{x} \\\\
/// y &= z - h(\bar{x}), & S &= H \bar{P} H^T + R, & H &= \partial h / \partial x \big|_{\bar{x}} \\\\
/// K &= \bar{P} H^T S^{-1}, & x^+ &= \bar{x} + K y, & P^+ &= (I - K H) \bar{P} (I - K H)^T + K R K^T
/// \end{aligned}
/// $$
///
/// The simple covariance update `P⁺ = (I - KH) P̄` can be selected through [`FilterOptions`].
/// Both forms are symmetrized after every step.
///
/// # Example
///
/// ```rust
/// use pendulum_ekf::dynamics::ConstantRate;
/// use pendulum_ekf::kalman::{EnginePhase, ExtendedKalmanFilter};
/// use pendulum_ekf::measurements::TiltSensor;
/// use pendulum_ekf::noise::NoiseModel;
/// use nalgebra::{DMatrix, DVector};
///
/// let mut ekf = ExtendedKalmanFilter::new(
///     ConstantRate::new(0.01),
///     TiltSensor::new(9.81),
///     NoiseModel::isotropic(2, 1.0, 3, 1.0),
/// )
/// .unwrap();
/// assert_eq!(ekf.phase(), EnginePhase::Uninitialized);
/// ekf.initialize(DVector::from_vec(vec![0.5, 0.0]), DMatrix::identity(2, 2))
///     .unwrap();
/// let innovation = ekf.step(&DVector::from_vec(vec![-9.81, 0.0, 0.0])).unwrap();
/// assert!(innovation.nis >= 0.0);
/// ```
#[derive(Clone)]
pub struct ExtendedKalmanFilter<P, O> {
    process: P,
    observation: O,
    noise: NoiseModel,
    options: FilterOptions,
    /// Resident estimate, `None` until initialized
    posterior: Option<GaussianEstimate>,
    /// Prior staged by `predict` and consumed by `update`
    pending: Option<GaussianEstimate>,
}

impl<P, O> Debug for ExtendedKalmanFilter<P, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedKalmanFilter")
            .field("noise", &self.noise)
            .field("options", &self.options)
            .field("posterior", &self.posterior)
            .field("pending", &self.pending)
            .finish()
    }
}

impl<P, O> Display for ExtendedKalmanFilter<P, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.posterior {
            Some(estimate) => write!(
                f,
                "ExtendedKalmanFilter {{ mean: {:?}, covariance diagonal: {:?}, covariance update: {} }}",
                estimate.mean.as_slice(),
                estimate.covariance.diagonal().as_slice(),
                self.options.covariance_update
            ),
            None => write!(f, "ExtendedKalmanFilter {{ uninitialized }}"),
        }
    }
}

impl<P: ProcessModel, O: ObservationModel> ExtendedKalmanFilter<P, O> {
    /// Create a new, uninitialized filter.
    ///
    /// Checks that the process model, the observation model and the noise covariances agree on
    /// the state and measurement dimensions.
    pub fn new(process: P, observation: O, noise: NoiseModel) -> Result<Self, EkfError> {
        let n = process.state_dimension();
        check_dimension("observation model state dimension", n, observation.state_dimension())?;
        check_dimension("process noise covariance", n, noise.state_dimension())?;
        check_dimension(
            "measurement noise covariance",
            observation.measurement_dimension(),
            noise.measurement_dimension(),
        )?;
        Ok(ExtendedKalmanFilter {
            process,
            observation,
            noise,
            options: FilterOptions::default(),
            posterior: None,
            pending: None,
        })
    }
    pub fn with_options(mut self, options: FilterOptions) -> Self {
        self.options = options;
        self
    }
    pub fn options(&self) -> &FilterOptions {
        &self.options
    }
    pub fn noise(&self) -> &NoiseModel {
        &self.noise
    }
    pub fn process_model(&self) -> &P {
        &self.process
    }
    pub fn observation_model(&self) -> &O {
        &self.observation
    }
    pub fn state_dimension(&self) -> usize {
        self.process.state_dimension()
    }
    pub fn measurement_dimension(&self) -> usize {
        self.observation.measurement_dimension()
    }
    pub fn phase(&self) -> EnginePhase {
        if self.posterior.is_some() {
            EnginePhase::Ready
        } else {
            EnginePhase::Uninitialized
        }
    }
    /// Set the initial estimate and its covariance. Calling this again resets the filter and
    /// discards any pending prediction.
    pub fn initialize(
        &mut self,
        mean: DVector<f64>,
        covariance: DMatrix<f64>,
    ) -> Result<(), EkfError> {
        let n = self.state_dimension();
        check_dimension("initial state", n, mean.len())?;
        check_dimension("initial covariance rows", n, covariance.nrows())?;
        check_dimension("initial covariance columns", n, covariance.ncols())?;
        check_finite("initial state", mean.iter())?;
        check_finite("initial covariance", covariance.iter())?;
        self.posterior = Some(GaussianEstimate {
            mean,
            covariance: symmetrize(&covariance),
        });
        self.pending = None;
        Ok(())
    }
    /// Propagate the resident posterior through the process model and stage the result as the
    /// pending prior. Predicting twice recomputes the prior from the same posterior.
    pub fn predict(&mut self) -> Result<(), EkfError> {
        let posterior = self
            .posterior
            .as_ref()
            .ok_or(EkfError::UninitializedEngine)?;
        let n = self.process.state_dimension();
        let mean = self.process.transition(&posterior.mean);
        check_dimension("process model output", n, mean.len())?;
        let f = self.process.jacobian(&posterior.mean);
        check_dimension("process jacobian rows", n, f.nrows())?;
        check_dimension("process jacobian columns", n, f.ncols())?;
        let covariance =
            symmetrize(&(&f * &posterior.covariance * f.transpose() + self.noise.process_noise()));
        check_finite("predicted state", mean.iter())?;
        check_finite("predicted covariance", covariance.iter())?;
        self.pending = Some(GaussianEstimate { mean, covariance });
        Ok(())
    }
    /// Correct the pending prior with a measurement and commit the result as the posterior.
    pub fn update(&mut self, measurement: &DVector<f64>) -> Result<(), EkfError> {
        self.update_with_innovation(measurement).map(|_| ())
    }
    /// Same as [`update`](Self::update) but returns the innovation diagnostics.
    pub fn update_with_innovation(
        &mut self,
        measurement: &DVector<f64>,
    ) -> Result<Innovation, EkfError> {
        if self.posterior.is_none() {
            return Err(EkfError::UninitializedEngine);
        }
        let n = self.process.state_dimension();
        let m = self.observation.measurement_dimension();
        check_dimension("measurement", m, measurement.len())?;
        check_finite("measurement", measurement.iter())?;
        let prior = self.pending.as_ref().ok_or(EkfError::MissingPrediction)?;

        let expected = self.observation.expected_measurement(&prior.mean);
        check_dimension("observation model output", m, expected.len())?;
        check_finite("expected measurement", expected.iter())?;
        let h = self.observation.jacobian(&prior.mean);
        check_dimension("observation jacobian rows", m, h.nrows())?;
        check_dimension("observation jacobian columns", n, h.ncols())?;

        let residual = measurement - expected;
        let s = symmetrize(
            &(&h * &prior.covariance * h.transpose() + self.noise.measurement_noise()),
        );
        let s_inv = guarded_inverse(&s, self.options.inversion).map_err(|conditioning| {
            EkfError::SingularInnovationCovariance {
                determinant: conditioning.determinant,
                condition_number: conditioning.condition_number,
            }
        })?;
        let gain = &prior.covariance * h.transpose() * &s_inv;
        let mean = &prior.mean + &gain * &residual;
        let i_kh = DMatrix::<f64>::identity(n, n) - &gain * &h;
        let covariance = match self.options.covariance_update {
            CovarianceUpdate::Simple => &i_kh * &prior.covariance,
            CovarianceUpdate::Joseph => {
                &i_kh * &prior.covariance * i_kh.transpose()
                    + &gain * self.noise.measurement_noise() * gain.transpose()
            }
        };
        let covariance = symmetrize(&covariance);
        check_finite("posterior state", mean.iter())?;
        check_finite("posterior covariance", covariance.iter())?;

        let nis = residual.dot(&(&s_inv * &residual));
        self.posterior = Some(GaussianEstimate { mean, covariance });
        self.pending = None;
        Ok(Innovation {
            residual,
            covariance: s,
            nis,
        })
    }
    /// One full tick: predict, then update with `measurement`.
    pub fn step(&mut self, measurement: &DVector<f64>) -> Result<Innovation, EkfError> {
        self.predict()?;
        self.update_with_innovation(measurement)
    }
    /// Copy of the resident posterior. Does not change the filter.
    pub fn current_estimate(&self) -> Result<GaussianEstimate, EkfError> {
        self.posterior.clone().ok_or(EkfError::UninitializedEngine)
    }
    /// The pending prior, if a prediction has been made since the last successful update.
    pub fn prediction(&self) -> Option<&GaussianEstimate> {
        self.pending.as_ref()
    }
}

fn check_dimension(context: &'static str, expected: usize, found: usize) -> Result<(), EkfError> {
    if expected == found {
        Ok(())
    } else {
        Err(EkfError::DimensionMismatch {
            context,
            expected,
            found,
        })
    }
}

fn check_finite<'a>(
    context: &'static str,
    mut values: impl Iterator<Item = &'a f64>,
) -> Result<(), EkfError> {
    if values.all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(EkfError::NonFinite { context })
    }
}
