//! Pendulum state estimation toolbox built around a discrete-time Extended Kalman Filter
//!
//! This crate provides the pieces needed to estimate the angle and angular rate of a pendulum
//! (or any other small nonlinear plant) from noisy accelerometer and gyro readings. The filter
//! is implemented as a struct that is initialized once and then driven with one predict and one
//! update per tick. The filter itself is deterministic: it performs no I/O, no logging, and never
//! draws random numbers. Noise injection and ground truth live in the [sim] module, which plays the
//! role of the physical plant for testing and demonstration purposes.
//!
//! This crate is primarily built off of the following dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the dense linear algebra for the filter.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): Provides random number generation for the simulated plant.
//! - [`serde`](https://crates.io/crates/serde): Provides (de)serialization of simulation configurations and per-tick records.
//!
//! ## Crate overview
//!
//! This crate is organized into several modules:
//! - [dynamics]: Process models (state transition functions and their Jacobians).
//! - [measurements]: Observation models (measurement functions and their Jacobians).
//! - [noise]: Process and measurement noise covariances.
//! - [kalman]: The Extended Kalman Filter engine and its error type.
//! - [linalg]: Linear algebra utilities and helper functions.
//! - [sim]: Simulated plant and the run driver that ticks the plant and filter in lockstep.
//! - [config]: Serializable simulation configuration (TOML/JSON/YAML).
//!
//! ## State definition
//!
//! The reference plant is a single pendulum. Its state vector is
//!
//! $$
//! x = [\theta, \dot{\theta}]
//! $$
//!
//! where $\theta$ is the angle of the bar in radians and $\dot{\theta}$ its angular rate in
//! radians per second. The sensor is an IMU strapped to the bar that reports two accelerometer
//! components of the gravity vector and the gyro rate:
//!
//! $$
//! z = h(x) = [-g \cos\theta, g \sin\theta, \dot{\theta}]
//! $$
//!
//! ## Predict/update cycle
//!
//! Each tick runs a predict step followed by exactly one update step:
//!
//! $$
//! \begin{aligned}
//! \bar{x} &= f(x) & \bar{P} &= F P F^T + Q \\\\
//! y &= z - h(\bar{x}) & S &= H \bar{P} H^T + R \\\\
//! K &= \bar{P} H^T S^{-1} & x^+ &= \bar{x} + K y
//! \end{aligned}
//! $$
//!
//! with $F$ evaluated at the previous posterior and $H$ evaluated at the prior.
//!
//! ```rust
//! use pendulum_ekf::dynamics::ConstantRate;
//! use pendulum_ekf::kalman::ExtendedKalmanFilter;
//! use pendulum_ekf::measurements::TiltSensor;
//! use pendulum_ekf::noise::NoiseModel;
//! use nalgebra::{DMatrix, DVector};
//!
//! let noise = NoiseModel::isotropic(2, 1.0, 3, 1.0);
//! let mut ekf = ExtendedKalmanFilter::new(ConstantRate::new(0.01), TiltSensor::new(9.81), noise)
//!     .unwrap();
//! ekf.initialize(DVector::from_vec(vec![1.0, 0.0]), DMatrix::identity(2, 2) * 10.0)
//!     .unwrap();
//! ekf.predict().unwrap();
//! ekf.update(&DVector::from_vec(vec![-9.81, 0.0, 1.0])).unwrap();
//! let estimate = ekf.current_estimate().unwrap();
//! assert_eq!(estimate.mean.len(), 2);
//! ```
pub mod config;
pub mod dynamics;
pub mod kalman;
pub mod linalg;
pub mod measurements;
pub mod noise;
pub mod sim;

use nalgebra::DVector;

use std::convert::{From, TryFrom};
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Number of states in the pendulum state vector (angle and angular rate)
pub const PENDULUM_STATE_DIMENSION: usize = 2;
/// Standard gravity used by the default configuration, m/s^2
pub const STANDARD_GRAVITY: f64 = 9.81;

/// Typed view of the two-element pendulum state vector.
///
/// The filter itself works on plain `DVector<f64>`s so that alternative plants can be substituted;
/// this struct exists to make driver code and tests read in terms of physical quantities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PendulumState {
    /// Angle of the bar in radians
    pub angle: f64,
    /// Angular rate of the bar in rad/s
    pub angular_rate: f64,
}
impl Display for PendulumState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PendulumState {{ angle: {:.4} rad, angular_rate: {:.4} rad/s }}",
            self.angle, self.angular_rate
        )
    }
}
impl PendulumState {
    pub fn new(angle: f64, angular_rate: f64) -> Self {
        PendulumState {
            angle,
            angular_rate,
        }
    }
}
impl From<PendulumState> for Vec<f64> {
    fn from(state: PendulumState) -> Self {
        vec![state.angle, state.angular_rate]
    }
}
impl From<PendulumState> for DVector<f64> {
    fn from(state: PendulumState) -> Self {
        DVector::from_vec(state.into())
    }
}
impl From<&PendulumState> for DVector<f64> {
    fn from(state: &PendulumState) -> Self {
        DVector::from_vec((*state).into())
    }
}
impl TryFrom<&[f64]> for PendulumState {
    type Error = &'static str;
    /// Attempts to create a PendulumState from a slice of exactly two elements `[angle, rate]`.
    fn try_from(slice: &[f64]) -> Result<Self, Self::Error> {
        if slice.len() != PENDULUM_STATE_DIMENSION {
            return Err("Slice must have length 2 for PendulumState");
        }
        Ok(PendulumState::new(slice[0], slice[1]))
    }
}
impl TryFrom<&DVector<f64>> for PendulumState {
    type Error = &'static str;
    fn try_from(vector: &DVector<f64>) -> Result<Self, Self::Error> {
        Self::try_from(vector.as_slice())
    }
}
