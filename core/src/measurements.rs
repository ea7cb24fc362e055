//! Observation models for the update step.
//!
//! This module defines the generic observation model trait and the concrete sensors used by the
//! pendulum estimator. An observation model maps a state into the noiseless measurement it would
//! produce and provides the Jacobian of that mapping:
//!
//! $$
//! \hat{z} = h(\bar{x}), \qquad H = \frac{\partial h}{\partial x}\bigg|_{\bar{x}}
//! $$
//!
//! Measurement noise is not part of the model; it is held by the
//! [`NoiseModel`](crate::noise::NoiseModel) for the whole run.

use nalgebra::{DMatrix, DVector};

use std::fmt::{self, Display};

/// Generic observation model trait for all types of sensors
pub trait ObservationModel {
    /// Dimension of the measurement vector
    fn measurement_dimension(&self) -> usize;
    /// Dimension of the state vector the model expects
    fn state_dimension(&self) -> usize;
    /// Get the expected measurement from the state. Measurement model function
    /// that maps the state values to measurement space.
    fn expected_measurement(&self, state: &DVector<f64>) -> DVector<f64>;
    /// Jacobian `∂h/∂x` evaluated at `state`
    fn jacobian(&self, state: &DVector<f64>) -> DMatrix<f64>;
}

impl<T: ObservationModel + ?Sized> ObservationModel for Box<T> {
    fn measurement_dimension(&self) -> usize {
        (**self).measurement_dimension()
    }
    fn state_dimension(&self) -> usize {
        (**self).state_dimension()
    }
    fn expected_measurement(&self, state: &DVector<f64>) -> DVector<f64> {
        (**self).expected_measurement(state)
    }
    fn jacobian(&self, state: &DVector<f64>) -> DMatrix<f64> {
        (**self).jacobian(state)
    }
}

/// IMU strapped to the pendulum bar: two accelerometer axes and one gyro axis.
///
/// The accelerometer senses the gravity vector rotated into the bar frame and the gyro senses
/// the angular rate directly:
///
/// $$
/// h(\theta, \dot{\theta}) = \begin{bmatrix} -g\cos\theta \\\\ g\sin\theta \\\\ \dot{\theta} \end{bmatrix},
/// \qquad
/// H = \begin{bmatrix} g\sin\theta & 0 \\\\ g\cos\theta & 0 \\\\ 0 & 1 \end{bmatrix}
/// $$
///
/// The angle is not wrapped; callers keep the state in a domain where the linearization holds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TiltSensor {
    gravity: f64,
}
impl TiltSensor {
    pub fn new(gravity: f64) -> Self {
        TiltSensor { gravity }
    }
    pub fn gravity(&self) -> f64 {
        self.gravity
    }
}
impl Display for TiltSensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TiltSensor(g: {} m/s^2)", self.gravity)
    }
}
impl ObservationModel for TiltSensor {
    fn measurement_dimension(&self) -> usize {
        3
    }
    fn state_dimension(&self) -> usize {
        2
    }
    fn expected_measurement(&self, state: &DVector<f64>) -> DVector<f64> {
        let angle = state[0];
        DVector::from_vec(vec![
            -self.gravity * angle.cos(),
            self.gravity * angle.sin(),
            state[1],
        ])
    }
    fn jacobian(&self, state: &DVector<f64>) -> DMatrix<f64> {
        let angle = state[0];
        DMatrix::from_row_slice(
            3,
            2,
            &[
                self.gravity * angle.sin(),
                0.0,
                self.gravity * angle.cos(),
                0.0,
                0.0,
                1.0,
            ],
        )
    }
}

/// Linear observation `h(x) = C x` with a constant observation matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearObservation {
    observation: DMatrix<f64>,
}
impl LinearObservation {
    pub fn new(observation: DMatrix<f64>) -> Self {
        LinearObservation { observation }
    }
    /// Every state is measured directly
    pub fn full_state(dimension: usize) -> Self {
        LinearObservation::new(DMatrix::identity(dimension, dimension))
    }
}
impl ObservationModel for LinearObservation {
    fn measurement_dimension(&self) -> usize {
        self.observation.nrows()
    }
    fn state_dimension(&self) -> usize {
        self.observation.ncols()
    }
    fn expected_measurement(&self, state: &DVector<f64>) -> DVector<f64> {
        &self.observation * state
    }
    fn jacobian(&self, _state: &DVector<f64>) -> DMatrix<f64> {
        self.observation.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::central_difference_jacobian;
    use assert_approx_eq::assert_approx_eq;

    const G: f64 = 9.81;

    #[test]
    fn test_tilt_sensor_hanging_straight_down() {
        let sensor = TiltSensor::new(G);
        let z = sensor.expected_measurement(&DVector::from_vec(vec![0.0, 1.0]));
        assert_eq!(z.len(), 3);
        assert_approx_eq!(z[0], -G, 1e-12);
        assert_approx_eq!(z[1], 0.0, 1e-12);
        assert_approx_eq!(z[2], 1.0, 1e-12);
    }

    #[test]
    fn test_tilt_sensor_accelerometer_norm_is_gravity() {
        let sensor = TiltSensor::new(G);
        for angle in [-2.0, -0.3, 0.0, 0.7, 1.9, 3.0] {
            let z = sensor.expected_measurement(&DVector::from_vec(vec![angle, 0.0]));
            assert_approx_eq!((z[0] * z[0] + z[1] * z[1]).sqrt(), G, 1e-12);
        }
    }

    #[test]
    fn test_tilt_sensor_jacobian_structure() {
        let sensor = TiltSensor::new(G);
        let h = sensor.jacobian(&DVector::from_vec(vec![0.0, 5.0]));
        assert_eq!(h.nrows(), 3);
        assert_eq!(h.ncols(), 2);
        // The first row vanishes when hanging straight down
        assert_approx_eq!(h[(0, 0)], 0.0, 1e-15);
        assert_approx_eq!(h[(1, 0)], G, 1e-15);
        assert_approx_eq!(h[(2, 1)], 1.0, 1e-15);
        for i in 0..2 {
            assert_approx_eq!(h[(i, 1)], 0.0, 1e-15);
        }
        assert_approx_eq!(h[(2, 0)], 0.0, 1e-15);
    }

    #[test]
    fn test_tilt_sensor_jacobian_matches_finite_difference() {
        let sensor = TiltSensor::new(G);
        for (angle, rate) in [(0.1, 1.0), (0.75, -0.4), (-1.2, 3.0), (2.5, 0.0)] {
            let x = DVector::from_vec(vec![angle, rate]);
            let analytic = sensor.jacobian(&x);
            let numeric = central_difference_jacobian(|s| sensor.expected_measurement(s), &x, 1e-6);
            for i in 0..3 {
                for j in 0..2 {
                    assert_approx_eq!(analytic[(i, j)], numeric[(i, j)], 1e-4);
                }
            }
        }
    }

    #[test]
    fn test_linear_observation() {
        let c = DMatrix::from_row_slice(1, 2, &[1.0, 0.0]);
        let model = LinearObservation::new(c.clone());
        assert_eq!(model.measurement_dimension(), 1);
        assert_eq!(model.state_dimension(), 2);
        let x = DVector::from_vec(vec![4.0, -1.0]);
        assert_approx_eq!(model.expected_measurement(&x)[0], 4.0, 1e-15);
        assert_eq!(model.jacobian(&x), c);
    }

    #[test]
    fn test_full_state_observation_is_identity() {
        let model = LinearObservation::full_state(2);
        let x = DVector::from_vec(vec![0.5, 0.25]);
        assert_eq!(model.expected_measurement(&x), x);
    }

    #[test]
    fn test_boxed_observation_model_dispatch() {
        let boxed: Box<dyn ObservationModel> = Box::new(TiltSensor::new(G));
        assert_eq!(boxed.measurement_dimension(), 3);
        assert_eq!(boxed.state_dimension(), 2);
        let x = DVector::from_vec(vec![0.0, 2.0]);
        assert_approx_eq!(boxed.expected_measurement(&x)[2], 2.0, 1e-15);
        assert_approx_eq!(boxed.jacobian(&x)[(1, 0)], G, 1e-15);
    }
}
