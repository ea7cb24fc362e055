//! Process models for the predict step
//!
//! A process model maps the previous posterior estimate to the predicted (prior) state and
//! provides the Jacobian of that mapping for covariance propagation:
//!
//! $$
//! \bar{x} = f(x), \qquad F = \frac{\partial f}{\partial x}\bigg|_{x}
//! $$
//!
//! Both functions are pure; the time step is fixed at construction. The Jacobian must be the
//! analytic derivative of the transition. A mismatch does not raise an error, it silently
//! degrades convergence, so every model here is cross-checked against
//! [`central_difference_jacobian`](crate::linalg::central_difference_jacobian) in the tests.

use nalgebra::{DMatrix, DVector};

use std::fmt::{self, Debug, Display};

/// Generic process model trait used by the predict step of the filter
pub trait ProcessModel {
    /// Number of states the model propagates
    fn state_dimension(&self) -> usize;
    /// Fixed time step between ticks in seconds
    fn time_step(&self) -> f64;
    /// Noiseless state transition `f(x)`
    fn transition(&self, state: &DVector<f64>) -> DVector<f64>;
    /// Jacobian `∂f/∂x` evaluated at `state`
    fn jacobian(&self, state: &DVector<f64>) -> DMatrix<f64>;
}

impl<T: ProcessModel + ?Sized> ProcessModel for Box<T> {
    fn state_dimension(&self) -> usize {
        (**self).state_dimension()
    }
    fn time_step(&self) -> f64 {
        (**self).time_step()
    }
    fn transition(&self, state: &DVector<f64>) -> DVector<f64> {
        (**self).transition(state)
    }
    fn jacobian(&self, state: &DVector<f64>) -> DMatrix<f64> {
        (**self).jacobian(state)
    }
}

/// Constant angular rate kinematics for the `[angle, rate]` state.
///
/// $$
/// f(\theta, \dot{\theta}) = [\theta + \dot{\theta}\,dt, \dot{\theta}], \qquad
/// F = \begin{bmatrix} 1 & dt \\\\ 0 & 1 \end{bmatrix}
/// $$
///
/// The transition is linear so the Jacobian does not depend on the state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstantRate {
    dt: f64,
}
impl ConstantRate {
    pub fn new(dt: f64) -> Self {
        ConstantRate { dt }
    }
}
impl Display for ConstantRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConstantRate(dt: {})", self.dt)
    }
}
impl ProcessModel for ConstantRate {
    fn state_dimension(&self) -> usize {
        2
    }
    fn time_step(&self) -> f64 {
        self.dt
    }
    fn transition(&self, state: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(vec![state[0] + state[1] * self.dt, state[1]])
    }
    fn jacobian(&self, _state: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 2, &[1.0, self.dt, 0.0, 1.0])
    }
}

/// Damped rigid pendulum integrated with a constant-acceleration step.
///
/// The bar is a uniform rod pivoting at one end, $I = m l^2 / 3$, so that
///
/// $$
/// \ddot{\theta} = \frac{-b\,\dot{\theta} - g\,l \sin\theta}{I}
/// $$
///
/// and one step of length $dt$ is
///
/// $$
/// \theta^+ = \theta + \dot{\theta}\,dt + \tfrac{1}{2}\ddot{\theta}\,dt^2, \qquad
/// \dot{\theta}^+ = \dot{\theta} + \ddot{\theta}\,dt
/// $$
///
/// A bar with zero inertia has no angular acceleration.
#[derive(Clone, Copy, PartialEq)]
pub struct GravityPendulum {
    dt: f64,
    gravity: f64,
    length: f64,
    mass: f64,
    damping: f64,
}
impl Debug for GravityPendulum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GravityPendulum")
            .field("dt (s)", &self.dt)
            .field("gravity (m/s^2)", &self.gravity)
            .field("length (m)", &self.length)
            .field("mass (kg)", &self.mass)
            .field("damping (N m s)", &self.damping)
            .finish()
    }
}
impl GravityPendulum {
    pub fn new(dt: f64, gravity: f64, length: f64, mass: f64, damping: f64) -> Self {
        GravityPendulum {
            dt,
            gravity,
            length,
            mass,
            damping,
        }
    }
    /// Moment of inertia about the pivot, kg m^2
    pub fn inertia(&self) -> f64 {
        self.mass * self.length * self.length / 3.0
    }
    fn inverse_inertia(&self) -> f64 {
        let inertia = self.inertia();
        if inertia > 0.0 { 1.0 / inertia } else { 0.0 }
    }
    /// Angular acceleration at the given angle and rate
    pub fn angular_acceleration(&self, angle: f64, rate: f64) -> f64 {
        let torque = -self.damping * rate - angle.sin() * self.gravity * self.length;
        torque * self.inverse_inertia()
    }
}
impl ProcessModel for GravityPendulum {
    fn state_dimension(&self) -> usize {
        2
    }
    fn time_step(&self) -> f64 {
        self.dt
    }
    fn transition(&self, state: &DVector<f64>) -> DVector<f64> {
        let (angle, rate) = (state[0], state[1]);
        let acceleration = self.angular_acceleration(angle, rate);
        DVector::from_vec(vec![
            angle + self.dt * rate + 0.5 * acceleration * self.dt * self.dt,
            rate + acceleration * self.dt,
        ])
    }
    fn jacobian(&self, state: &DVector<f64>) -> DMatrix<f64> {
        let dt = self.dt;
        let inverse_inertia = self.inverse_inertia();
        // Partials of the angular acceleration
        let d_angle = -self.gravity * self.length * state[0].cos() * inverse_inertia;
        let d_rate = -self.damping * inverse_inertia;
        DMatrix::from_row_slice(
            2,
            2,
            &[
                1.0 + 0.5 * dt * dt * d_angle,
                dt + 0.5 * dt * dt * d_rate,
                dt * d_angle,
                1.0 + dt * d_rate,
            ],
        )
    }
}

/// Linear process `f(x) = A x` with a constant transition matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearProcess {
    transition: DMatrix<f64>,
    dt: f64,
}
impl LinearProcess {
    /// Create a linear process model from a square transition matrix.
    ///
    /// # Panics
    /// Panics if `transition` is not square.
    pub fn new(transition: DMatrix<f64>, dt: f64) -> Self {
        assert!(
            transition.is_square(),
            "LinearProcess: transition matrix must be square"
        );
        LinearProcess { transition, dt }
    }
    /// Identity dynamics: the state does not evolve
    pub fn stationary(dimension: usize, dt: f64) -> Self {
        LinearProcess::new(DMatrix::identity(dimension, dimension), dt)
    }
}
impl ProcessModel for LinearProcess {
    fn state_dimension(&self) -> usize {
        self.transition.nrows()
    }
    fn time_step(&self) -> f64 {
        self.dt
    }
    fn transition(&self, state: &DVector<f64>) -> DVector<f64> {
        &self.transition * state
    }
    fn jacobian(&self, _state: &DVector<f64>) -> DMatrix<f64> {
        self.transition.clone()
    }
}
