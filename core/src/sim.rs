//! Simulated plant and the run driver.
//!
//! This module provides:
//! - The [`Plant`] trait, the external collaborator that owns the true state and produces sensor
//!   readings
//! - [`SimulatedPlant`], a plant built from a process model and an observation model with
//!   optional, seeded Gaussian process and sensor noise
//! - [`run_filter`], which ticks a plant and a filter in lockstep and collects the time series
//!   into a [`RunResult`]
//!
//! Noise is drawn only here. The filter in [`crate::kalman`] is deterministic.
use crate::dynamics::ProcessModel;
use crate::kalman::{EkfError, ExtendedKalmanFilter};
use crate::linalg::matrix_square_root;
use crate::measurements::ObservationModel;

use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Source of ground truth and sensor readings for a run.
pub trait Plant {
    /// Advance the true state by one tick
    fn advance(&mut self);
    /// Current true state, for comparison only
    fn true_state(&self) -> &DVector<f64>;
    /// Read the sensors at the current true state
    fn sense(&mut self) -> DVector<f64>;
}

/// Plant that integrates a process model and reads an observation model, with optional additive
/// Gaussian noise on both.
///
/// Noise samples are drawn as `L w` with `L` a square root of the covariance and `w` standard
/// normal, from a deterministic RNG so repeated runs with the same seed are identical.
pub struct SimulatedPlant<P, O> {
    process: P,
    observation: O,
    state: DVector<f64>,
    /// Square root of the process noise covariance when process noise is enabled
    process_noise_root: Option<DMatrix<f64>>,
    /// Square root of the sensor noise covariance when sensor noise is enabled
    sensor_noise_root: Option<DMatrix<f64>>,
    rng: StdRng,
}
impl<P: ProcessModel, O: ObservationModel> SimulatedPlant<P, O> {
    /// Create a noiseless plant starting at `initial_state`.
    ///
    /// # Panics
    /// Panics if the length of `initial_state` does not match the process model.
    pub fn new(process: P, observation: O, initial_state: DVector<f64>, seed: u64) -> Self {
        assert_eq!(
            initial_state.len(),
            process.state_dimension(),
            "SimulatedPlant: initial state has the wrong length"
        );
        SimulatedPlant {
            process,
            observation,
            state: initial_state,
            process_noise_root: None,
            sensor_noise_root: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }
    /// Disturb the true state with zero-mean noise of covariance `covariance` on every advance.
    pub fn with_process_noise(mut self, covariance: &DMatrix<f64>) -> Self {
        self.process_noise_root = Some(matrix_square_root(covariance));
        self
    }
    /// Corrupt every sensor reading with zero-mean noise of covariance `covariance`.
    pub fn with_sensor_noise(mut self, covariance: &DMatrix<f64>) -> Self {
        self.sensor_noise_root = Some(matrix_square_root(covariance));
        self
    }
    pub fn time_step(&self) -> f64 {
        self.process.time_step()
    }
}
impl<P: ProcessModel, O: ObservationModel> Plant for SimulatedPlant<P, O> {
    fn advance(&mut self) {
        let mut next = self.process.transition(&self.state);
        if let Some(root) = &self.process_noise_root {
            next += sample_gaussian(root, &mut self.rng);
        }
        self.state = next;
    }
    fn true_state(&self) -> &DVector<f64> {
        &self.state
    }
    fn sense(&mut self) -> DVector<f64> {
        let mut z = self.observation.expected_measurement(&self.state);
        if let Some(root) = &self.sensor_noise_root {
            z += sample_gaussian(root, &mut self.rng);
        }
        z
    }
}

fn sample_gaussian(root: &DMatrix<f64>, rng: &mut StdRng) -> DVector<f64> {
    let white = DVector::from_fn(root.ncols(), |_, _| rng.sample::<f64, _>(StandardNormal));
    root * white
}

/// One tick of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    /// 1-based tick index
    pub tick: usize,
    /// Simulation time at the end of the tick, seconds
    pub time: f64,
    pub truth: Vec<f64>,
    pub measurement: Vec<f64>,
    /// Posterior mean after the tick
    pub estimate: Vec<f64>,
    /// Posterior covariance after the tick, one inner vector per row
    pub covariance: Vec<Vec<f64>>,
    /// `false` when the update was rejected for a singular innovation covariance
    pub accepted: bool,
    /// Normalized innovation squared, only for accepted ticks
    pub nis: Option<f64>,
    /// Normalized estimation error squared of the posterior against the truth
    pub nees: Option<f64>,
}
impl TickRecord {
    /// Estimate minus truth, per state
    pub fn error(&self) -> Vec<f64> {
        self.estimate
            .iter()
            .zip(self.truth.iter())
            .map(|(estimate, truth)| estimate - truth)
            .collect()
    }
}

/// Time series produced by [`run_filter`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub records: Vec<TickRecord>,
    /// Number of ticks whose update was rejected
    pub rejected: usize,
}
impl RunResult {
    pub fn len(&self) -> usize {
        self.records.len()
    }
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
    pub fn last(&self) -> Option<&TickRecord> {
        self.records.last()
    }
    /// Root mean square error of one state component over the whole run.
    ///
    /// `None` for an empty run or a component index outside the state.
    pub fn rms_error(&self, component: usize) -> Option<f64> {
        if self.records.is_empty() {
            return None;
        }
        let squares = self
            .records
            .iter()
            .map(|record| record.error().get(component).map(|e| e.powi(2)))
            .collect::<Option<Vec<f64>>>()?;
        Some((squares.iter().sum::<f64>() / squares.len() as f64).sqrt())
    }
    /// Mean NEES over the ticks where it could be computed
    pub fn mean_nees(&self) -> Option<f64> {
        mean(self.records.iter().filter_map(|record| record.nees))
    }
    /// Mean NIS over the accepted ticks
    pub fn mean_nis(&self) -> Option<f64> {
        mean(self.records.iter().filter_map(|record| record.nis))
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Tick a plant and an initialized filter in lockstep for `ticks` ticks.
///
/// Each tick advances the plant, reads its sensors, runs one predict and one update, and records
/// the posterior next to the truth. A tick whose innovation covariance cannot be inverted is
/// logged, recorded as rejected with the previous posterior, and the run continues. Any other
/// filter error aborts the run.
pub fn run_filter<P, O, S>(
    filter: &mut ExtendedKalmanFilter<P, O>,
    plant: &mut S,
    ticks: usize,
) -> Result<RunResult, EkfError>
where
    P: ProcessModel,
    O: ObservationModel,
    S: Plant + ?Sized,
{
    // Fail before touching the plant
    filter.current_estimate()?;
    let dt = filter.process_model().time_step();
    let mut result = RunResult {
        records: Vec::with_capacity(ticks),
        rejected: 0,
    };
    for tick in 1..=ticks {
        plant.advance();
        let measurement = plant.sense();
        let truth = plant.true_state().clone();
        let (accepted, nis) = match filter.step(&measurement) {
            Ok(innovation) => (true, Some(innovation.nis)),
            Err(EkfError::SingularInnovationCovariance {
                determinant,
                condition_number,
            }) => {
                warn!(
                    "Tick {}: rejected update, innovation covariance determinant {:e}, condition number {:e}",
                    tick, determinant, condition_number
                );
                result.rejected += 1;
                (false, None)
            }
            Err(e) => return Err(e),
        };
        let estimate = filter.current_estimate()?;
        let nees = estimate.nees(&truth);
        debug!(
            "Tick {}: estimate {:?}, truth {:?}, nis {:?}",
            tick,
            estimate.mean.as_slice(),
            truth.as_slice(),
            nis
        );
        result.records.push(TickRecord {
            tick,
            time: tick as f64 * dt,
            truth: truth.iter().cloned().collect(),
            measurement: measurement.iter().cloned().collect(),
            estimate: estimate.mean.iter().cloned().collect(),
            covariance: estimate
                .covariance
                .row_iter()
                .map(|row| row.iter().cloned().collect())
                .collect(),
            accepted,
            nis,
            nees,
        });
    }
    info!(
        "Completed {} ticks ({} rejected)",
        result.len(),
        result.rejected
    );
    Ok(result)
}
