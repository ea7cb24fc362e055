//! End-to-end tests for the pendulum filter driven by the simulated plant.
//!
//! These tests run complete simulations through [`SimulationConfig::run`] and [`run_filter`] and
//! check the properties a healthy filter must show over a whole run:
//! 1. The covariance stays symmetric and positive semi-definite on every tick
//! 2. The estimate converges to the truth from a wrong initial guess
//! 3. Singular innovation covariances are rejected without corrupting the estimate
//! 4. Seeded runs are reproducible
//!
//! Noisy runs can only be checked against loose bounds. The bounds below are generous regression
//! limits, not performance goals.
use nalgebra::{DMatrix, DVector};

use pendulum_ekf::config::{ProcessModelConfig, SimulationConfig};
use pendulum_ekf::dynamics::LinearProcess;
use pendulum_ekf::kalman::{CovarianceUpdate, ExtendedKalmanFilter};
use pendulum_ekf::linalg::{is_symmetric, min_eigenvalue};
use pendulum_ekf::measurements::LinearObservation;
use pendulum_ekf::noise::NoiseModel;
use pendulum_ekf::sim::{RunResult, SimulatedPlant, TickRecord, run_filter};

use assert_approx_eq::assert_approx_eq;

fn covariance_of(record: &TickRecord) -> DMatrix<f64> {
    let n = record.covariance.len();
    DMatrix::from_row_iterator(n, n, record.covariance.iter().flatten().cloned())
}

fn assert_covariance_healthy(result: &RunResult) {
    for record in &result.records {
        let p = covariance_of(record);
        assert!(
            is_symmetric(&p, 1e-12),
            "covariance not symmetric at tick {}",
            record.tick
        );
        assert!(
            min_eigenvalue(&p) >= -1e-9,
            "covariance not positive semi-definite at tick {}",
            record.tick
        );
    }
}

fn mean_absolute_error(result: &RunResult, component: usize, last: usize) -> f64 {
    let tail = &result.records[result.records.len() - last..];
    tail.iter()
        .map(|record| record.error()[component].abs())
        .sum::<f64>()
        / last as f64
}

#[test]
fn noiseless_reference_scenario_converges() {
    let config = SimulationConfig {
        sensor_noise: false,
        ..SimulationConfig::default()
    };
    let result = config.run().unwrap();
    assert_eq!(result.len(), 100);
    assert_eq!(result.rejected, 0);
    assert_covariance_healthy(&result);

    let first = &result.records[0];
    let last = result.last().unwrap();
    assert_approx_eq!(last.truth[0], 1.0, 1e-9);
    assert_approx_eq!(last.estimate[1], 1.0, 0.1);
    assert_approx_eq!(last.estimate[0], last.truth[0], 0.05);
    assert!(last.covariance[0][0] < first.covariance[0][0]);
}

#[test]
fn simple_and_joseph_runs_agree_without_noise() {
    let joseph = SimulationConfig {
        sensor_noise: false,
        ..SimulationConfig::default()
    };
    let simple = SimulationConfig {
        covariance_update: CovarianceUpdate::Simple,
        ..joseph.clone()
    };
    let a = joseph.run().unwrap();
    let b = simple.run().unwrap();
    for (ra, rb) in a.records.iter().zip(b.records.iter()) {
        for i in 0..2 {
            assert_approx_eq!(ra.estimate[i], rb.estimate[i], 1e-6);
        }
    }
}

#[test]
fn noisy_run_keeps_covariance_healthy_and_tracks() {
    let config = SimulationConfig {
        ticks: 300,
        ..SimulationConfig::default()
    };
    let result = config.run().unwrap();
    assert_eq!(result.len(), 300);
    assert_eq!(result.rejected, 0);
    assert_covariance_healthy(&result);
    assert!(mean_absolute_error(&result, 0, 50) < 0.3);
    assert!(result.mean_nis().unwrap().is_finite());
}

#[test]
fn gravity_pendulum_with_plant_noise_tracks() {
    let config = SimulationConfig {
        ticks: 400,
        seed: 11,
        process_noise: vec![1e-4, 1e-2],
        measurement_noise: vec![0.05, 0.05, 0.01],
        initial_covariance: vec![1.0, 1.0],
        plant_process_noise: true,
        process_model: ProcessModelConfig::default_gravity_pendulum(),
        ..SimulationConfig::default()
    };
    let result = config.run().unwrap();
    assert_eq!(result.rejected, 0);
    assert_covariance_healthy(&result);
    assert!(mean_absolute_error(&result, 0, 50) < 0.3);
    assert!(mean_absolute_error(&result, 1, 50) < 0.5);
}

#[test]
fn linear_toy_model_converges_with_shrinking_covariance() {
    let dt = 0.01;
    let truth = DVector::from_vec(vec![0.5, -0.3]);
    let mut filter = ExtendedKalmanFilter::new(
        LinearProcess::stationary(2, dt),
        LinearObservation::full_state(2),
        NoiseModel::isotropic(2, 0.0, 2, 1.0),
    )
    .unwrap();
    filter
        .initialize(DVector::from_vec(vec![0.0, 0.0]), DMatrix::identity(2, 2) * 10.0)
        .unwrap();
    let mut plant = SimulatedPlant::new(
        LinearProcess::stationary(2, dt),
        LinearObservation::full_state(2),
        truth.clone(),
        5,
    )
    .with_sensor_noise(&DMatrix::identity(2, 2));
    let result = run_filter(&mut filter, &mut plant, 500).unwrap();
    assert_covariance_healthy(&result);

    let traces: Vec<f64> = result
        .records
        .iter()
        .map(|record| covariance_of(record).trace())
        .collect();
    for pair in traces.windows(2) {
        assert!(pair[1] <= pair[0] + 1e-12);
    }
    // With Q = 0 and R = I the variance after k updates is P0 / (1 + k P0)
    assert_approx_eq!(traces[traces.len() - 1], 2.0 * 10.0 / (1.0 + 500.0 * 10.0), 1e-9);

    let last = result.last().unwrap();
    for i in 0..2 {
        assert_approx_eq!(last.estimate[i], truth[i], 0.2);
        assert_approx_eq!(last.truth[i], truth[i], 1e-15);
    }
}

#[test]
fn singular_innovation_covariance_rejects_every_tick() {
    let config = SimulationConfig {
        ticks: 10,
        true_initial_state: vec![0.0, 0.0],
        initial_estimate: vec![0.0, 0.0],
        measurement_noise: vec![0.0, 0.0, 0.0],
        sensor_noise: false,
        ..SimulationConfig::default()
    };
    let result = config.run().unwrap();
    assert_eq!(result.len(), 10);
    assert_eq!(result.rejected, 10);
    for record in &result.records {
        assert!(!record.accepted);
        assert_eq!(record.estimate, vec![0.0, 0.0]);
        assert_approx_eq!(record.covariance[0][0], 10.0, 1e-12);
        assert_approx_eq!(record.covariance[1][1], 10.0, 1e-12);
    }
}

#[test]
fn seeded_runs_are_reproducible() {
    let config = SimulationConfig {
        ticks: 50,
        plant_process_noise: true,
        process_noise: vec![1e-4, 1e-3],
        ..SimulationConfig::default()
    };
    let a = config.run().unwrap();
    let b = config.run().unwrap();
    assert_eq!(a, b);

    let other = SimulationConfig {
        seed: config.seed + 1,
        ..config.clone()
    };
    let c = other.run().unwrap();
    assert_ne!(a.records[0].measurement, c.records[0].measurement);
}

#[test]
fn run_result_serializes_to_json() {
    let config = SimulationConfig {
        ticks: 3,
        ..SimulationConfig::default()
    };
    let result = config.run().unwrap();
    let text = serde_json::to_string(&result).unwrap();
    let back: RunResult = serde_json::from_str(&text).unwrap();
    assert_eq!(back.len(), 3);
    assert_eq!(back.rejected, 0);
    assert_eq!(back.records[2].tick, 3);
}
