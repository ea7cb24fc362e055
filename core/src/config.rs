//! Simulation configuration.
//!
//! A [`SimulationConfig`] describes a complete run: the plant and filter models, the noise
//! covariances, the initial truth and estimate, and the random seed. It can be written to and
//! read from JSON, YAML or TOML, with the format chosen by file extension. Every field has a
//! default, so a configuration file only needs to name the values it changes.
//!
//! The defaults reproduce the reference scenario: a pendulum spinning at 1 rad/s from the
//! bottom, an estimate that starts at 1 rad with zero rate, `P0 = 10 I`, `Q = I`, `R = I`,
//! `dt = 0.01` s and 100 ticks.
use crate::dynamics::{ConstantRate, GravityPendulum, ProcessModel};
use crate::kalman::{CovarianceUpdate, EkfError, ExtendedKalmanFilter, FilterOptions};
use crate::linalg::InversionOptions;
use crate::measurements::{ObservationModel, TiltSensor};
use crate::noise::NoiseModel;
use crate::sim::{RunResult, SimulatedPlant, run_filter};
use crate::{PENDULUM_STATE_DIMENSION, STANDARD_GRAVITY};

use std::fmt::{self, Display};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Process model used by both the simulated plant and the filter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProcessModelConfig {
    /// Angle integrates the rate, rate is constant
    #[default]
    ConstantRate,
    /// Damped rigid bar swinging under gravity
    GravityPendulum {
        /// Bar length in meters
        length: f64,
        /// Bar mass in kilograms
        mass: f64,
        /// Viscous friction at the joint
        damping: f64,
    },
}
impl ProcessModelConfig {
    /// Unit bar with no friction
    pub fn default_gravity_pendulum() -> Self {
        ProcessModelConfig::GravityPendulum {
            length: 1.0,
            mass: 1.0,
            damping: 0.0,
        }
    }
}
impl Display for ProcessModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessModelConfig::ConstantRate => write!(f, "constant-rate"),
            ProcessModelConfig::GravityPendulum {
                length,
                mass,
                damping,
            } => write!(
                f,
                "gravity-pendulum (length: {} m, mass: {} kg, damping: {})",
                length, mass, damping
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Tick period in seconds
    pub dt: f64,
    /// Gravitational acceleration in m/s^2, used by the sensor and the gravity pendulum
    pub gravity: f64,
    /// Number of predict/update ticks to run
    pub ticks: usize,
    /// Seed for the plant's noise generator
    pub seed: u64,
    /// True initial state `[angle, rate]`
    pub true_initial_state: Vec<f64>,
    /// Initial filter estimate `[angle, rate]`
    pub initial_estimate: Vec<f64>,
    /// Diagonal of the initial estimate covariance
    pub initial_covariance: Vec<f64>,
    /// Diagonal of the process noise covariance `Q`
    pub process_noise: Vec<f64>,
    /// Diagonal of the measurement noise covariance `R`
    pub measurement_noise: Vec<f64>,
    pub covariance_update: CovarianceUpdate,
    /// Disturb the true state with `Q` on every tick
    pub plant_process_noise: bool,
    /// Corrupt sensor readings with `R`
    pub sensor_noise: bool,
    /// Largest condition number of `S` accepted by the update
    pub max_condition_number: f64,
    /// Smallest `|det S| / ∏ |S_ii|` accepted by the update
    pub determinant_epsilon: f64,
    /// Must stay last: TOML tables follow plain keys
    pub process_model: ProcessModelConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let inversion = InversionOptions::default();
        SimulationConfig {
            dt: 0.01,
            gravity: STANDARD_GRAVITY,
            ticks: 100,
            seed: 42,
            true_initial_state: vec![0.0, 1.0],
            initial_estimate: vec![1.0, 0.0],
            initial_covariance: vec![10.0, 10.0],
            process_noise: vec![1.0, 1.0],
            measurement_noise: vec![1.0, 1.0, 1.0],
            covariance_update: CovarianceUpdate::default(),
            plant_process_noise: false,
            sensor_noise: true,
            max_condition_number: inversion.max_condition_number,
            determinant_epsilon: inversion.determinant_epsilon,
            process_model: ProcessModelConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }

    pub fn process_model(&self) -> Box<dyn ProcessModel> {
        match self.process_model {
            ProcessModelConfig::ConstantRate => Box::new(ConstantRate::new(self.dt)),
            ProcessModelConfig::GravityPendulum {
                length,
                mass,
                damping,
            } => Box::new(GravityPendulum::new(
                self.dt,
                self.gravity,
                length,
                mass,
                damping,
            )),
        }
    }
    pub fn sensor(&self) -> TiltSensor {
        TiltSensor::new(self.gravity)
    }
    pub fn noise_model(&self) -> NoiseModel {
        NoiseModel::from_diagonals(&self.process_noise, &self.measurement_noise)
    }
    pub fn filter_options(&self) -> FilterOptions {
        FilterOptions {
            covariance_update: self.covariance_update,
            inversion: InversionOptions {
                max_condition_number: self.max_condition_number,
                determinant_epsilon: self.determinant_epsilon,
            },
        }
    }
    /// Build the filter described by this configuration and initialize it.
    pub fn build_filter(
        &self,
    ) -> Result<ExtendedKalmanFilter<Box<dyn ProcessModel>, TiltSensor>, EkfError> {
        let mut filter =
            ExtendedKalmanFilter::new(self.process_model(), self.sensor(), self.noise_model())?
                .with_options(self.filter_options());
        filter.initialize(
            DVector::from_column_slice(&self.initial_estimate),
            DMatrix::from_diagonal(&DVector::from_column_slice(&self.initial_covariance)),
        )?;
        Ok(filter)
    }
    /// Build the simulated plant described by this configuration.
    pub fn build_plant(
        &self,
    ) -> Result<SimulatedPlant<Box<dyn ProcessModel>, TiltSensor>, EkfError> {
        let process = self.process_model();
        let sensor = self.sensor();
        check_length(
            "true initial state",
            PENDULUM_STATE_DIMENSION,
            self.true_initial_state.len(),
        )?;
        check_length(
            "process noise covariance",
            process.state_dimension(),
            self.process_noise.len(),
        )?;
        check_length(
            "measurement noise covariance",
            sensor.measurement_dimension(),
            self.measurement_noise.len(),
        )?;
        let noise = self.noise_model();
        let mut plant = SimulatedPlant::new(
            process,
            sensor,
            DVector::from_column_slice(&self.true_initial_state),
            self.seed,
        );
        if self.plant_process_noise {
            plant = plant.with_process_noise(noise.process_noise());
        }
        if self.sensor_noise {
            plant = plant.with_sensor_noise(noise.measurement_noise());
        }
        Ok(plant)
    }
    /// Build the filter and plant and run them for the configured number of ticks.
    pub fn run(&self) -> Result<RunResult, EkfError> {
        let mut filter = self.build_filter()?;
        let mut plant = self.build_plant()?;
        run_filter(&mut filter, &mut plant, self.ticks)
    }
}

fn check_length(context: &'static str, expected: usize, found: usize) -> Result<(), EkfError> {
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

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}
