//! PENDULUM SIM: runs the pendulum Extended Kalman Filter against a simulated plant.
//!
//! The plant integrates the configured process model from a known true state and reports noisy
//! accelerometer and gyro readings. The filter starts from a deliberately wrong estimate and is
//! ticked once per plant step. Results are printed to stdout, either as a table with a summary
//! or as one JSON record per tick.
//!
//! You can run simulations either by:
//!   1. Loading all parameters from a configuration file (TOML/JSON/YAML) with `--config`
//!   2. Using the built-in defaults and overriding individual values with flags

mod common;

use clap::{Args, Parser, Subcommand, ValueEnum};
use common::{init_logger, prepare_output_file};
use log::{error, info};
use pendulum_ekf::PendulumState;
use pendulum_ekf::config::{ProcessModelConfig, SimulationConfig};
use pendulum_ekf::kalman::CovarianceUpdate;
use pendulum_ekf::sim::RunResult;
use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

const LONG_ABOUT: &str =
    "PENDULUM SIM: runs the pendulum Extended Kalman Filter against a simulated plant.

The plant integrates the configured process model from a known true state and reports noisy
accelerometer and gyro readings. The filter starts from a deliberately wrong estimate and is
ticked once per plant step. Results are printed to stdout, either as a table with a summary
or as one JSON record per tick.

You can run simulations either by:
  1. Loading all parameters from a configuration file (TOML/JSON/YAML) with --config
  2. Using the built-in defaults and overriding individual values with flags";

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Runs the pendulum EKF against a simulated plant.", long_about = LONG_ABOUT)]
struct Cli {
    /// Load simulation parameters from a configuration file (TOML/JSON/YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Command to execute (defaults to `run`)
    #[command(subcommand)]
    command: Option<Command>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

/// Top-level commands
#[derive(Subcommand, Clone, Debug)]
enum Command {
    #[command(
        name = "run",
        about = "Run the filter against the simulated plant",
        long_about = "Run the filter against the simulated plant. Values given as flags override the configuration file, which in turn overrides the built-in defaults."
    )]
    Run(RunArgs),
    #[command(name = "config", about = "Write a template configuration file")]
    CreateConfig(CreateConfigArgs),
}

#[derive(Args, Clone, Debug, Default)]
struct RunArgs {
    /// Number of ticks to run
    #[arg(long)]
    ticks: Option<usize>,

    /// Seed for the plant noise generator
    #[arg(long)]
    seed: Option<u64>,

    /// Tick period in seconds
    #[arg(long)]
    dt: Option<f64>,

    /// Posterior covariance update form
    #[arg(long, value_enum)]
    covariance_update: Option<CovarianceUpdateArg>,

    /// Process model used by the plant and the filter
    #[arg(long, value_enum)]
    process_model: Option<ProcessModelArg>,

    /// Disturb the true state with the process noise covariance
    #[arg(long)]
    plant_noise: bool,

    /// Report noiseless sensor readings
    #[arg(long)]
    no_sensor_noise: bool,

    /// Print one JSON record per tick instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Output file; the format is chosen by extension (.toml/.json/.yaml/.yml)
    #[arg(short, long, value_parser)]
    output: PathBuf,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum CovarianceUpdateArg {
    Simple,
    Joseph,
}
impl From<CovarianceUpdateArg> for CovarianceUpdate {
    fn from(arg: CovarianceUpdateArg) -> Self {
        match arg {
            CovarianceUpdateArg::Simple => CovarianceUpdate::Simple,
            CovarianceUpdateArg::Joseph => CovarianceUpdate::Joseph,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ProcessModelArg {
    ConstantRate,
    GravityPendulum,
}

/// Apply command line overrides on top of a configuration.
fn apply_overrides(config: &mut SimulationConfig, args: &RunArgs) {
    if let Some(ticks) = args.ticks {
        config.ticks = ticks;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(dt) = args.dt {
        config.dt = dt;
    }
    if let Some(update) = args.covariance_update {
        config.covariance_update = update.into();
    }
    match args.process_model {
        Some(ProcessModelArg::ConstantRate) => {
            config.process_model = ProcessModelConfig::ConstantRate;
        }
        // Keep configured bar parameters when the file already selects the gravity model
        Some(ProcessModelArg::GravityPendulum)
            if !matches!(
                config.process_model,
                ProcessModelConfig::GravityPendulum { .. }
            ) =>
        {
            config.process_model = ProcessModelConfig::default_gravity_pendulum();
        }
        _ => {}
    }
    if args.plant_noise {
        config.plant_process_noise = true;
    }
    if args.no_sensor_noise {
        config.sensor_noise = false;
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<SimulationConfig, Box<dyn Error>> {
    match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            Ok(SimulationConfig::from_file(path)?)
        }
        None => Ok(SimulationConfig::default()),
    }
}

fn run_simulation(config: &SimulationConfig, json: bool) -> Result<(), Box<dyn Error>> {
    info!(
        "Running {} ticks at dt = {} s with {} process model, {} covariance update, seed {}",
        config.ticks, config.dt, config.process_model, config.covariance_update, config.seed
    );
    let result = config.run()?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        write_json_lines(&mut out, &result)?;
    } else {
        write_table(&mut out, &result)?;
    }
    Ok(())
}

fn write_json_lines<W: Write>(out: &mut W, result: &RunResult) -> Result<(), Box<dyn Error>> {
    for record in &result.records {
        writeln!(out, "{}", serde_json::to_string(record)?)?;
    }
    Ok(())
}

fn write_table<W: Write>(out: &mut W, result: &RunResult) -> Result<(), Box<dyn Error>> {
    writeln!(
        out,
        "{:>6} {:>8} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>8}",
        "tick", "time", "angle", "rate", "est_angle", "est_rate", "P00", "P11", "nis"
    )?;
    for record in &result.records {
        let nis = match record.nis {
            Some(nis) => format!("{:8.3}", nis),
            None => format!("{:>8}", "rejected"),
        };
        writeln!(
            out,
            "{:>6} {:>8.3} {:>10.5} {:>10.5} {:>10.5} {:>10.5} {:>10.6} {:>10.6} {}",
            record.tick,
            record.time,
            record.truth[0],
            record.truth[1],
            record.estimate[0],
            record.estimate[1],
            record.covariance[0][0],
            record.covariance[1][1],
            nis
        )?;
    }
    if let Some(last) = result.last() {
        let truth = PendulumState::try_from(&last.truth[..])?;
        let estimate = PendulumState::try_from(&last.estimate[..])?;
        writeln!(out)?;
        writeln!(out, "final truth:    {}", truth)?;
        writeln!(out, "final estimate: {}", estimate)?;
    }
    writeln!(
        out,
        "ticks: {}, rejected: {}",
        result.len(),
        result.rejected
    )?;
    if let (Some(angle), Some(rate)) = (result.rms_error(0), result.rms_error(1)) {
        writeln!(out, "rms error: angle {:.5} rad, rate {:.5} rad/s", angle, rate)?;
    }
    if let Some(nis) = result.mean_nis() {
        writeln!(out, "mean NIS: {:.3}", nis)?;
    }
    if let Some(nees) = result.mean_nees() {
        writeln!(out, "mean NEES: {:.3}", nees)?;
    }
    Ok(())
}

fn create_config_file(
    base: SimulationConfig,
    args: &CreateConfigArgs,
) -> Result<(), Box<dyn Error>> {
    prepare_output_file(&args.output)?;
    base.to_file(&args.output)?;
    info!("Configuration written to {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    let mut config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    let outcome = match cli.command {
        Some(Command::CreateConfig(args)) => create_config_file(config, &args),
        Some(Command::Run(args)) => {
            apply_overrides(&mut config, &args);
            run_simulation(&config, args.json)
        }
        None => run_simulation(&config, false),
    };
    if let Err(e) = &outcome {
        error!("{}", e);
    }
    outcome
}
