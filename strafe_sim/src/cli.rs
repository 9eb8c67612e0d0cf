// strafe_sim/src/cli.rs

use clap::Parser;
use std::path::PathBuf;

use crate::simulation::config::RobotConfig;

/// Strafe: closed-loop simulator for the swerve state-estimation pipeline.
///
/// Loads a robot file, drives a square with simulated modules and cameras,
/// and reports how well the fused pose tracked ground truth.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The path to the robot TOML file.
    #[arg(short, long, default_value = "assets/robot.toml")]
    pub config: PathBuf,

    /// Override the simulated duration, in seconds.
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// Override the random seed.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Emit logs as newline-delimited JSON.
    #[arg(long, default_value_t = false)]
    pub json_logs: bool,

    /// Run on wheel odometry alone.
    #[arg(long, default_value_t = false)]
    pub no_vision: bool,

    /// Write the run summary as TOML to this path.
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

impl Cli {
    /// Applies command-line overrides on top of the loaded file.
    pub fn apply(&self, config: &mut RobotConfig) {
        if let Some(duration) = self.duration {
            config.simulation.duration_seconds = duration;
        }
        if let Some(seed) = self.seed {
            config.simulation.seed = Some(seed);
        }
        if self.no_vision {
            config.vision.enabled = false;
        }
    }
}
