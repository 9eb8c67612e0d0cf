// strafe_sim/src/prelude.rs

// Re-export the entire strafe_core prelude so pipeline types are one import away.
pub use strafe_core::prelude::*;

// --- Simulation Types ---
pub use crate::cli::Cli;
pub use crate::error::SimError;
pub use crate::logging::init_logging;
pub use crate::simulation::config::{CameraSpec, ModuleSpec, RobotConfig, RobotParams, RunMode};
pub use crate::simulation::core::prng::SimulationRng;
pub use crate::simulation::core::runner::{RunSummary, Simulation};
pub use crate::simulation::core::simulation_setup::SimRobot;
pub use crate::simulation::plugins::sensors::camera::SimCameraIo;
pub use crate::simulation::plugins::vehicles::swerve::{SimModuleIo, SwervePlant};
