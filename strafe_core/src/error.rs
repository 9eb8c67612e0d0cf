// strafe_core/src/error.rs

use thiserror::Error;

/// A transient failure at the hardware boundary.
///
/// These are never fatal. The sampler drops the affected signal for one tick
/// and carries on, so a stale or zeroed value never enters the sample stream.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HardwareError {
    #[error("read from '{device}' timed out")]
    Timeout { device: String },

    #[error("device '{device}' reported a fault: {reason}")]
    Fault { device: String, reason: String },

    /// A replay backend has no more recorded samples to hand out.
    #[error("replay source '{device}' is exhausted")]
    Exhausted { device: String },
}

/// Errors detected while validating calibration and geometry at startup.
///
/// Any of these is startup-fatal: offsets and kinematics cannot be corrected
/// once the robot is running.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("a swerve drivetrain needs at least 2 modules, got {0}")]
    TooFewModules(usize),

    #[error("modules {0} and {1} share the same position")]
    CoincidentModules(usize, usize),

    #[error("module geometry is degenerate: {0}")]
    DegenerateGeometry(String),

    #[error("'{field}' must be a positive, finite number (got {value})")]
    NonPositive { field: &'static str, value: f64 },

    #[error("'{field}' must be finite (got {value})")]
    NonFinite { field: &'static str, value: f64 },

    #[error("landmark id {0} is defined more than once")]
    DuplicateLandmark(u32),

    #[error("camera '{camera}' has invalid intrinsics: {reason}")]
    InvalidCamera { camera: String, reason: String },

    #[error("expected {expected} module calibrations, got {actual}")]
    ModuleCountMismatch { expected: usize, actual: usize },
}

/// Reasons a camera frame could not be turned into a pose.
///
/// Internal to the vision estimator: a failed solve simply withholds the
/// observation for that frame.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SolveError {
    #[error("no known landmarks in frame")]
    NoLandmarks,

    #[error("single landmark {id} is too ambiguous ({ambiguity:.3})")]
    Ambiguous { id: u32, ambiguity: f64 },

    #[error("multi-landmark solve diverged after {iterations} iterations (rms {rms_px:.2} px)")]
    Diverged { iterations: usize, rms_px: f64 },

    #[error("normal equations are singular")]
    Degenerate,
}
