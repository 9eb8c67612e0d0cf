// strafe_sim/src/error.rs

use strafe_core::error::ConfigError;
use thiserror::Error;

/// Everything that can stop the simulator before or after a run.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid robot configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to load configuration: {0}")]
    Figment(#[from] figment::Error),

    #[error("invalid setting '{field}': {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize run summary: {0}")]
    Summary(#[from] toml::ser::Error),
}
