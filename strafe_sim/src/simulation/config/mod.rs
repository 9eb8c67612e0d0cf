// strafe_sim/src/simulation/config/mod.rs

//! Loading the robot file and turning it into validated core parameters.
//!
//! Values come from the TOML file first, then from `STRAFE_`-prefixed
//! environment variables, with `__` separating nested keys
//! (`STRAFE_SIMULATION__SEED=7`).

pub mod structs;

use std::path::Path;
use std::sync::Arc;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use nalgebra::Vector2;
use strafe_core::drive::{DrivetrainParams, ModuleCalibration};
use strafe_core::error::ConfigError;
use strafe_core::estimation::FusionConfig;
use strafe_core::kinematics::SwerveKinematics;
use strafe_core::sampling::SamplerConfig;
use strafe_core::vision::{CameraParams, LandmarkMap, SolverConfig, VisionNoiseParams};
use tracing::info;

use crate::error::SimError;
pub use structs::*;

pub const ENV_PREFIX: &str = "STRAFE_";

/// Module count the track widths describe when positions are not given.
const DERIVED_MODULE_COUNT: usize = 4;

// =========================================================================
// == Validated Parameters ==
// =========================================================================

#[derive(Debug, Clone)]
pub struct ModuleSpec {
    pub name: String,
    pub calibration: ModuleCalibration,
}

#[derive(Debug, Clone)]
pub struct CameraSpec {
    pub params: CameraParams,
    pub fps: f64,
    pub latency_s: f64,
    pub max_range_m: f64,
    pub pixel_noise_px: f64,
}

/// Everything the pipeline needs, checked once at startup and immutable
/// afterwards.
#[derive(Debug, Clone)]
pub struct RobotParams {
    pub drivetrain: DrivetrainParams,
    pub modules: Vec<ModuleSpec>,
    pub kinematics: SwerveKinematics,
    pub sampler: SamplerConfig,
    pub fusion: FusionConfig,
    pub noise: VisionNoiseParams,
    pub solver: SolverConfig,
    /// Empty when vision is disabled.
    pub cameras: Vec<CameraSpec>,
    pub landmarks: Arc<LandmarkMap>,
}

// =========================================================================
// == Loading ==
// =========================================================================

impl RobotConfig {
    /// Reads the robot file at `path` and applies environment overrides.
    pub fn load(path: &Path) -> Result<Self, SimError> {
        if !path.is_file() {
            return Err(SimError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("robot file '{}' not found", path.display()),
            )));
        }
        info!("Loading robot configuration from: {}", path.display());
        let config = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validates every section and converts it into core parameter types.
    pub fn build(&self) -> Result<RobotParams, SimError> {
        self.simulation.validate()?;

        let d = &self.drivetrain;
        let drivetrain = DrivetrainParams {
            wheel_radius_m: d.wheel_radius_m,
            drive_ratio: d.drive_ratio,
            turn_ratio: d.turn_ratio,
            max_speed_mps: d.max_speed_mps,
            nominal_voltage: d.nominal_voltage,
        };
        drivetrain.validate()?;

        let modules = self.module_specs()?;
        let positions: Vec<Vector2<f64>> = modules.iter().map(|m| m.calibration.position).collect();
        let kinematics = SwerveKinematics::new(&positions)?;

        let sampler = SamplerConfig {
            frequency_hz: self.estimator.odometry_frequency_hz,
            max_queued_ticks: self.estimator.max_queued_ticks,
        };
        sampler.validate()?;

        let fusion = FusionConfig {
            state_std_devs: self.estimator.state_std_devs,
            history_window_s: self.estimator.history_window_s,
        };
        fusion.validate()?;

        let v = &self.vision;
        let noise = VisionNoiseParams {
            single_landmark: v.single_landmark_std_devs,
            multi_landmark: v.multi_landmark_std_devs,
            distance_divisor: v.distance_divisor,
            max_single_distance_m: v.max_single_distance_m,
        };
        noise.validate()?;
        let solver = SolverConfig {
            max_ambiguity: v.max_ambiguity,
            max_iterations: v.max_iterations,
            max_rms_px: v.max_rms_px,
        };

        let landmarks = LandmarkMap::new(
            self.landmarks.iter().map(|l| (l.id, l.pose.to_isometry())),
            v.landmark_size_m,
        )?;

        let cameras = if v.enabled {
            self.cameras
                .iter()
                .map(CameraSection::to_spec)
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        Ok(RobotParams {
            drivetrain,
            modules,
            kinematics,
            sampler,
            fusion,
            noise,
            solver,
            cameras,
            landmarks: Arc::new(landmarks),
        })
    }

    fn module_specs(&self) -> Result<Vec<ModuleSpec>, ConfigError> {
        let needs_derived = self.modules.iter().any(|m| m.position.is_none());
        if needs_derived && self.modules.len() != DERIVED_MODULE_COUNT {
            return Err(ConfigError::ModuleCountMismatch {
                expected: DERIVED_MODULE_COUNT,
                actual: self.modules.len(),
            });
        }

        let half_x = self.drivetrain.track_width_x_m / 2.0;
        let half_y = self.drivetrain.track_width_y_m / 2.0;
        // Front-left, front-right, back-left, back-right.
        let derived = [
            Vector2::new(half_x, half_y),
            Vector2::new(half_x, -half_y),
            Vector2::new(-half_x, half_y),
            Vector2::new(-half_x, -half_y),
        ];

        self.modules
            .iter()
            .enumerate()
            .map(|(index, m)| {
                let position = match m.position {
                    Some([x, y]) => Vector2::new(x, y),
                    None => derived[index],
                };
                let calibration = ModuleCalibration {
                    absolute_offset_rad: m.absolute_offset_rad,
                    turn_inverted: m.turn_inverted,
                    position,
                };
                calibration.validate()?;
                Ok(ModuleSpec {
                    name: m.name.clone(),
                    calibration,
                })
            })
            .collect()
    }
}

impl SimulationSection {
    pub fn validate(&self) -> Result<(), SimError> {
        let positive = [
            ("simulation.duration_seconds", self.duration_seconds),
            ("simulation.control_frequency_hz", self.control_frequency_hz),
            ("simulation.drive_time_constant_s", self.drive_time_constant_s),
            ("simulation.steer_rate_deg_per_s", self.steer_rate_rad_per_s),
            ("simulation.script.side_length_m", self.script.side_length_m),
            ("simulation.script.speed_mps", self.script.speed_mps),
            ("simulation.script.turn_rate_deg_per_s", self.script.turn_rate_rad_per_s),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositive { field, value }.into());
            }
        }
        if !(0.0..=1.0).contains(&self.read_dropout_probability) {
            return Err(SimError::InvalidSetting {
                field: "simulation.read_dropout_probability",
                reason: format!("{} is not a probability", self.read_dropout_probability),
            });
        }
        for (field, value) in [
            ("simulation.wheel_scale_error", self.wheel_scale_error),
            ("simulation.script.settle_seconds", self.script.settle_seconds),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(SimError::InvalidSetting {
                    field,
                    reason: format!("{value} must be zero or positive"),
                });
            }
        }
        Ok(())
    }
}

impl CameraSection {
    fn to_spec(&self) -> Result<CameraSpec, ConfigError> {
        let params = CameraParams::new(
            self.name.clone(),
            self.transform.to_isometry(),
            self.width_px,
            self.height_px,
            self.diagonal_fov_rad,
        )?;
        let invalid = |reason: String| ConfigError::InvalidCamera {
            camera: self.name.clone(),
            reason,
        };
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(invalid(format!("fps {} must be positive", self.fps)));
        }
        if !(self.latency_ms.is_finite() && self.latency_ms >= 0.0) {
            return Err(invalid(format!("latency {} ms must not be negative", self.latency_ms)));
        }
        if !(self.max_range_m.is_finite() && self.max_range_m > 0.0) {
            return Err(invalid(format!("max range {} m must be positive", self.max_range_m)));
        }
        if !(self.pixel_noise_px.is_finite() && self.pixel_noise_px >= 0.0) {
            return Err(invalid(format!("pixel noise {} must not be negative", self.pixel_noise_px)));
        }
        Ok(CameraSpec {
            params,
            fps: self.fps,
            latency_s: self.latency_ms / 1000.0,
            max_range_m: self.max_range_m,
            pixel_noise_px: self.pixel_noise_px,
        })
    }
}
