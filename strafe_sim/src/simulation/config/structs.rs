// strafe_sim/src/simulation/config/structs.rs

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use strafe_core::messages::StdDevs;

use crate::simulation::utils::serde_helpers;

// =========================================================================
// == Top-Level Configuration ==
// =========================================================================

/// # RobotConfig
/// The root of the data parsed from a robot TOML file. Every section has
/// defaults matching the reference robot, so a file only needs to list what
/// differs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RobotConfig {
    #[serde(default)]
    pub simulation: SimulationSection,

    #[serde(default)]
    pub drivetrain: DrivetrainSection,

    /// In index order: front-left, front-right, back-left, back-right.
    #[serde(default = "default_modules")]
    pub modules: Vec<ModuleSection>,

    #[serde(default)]
    pub estimator: EstimatorSection,

    #[serde(default)]
    pub vision: VisionSection,

    #[serde(default)]
    pub cameras: Vec<CameraSection>,

    #[serde(default)]
    pub landmarks: Vec<LandmarkSection>,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            simulation: SimulationSection::default(),
            drivetrain: DrivetrainSection::default(),
            modules: default_modules(),
            estimator: EstimatorSection::default(),
            vision: VisionSection::default(),
            cameras: Vec::new(),
            landmarks: Vec::new(),
        }
    }
}

// =========================================================================
// == Configuration Sub-Structs ==
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Sampler and control loop driven from a manual clock, tick by tick.
    #[default]
    Lockstep,
    /// Background sampler thread on the wall clock.
    Realtime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationSection {
    /// Seed for the pseudo-random number generator.
    pub seed: Option<u64>,
    pub duration_seconds: f64,
    pub mode: RunMode,
    pub control_frequency_hz: f64,
    /// Chance that a single module read times out.
    pub read_dropout_probability: f64,
    /// Standard deviation of the per-module wheel radius error, as a fraction.
    pub wheel_scale_error: f64,
    /// Time constant of the drive motor velocity response.
    pub drive_time_constant_s: f64,
    #[serde(with = "serde_helpers::radians_from_deg", rename = "steer_rate_deg_per_s")]
    pub steer_rate_rad_per_s: f64,
    pub script: ScriptSection,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            seed: None,
            duration_seconds: 20.0,
            mode: RunMode::Lockstep,
            control_frequency_hz: 100.0,
            read_dropout_probability: 0.002,
            wheel_scale_error: 0.01,
            drive_time_constant_s: 0.05,
            steer_rate_rad_per_s: 720f64.to_radians(),
            script: ScriptSection::default(),
        }
    }
}

/// A square driven lap after lap: straight sides joined by turns in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScriptSection {
    pub side_length_m: f64,
    pub speed_mps: f64,
    #[serde(with = "serde_helpers::radians_from_deg", rename = "turn_rate_deg_per_s")]
    pub turn_rate_rad_per_s: f64,
    /// Pause between segments so the modules can re-steer.
    pub settle_seconds: f64,
}

impl Default for ScriptSection {
    fn default() -> Self {
        Self {
            side_length_m: 2.0,
            speed_mps: 1.5,
            turn_rate_rad_per_s: 90f64.to_radians(),
            settle_seconds: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DrivetrainSection {
    pub wheel_radius_m: f64,
    pub drive_ratio: f64,
    pub turn_ratio: f64,
    pub max_speed_mps: f64,
    pub nominal_voltage: f64,
    /// Front-to-back distance between module centers.
    pub track_width_x_m: f64,
    /// Left-to-right distance between module centers.
    pub track_width_y_m: f64,
}

impl Default for DrivetrainSection {
    fn default() -> Self {
        Self {
            wheel_radius_m: 0.0508,
            drive_ratio: 5.36,
            turn_ratio: 150.0 / 7.0,
            max_speed_mps: 6.21792,
            nominal_voltage: 12.0,
            track_width_x_m: 0.50165,
            track_width_y_m: 0.52705,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleSection {
    pub name: String,
    #[serde(with = "serde_helpers::radians_from_deg", rename = "absolute_offset_deg")]
    pub absolute_offset_rad: f64,
    #[serde(default)]
    pub turn_inverted: bool,
    /// Overrides the position derived from the track widths.
    #[serde(default)]
    pub position: Option<[f64; 2]>,
}

fn default_modules() -> Vec<ModuleSection> {
    [
        ("front_left", -78.560751073938),
        ("front_right", -175.70581168291014),
        ("back_left", -73.54207322946),
        ("back_right", -72.38969990),
    ]
    .into_iter()
    .map(|(name, offset_deg): (&str, f64)| ModuleSection {
        name: name.to_string(),
        absolute_offset_rad: offset_deg.to_radians(),
        turn_inverted: true,
        position: None,
    })
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EstimatorSection {
    pub odometry_frequency_hz: f64,
    pub max_queued_ticks: usize,
    #[serde(with = "serde_helpers::std_devs_from_array")]
    pub state_std_devs: StdDevs,
    pub history_window_s: f64,
}

impl Default for EstimatorSection {
    fn default() -> Self {
        Self {
            odometry_frequency_hz: 250.0,
            max_queued_ticks: 1000,
            state_std_devs: StdDevs::new(0.1, 0.1, 0.1),
            history_window_s: 1.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VisionSection {
    pub enabled: bool,
    pub landmark_size_m: f64,
    #[serde(with = "serde_helpers::std_devs_from_array")]
    pub single_landmark_std_devs: StdDevs,
    #[serde(with = "serde_helpers::std_devs_from_array")]
    pub multi_landmark_std_devs: StdDevs,
    pub distance_divisor: f64,
    pub max_single_distance_m: f64,
    pub max_ambiguity: f64,
    pub max_iterations: usize,
    pub max_rms_px: f64,
}

impl Default for VisionSection {
    fn default() -> Self {
        Self {
            enabled: true,
            landmark_size_m: 0.1651,
            single_landmark_std_devs: StdDevs::new(4.0, 4.0, 8.0),
            multi_landmark_std_devs: StdDevs::new(0.5, 0.5, 1.0),
            distance_divisor: 30.0,
            max_single_distance_m: 4.0,
            max_ambiguity: 0.2,
            max_iterations: 25,
            max_rms_px: 8.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraSection {
    pub name: String,
    /// Mounting pose relative to the robot center.
    pub transform: Pose,
    pub width_px: u32,
    pub height_px: u32,
    #[serde(with = "serde_helpers::radians_from_deg", rename = "diagonal_fov_deg")]
    pub diagonal_fov_rad: f64,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_latency_ms")]
    pub latency_ms: f64,
    #[serde(default = "default_max_range_m")]
    pub max_range_m: f64,
    #[serde(default = "default_pixel_noise_px")]
    pub pixel_noise_px: f64,
}

fn default_fps() -> f64 {
    50.0
}

fn default_latency_ms() -> f64 {
    50.0
}

fn default_max_range_m() -> f64 {
    7.0
}

fn default_pixel_noise_px() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LandmarkSection {
    pub id: u32,
    pub pose: Pose,
}

// =========================================================================
// == Helper Structs for Nested Configuration ==
// =========================================================================

/// A pose written as a translation in meters and roll/pitch/yaw in degrees.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct Pose {
    #[serde(with = "serde_helpers::vec3_from_array", default = "Vector3::zeros")]
    pub translation: Vector3<f64>,

    #[serde(
        with = "serde_helpers::quat_from_euler_deg",
        rename = "rotation_deg",
        default = "UnitQuaternion::identity"
    )]
    pub rotation: UnitQuaternion<f64>,
}

impl Pose {
    pub fn to_isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.translation), self.rotation)
    }
}
