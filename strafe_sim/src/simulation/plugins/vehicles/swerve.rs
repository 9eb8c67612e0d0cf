// strafe_sim/src/simulation/plugins/vehicles/swerve.rs

//! A simulated swerve drivetrain and the module backends that read from it.
//!
//! The plant is shared between the sampler thread (reads) and the control
//! loop (commands). It advances lazily: every read first integrates the plant
//! up to the requested capture time, so the two threads never disagree on
//! where the robot is at a given instant.

use std::f64::consts::TAU;
use std::sync::Arc;

use nalgebra::Vector2;
use parking_lot::Mutex;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use strafe_core::drive::{DrivetrainParams, ModuleCalibration, ModuleIo, RawModuleReading};
use strafe_core::error::HardwareError;
use strafe_core::kinematics::SwerveKinematics;
use strafe_core::messages::{ModulePosition, ModuleSample};
use strafe_core::types::{apply_twist, wrap_angle, Pose2, Rotation};
use strafe_core::utils::integrators::{Integrator, RK4};
use tracing::{debug, trace};

/// Plant integration step, in seconds.
const PHYSICS_DT: f64 = 0.001;
/// A coasting wheel spins down this many times slower than a braked one.
const COAST_FACTOR: f64 = 4.0;

pub type SharedPlant = Arc<Mutex<SwervePlant>>;

// =========================================================================
// == Plant Model ==
// =========================================================================

#[derive(Debug, Clone, Copy)]
pub struct PlantSettings {
    pub drive_time_constant_s: f64,
    pub steer_rate_rad_per_s: f64,
}

/// True state of one wheel assembly.
#[derive(Debug, Clone, Copy, Default)]
struct PlantModule {
    /// Wheel angle in radians and wheel speed in rad/s.
    wheel_rad: f64,
    wheel_rad_per_sec: f64,
    angle: f64,
    drive_voltage: f64,
    turn_setpoint: f64,
    brake: bool,
    /// True rolling radius over nominal. Odometry only knows the nominal one.
    radius_scale: f64,
}

/// Ground truth for the whole drivetrain.
#[derive(Debug)]
pub struct SwervePlant {
    params: DrivetrainParams,
    settings: PlantSettings,
    kinematics: SwerveKinematics,
    modules: Vec<PlantModule>,
    time: f64,
    pose: Pose2,
}

impl SwervePlant {
    /// Builds a plant at `pose`. Each module gets a rolling radius error drawn
    /// from `N(1, wheel_scale_error)`.
    pub fn new(
        params: DrivetrainParams,
        settings: PlantSettings,
        kinematics: SwerveKinematics,
        wheel_scale_error: f64,
        pose: Pose2,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let scale = Normal::new(1.0, wheel_scale_error).ok();
        let modules = (0..kinematics.module_count())
            .map(|_| PlantModule {
                radius_scale: scale.map_or(1.0, |dist| dist.sample(&mut *rng)),
                ..PlantModule::default()
            })
            .collect::<Vec<_>>();
        debug!(
            scales = ?modules.iter().map(|m| m.radius_scale).collect::<Vec<_>>(),
            "plant wheel radius errors"
        );
        Self {
            params,
            settings,
            kinematics,
            modules,
            time: 0.0,
            pose,
        }
    }

    pub fn into_shared(self) -> SharedPlant {
        Arc::new(Mutex::new(self))
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn pose(&self) -> Pose2 {
        self.pose
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn reset(&mut self, pose: Pose2, time: f64) {
        self.pose = pose;
        self.time = time;
    }

    /// Integrates the plant forward to `time`. Earlier times are ignored.
    pub fn advance_to(&mut self, time: f64) {
        while self.time < time {
            let dt = (time - self.time).min(PHYSICS_DT);
            self.step(dt);
        }
    }

    fn step(&mut self, dt: f64) {
        let t0 = self.time;
        let max_wheel_speed = self.params.max_speed_mps / self.params.wheel_radius_m;
        let mut deltas = Vec::with_capacity(self.modules.len());

        for module in &mut self.modules {
            let target = module.drive_voltage / self.params.nominal_voltage * max_wheel_speed;
            let tau = if module.drive_voltage == 0.0 && !module.brake {
                self.settings.drive_time_constant_s * COAST_FACTOR
            } else {
                self.settings.drive_time_constant_s
            };
            // State: [wheel position, wheel speed]. First-order motor response.
            let dynamics = |x: &Vector2<f64>, _t: f64| Vector2::new(x[1], (target - x[1]) / tau);
            let x0 = Vector2::new(module.wheel_rad, module.wheel_rad_per_sec);
            let x1 = RK4.step(&dynamics, &x0, t0, t0 + dt);

            let error = wrap_angle(module.turn_setpoint - module.angle);
            let max_turn = self.settings.steer_rate_rad_per_s * dt;
            module.angle = wrap_angle(module.angle + error.clamp(-max_turn, max_turn));

            let rolled = (x1[0] - module.wheel_rad) * self.params.wheel_radius_m * module.radius_scale;
            deltas.push(ModulePosition::new(rolled, Rotation::new(module.angle)));
            module.wheel_rad = x1[0];
            module.wheel_rad_per_sec = x1[1];
        }

        if let Some(twist) = self.kinematics.to_twist(&deltas) {
            self.pose = apply_twist(&self.pose, &twist);
        }
        self.time = t0 + dt;
    }

    /// What the motor controllers and the absolute sensor of module `index`
    /// would report right now.
    fn raw_reading(&self, index: usize, calibration: &ModuleCalibration) -> Option<RawModuleReading> {
        let module = self.modules.get(index)?;
        Some(RawModuleReading {
            drive_rotations: self.params.drive_rotations_for(module.wheel_rad),
            drive_rpm: module.wheel_rad_per_sec * self.params.drive_ratio * 60.0 / TAU,
            absolute_angle_rad: calibration.raw_angle_for(Rotation::new(module.angle)),
        })
    }

    fn module_mut(&mut self, index: usize) -> Option<&mut PlantModule> {
        self.modules.get_mut(index)
    }
}

// =========================================================================
// == Module Backend ==
// =========================================================================

/// One module's view of the shared plant, with sensor dropouts.
#[derive(Debug)]
pub struct SimModuleIo {
    name: String,
    index: usize,
    plant: SharedPlant,
    calibration: ModuleCalibration,
    params: DrivetrainParams,
    dropout_probability: f64,
    rng: ChaCha8Rng,
}

impl SimModuleIo {
    pub fn new(
        name: impl Into<String>,
        index: usize,
        plant: SharedPlant,
        calibration: ModuleCalibration,
        params: DrivetrainParams,
        dropout_probability: f64,
        rng: ChaCha8Rng,
    ) -> Self {
        Self {
            name: name.into(),
            index,
            plant,
            calibration,
            params,
            dropout_probability,
            rng,
        }
    }
}

impl ModuleIo for SimModuleIo {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_sample(&mut self, capture_timestamp: f64) -> Result<ModuleSample, HardwareError> {
        if self.rng.gen_bool(self.dropout_probability) {
            trace!(module = %self.name, capture_timestamp, "simulated read timeout");
            return Err(HardwareError::Timeout {
                device: self.name.clone(),
            });
        }
        let raw = {
            let mut plant = self.plant.lock();
            plant.advance_to(capture_timestamp);
            plant.raw_reading(self.index, &self.calibration)
        }
        .ok_or_else(|| HardwareError::Fault {
            device: self.name.clone(),
            reason: format!("plant has no module {}", self.index),
        })?;
        Ok(self.params.to_sample(&raw, &self.calibration, capture_timestamp))
    }

    fn set_drive_voltage(&mut self, volts: f64) {
        if let Some(module) = self.plant.lock().module_mut(self.index) {
            module.drive_voltage = volts;
        }
    }

    fn set_turn_setpoint(&mut self, angle: Rotation) {
        if let Some(module) = self.plant.lock().module_mut(self.index) {
            module.turn_setpoint = angle.angle();
        }
    }

    fn set_brake_mode(&mut self, enabled: bool) {
        if let Some(module) = self.plant.lock().module_mut(self.index) {
            module.brake = enabled;
        }
    }
}
