// strafe_core/src/drive/mod.rs

use crate::error::{ConfigError, HardwareError};
use crate::messages::{ModulePosition, ModuleSample, ModuleState};
use crate::sampling::{OdometrySampler, SignalId};
use crate::types::{wrap_angle, Rotation};
use nalgebra::Vector2;
use parking_lot::Mutex;
use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, trace};

mod replay;

pub use replay::ReplayModuleIo;

// --- MODULE IO TRAIT ---
/// The hardware boundary of one swerve module: a drive actuator, a steer
/// actuator and an absolute angle sensor.
///
/// Backends (real controllers, the simulator, a replay log) implement this and
/// are chosen at startup. Reads must be bounded in time; a read that cannot
/// complete returns an error and the sampler skips that tick.
pub trait ModuleIo: Debug + Send {
    /// A human-readable device name for logs.
    fn name(&self) -> &str;

    /// Reads a fresh sample, stamped with the sampler's capture time.
    fn read_sample(&mut self, capture_timestamp: f64) -> Result<ModuleSample, HardwareError>;

    fn set_drive_voltage(&mut self, volts: f64);

    fn set_turn_setpoint(&mut self, angle: Rotation);

    fn set_brake_mode(&mut self, enabled: bool);
}

/// A module backend shared between the sampler thread and the control loop.
pub type SharedModuleIo = Arc<Mutex<Box<dyn ModuleIo>>>;

// =========================================================================
// == Calibration ==
// =========================================================================

/// Raw readings as they come off the motor controllers and the analog sensor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawModuleReading {
    /// Drive motor shaft position in rotations.
    pub drive_rotations: f64,
    /// Drive motor shaft speed in RPM.
    pub drive_rpm: f64,
    /// Absolute sensor angle in radians, before offset correction.
    pub absolute_angle_rad: f64,
}

/// Per-module constants assigned once at bring-up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModuleCalibration {
    /// Sensor reading when the wheel points straight ahead.
    pub absolute_offset_rad: f64,
    /// Whether the steer direction is reversed relative to the sensor.
    pub turn_inverted: bool,
    /// Wheel contact point relative to the robot center, in meters.
    pub position: Vector2<f64>,
}

impl ModuleCalibration {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.absolute_offset_rad.is_finite() {
            return Err(ConfigError::NonFinite {
                field: "module.absolute_offset",
                value: self.absolute_offset_rad,
            });
        }
        for value in self.position.iter() {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite {
                    field: "module.position",
                    value: *value,
                });
            }
        }
        Ok(())
    }

    /// Applies the inversion flag and the offset, then wraps to (-π, π].
    pub fn correct_angle(&self, raw_angle_rad: f64) -> Rotation {
        let signed = if self.turn_inverted {
            -raw_angle_rad
        } else {
            raw_angle_rad
        };
        Rotation::new(wrap_angle(signed - self.absolute_offset_rad))
    }

    /// The raw reading a sensor with this calibration would report for the
    /// given true angle. Inverse of [`ModuleCalibration::correct_angle`],
    /// returned in [0, 2π) like an analog encoder.
    pub fn raw_angle_for(&self, angle: Rotation) -> f64 {
        let signed = angle.angle() + self.absolute_offset_rad;
        let raw = if self.turn_inverted { -signed } else { signed };
        raw.rem_euclid(TAU)
    }
}

/// Drivetrain-wide constants shared by every module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrivetrainParams {
    pub wheel_radius_m: f64,
    /// Motor rotations per wheel rotation.
    pub drive_ratio: f64,
    /// Motor rotations per module rotation.
    pub turn_ratio: f64,
    pub max_speed_mps: f64,
    pub nominal_voltage: f64,
}

impl Default for DrivetrainParams {
    fn default() -> Self {
        Self {
            wheel_radius_m: 0.0508,
            drive_ratio: 5.36,
            turn_ratio: 150.0 / 7.0,
            max_speed_mps: 6.21792,
            nominal_voltage: 12.0,
        }
    }
}

impl DrivetrainParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("drivetrain.wheel_radius", self.wheel_radius_m),
            ("drivetrain.drive_ratio", self.drive_ratio),
            ("drivetrain.turn_ratio", self.turn_ratio),
            ("drivetrain.max_speed", self.max_speed_mps),
            ("drivetrain.nominal_voltage", self.nominal_voltage),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositive { field, value });
            }
        }
        Ok(())
    }

    /// Converts raw controller readings into a wheel-level sample.
    pub fn to_sample(
        &self,
        raw: &RawModuleReading,
        calibration: &ModuleCalibration,
        capture_timestamp: f64,
    ) -> ModuleSample {
        ModuleSample {
            drive_position_rad: raw.drive_rotations * TAU / self.drive_ratio,
            drive_velocity_rad_per_sec: raw.drive_rpm * TAU / 60.0 / self.drive_ratio,
            turn_angle: calibration.correct_angle(raw.absolute_angle_rad),
            capture_timestamp,
        }
    }

    /// Motor rotations that correspond to a wheel position in radians.
    pub fn drive_rotations_for(&self, wheel_rad: f64) -> f64 {
        wheel_rad * self.drive_ratio / TAU
    }

    pub fn turn_rotations_for(&self, module_angle_rad: f64) -> f64 {
        module_angle_rad * self.turn_ratio / TAU
    }
}

// =========================================================================
// == Swerve Module ==
// =========================================================================

/// One wheel assembly: its backend, its calibration and its sampler signal.
#[derive(Debug)]
pub struct SwerveModule {
    index: usize,
    io: SharedModuleIo,
    calibration: ModuleCalibration,
    params: DrivetrainParams,
    signal: SignalId,
    last_commanded_angle: Rotation,
}

impl SwerveModule {
    /// Builds the module and registers its sample signal with the sampler.
    pub fn new(
        index: usize,
        io: Box<dyn ModuleIo>,
        calibration: ModuleCalibration,
        params: DrivetrainParams,
        sampler: &OdometrySampler<ModuleSample>,
    ) -> Result<Self, ConfigError> {
        calibration.validate()?;
        params.validate()?;

        let name = io.name().to_string();
        let io: SharedModuleIo = Arc::new(Mutex::new(io));
        let signal_io = Arc::clone(&io);
        let signal = sampler.register_signal(
            format!("module-{index}/{name}"),
            Box::new(move |timestamp| match signal_io.lock().read_sample(timestamp) {
                Ok(sample) => Some(sample),
                Err(err) => {
                    trace!(%err, "module read failed");
                    None
                }
            }),
        );
        debug!(index, device = %name, "swerve module online");

        Ok(Self {
            index,
            io,
            calibration,
            params,
            signal,
            last_commanded_angle: Rotation::identity(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn signal(&self) -> SignalId {
        self.signal
    }

    pub fn calibration(&self) -> &ModuleCalibration {
        &self.calibration
    }

    /// Reads the module directly, outside of the sampler.
    pub fn read_now(&self, timestamp: f64) -> Result<ModuleSample, HardwareError> {
        self.io.lock().read_sample(timestamp)
    }

    /// Wheel travel and heading for a sample.
    pub fn module_position(&self, sample: &ModuleSample) -> ModulePosition {
        ModulePosition::new(
            sample.drive_position_rad * self.params.wheel_radius_m,
            sample.turn_angle,
        )
    }

    /// Commands a wheel speed and heading.
    ///
    /// The heading is optimized first: when the target is more than 90° away
    /// from the last command, the module turns the short way and drives in
    /// reverse. Returns the state that was actually commanded.
    pub fn apply_state(&mut self, desired: ModuleState) -> ModuleState {
        let state = optimize(desired, self.last_commanded_angle);
        let volts = (state.speed_mps / self.params.max_speed_mps * self.params.nominal_voltage)
            .clamp(-self.params.nominal_voltage, self.params.nominal_voltage);

        let mut io = self.io.lock();
        io.set_turn_setpoint(state.angle);
        io.set_drive_voltage(volts);
        self.last_commanded_angle = state.angle;
        state
    }

    pub fn stop(&mut self) {
        self.io.lock().set_drive_voltage(0.0);
    }

    pub fn set_brake_mode(&mut self, enabled: bool) {
        self.io.lock().set_brake_mode(enabled);
    }
}

/// Minimizes steer travel by flipping the drive direction when needed.
pub fn optimize(desired: ModuleState, current: Rotation) -> ModuleState {
    let delta = wrap_angle(desired.angle.angle() - current.angle());
    if delta.abs() > FRAC_PI_2 {
        ModuleState {
            speed_mps: -desired.speed_mps,
            angle: Rotation::new(wrap_angle(desired.angle.angle() + PI)),
        }
    } else {
        desired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::{ManualClock, SamplerConfig};
    use approx::assert_abs_diff_eq;

    #[derive(Debug, Default)]
    struct RecordingIo {
        volts: f64,
        setpoint: Option<Rotation>,
        brake: bool,
    }

    impl ModuleIo for RecordingIo {
        fn name(&self) -> &str {
            "recording"
        }

        fn read_sample(&mut self, capture_timestamp: f64) -> Result<ModuleSample, HardwareError> {
            Ok(ModuleSample {
                drive_position_rad: 2.0,
                drive_velocity_rad_per_sec: 0.0,
                turn_angle: self.setpoint.unwrap_or_else(Rotation::identity),
                capture_timestamp,
            })
        }

        fn set_drive_voltage(&mut self, volts: f64) {
            self.volts = volts;
        }

        fn set_turn_setpoint(&mut self, angle: Rotation) {
            self.setpoint = Some(angle);
        }

        fn set_brake_mode(&mut self, enabled: bool) {
            self.brake = enabled;
        }
    }

    fn calibration(offset: f64, inverted: bool) -> ModuleCalibration {
        ModuleCalibration {
            absolute_offset_rad: offset,
            turn_inverted: inverted,
            position: Vector2::new(0.25, 0.25),
        }
    }

    #[test]
    fn test_correct_angle_subtracts_offset_and_wraps() {
        let cal = calibration(-1.371, false);
        // 3.0 - (-1.371) = 4.371 wraps to 4.371 - 2π.
        assert_abs_diff_eq!(cal.correct_angle(3.0).angle(), 4.371 - TAU, epsilon = 1e-9);

        let inverted = calibration(0.5, true);
        assert_abs_diff_eq!(inverted.correct_angle(1.0).angle(), -1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_raw_angle_round_trips_through_correction() {
        for (offset, inverted) in [(-1.371, true), (0.2, false), (-3.06, true)] {
            let cal = calibration(offset, inverted);
            let truth = Rotation::new(2.5);
            let raw = cal.raw_angle_for(truth);
            assert!((0.0..TAU).contains(&raw));
            assert_abs_diff_eq!(cal.correct_angle(raw).angle(), 2.5, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_to_sample_removes_gear_ratios() {
        let params = DrivetrainParams::default();
        let raw = RawModuleReading {
            drive_rotations: 5.36,
            drive_rpm: 60.0 * 5.36,
            absolute_angle_rad: 0.0,
        };
        let sample = params.to_sample(&raw, &calibration(0.0, false), 1.25);
        assert_abs_diff_eq!(sample.drive_position_rad, TAU, epsilon = 1e-9);
        assert_abs_diff_eq!(sample.drive_velocity_rad_per_sec, TAU, epsilon = 1e-9);
        assert_eq!(sample.capture_timestamp, 1.25);
    }

    #[test]
    fn test_optimize_reverses_for_large_turns() {
        let desired = ModuleState {
            speed_mps: 2.0,
            angle: Rotation::new(PI),
        };
        let state = optimize(desired, Rotation::identity());
        assert_abs_diff_eq!(state.speed_mps, -2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(state.angle.angle().abs(), 0.0, epsilon = 1e-9);

        let small = optimize(
            ModuleState {
                speed_mps: 1.0,
                angle: Rotation::new(0.5),
            },
            Rotation::identity(),
        );
        assert_eq!(small.speed_mps, 1.0);
    }

    #[test]
    fn test_module_registers_signal_and_commands_io() {
        let sampler = OdometrySampler::new(
            SamplerConfig::default(),
            Arc::new(ManualClock::new(0.5)),
        )
        .unwrap();
        let mut module = SwerveModule::new(
            0,
            Box::new(RecordingIo::default()),
            calibration(0.0, false),
            DrivetrainParams::default(),
            &sampler,
        )
        .unwrap();

        let commanded = module.apply_state(ModuleState {
            speed_mps: 100.0,
            angle: Rotation::new(0.3),
        });
        assert_abs_diff_eq!(commanded.angle.angle(), 0.3, epsilon = 1e-12);

        sampler.poll_once();
        let drain = sampler.drain();
        let samples = drain.signal(module.signal());
        assert_eq!(samples.len(), 1);
        assert_abs_diff_eq!(samples[0].turn_angle.angle(), 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(
            module.module_position(&samples[0]).distance_m,
            2.0 * 0.0508,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_non_finite_offset_is_fatal() {
        let cal = calibration(f64::NAN, false);
        assert!(matches!(cal.validate(), Err(ConfigError::NonFinite { .. })));
    }
}
