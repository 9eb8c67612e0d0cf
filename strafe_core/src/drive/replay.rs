// strafe_core/src/drive/replay.rs

use super::ModuleIo;
use crate::error::HardwareError;
use crate::messages::ModuleSample;
use crate::types::Rotation;
use std::collections::VecDeque;

/// Plays back a recorded sequence of module samples.
///
/// Each read hands out the next recorded sample, restamped with the capture
/// time of the current tick. Commands are recorded but have no effect on the
/// playback. Once the log runs out every read fails with
/// [`HardwareError::Exhausted`].
#[derive(Debug, Clone)]
pub struct ReplayModuleIo {
    name: String,
    samples: VecDeque<ModuleSample>,
    /// One flag per recorded tick. `true` marks a tick whose read failed.
    gaps: VecDeque<bool>,
    last_drive_voltage: f64,
    last_turn_setpoint: Option<Rotation>,
    brake_mode: bool,
}

impl ReplayModuleIo {
    pub fn new(name: impl Into<String>, samples: impl IntoIterator<Item = ModuleSample>) -> Self {
        let samples: VecDeque<_> = samples.into_iter().collect();
        let gaps = std::iter::repeat(false).take(samples.len()).collect();
        Self {
            name: name.into(),
            samples,
            gaps,
            last_drive_voltage: 0.0,
            last_turn_setpoint: None,
            brake_mode: false,
        }
    }

    /// Builds a replay where `None` entries reproduce failed reads.
    pub fn with_gaps(
        name: impl Into<String>,
        recording: impl IntoIterator<Item = Option<ModuleSample>>,
    ) -> Self {
        let mut samples = VecDeque::new();
        let mut gaps = VecDeque::new();
        for entry in recording {
            match entry {
                Some(sample) => {
                    samples.push_back(sample);
                    gaps.push_back(false);
                }
                None => gaps.push_back(true),
            }
        }
        Self {
            gaps,
            samples,
            ..Self::new(name, [])
        }
    }

    pub fn remaining(&self) -> usize {
        self.gaps.len()
    }

    pub fn last_drive_voltage(&self) -> f64 {
        self.last_drive_voltage
    }

    pub fn last_turn_setpoint(&self) -> Option<Rotation> {
        self.last_turn_setpoint
    }

    pub fn brake_mode(&self) -> bool {
        self.brake_mode
    }
}

impl ModuleIo for ReplayModuleIo {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_sample(&mut self, capture_timestamp: f64) -> Result<ModuleSample, HardwareError> {
        match self.gaps.pop_front() {
            None => Err(HardwareError::Exhausted {
                device: self.name.clone(),
            }),
            Some(true) => Err(HardwareError::Timeout {
                device: self.name.clone(),
            }),
            Some(false) => {
                let sample = self.samples.pop_front().ok_or_else(|| HardwareError::Exhausted {
                    device: self.name.clone(),
                })?;
                Ok(ModuleSample {
                    capture_timestamp,
                    ..sample
                })
            }
        }
    }

    fn set_drive_voltage(&mut self, volts: f64) {
        self.last_drive_voltage = volts;
    }

    fn set_turn_setpoint(&mut self, angle: Rotation) {
        self.last_turn_setpoint = Some(angle);
    }

    fn set_brake_mode(&mut self, enabled: bool) {
        self.brake_mode = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(position: f64) -> ModuleSample {
        ModuleSample {
            drive_position_rad: position,
            drive_velocity_rad_per_sec: 0.0,
            turn_angle: Rotation::identity(),
            capture_timestamp: -1.0,
        }
    }

    #[test]
    fn test_replay_restamps_and_exhausts() {
        let mut io = ReplayModuleIo::new("fl", [sample(1.0), sample(2.0)]);
        let first = io.read_sample(0.25).unwrap();
        assert_eq!(first.drive_position_rad, 1.0);
        assert_eq!(first.capture_timestamp, 0.25);
        assert!(io.read_sample(0.5).is_ok());
        assert!(matches!(
            io.read_sample(0.75),
            Err(HardwareError::Exhausted { .. })
        ));
    }

    #[test]
    fn test_replay_gaps_fail_without_consuming_samples() {
        let mut io = ReplayModuleIo::with_gaps("fr", [Some(sample(1.0)), None, Some(sample(3.0))]);
        assert_eq!(io.remaining(), 3);
        assert_eq!(io.read_sample(0.0).unwrap().drive_position_rad, 1.0);
        assert!(matches!(io.read_sample(0.1), Err(HardwareError::Timeout { .. })));
        assert_eq!(io.read_sample(0.2).unwrap().drive_position_rad, 3.0);
    }
}
