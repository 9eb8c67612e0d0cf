// strafe_sim/src/simulation/plugins/control/script.rs

use std::f64::consts::FRAC_PI_2;

use strafe_core::kinematics::ChassisSpeeds;

use crate::simulation::config::ScriptSection;

/// What the script wants from the drivetrain at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptCommand {
    pub speeds: ChassisSpeeds,
    /// Point the modules for `speeds` without driving, so the next segment
    /// starts already steered.
    pub steer_only: bool,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    speeds: ChassisSpeeds,
    duration_s: f64,
}

/// A square driven lap after lap: a straight side, a 90° turn in place,
/// repeated, with a settle pause before every segment.
#[derive(Debug, Clone)]
pub struct DriveScript {
    segments: Vec<Segment>,
    settle_s: f64,
}

impl DriveScript {
    pub fn square(script: &ScriptSection) -> Self {
        let side = Segment {
            speeds: ChassisSpeeds::new(script.speed_mps, 0.0, 0.0),
            duration_s: script.side_length_m / script.speed_mps,
        };
        let turn = Segment {
            speeds: ChassisSpeeds::new(0.0, 0.0, script.turn_rate_rad_per_s),
            duration_s: FRAC_PI_2 / script.turn_rate_rad_per_s,
        };
        Self {
            segments: vec![side, turn, side, turn, side, turn, side, turn],
            settle_s: script.settle_seconds,
        }
    }

    /// Length of one full lap, in seconds.
    pub fn lap_s(&self) -> f64 {
        self.segments.iter().map(|s| s.duration_s + self.settle_s).sum()
    }

    pub fn command(&self, time: f64) -> ScriptCommand {
        let lap = self.lap_s();
        let mut t = if lap > 0.0 { time.rem_euclid(lap) } else { 0.0 };
        for segment in &self.segments {
            if t < self.settle_s {
                return ScriptCommand {
                    speeds: segment.speeds,
                    steer_only: true,
                };
            }
            t -= self.settle_s;
            if t < segment.duration_s {
                return ScriptCommand {
                    speeds: segment.speeds,
                    steer_only: false,
                };
            }
            t -= segment.duration_s;
        }
        ScriptCommand {
            speeds: ChassisSpeeds::default(),
            steer_only: true,
        }
    }
}
