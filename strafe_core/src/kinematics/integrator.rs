// strafe_core/src/kinematics/integrator.rs

use super::SwerveKinematics;
use crate::messages::{ModulePosition, ModuleSample, OdometryBatch};
use crate::types::{apply_twist, Pose2, Rotation, Twist2d};
use tracing::{trace, warn};

/// Turns aligned batches of module samples into robot-frame twists and a
/// dead-reckoned pose.
///
/// The integrator remembers the wheel positions of the last frame it
/// consumed. Every new frame is differenced against them, solved for a twist
/// and applied to the running pose along an arc.
#[derive(Debug, Clone)]
pub struct OdometryIntegrator {
    kinematics: SwerveKinematics,
    wheel_radius_m: f64,
    pose: Pose2,
    last_positions: Option<Vec<ModulePosition>>,
    last_timestamp: Option<f64>,
    last_gyro: Option<Rotation>,
    skipped_frames: u64,
}

impl OdometryIntegrator {
    pub fn new(kinematics: SwerveKinematics, wheel_radius_m: f64) -> Self {
        Self {
            kinematics,
            wheel_radius_m,
            pose: Pose2::identity(),
            last_positions: None,
            last_timestamp: None,
            last_gyro: None,
            skipped_frames: 0,
        }
    }

    /// Sets the reference wheel positions without producing a twist.
    pub fn seed(&mut self, samples: &[ModuleSample], timestamp: f64) {
        self.last_positions = Some(self.positions_of(samples));
        self.last_timestamp = Some(timestamp);
    }

    pub fn kinematics(&self) -> &SwerveKinematics {
        &self.kinematics
    }

    pub fn pose(&self) -> Pose2 {
        self.pose
    }

    pub fn reset_pose(&mut self, pose: Pose2) {
        self.pose = pose;
    }

    /// Frames rejected so far for bad ordering, bad shape or non-finite data.
    pub fn skipped_frames(&self) -> u64 {
        self.skipped_frames
    }

    fn positions_of(&self, samples: &[ModuleSample]) -> Vec<ModulePosition> {
        samples
            .iter()
            .map(|s| ModulePosition::new(s.drive_position_rad * self.wheel_radius_m, s.turn_angle))
            .collect()
    }

    /// Integrates every frame of the batch in order.
    ///
    /// Returns one `(timestamp, twist)` pair per frame that advanced the pose.
    /// The very first frame ever seen only establishes the reference wheel
    /// positions. A frame whose timestamp does not strictly increase is
    /// skipped and leaves the reference untouched.
    pub fn apply_batch(&mut self, batch: &OdometryBatch) -> Vec<(f64, Twist2d)> {
        let mut twists = Vec::with_capacity(batch.len());

        for frame in &batch.frames {
            if frame.samples.len() != self.kinematics.module_count() {
                warn!(
                    expected = self.kinematics.module_count(),
                    actual = frame.samples.len(),
                    "odometry frame has the wrong module count, skipping"
                );
                self.skipped_frames += 1;
                continue;
            }
            if let Some(last) = self.last_timestamp {
                if frame.timestamp <= last {
                    warn!(
                        timestamp = frame.timestamp,
                        last, "out-of-order odometry timestamp, skipping frame"
                    );
                    self.skipped_frames += 1;
                    continue;
                }
            }

            let positions = self.positions_of(&frame.samples);
            let Some(previous) = self.last_positions.replace(positions.clone()) else {
                self.last_timestamp = Some(frame.timestamp);
                self.last_gyro = frame.gyro_yaw;
                continue;
            };

            let deltas: Vec<ModulePosition> = positions
                .iter()
                .zip(&previous)
                .map(|(now, before)| ModulePosition::new(now.distance_m - before.distance_m, now.angle))
                .collect();

            let Some(mut twist) = self.kinematics.to_twist(&deltas) else {
                self.skipped_frames += 1;
                continue;
            };
            if let (Some(yaw), Some(last_yaw)) = (frame.gyro_yaw, self.last_gyro) {
                twist.dtheta = (yaw * last_yaw.inverse()).angle();
            }

            if !twist.is_finite() {
                warn!(timestamp = frame.timestamp, ?twist, "non-finite odometry twist, skipping frame");
                // Keep the old reference so the next good frame covers the gap.
                self.last_positions = Some(previous);
                self.skipped_frames += 1;
                continue;
            }

            self.pose = apply_twist(&self.pose, &twist);
            self.last_timestamp = Some(frame.timestamp);
            if frame.gyro_yaw.is_some() {
                self.last_gyro = frame.gyro_yaw;
            }
            trace!(timestamp = frame.timestamp, ?twist, "integrated odometry frame");
            twists.push((frame.timestamp, twist));
        }

        twists
    }
}
