// strafe_core/src/estimation/fusion.rs

use super::{EstimatorInput, PoseEstimator, PoseReader};
use crate::error::ConfigError;
use crate::messages::{FusedPoseEstimate, StdDevs, VisionObservation};
use crate::types::{flatten_pose, pose_is_finite, Pose2, Twist2d};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionConfig {
    /// Trust in the odometry-propagated state, per axis.
    pub state_std_devs: StdDevs,
    /// How far back, in seconds, a delayed observation can still be applied.
    pub history_window_s: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            state_std_devs: StdDevs::new(0.1, 0.1, 0.1),
            history_window_s: 1.5,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for value in self.state_std_devs.as_array() {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::NonFinite {
                    field: "estimator.state_std_devs",
                    value,
                });
            }
        }
        if !(self.history_window_s.is_finite() && self.history_window_s > 0.0) {
            return Err(ConfigError::NonPositive {
                field: "estimator.history_window",
                value: self.history_window_s,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum EntryKind {
    Odometry(Twist2d),
    Vision { measured: Pose2, gains: [f64; 3] },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct HistoryEntry {
    timestamp: f64,
    kind: EntryKind,
    /// Fused pose after this entry was applied.
    pose_after: Pose2,
}

/// Per-axis gain of a measurement with variance `r` against a state with
/// variance `q`. Zero when the measurement carries no information.
fn kalman_gain(q: f64, r: f64) -> f64 {
    if q <= 0.0 || !r.is_finite() {
        return 0.0;
    }
    q / (q + (q * r).sqrt())
}

/// Moves `from` toward `measured` by the given per-axis fraction.
fn blend(from: &Pose2, measured: &Pose2, gains: &[f64; 3]) -> Pose2 {
    let correction = Twist2d::log(from, measured);
    let scaled = Twist2d::new(
        correction.dx * gains[0],
        correction.dy * gains[1],
        correction.dtheta * gains[2],
    );
    from * scaled.exp()
}

/// Fuses odometry twists with delayed vision fixes into one pose.
///
/// A short history of every applied input is kept together with the pose
/// after each one. A late vision fix is inserted at its own timestamp,
/// blended against the pose the robot had then, and every later entry is
/// replayed on top. Delivering the same set of fixes in any order therefore
/// ends in the same pose.
#[derive(Debug)]
pub struct SwervePoseEstimator {
    config: FusionConfig,
    base_timestamp: f64,
    base_pose: Pose2,
    history: VecDeque<HistoryEntry>,
    shared: Arc<RwLock<FusedPoseEstimate>>,
    dropped_observations: u64,
}

impl SwervePoseEstimator {
    pub fn new(config: FusionConfig, initial_pose: Pose2, timestamp: f64) -> Result<Self, ConfigError> {
        config.validate()?;
        let estimator = Self {
            config,
            base_timestamp: timestamp,
            base_pose: initial_pose,
            history: VecDeque::new(),
            shared: Arc::new(RwLock::new(FusedPoseEstimate {
                pose: initial_pose,
                timestamp,
            })),
            dropped_observations: 0,
        };
        Ok(estimator)
    }

    pub fn reader(&self) -> PoseReader {
        PoseReader::new(Arc::clone(&self.shared))
    }

    /// Vision fixes dropped for arriving after they left the history window.
    pub fn dropped_observations(&self) -> u64 {
        self.dropped_observations
    }

    fn head(&self) -> (f64, Pose2) {
        self.history
            .back()
            .map(|e| (e.timestamp, e.pose_after))
            .unwrap_or((self.base_timestamp, self.base_pose))
    }

    pub fn pose(&self) -> Pose2 {
        self.head().1
    }

    fn publish(&self) {
        let (timestamp, pose) = self.head();
        *self.shared.write() = FusedPoseEstimate { pose, timestamp };
    }

    /// Applies a robot-frame displacement ending at `timestamp`.
    pub fn add_odometry(&mut self, timestamp: f64, twist: Twist2d) {
        if !twist.is_finite() || !timestamp.is_finite() {
            warn!(timestamp, ?twist, "rejecting non-finite odometry");
            return;
        }
        let (head_timestamp, head_pose) = self.head();
        if timestamp < head_timestamp {
            warn!(timestamp, head_timestamp, "rejecting out-of-order odometry");
            return;
        }

        self.history.push_back(HistoryEntry {
            timestamp,
            kind: EntryKind::Odometry(twist),
            pose_after: head_pose * twist.exp(),
        });
        self.trim(timestamp);
        self.publish();
    }

    /// Applies a possibly delayed absolute fix at its own timestamp.
    ///
    /// Returns whether the observation changed the estimate.
    pub fn add_vision_measurement(&mut self, observation: &VisionObservation) -> bool {
        let measured = flatten_pose(&observation.estimated_pose);
        if !pose_is_finite(&measured) || !observation.timestamp.is_finite() {
            warn!(timestamp = observation.timestamp, "rejecting non-finite vision pose");
            return false;
        }
        if observation
            .std_devs
            .as_array()
            .iter()
            .any(|s| s.is_nan() || *s < 0.0)
        {
            warn!(std_devs = ?observation.std_devs, "rejecting vision observation with invalid noise");
            return false;
        }

        let q = self.config.state_std_devs.as_array();
        let r = observation.std_devs.as_array();
        let gains = [0usize, 1, 2].map(|i| kalman_gain(q[i].powi(2), r[i].powi(2)));
        if gains.iter().all(|k| *k == 0.0) {
            trace!(timestamp = observation.timestamp, "vision observation carries no information");
            return false;
        }

        if observation.timestamp < self.base_timestamp {
            self.dropped_observations += 1;
            debug!(
                timestamp = observation.timestamp,
                oldest = self.base_timestamp,
                "vision observation is older than the pose history, dropping"
            );
            return false;
        }

        let (head_timestamp, _) = self.head();
        let timestamp = observation.timestamp.min(head_timestamp);
        let mut index = self.history.partition_point(|e| e.timestamp <= timestamp);

        // Split the odometry step that straddles the observation so the fix
        // lands exactly at its own time.
        if let Some(&HistoryEntry {
            timestamp: end,
            kind: EntryKind::Odometry(twist),
            ..
        }) = self.history.get(index)
        {
            let start = match index {
                0 => self.base_timestamp,
                i => self.history[i - 1].timestamp,
            };
            if end > start && timestamp > start {
                let fraction = (timestamp - start) / (end - start);
                self.history[index].kind = EntryKind::Odometry(twist.scale(1.0 - fraction));
                self.history.insert(
                    index,
                    HistoryEntry {
                        timestamp,
                        kind: EntryKind::Odometry(twist.scale(fraction)),
                        pose_after: Pose2::identity(),
                    },
                );
                index += 1;
            }
        }

        self.history.insert(
            index,
            HistoryEntry {
                timestamp,
                kind: EntryKind::Vision { measured, gains },
                pose_after: Pose2::identity(),
            },
        );
        self.replay_from(index);
        trace!(
            timestamp,
            replayed = self.history.len() - index,
            ?gains,
            "applied vision observation"
        );
        self.publish();
        true
    }

    fn replay_from(&mut self, start: usize) {
        let mut pose = match start {
            0 => self.base_pose,
            i => self.history[i - 1].pose_after,
        };
        for entry in self.history.range_mut(start..) {
            pose = match &entry.kind {
                EntryKind::Odometry(twist) => pose * twist.exp(),
                EntryKind::Vision { measured, gains } => blend(&pose, measured, gains),
            };
            entry.pose_after = pose;
        }
    }

    /// Forgets entries older than the history window, folding them into the
    /// base pose.
    fn trim(&mut self, now: f64) {
        let cutoff = now - self.config.history_window_s;
        let expired = self.history.partition_point(|e| e.timestamp < cutoff);
        if let Some(last) = self.history.drain(..expired).last() {
            self.base_timestamp = last.timestamp;
            self.base_pose = last.pose_after;
        }
    }

    /// Jumps to a known pose and clears the history.
    pub fn reset_pose(&mut self, pose: Pose2, timestamp: f64) {
        debug!(
            x = pose.translation.vector.x,
            y = pose.translation.vector.y,
            theta = pose.rotation.angle(),
            timestamp,
            "pose estimate reset"
        );
        self.history.clear();
        self.base_pose = pose;
        self.base_timestamp = timestamp;
        self.publish();
    }

    /// The fused pose at a past instant, interpolated along the odometry arc.
    /// `None` before the retained history.
    pub fn sample_at(&self, timestamp: f64) -> Option<Pose2> {
        if timestamp < self.base_timestamp {
            return None;
        }
        let index = self.history.partition_point(|e| e.timestamp <= timestamp);
        let (start, before) = match index {
            0 => (self.base_timestamp, self.base_pose),
            i => (self.history[i - 1].timestamp, self.history[i - 1].pose_after),
        };
        match self.history.get(index) {
            Some(HistoryEntry {
                timestamp: end,
                kind: EntryKind::Odometry(twist),
                ..
            }) if *end > start => {
                let fraction = (timestamp - start) / (end - start);
                Some(before * twist.scale(fraction).exp())
            }
            _ => Some(before),
        }
    }
}

impl PoseEstimator for SwervePoseEstimator {
    fn process(&mut self, input: &EstimatorInput) {
        match input {
            EstimatorInput::Odometry { timestamp, twist } => self.add_odometry(*timestamp, *twist),
            EstimatorInput::Vision(observation) => {
                self.add_vision_measurement(observation);
            }
            EstimatorInput::Reset { pose, timestamp } => self.reset_pose(*pose, *timestamp),
        }
    }

    fn estimate(&self) -> FusedPoseEstimate {
        let (timestamp, pose) = self.head();
        FusedPoseEstimate { pose, timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::lift_pose;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector2;

    fn estimator() -> SwervePoseEstimator {
        SwervePoseEstimator::new(FusionConfig::default(), Pose2::identity(), 0.0).unwrap()
    }

    fn observation(x: f64, y: f64, timestamp: f64, std: f64) -> VisionObservation {
        VisionObservation {
            estimated_pose: lift_pose(&Pose2::new(Vector2::new(x, y), 0.0), 0.0),
            timestamp,
            std_devs: StdDevs::new(std, std, std),
        }
    }

    fn drive_forward(estimator: &mut SwervePoseEstimator, ticks: usize, step: f64) {
        let start = estimator.estimate().timestamp;
        for i in 1..=ticks {
            estimator.add_odometry(start + i as f64 * 0.01, Twist2d::new(step, 0.0, 0.0));
        }
    }

    #[test]
    fn test_gain_formula() {
        // Equal variances: q / (q + sqrt(q * q)) = 0.5.
        assert_abs_diff_eq!(kalman_gain(0.01, 0.01), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(kalman_gain(0.01, 0.0), 1.0, epsilon = 1e-12);
        assert_eq!(kalman_gain(0.01, f64::INFINITY), 0.0);
        assert_eq!(kalman_gain(0.0, 1.0), 0.0);
    }

    #[test]
    fn test_maximal_noise_is_a_no_op() {
        let mut fusion = estimator();
        drive_forward(&mut fusion, 10, 0.01);
        let before = fusion.estimate();

        let mut far = observation(5.0, 5.0, 0.05, 1.0);
        far.std_devs = StdDevs::MAXIMAL;
        assert!(!fusion.add_vision_measurement(&far));
        assert_eq!(fusion.estimate(), before);
    }

    #[test]
    fn test_current_observation_moves_by_gain() {
        let mut fusion = estimator();
        drive_forward(&mut fusion, 10, 0.01);
        // Vision agrees on y but says x is 0.2 m further. With equal noise
        // the gain is 0.5 on every axis.
        assert!(fusion.add_vision_measurement(&observation(0.3, 0.0, 0.1, 0.1)));
        assert_abs_diff_eq!(fusion.pose().translation.vector.x, 0.2, epsilon = 1e-9);
    }

    #[test]
    fn test_late_observation_is_replayed() {
        let mut fusion = estimator();
        drive_forward(&mut fusion, 20, 0.01);
        // At t = 0.05 odometry put the robot at x = 0.05. Vision says 0.15.
        assert!(fusion.add_vision_measurement(&observation(0.15, 0.0, 0.05, 0.1)));

        // The correction of 0.05 is carried forward to the head unchanged
        // because the later odometry is pure translation.
        assert_abs_diff_eq!(fusion.pose().translation.vector.x, 0.25, epsilon = 1e-9);
        assert_abs_diff_eq!(fusion.sample_at(0.05).unwrap().translation.vector.x, 0.1, epsilon = 1e-9);
    }

    #[test]
    fn test_observation_between_ticks_splits_odometry() {
        let mut fusion = estimator();
        drive_forward(&mut fusion, 4, 0.01);
        assert!(fusion.add_vision_measurement(&observation(0.025, 0.0, 0.025, 0.1)));
        // At t = 0.025 odometry reads 0.025, so the fix agrees and nothing moves.
        assert_abs_diff_eq!(fusion.pose().translation.vector.x, 0.04, epsilon = 1e-9);
        assert_abs_diff_eq!(fusion.sample_at(0.035).unwrap().translation.vector.x, 0.035, epsilon = 1e-9);
    }

    #[test]
    fn test_out_of_order_observations_converge() {
        let fixes = [
            observation(0.12, 0.03, 0.04, 0.2),
            observation(0.10, -0.02, 0.08, 0.1),
            observation(0.30, 0.01, 0.15, 0.3),
        ];

        let run = |order: &[usize]| {
            let mut fusion = estimator();
            drive_forward(&mut fusion, 20, 0.01);
            for i in order {
                fusion.add_vision_measurement(&fixes[*i]);
            }
            fusion.pose()
        };

        let in_order = run(&[0, 1, 2]);
        let shuffled = run(&[2, 0, 1]);
        assert_abs_diff_eq!(in_order.translation.vector.x, shuffled.translation.vector.x, epsilon = 1e-9);
        assert_abs_diff_eq!(in_order.translation.vector.y, shuffled.translation.vector.y, epsilon = 1e-9);
        assert_abs_diff_eq!(in_order.rotation.angle(), shuffled.rotation.angle(), epsilon = 1e-9);
    }

    #[test]
    fn test_stale_observation_is_dropped() {
        let mut fusion = estimator();
        drive_forward(&mut fusion, 300, 0.01);
        let before = fusion.pose();
        assert!(!fusion.add_vision_measurement(&observation(9.0, 9.0, 0.5, 0.1)));
        assert_eq!(fusion.dropped_observations(), 1);
        assert_eq!(fusion.pose(), before);
    }

    #[test]
    fn test_newer_than_odometry_applies_at_head() {
        let mut fusion = estimator();
        drive_forward(&mut fusion, 5, 0.01);
        assert!(fusion.add_vision_measurement(&observation(0.25, 0.0, 0.2, 0.1)));
        assert_abs_diff_eq!(fusion.pose().translation.vector.x, 0.15, epsilon = 1e-9);

        // Odometry keeps flowing after the fix.
        fusion.add_odometry(0.06, Twist2d::new(0.01, 0.0, 0.0));
        assert_abs_diff_eq!(fusion.pose().translation.vector.x, 0.16, epsilon = 1e-9);
    }

    #[test]
    fn test_reader_sees_published_pose_and_reset() {
        let mut fusion = estimator();
        let reader = fusion.reader();
        drive_forward(&mut fusion, 3, 0.1);
        assert_abs_diff_eq!(reader.pose().translation.vector.x, 0.3, epsilon = 1e-9);

        fusion.process(&EstimatorInput::Reset {
            pose: Pose2::new(Vector2::new(1.0, 2.0), 0.5),
            timestamp: 0.03,
        });
        assert_eq!(reader.latest().timestamp, 0.03);
        assert_abs_diff_eq!(reader.pose().translation.vector.y, 2.0, epsilon = 1e-12);
        assert!(fusion.sample_at(0.01).is_none());
    }
}
