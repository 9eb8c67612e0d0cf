// strafe_core/src/estimation/mod.rs

use crate::messages::{FusedPoseEstimate, VisionObservation};
use crate::types::{Pose2, Twist2d};
use parking_lot::RwLock;
use std::sync::Arc;

mod fusion;

pub use fusion::{FusionConfig, SwervePoseEstimator};

/// Everything a pose estimator can be fed.
#[derive(Debug, Clone, PartialEq)]
pub enum EstimatorInput {
    /// A robot-frame displacement that ended at `timestamp`.
    Odometry { timestamp: f64, twist: Twist2d },
    /// An absolute fix, possibly delayed.
    Vision(VisionObservation),
    /// Forget all history and jump to a known pose.
    Reset { pose: Pose2, timestamp: f64 },
}

/// The contract for any algorithm that performs the "pose estimator" role.
pub trait PoseEstimator: Send + Sync {
    /// The single entry point for all inputs. The implementation decides how
    /// each kind is applied.
    fn process(&mut self, input: &EstimatorInput);

    /// The current best estimate.
    fn estimate(&self) -> FusedPoseEstimate;
}

/// A cloneable, read-only view of the published pose estimate.
///
/// Only the estimator writes the shared value; readers always get a
/// complete snapshot.
#[derive(Debug, Clone)]
pub struct PoseReader {
    shared: Arc<RwLock<FusedPoseEstimate>>,
}

impl PoseReader {
    pub(crate) fn new(shared: Arc<RwLock<FusedPoseEstimate>>) -> Self {
        Self { shared }
    }

    pub fn latest(&self) -> FusedPoseEstimate {
        *self.shared.read()
    }

    pub fn pose(&self) -> Pose2 {
        self.shared.read().pose
    }
}
