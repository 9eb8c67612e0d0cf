// strafe_core/src/messages.rs

use crate::types::{Pose2, Pose3, Rotation};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

// =========================================================================
// == Odometry Data Structures ==
// =========================================================================

/// One reading of a single swerve module, captured by the sampler.
///
/// Immutable once captured. Drive values are at the wheel (gear ratio already
/// removed), the turn angle is the calibrated absolute angle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModuleSample {
    pub drive_position_rad: f64,
    pub drive_velocity_rad_per_sec: f64,
    pub turn_angle: Rotation,
    pub capture_timestamp: f64,
}

/// The distance a wheel has travelled and the direction it points. This is
/// what the kinematics consume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModulePosition {
    pub distance_m: f64,
    pub angle: Rotation,
}

impl ModulePosition {
    pub fn new(distance_m: f64, angle: Rotation) -> Self {
        Self { distance_m, angle }
    }
}

/// A commanded wheel speed and heading for one module.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModuleState {
    pub speed_mps: f64,
    pub angle: Rotation,
}

/// The samples of all modules that share one capture tick.
#[derive(Debug, Clone, PartialEq)]
pub struct OdometryFrame {
    pub timestamp: f64,
    pub samples: Vec<ModuleSample>,
    /// An optional yaw reading taken on the same tick. When present it
    /// replaces the wheel-derived rotation.
    pub gyro_yaw: Option<Rotation>,
}

/// What happened while aligning the drained queues into a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Length of the shared timestamp queue followed by each module queue.
    pub queue_lengths: Vec<usize>,
    /// Number of aligned frames kept.
    pub aligned: usize,
    /// Samples thrown away across all queues by the truncation.
    pub discarded: usize,
    /// Aligned frames holding a sample captured on a different tick than the
    /// frame's timestamp. Happens when a module missed an earlier tick.
    pub misattributed: usize,
}

impl BatchReport {
    /// A degraded batch had queues of differing lengths.
    pub fn is_degraded(&self) -> bool {
        self.discarded > 0 || self.misattributed > 0
    }
}

/// Capture times closer than this belong to the same sampler tick.
const CAPTURE_TOLERANCE_S: f64 = 1e-9;

/// An ordered run of frames, one per sampler tick, for every module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OdometryBatch {
    pub frames: Vec<OdometryFrame>,
}

impl OdometryBatch {
    /// Aligns the shared timestamp queue with the per-module queues.
    ///
    /// All queues are indexed by tick. If any signal dropped a tick, the
    /// queues will differ in length and everything past the shortest one is
    /// discarded. Pairing is by index, so frames whose samples carry another
    /// capture time are counted in [`BatchReport::misattributed`].
    pub fn align(timestamps: &[f64], module_queues: &[Vec<ModuleSample>]) -> (Self, BatchReport) {
        let mut queue_lengths = Vec::with_capacity(module_queues.len() + 1);
        queue_lengths.push(timestamps.len());
        queue_lengths.extend(module_queues.iter().map(Vec::len));

        let aligned = if module_queues.is_empty() {
            0
        } else {
            queue_lengths.iter().copied().min().unwrap_or(0)
        };
        let discarded = queue_lengths.iter().map(|len| len - aligned).sum();

        let frames: Vec<OdometryFrame> = (0..aligned)
            .map(|i| OdometryFrame {
                timestamp: timestamps[i],
                samples: module_queues.iter().map(|queue| queue[i]).collect(),
                gyro_yaw: None,
            })
            .collect();
        let misattributed = frames
            .iter()
            .filter(|frame| {
                frame
                    .samples
                    .iter()
                    .any(|s| (s.capture_timestamp - frame.timestamp).abs() > CAPTURE_TOLERANCE_S)
            })
            .count();

        (
            Self { frames },
            BatchReport {
                queue_lengths,
                aligned,
                discarded,
                misattributed,
            },
        )
    }

    /// Attaches one yaw reading per frame. Extra readings are ignored and
    /// frames without a reading keep using wheel rotation.
    pub fn with_gyro(mut self, yaws: &[Rotation]) -> Self {
        for (frame, yaw) in self.frames.iter_mut().zip(yaws) {
            frame.gyro_yaw = Some(*yaw);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

// =========================================================================
// == Vision Data Structures ==
// =========================================================================

/// Per-axis measurement noise (standard deviations) of a vision pose.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StdDevs {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl StdDevs {
    /// Noise so large the observation carries no information.
    pub const MAXIMAL: StdDevs = StdDevs {
        x: f64::MAX,
        y: f64::MAX,
        theta: f64::MAX,
    };

    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self { x, y, theta }
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor, self.theta * factor)
    }

    pub fn is_maximal(&self) -> bool {
        self.as_array().iter().all(|s| *s >= f64::MAX)
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.x, self.y, self.theta]
    }
}

/// A single fiducial seen by a camera.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkDetection {
    pub id: u32,
    /// Detected corners in pixels, in the order given by
    /// [`crate::vision::landmark_corners`].
    pub corners: [Point2<f64>; 4],
    /// The coprocessor's best single-landmark estimate of the landmark pose in
    /// the camera frame.
    pub camera_to_landmark: Pose3,
    /// Ratio of reprojection errors of the best and alternate solutions.
    /// 0 is unambiguous.
    pub ambiguity: f64,
}

/// Everything one camera saw at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionFrame {
    pub timestamp: f64,
    pub detections: Vec<LandmarkDetection>,
}

/// A timestamped absolute pose fix, ready to be fused.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionObservation {
    pub estimated_pose: Pose3,
    pub timestamp: f64,
    pub std_devs: StdDevs,
}

// =========================================================================
// == Public API Messages ==
// =========================================================================

/// The authoritative pose of the robot, as published by the fusion estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedPoseEstimate {
    pub pose: Pose2,
    pub timestamp: f64,
}

impl Default for FusedPoseEstimate {
    fn default() -> Self {
        Self {
            pose: Pose2::identity(),
            timestamp: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(t: f64) -> ModuleSample {
        ModuleSample {
            drive_position_rad: t,
            drive_velocity_rad_per_sec: 0.0,
            turn_angle: Rotation::identity(),
            capture_timestamp: t,
        }
    }

    #[test]
    fn test_align_equal_queues() {
        let timestamps = [0.0, 0.004, 0.008];
        let queues = vec![timestamps.iter().map(|t| sample(*t)).collect::<Vec<_>>(); 4];

        let (batch, report) = OdometryBatch::align(&timestamps, &queues);
        assert_eq!(batch.len(), 3);
        assert!(!report.is_degraded());
        assert_eq!(report.misattributed, 0);
        assert_eq!(batch.frames[2].samples.len(), 4);
    }

    #[test]
    fn test_align_counts_samples_from_a_later_tick() {
        // Module 2 missed the 0.004 tick, so its queue is shifted by one.
        let timestamps = [0.0, 0.004, 0.008, 0.012];
        let full: Vec<_> = timestamps.iter().map(|t| sample(*t)).collect();
        let shifted = vec![full[0], full[2], full[3]];
        let queues = vec![full.clone(), full.clone(), shifted, full.clone()];

        let (batch, report) = OdometryBatch::align(&timestamps, &queues);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.frames[2].timestamp, 0.008);
        assert_eq!(batch.frames[2].samples[2].capture_timestamp, 0.012);
        // Frames at 0.004 and 0.008 both carry the shifted module's next sample.
        assert_eq!(report.misattributed, 2);
        assert!(report.is_degraded());
    }

    #[test]
    fn test_align_truncates_to_shortest() {
        let timestamps = [0.0, 0.004, 0.008, 0.012];
        let full: Vec<_> = timestamps.iter().map(|t| sample(*t)).collect();
        let short = full[..2].to_vec();
        let queues = vec![full.clone(), short, full.clone(), full[..3].to_vec()];

        let (batch, report) = OdometryBatch::align(&timestamps, &queues);
        assert_eq!(batch.len(), 2);
        assert_eq!(report.aligned, 2);
        assert_eq!(report.queue_lengths, vec![4, 4, 2, 4, 3]);
        assert_eq!(report.discarded, 2 + 2 + 0 + 2 + 1);
        assert!(report.is_degraded());
    }

    #[test]
    fn test_maximal_std_devs() {
        assert!(StdDevs::MAXIMAL.is_maximal());
        assert!(!StdDevs::new(0.5, 0.5, 1.0).is_maximal());
    }
}
