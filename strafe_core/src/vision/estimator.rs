// strafe_core/src/vision/estimator.rs

use super::solver::{self, known_detections, SolveMethod, SolveOutcome, SolverConfig};
use super::{CameraParams, LandmarkMap, VisionNoiseParams};
use crate::messages::{DetectionFrame, StdDevs, VisionObservation};
use crate::types::{flatten_pose, pose_is_finite, Pose3};
use nalgebra::{Point2, Vector2};
use std::sync::Arc;
use tracing::{debug, warn};

/// What the estimator saw and concluded on the most recent new frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraDiagnostics {
    pub timestamp: f64,
    /// Pixel corners of every detection, known or not.
    pub corners: Vec<(u32, [Point2<f64>; 4])>,
    /// World poses of the detected landmarks that are in the map.
    pub landmark_poses: Vec<(u32, Pose3)>,
    pub method: Option<SolveMethod>,
    pub std_devs: Option<StdDevs>,
    pub rms_px: Option<f64>,
}

/// Turns one camera's detections into timestamped pose observations.
#[derive(Debug, Clone)]
pub struct CameraEstimator {
    params: CameraParams,
    map: Arc<LandmarkMap>,
    noise: VisionNoiseParams,
    solver: SolverConfig,
    last_timestamp: Option<f64>,
    last_pose: Option<Pose3>,
    diagnostics: CameraDiagnostics,
}

impl CameraEstimator {
    pub fn new(
        params: CameraParams,
        map: Arc<LandmarkMap>,
        noise: VisionNoiseParams,
        solver: SolverConfig,
    ) -> Self {
        Self {
            params,
            map,
            noise,
            solver,
            last_timestamp: None,
            last_pose: None,
            diagnostics: CameraDiagnostics::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.params.name
    }

    pub fn params(&self) -> &CameraParams {
        &self.params
    }

    /// The most recent successfully solved robot pose. Stays put while no
    /// landmarks are visible.
    pub fn latest_pose(&self) -> Option<Pose3> {
        self.last_pose
    }

    pub fn diagnostics(&self) -> &CameraDiagnostics {
        &self.diagnostics
    }

    /// Processes a frame. Frames not newer than the last one processed are
    /// ignored, so polling the same result twice never double-counts it.
    pub fn update(&mut self, frame: &DetectionFrame) -> Option<VisionObservation> {
        if self.last_timestamp.is_some_and(|last| frame.timestamp <= last) {
            return None;
        }
        self.last_timestamp = Some(frame.timestamp);

        let known = known_detections(frame, &self.map);
        self.diagnostics = CameraDiagnostics {
            timestamp: frame.timestamp,
            corners: frame.detections.iter().map(|d| (d.id, d.corners)).collect(),
            landmark_poses: known
                .iter()
                .filter_map(|d| self.map.get(d.id).map(|pose| (d.id, *pose)))
                .collect(),
            ..CameraDiagnostics::default()
        };
        debug!(
            camera = %self.params.name,
            detections = frame.detections.len(),
            known = known.len(),
            corners = ?self.diagnostics.corners,
            "camera frame"
        );

        if known.is_empty() {
            return None;
        }

        let outcome = self.solve(frame, known.len())?;

        let robot_pose = outcome.robot_pose;
        if !pose_is_finite(&flatten_pose(&robot_pose)) {
            warn!(camera = %self.params.name, "vision solve produced a non-finite pose, dropping");
            return None;
        }
        self.last_pose = Some(robot_pose);

        let planar = Vector2::new(robot_pose.translation.vector.x, robot_pose.translation.vector.y);
        let average_distance = self
            .diagnostics
            .landmark_poses
            .iter()
            .map(|(_, pose)| {
                (Vector2::new(pose.translation.vector.x, pose.translation.vector.y) - planar).norm()
            })
            .sum::<f64>()
            / self.diagnostics.landmark_poses.len() as f64;

        let std_devs = self.noise.std_devs(known.len(), average_distance);
        self.diagnostics.method = Some(outcome.method);
        self.diagnostics.rms_px = outcome.rms_px;
        self.diagnostics.std_devs = Some(std_devs);

        if std_devs.is_maximal() {
            debug!(
                camera = %self.params.name,
                average_distance,
                "lone landmark too far away, observation carries maximal noise"
            );
        }

        Some(VisionObservation {
            estimated_pose: robot_pose,
            timestamp: frame.timestamp,
            std_devs,
        })
    }

    fn solve(&self, frame: &DetectionFrame, known: usize) -> Option<SolveOutcome> {
        if known >= 2 {
            match solver::solve_multi(frame, &self.map, &self.params, &self.solver) {
                Ok(outcome) => return Some(outcome),
                Err(err) => {
                    debug!(camera = %self.params.name, %err, "multi-landmark solve failed, falling back");
                }
            }
        }
        solver::solve_single(frame, &self.map, &self.params, &self.solver)
            .map_err(|err| debug!(camera = %self.params.name, %err, "no pose from frame"))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::{FusionConfig, SwervePoseEstimator};
    use crate::types::{Pose2, Twist2d};
    use crate::vision::solver::test_support::render;
    use approx::assert_abs_diff_eq;
    use nalgebra::{Isometry3, Vector3};
    use std::f64::consts::PI;

    fn estimator(landmark_x: f64) -> CameraEstimator {
        let facing_back = Vector3::new(0.0, 0.0, PI);
        let map = LandmarkMap::new(
            [
                (1, Isometry3::new(Vector3::new(landmark_x, 0.4, 0.5), facing_back)),
                (2, Isometry3::new(Vector3::new(landmark_x, -0.4, 0.5), facing_back)),
            ],
            0.1651,
        )
        .unwrap();
        let camera = CameraParams::new(
            "front",
            Isometry3::translation(0.25, 0.0, 0.3),
            960,
            720,
            75f64.to_radians(),
        )
        .unwrap();
        CameraEstimator::new(
            camera,
            Arc::new(map),
            VisionNoiseParams::default(),
            SolverConfig::default(),
        )
    }

    fn frame_at(estimator: &CameraEstimator, timestamp: f64, ids: &[u32]) -> DetectionFrame {
        // Robot at the origin.
        let camera_pose = estimator.params().robot_to_camera;
        DetectionFrame {
            timestamp,
            detections: ids
                .iter()
                .map(|id| render(*id, &estimator.map, estimator.params(), &camera_pose, 0.05))
                .collect(),
        }
    }

    #[test]
    fn test_multi_landmark_observation() {
        let mut camera = estimator(3.0);
        let frame = frame_at(&camera, 0.5, &[1, 2]);
        let observation = camera.update(&frame).unwrap();

        assert_abs_diff_eq!(observation.estimated_pose.translation.vector.x, 0.0, epsilon = 1e-4);
        assert_eq!(observation.timestamp, 0.5);
        // Two landmarks about 3 m away: multi base scaled by 1 + d²/30.
        let d = (3.0f64.powi(2) + 0.4f64.powi(2)).sqrt();
        assert_abs_diff_eq!(observation.std_devs.x, 0.5 * (1.0 + d * d / 30.0), epsilon = 1e-3);
        assert_eq!(camera.diagnostics().method, Some(SolveMethod::MultiLandmark));
        assert_eq!(camera.diagnostics().landmark_poses.len(), 2);
    }

    #[test]
    fn test_duplicate_frame_is_ignored() {
        let mut camera = estimator(3.0);
        let frame = frame_at(&camera, 0.5, &[1]);
        assert!(camera.update(&frame).is_some());
        assert!(camera.update(&frame).is_none());
    }

    #[test]
    fn test_far_single_landmark_has_maximal_noise() {
        let mut camera = estimator(5.0);
        let frame = frame_at(&camera, 0.5, &[1]);
        let observation = camera.update(&frame).unwrap();
        assert!(observation.std_devs.is_maximal());
        assert_eq!(observation.timestamp, 0.5);
        assert!(camera.diagnostics().std_devs.unwrap().is_maximal());
        assert_eq!(camera.latest_pose(), Some(observation.estimated_pose));

        // Fusing it leaves the estimate exactly where odometry put it.
        let mut fusion =
            SwervePoseEstimator::new(FusionConfig::default(), Pose2::new(Vector2::new(1.0, -2.0), 0.3), 0.0)
                .unwrap();
        fusion.add_odometry(0.5, Twist2d::new(0.2, 0.0, 0.05));
        let before = fusion.reader().latest();
        assert!(!fusion.add_vision_measurement(&observation));
        assert_eq!(fusion.reader().latest(), before);
        assert_eq!(fusion.pose(), before.pose);
    }

    #[test]
    fn test_empty_frame_keeps_last_pose() {
        let mut camera = estimator(3.0);
        camera.update(&frame_at(&camera, 0.5, &[2])).unwrap();
        let before = camera.latest_pose();

        let empty = DetectionFrame {
            timestamp: 0.6,
            detections: Vec::new(),
        };
        assert!(camera.update(&empty).is_none());
        assert_eq!(camera.latest_pose(), before);
        assert!(camera.diagnostics().corners.is_empty());
    }
}
