// strafe_core/src/vision/solver.rs

use super::{CameraParams, LandmarkMap};
use crate::error::SolveError;
use crate::messages::{DetectionFrame, LandmarkDetection};
use crate::types::Pose3;
use nalgebra::{DMatrix, DVector, Isometry3, Point2, Point3, Vector3};
use tracing::trace;

/// Step used for the forward-difference Jacobian, in meters and radians.
const JACOBIAN_STEP: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverConfig {
    /// A lone landmark with a higher pose ambiguity than this is rejected.
    pub max_ambiguity: f64,
    pub max_iterations: usize,
    /// A multi-landmark solution with a larger reprojection RMS is discarded.
    pub max_rms_px: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_ambiguity: 0.2,
            max_iterations: 25,
            max_rms_px: 8.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveMethod {
    SingleLandmark,
    MultiLandmark,
}

/// A successful solve for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutcome {
    pub robot_pose: Pose3,
    pub method: SolveMethod,
    /// Landmarks that contributed to the solution.
    pub landmark_ids: Vec<u32>,
    pub rms_px: Option<f64>,
    pub iterations: usize,
}

/// Known detections in the frame, in detection order.
pub(super) fn known_detections<'a>(
    frame: &'a DetectionFrame,
    map: &LandmarkMap,
) -> Vec<&'a LandmarkDetection> {
    frame
        .detections
        .iter()
        .filter(|d| map.get(d.id).is_some())
        .collect()
}

/// Camera pose in the world implied by one detection.
fn camera_pose_from(detection: &LandmarkDetection, map: &LandmarkMap) -> Option<Pose3> {
    map.get(detection.id)
        .map(|world_to_landmark| world_to_landmark * detection.camera_to_landmark.inverse())
}

/// Picks the least ambiguous known detection and inverts its pose.
pub fn solve_single(
    frame: &DetectionFrame,
    map: &LandmarkMap,
    camera: &CameraParams,
    config: &SolverConfig,
) -> Result<SolveOutcome, SolveError> {
    let best = known_detections(frame, map)
        .into_iter()
        .min_by(|a, b| a.ambiguity.total_cmp(&b.ambiguity))
        .ok_or(SolveError::NoLandmarks)?;

    if best.ambiguity > config.max_ambiguity {
        return Err(SolveError::Ambiguous {
            id: best.id,
            ambiguity: best.ambiguity,
        });
    }

    let camera_pose = camera_pose_from(best, map).ok_or(SolveError::NoLandmarks)?;
    Ok(SolveOutcome {
        robot_pose: camera_pose * camera.robot_to_camera.inverse(),
        method: SolveMethod::SingleLandmark,
        landmark_ids: vec![best.id],
        rms_px: None,
        iterations: 0,
    })
}

/// Reprojection residuals of every observed corner for a camera pose.
/// Returns `None` when a corner falls behind the camera.
fn residuals(
    camera_pose: &Pose3,
    camera: &CameraParams,
    observations: &[(Point3<f64>, Point2<f64>)],
) -> Option<DVector<f64>> {
    let mut r = DVector::zeros(observations.len() * 2);
    for (i, (world, pixel)) in observations.iter().enumerate() {
        let in_camera = camera_pose.inverse_transform_point(world);
        let projected = camera.intrinsics.project(&in_camera)?;
        r[2 * i] = projected.x - pixel.x;
        r[2 * i + 1] = projected.y - pixel.y;
    }
    Some(r)
}

fn perturb(pose: &Pose3, delta: &DVector<f64>) -> Pose3 {
    pose * Isometry3::new(
        Vector3::new(delta[0], delta[1], delta[2]),
        Vector3::new(delta[3], delta[4], delta[5]),
    )
}

/// Refines the camera pose over all corners of all known landmarks.
///
/// Levenberg-Marquardt on the pixel reprojection error with a
/// forward-difference Jacobian, started from the best single-landmark
/// estimate. Bounded by `max_iterations`; a non-finite result or one whose
/// RMS error exceeds `max_rms_px` is reported as diverged.
pub fn solve_multi(
    frame: &DetectionFrame,
    map: &LandmarkMap,
    camera: &CameraParams,
    config: &SolverConfig,
) -> Result<SolveOutcome, SolveError> {
    let known = known_detections(frame, map);
    if known.is_empty() {
        return Err(SolveError::NoLandmarks);
    }

    let mut observations = Vec::with_capacity(known.len() * 4);
    let mut landmark_ids = Vec::with_capacity(known.len());
    for detection in &known {
        if let Some(world) = map.world_corners(detection.id) {
            observations.extend(world.into_iter().zip(detection.corners));
            landmark_ids.push(detection.id);
        }
    }

    let seed = known
        .iter()
        .min_by(|a, b| a.ambiguity.total_cmp(&b.ambiguity))
        .and_then(|best| camera_pose_from(best, map))
        .ok_or(SolveError::NoLandmarks)?;

    let mut pose = seed;
    let mut r = residuals(&pose, camera, &observations).ok_or(SolveError::Diverged {
        iterations: 0,
        rms_px: f64::INFINITY,
    })?;
    let mut cost = r.norm_squared();

    let mut lambda = 1e-3;
    let mut iterations = 0;
    while iterations < config.max_iterations {
        iterations += 1;

        // Forward-difference Jacobian of the residuals w.r.t. a local
        // (translation, rotation) perturbation.
        let mut jacobian = DMatrix::zeros(r.len(), 6);
        for k in 0..6 {
            let mut step = DVector::zeros(6);
            step[k] = JACOBIAN_STEP;
            let shifted = residuals(&perturb(&pose, &step), camera, &observations)
                .ok_or(SolveError::Degenerate)?;
            jacobian.set_column(k, &((shifted - &r) / JACOBIAN_STEP));
        }

        let jt = jacobian.transpose();
        let hessian = &jt * &jacobian + DMatrix::identity(6, 6) * lambda;
        let gradient = &jt * &r;
        let delta = hessian
            .cholesky()
            .ok_or(SolveError::Degenerate)?
            .solve(&(-gradient));

        let candidate = perturb(&pose, &delta);
        match residuals(&candidate, camera, &observations) {
            Some(next) if next.norm_squared().is_finite() && next.norm_squared() < cost => {
                pose = candidate;
                cost = next.norm_squared();
                r = next;
                lambda = (lambda / 10.0).max(1e-9);
            }
            _ => {
                lambda *= 10.0;
                if lambda > 1e7 {
                    break;
                }
            }
        }

        if delta.norm() < 1e-10 {
            break;
        }
    }

    let rms_px = (cost / r.len() as f64).sqrt();
    trace!(iterations, rms_px, landmarks = landmark_ids.len(), "multi-landmark solve finished");
    if !rms_px.is_finite() || rms_px > config.max_rms_px {
        return Err(SolveError::Diverged { iterations, rms_px });
    }

    Ok(SolveOutcome {
        robot_pose: pose * camera.robot_to_camera.inverse(),
        method: SolveMethod::MultiLandmark,
        landmark_ids,
        rms_px: Some(rms_px),
        iterations,
    })
}
