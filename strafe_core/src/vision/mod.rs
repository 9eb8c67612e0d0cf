// strafe_core/src/vision/mod.rs

//! Landmark-based absolute pose estimation.
//!
//! Each camera runs its own [`CameraEstimator`]: detections come in from a
//! [`CameraIo`] backend, get solved against the [`LandmarkMap`] and leave as a
//! [`VisionObservation`](crate::messages::VisionObservation) carrying a noise estimate that grows with distance.

use crate::error::ConfigError;
use crate::messages::{DetectionFrame, StdDevs};
use crate::types::{Pose2, Pose3};
use nalgebra::{Point2, Point3};
use std::collections::BTreeMap;

mod estimator;
mod solver;

pub use estimator::{CameraDiagnostics, CameraEstimator};
pub use solver::{SolveMethod, SolveOutcome, SolverConfig};

// --- CAMERA IO TRAIT ---
/// A source of landmark detections for one camera.
pub trait CameraIo: Send {
    fn name(&self) -> &str;

    /// The newest frame that has become available by `now`, if any.
    fn latest_detections(&mut self, now: f64) -> Option<DetectionFrame>;

    /// Feeds the current robot pose to simulated cameras. Real backends
    /// ignore it.
    fn update_sim_pose(&mut self, _pose: &Pose2, _timestamp: f64) {}
}

// =========================================================================
// == Camera Model ==
// =========================================================================

/// Pinhole intrinsics with square pixels and a centered principal point.
///
/// Camera frame: `x` forward along the optical axis, `y` left, `z` up. Image
/// `u` grows to the right and `v` grows downward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub width_px: u32,
    pub height_px: u32,
    pub focal_px: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Derives the focal length from the resolution and the diagonal field
    /// of view.
    pub fn from_diagonal_fov(width_px: u32, height_px: u32, diagonal_fov_rad: f64) -> Option<Self> {
        if width_px == 0 || height_px == 0 {
            return None;
        }
        if !(diagonal_fov_rad.is_finite() && diagonal_fov_rad > 0.0 && diagonal_fov_rad < std::f64::consts::PI) {
            return None;
        }
        let diagonal_px = (width_px as f64).hypot(height_px as f64);
        Some(Self {
            width_px,
            height_px,
            focal_px: (diagonal_px / 2.0) / (diagonal_fov_rad / 2.0).tan(),
            cx: width_px as f64 / 2.0,
            cy: height_px as f64 / 2.0,
        })
    }

    /// Projects a point in the camera frame onto the image plane. Points at or
    /// behind the camera have no projection.
    pub fn project(&self, point: &Point3<f64>) -> Option<Point2<f64>> {
        if point.x <= 1e-6 {
            return None;
        }
        Some(Point2::new(
            self.cx - self.focal_px * point.y / point.x,
            self.cy - self.focal_px * point.z / point.x,
        ))
    }

    pub fn contains(&self, pixel: &Point2<f64>) -> bool {
        (0.0..=self.width_px as f64).contains(&pixel.x) && (0.0..=self.height_px as f64).contains(&pixel.y)
    }
}

/// Mounting and optics of one camera.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraParams {
    pub name: String,
    /// Pose of the camera in the robot frame.
    pub robot_to_camera: Pose3,
    pub intrinsics: CameraIntrinsics,
}

impl CameraParams {
    pub fn new(
        name: impl Into<String>,
        robot_to_camera: Pose3,
        width_px: u32,
        height_px: u32,
        diagonal_fov_rad: f64,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let intrinsics = CameraIntrinsics::from_diagonal_fov(width_px, height_px, diagonal_fov_rad)
            .ok_or_else(|| ConfigError::InvalidCamera {
                camera: name.clone(),
                reason: format!(
                    "resolution {width_px}x{height_px} with diagonal fov {diagonal_fov_rad} rad"
                ),
            })?;
        let t = robot_to_camera.translation.vector;
        if !t.iter().all(|v| v.is_finite()) {
            return Err(ConfigError::InvalidCamera {
                camera: name,
                reason: "robot-to-camera transform is not finite".into(),
            });
        }
        Ok(Self {
            name,
            robot_to_camera,
            intrinsics,
        })
    }
}

// =========================================================================
// == Landmarks ==
// =========================================================================

/// Corners of a square landmark of side `size_m`, in the landmark frame.
///
/// The landmark frame has `x` pointing out of the printed face. Corners are
/// ordered bottom-left, bottom-right, top-right, top-left as seen by a viewer
/// facing the landmark.
pub fn landmark_corners(size_m: f64) -> [Point3<f64>; 4] {
    let h = size_m / 2.0;
    [
        Point3::new(0.0, -h, -h),
        Point3::new(0.0, h, -h),
        Point3::new(0.0, h, h),
        Point3::new(0.0, -h, h),
    ]
}

/// Known landmark poses on the field. Immutable after startup.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkMap {
    landmarks: BTreeMap<u32, Pose3>,
    size_m: f64,
}

impl LandmarkMap {
    pub fn new(landmarks: impl IntoIterator<Item = (u32, Pose3)>, size_m: f64) -> Result<Self, ConfigError> {
        if !(size_m.is_finite() && size_m > 0.0) {
            return Err(ConfigError::NonPositive {
                field: "vision.landmark_size",
                value: size_m,
            });
        }
        let mut map = BTreeMap::new();
        for (id, pose) in landmarks {
            if map.insert(id, pose).is_some() {
                return Err(ConfigError::DuplicateLandmark(id));
            }
        }
        Ok(Self {
            landmarks: map,
            size_m,
        })
    }

    pub fn get(&self, id: u32) -> Option<&Pose3> {
        self.landmarks.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Pose3)> {
        self.landmarks.iter().map(|(id, pose)| (*id, pose))
    }

    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    pub fn size_m(&self) -> f64 {
        self.size_m
    }

    /// World coordinates of a landmark's corners.
    pub fn world_corners(&self, id: u32) -> Option<[Point3<f64>; 4]> {
        let pose = self.get(id)?;
        Some(landmark_corners(self.size_m).map(|corner| pose * corner))
    }
}

// =========================================================================
// == Measurement Noise ==
// =========================================================================

/// How much to trust a vision pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisionNoiseParams {
    pub single_landmark: StdDevs,
    pub multi_landmark: StdDevs,
    /// Noise grows by `1 + d² / distance_divisor`.
    pub distance_divisor: f64,
    /// A lone landmark further than this is not trusted at all.
    pub max_single_distance_m: f64,
}

impl Default for VisionNoiseParams {
    fn default() -> Self {
        Self {
            single_landmark: StdDevs::new(4.0, 4.0, 8.0),
            multi_landmark: StdDevs::new(0.5, 0.5, 1.0),
            distance_divisor: 30.0,
            max_single_distance_m: 4.0,
        }
    }
}

impl VisionNoiseParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let values = self
            .single_landmark
            .as_array()
            .into_iter()
            .chain(self.multi_landmark.as_array())
            .chain([self.distance_divisor, self.max_single_distance_m]);
        for value in values {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositive {
                    field: "vision.noise",
                    value,
                });
            }
        }
        Ok(())
    }

    /// Standard deviations for a pose solved from `known_landmarks` landmarks
    /// at an average planar distance of `average_distance_m`.
    pub fn std_devs(&self, known_landmarks: usize, average_distance_m: f64) -> StdDevs {
        match known_landmarks {
            0 => self.single_landmark,
            1 if average_distance_m > self.max_single_distance_m => StdDevs::MAXIMAL,
            n => {
                let base = if n > 1 {
                    self.multi_landmark
                } else {
                    self.single_landmark
                };
                base.scaled(1.0 + average_distance_m.powi(2) / self.distance_divisor)
            }
        }
    }
}
