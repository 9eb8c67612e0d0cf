// strafe_sim/src/simulation/plugins/sensors/camera.rs

use std::collections::VecDeque;
use std::sync::Arc;

use nalgebra::{Isometry3, Point2, Vector3};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use strafe_core::messages::{DetectionFrame, LandmarkDetection};
use strafe_core::types::{lift_pose, Pose2, Pose3};
use strafe_core::vision::{CameraIo, LandmarkMap};
use tracing::trace;

use crate::simulation::config::CameraSpec;

/// Ambiguity reported per pixel of corner noise, relative to the landmark's
/// apparent side length.
const AMBIGUITY_PER_NOISE: f64 = 4.0;

/// A camera that renders the landmark map from the true robot pose.
///
/// Frames are captured at the configured rate from the poses fed through
/// [`CameraIo::update_sim_pose`] and only become visible to
/// [`CameraIo::latest_detections`] once the processing latency has passed.
#[derive(Debug)]
pub struct SimCameraIo {
    spec: CameraSpec,
    map: Arc<LandmarkMap>,
    rng: ChaCha8Rng,
    pixel_noise: Option<Normal<f64>>,
    next_capture: f64,
    /// Captured frames with the time they become available.
    in_flight: VecDeque<(f64, DetectionFrame)>,
}

impl SimCameraIo {
    pub fn new(spec: CameraSpec, map: Arc<LandmarkMap>, rng: ChaCha8Rng) -> Self {
        let pixel_noise = (spec.pixel_noise_px > 0.0)
            .then(|| Normal::new(0.0, spec.pixel_noise_px).ok())
            .flatten();
        Self {
            spec,
            map,
            rng,
            pixel_noise,
            next_capture: 0.0,
            in_flight: VecDeque::new(),
        }
    }

    fn noise(&mut self) -> f64 {
        match &self.pixel_noise {
            Some(dist) => dist.sample(&mut self.rng),
            None => 0.0,
        }
    }

    /// Renders every landmark that is in front of the camera, faces it, is in
    /// range and lands fully inside the image.
    fn render(&mut self, camera_pose: &Pose3) -> Vec<LandmarkDetection> {
        let camera_position = camera_pose.translation.vector;
        let visible: Vec<(u32, Pose3)> = self
            .map
            .iter()
            .filter(|(_, landmark)| {
                let to_camera = camera_position - landmark.translation.vector;
                let facing = (landmark.rotation * Vector3::x()).dot(&to_camera) > 0.0;
                facing && to_camera.norm() <= self.spec.max_range_m
            })
            .map(|(id, landmark)| (id, *landmark))
            .collect();

        let mut detections = Vec::with_capacity(visible.len());
        for (id, landmark) in visible {
            let Some(world_corners) = self.map.world_corners(id) else {
                continue;
            };
            let intrinsics = self.spec.params.intrinsics;
            let projected: Option<Vec<Point2<f64>>> = world_corners
                .iter()
                .map(|c| intrinsics.project(&camera_pose.inverse_transform_point(c)))
                .collect();
            let Some(projected) = projected else {
                continue;
            };
            if !projected.iter().all(|p| intrinsics.contains(p)) {
                continue;
            }

            let mut corners = [Point2::origin(); 4];
            for (corner, exact) in corners.iter_mut().zip(&projected) {
                *corner = Point2::new(exact.x + self.noise(), exact.y + self.noise());
            }

            let side_px = (0..4)
                .map(|i| (projected[(i + 1) % 4] - projected[i]).norm())
                .sum::<f64>()
                / 4.0;
            let ambiguity = (AMBIGUITY_PER_NOISE * self.spec.pixel_noise_px / side_px).min(1.0);

            // Depth error grows with distance over focal length, like a real PnP fit.
            let truth = camera_pose.inverse() * landmark;
            let distance = truth.translation.vector.norm();
            let scale = self.spec.pixel_noise_px * distance / intrinsics.focal_px;
            let jitter = Isometry3::new(
                Vector3::new(self.noise() * 2.0, self.noise(), self.noise()) * scale,
                Vector3::new(0.0, 0.0, self.noise() * scale),
            );

            detections.push(LandmarkDetection {
                id,
                corners,
                camera_to_landmark: jitter * truth,
                ambiguity,
            });
        }
        detections
    }
}

impl CameraIo for SimCameraIo {
    fn name(&self) -> &str {
        &self.spec.params.name
    }

    fn latest_detections(&mut self, now: f64) -> Option<DetectionFrame> {
        let mut latest = None;
        while self.in_flight.front().is_some_and(|(ready, _)| *ready <= now) {
            latest = self.in_flight.pop_front().map(|(_, frame)| frame);
        }
        latest
    }

    fn update_sim_pose(&mut self, pose: &Pose2, timestamp: f64) {
        if timestamp < self.next_capture {
            return;
        }
        let period = 1.0 / self.spec.fps;
        while self.next_capture <= timestamp {
            self.next_capture += period;
        }

        let camera_pose = lift_pose(pose, 0.0) * self.spec.params.robot_to_camera;
        let detections = self.render(&camera_pose);
        trace!(
            camera = %self.spec.params.name,
            timestamp,
            ids = ?detections.iter().map(|d| d.id).collect::<Vec<_>>(),
            "captured frame"
        );
        self.in_flight.push_back((
            timestamp + self.spec.latency_s,
            DetectionFrame {
                timestamp,
                detections,
            },
        ));
    }
}
