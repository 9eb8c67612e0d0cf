// strafe_core/src/types.rs

use nalgebra::{Isometry2, Isometry3, Translation3, UnitComplex, UnitQuaternion, Vector2};
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

// --- Core Type Aliases ---
/// A planar pose on the field. The heading is a unit complex number, so it is
/// always normalized and never accumulates wraparound error.
pub type Pose2 = Isometry2<f64>;
/// A full 6-DoF pose, as produced by the camera solves.
pub type Pose3 = Isometry3<f64>;
/// A wrapped planar angle.
pub type Rotation = UnitComplex<f64>;

/// Below this magnitude the arc formulas switch to their Taylor expansions.
const SMALL_ANGLE: f64 = 1e-9;

/// Wraps an angle in radians into the half-open interval (-π, π].
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        PI
    } else {
        wrapped
    }
}

/// Projects a 3D pose onto the field plane, keeping x, y and yaw.
pub fn flatten_pose(pose: &Pose3) -> Pose2 {
    let (_, _, yaw) = pose.rotation.euler_angles();
    Pose2::new(
        Vector2::new(pose.translation.vector.x, pose.translation.vector.y),
        yaw,
    )
}

/// Lifts a planar pose into 3D at the given height with zero roll and pitch.
pub fn lift_pose(pose: &Pose2, z: f64) -> Pose3 {
    Isometry3::from_parts(
        Translation3::new(pose.translation.vector.x, pose.translation.vector.y, z),
        UnitQuaternion::from_euler_angles(0.0, 0.0, pose.rotation.angle()),
    )
}

/// Returns `true` when every component of the pose is a finite number.
pub fn pose_is_finite(pose: &Pose2) -> bool {
    pose.translation.vector.iter().all(|v| v.is_finite())
        && pose.rotation.re.is_finite()
        && pose.rotation.im.is_finite()
}

/// An instantaneous robot-frame displacement.
///
/// `dx` is forward, `dy` is to the left, `dtheta` is counter-clockwise. A twist
/// describes motion along a constant-curvature arc, which is what makes
/// [`Twist2d::exp`] exact for swerve odometry steps.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Twist2d {
    pub dx: f64,
    pub dy: f64,
    pub dtheta: f64,
}

impl Twist2d {
    pub const ZERO: Twist2d = Twist2d {
        dx: 0.0,
        dy: 0.0,
        dtheta: 0.0,
    };

    pub fn new(dx: f64, dy: f64, dtheta: f64) -> Self {
        Self { dx, dy, dtheta }
    }

    /// Scales every component. Scaling a twist by `s` yields the first `s`
    /// fraction of the same arc.
    pub fn scale(&self, s: f64) -> Self {
        Self::new(self.dx * s, self.dy * s, self.dtheta * s)
    }

    pub fn is_finite(&self) -> bool {
        self.dx.is_finite() && self.dy.is_finite() && self.dtheta.is_finite()
    }

    /// The rigid transform obtained by following this twist as an arc.
    ///
    /// Closed-form integration of a constant-curvature path: for a straight
    /// step it reduces to a plain translation, for a curved one the chord is
    /// rotated and shortened according to the swept angle.
    pub fn exp(&self) -> Pose2 {
        let theta = self.dtheta;
        let (s, c) = if theta.abs() < SMALL_ANGLE {
            (1.0 - theta * theta / 6.0, 0.5 * theta)
        } else {
            (theta.sin() / theta, (1.0 - theta.cos()) / theta)
        };

        Pose2::new(
            Vector2::new(self.dx * s - self.dy * c, self.dx * c + self.dy * s),
            theta,
        )
    }

    /// The twist that carries `start` onto `end`. Inverse of [`Twist2d::exp`].
    pub fn log(start: &Pose2, end: &Pose2) -> Self {
        let transform = start.inverse() * end;
        let dtheta = transform.rotation.angle();
        let half_dtheta = dtheta / 2.0;
        let cos_minus_one = dtheta.cos() - 1.0;

        let half_theta_by_tan_of_half_dtheta = if cos_minus_one.abs() < SMALL_ANGLE {
            1.0 - dtheta * dtheta / 12.0
        } else {
            -(half_dtheta * dtheta.sin()) / cos_minus_one
        };

        // Undo the chord rotation and shortening applied by `exp`.
        let a = half_theta_by_tan_of_half_dtheta;
        let t = transform.translation.vector;
        Self::new(
            a * t.x + half_dtheta * t.y,
            -half_dtheta * t.x + a * t.y,
            dtheta,
        )
    }
}

/// Applies `twist` (expressed in the pose's own frame) to `pose`.
pub fn apply_twist(pose: &Pose2, twist: &Twist2d) -> Pose2 {
    pose * twist.exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::FRAC_PI_2;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_wrap_angle_half_open_interval() {
        assert_abs_diff_eq!(wrap_angle(3.0 * PI), PI, epsilon = EPS);
        assert_abs_diff_eq!(wrap_angle(-PI), PI, epsilon = EPS);
        assert_abs_diff_eq!(wrap_angle(-3.0 * FRAC_PI_2), FRAC_PI_2, epsilon = EPS);
        assert_abs_diff_eq!(wrap_angle(0.25), 0.25, epsilon = EPS);
    }

    #[test]
    fn test_exp_straight_line() {
        let pose = apply_twist(&Pose2::identity(), &Twist2d::new(1.5, -0.5, 0.0));
        assert_abs_diff_eq!(pose.translation.vector.x, 1.5, epsilon = EPS);
        assert_abs_diff_eq!(pose.translation.vector.y, -0.5, epsilon = EPS);
        assert_abs_diff_eq!(pose.rotation.angle(), 0.0, epsilon = EPS);
    }

    #[test]
    fn test_exp_quarter_circle() {
        // Driving a quarter circle of radius 1 m ends at (1, 1) facing +y.
        let pose = apply_twist(&Pose2::identity(), &Twist2d::new(FRAC_PI_2, 0.0, FRAC_PI_2));
        assert_abs_diff_eq!(pose.translation.vector.x, 1.0, epsilon = EPS);
        assert_abs_diff_eq!(pose.translation.vector.y, 1.0, epsilon = EPS);
        assert_abs_diff_eq!(pose.rotation.angle(), FRAC_PI_2, epsilon = EPS);
    }

    #[test]
    fn test_log_inverts_exp() {
        let start = Pose2::new(Vector2::new(2.0, -1.0), 0.7);
        let twist = Twist2d::new(0.4, 0.1, -0.9);
        let end = apply_twist(&start, &twist);

        let recovered = Twist2d::log(&start, &end);
        assert_abs_diff_eq!(recovered.dx, twist.dx, epsilon = 1e-9);
        assert_abs_diff_eq!(recovered.dy, twist.dy, epsilon = 1e-9);
        assert_abs_diff_eq!(recovered.dtheta, twist.dtheta, epsilon = 1e-9);
    }

    #[test]
    fn test_flatten_and_lift() {
        let planar = Pose2::new(Vector2::new(4.0, 2.0), -1.2);
        let flat = flatten_pose(&lift_pose(&planar, 0.8));
        assert_abs_diff_eq!(flat.translation.vector.x, 4.0, epsilon = EPS);
        assert_abs_diff_eq!(flat.translation.vector.y, 2.0, epsilon = EPS);
        assert_abs_diff_eq!(flat.rotation.angle(), -1.2, epsilon = EPS);
    }
}
