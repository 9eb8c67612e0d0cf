// strafe_core/src/kinematics/mod.rs

use crate::error::ConfigError;
use crate::messages::{ModulePosition, ModuleState};
use crate::types::{Rotation, Twist2d};
use nalgebra::{DMatrix, DVector, Vector2};
use serde::{Deserialize, Serialize};

mod integrator;

pub use integrator::OdometryIntegrator;

/// Below this speed a module keeps pointing straight ahead instead of
/// snapping to a meaningless `atan2(0, 0)` heading.
const MIN_STEER_SPEED: f64 = 1e-9;

/// Robot-frame chassis velocity.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChassisSpeeds {
    pub vx: f64,
    pub vy: f64,
    pub omega: f64,
}

impl ChassisSpeeds {
    pub fn new(vx: f64, vy: f64, omega: f64) -> Self {
        Self { vx, vy, omega }
    }

    /// Converts field-relative velocities into the robot frame.
    pub fn from_field_relative(vx: f64, vy: f64, omega: f64, heading: Rotation) -> Self {
        let robot = heading.inverse() * Vector2::new(vx, vy);
        Self::new(robot.x, robot.y, omega)
    }
}

/// Wheel geometry and the matrices mapping between wheel and chassis motion.
///
/// Each module at `(x, y)` contributes two rows to the inverse-kinematics
/// matrix `A`:
///
/// ```text
/// [ 1  0  -y ]   [vx]   [v_x,i]
/// [ 0  1   x ] * [vy] = [v_y,i]
///                [ω ]
/// ```
///
/// The forward direction solves the overdetermined system in the
/// least-squares sense through the pseudo-inverse of `A`, computed once here.
#[derive(Debug, Clone)]
pub struct SwerveKinematics {
    positions: Vec<Vector2<f64>>,
    inverse: DMatrix<f64>,
    forward: DMatrix<f64>,
}

impl SwerveKinematics {
    pub fn new(positions: &[Vector2<f64>]) -> Result<Self, ConfigError> {
        if positions.len() < 2 {
            return Err(ConfigError::TooFewModules(positions.len()));
        }
        for position in positions {
            for value in position.iter() {
                if !value.is_finite() {
                    return Err(ConfigError::NonFinite {
                        field: "module.position",
                        value: *value,
                    });
                }
            }
        }
        for i in 0..positions.len() {
            for j in (i + 1)..positions.len() {
                if (positions[i] - positions[j]).norm() < 1e-6 {
                    return Err(ConfigError::CoincidentModules(i, j));
                }
            }
        }

        let rows = positions.len() * 2;
        let mut inverse = DMatrix::zeros(rows, 3);
        for (i, p) in positions.iter().enumerate() {
            inverse[(2 * i, 0)] = 1.0;
            inverse[(2 * i, 2)] = -p.y;
            inverse[(2 * i + 1, 1)] = 1.0;
            inverse[(2 * i + 1, 2)] = p.x;
        }

        let svd = inverse.clone().svd(true, true);
        if svd.rank(1e-9) < 3 {
            return Err(ConfigError::DegenerateGeometry(
                "inverse kinematics matrix is rank deficient".into(),
            ));
        }
        let forward = svd
            .pseudo_inverse(1e-12)
            .map_err(|e| ConfigError::DegenerateGeometry(e.to_string()))?;

        Ok(Self {
            positions: positions.to_vec(),
            inverse,
            forward,
        })
    }

    pub fn module_count(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[Vector2<f64>] {
        &self.positions
    }

    /// The robot-frame twist that best explains the given wheel travel.
    ///
    /// Each delta is the distance a wheel rolled since the previous update,
    /// paired with the direction it pointed at the end of that interval.
    /// Returns `None` when the number of deltas does not match the geometry.
    pub fn to_twist(&self, deltas: &[ModulePosition]) -> Option<Twist2d> {
        if deltas.len() != self.positions.len() {
            return None;
        }
        let displacements = DVector::from_iterator(
            deltas.len() * 2,
            deltas.iter().flat_map(|delta| {
                let (sin, cos) = delta.angle.angle().sin_cos();
                [delta.distance_m * cos, delta.distance_m * sin]
            }),
        );
        let chassis = &self.forward * displacements;
        Some(Twist2d::new(chassis[0], chassis[1], chassis[2]))
    }

    /// Chassis velocity from measured wheel states, in the least-squares sense.
    pub fn to_chassis_speeds(&self, states: &[ModuleState]) -> Option<ChassisSpeeds> {
        let deltas: Vec<ModulePosition> = states
            .iter()
            .map(|s| ModulePosition::new(s.speed_mps, s.angle))
            .collect();
        self.to_twist(&deltas)
            .map(|t| ChassisSpeeds::new(t.dx, t.dy, t.dtheta))
    }

    /// Wheel speeds and headings that realize a chassis velocity.
    pub fn to_module_states(&self, speeds: &ChassisSpeeds) -> Vec<ModuleState> {
        let wheel = &self.inverse * DVector::from_column_slice(&[speeds.vx, speeds.vy, speeds.omega]);
        (0..self.positions.len())
            .map(|i| {
                let v = Vector2::new(wheel[2 * i], wheel[2 * i + 1]);
                let speed = v.norm();
                let angle = if speed > MIN_STEER_SPEED {
                    Rotation::new(v.y.atan2(v.x))
                } else {
                    Rotation::identity()
                };
                ModuleState {
                    speed_mps: speed,
                    angle,
                }
            })
            .collect()
    }
}

/// Scales every wheel speed down proportionally so none exceeds `max_speed`.
pub fn desaturate_wheel_speeds(states: &mut [ModuleState], max_speed: f64) {
    let fastest = states
        .iter()
        .map(|s| s.speed_mps.abs())
        .fold(0.0, f64::max);
    if fastest > max_speed && fastest > 0.0 {
        let scale = max_speed / fastest;
        for state in states.iter_mut() {
            state.speed_mps *= scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

    fn square(half: f64) -> Vec<Vector2<f64>> {
        vec![
            Vector2::new(half, half),
            Vector2::new(half, -half),
            Vector2::new(-half, half),
            Vector2::new(-half, -half),
        ]
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(matches!(
            SwerveKinematics::new(&[Vector2::new(0.3, 0.3)]),
            Err(ConfigError::TooFewModules(1))
        ));
        assert!(matches!(
            SwerveKinematics::new(&[Vector2::new(0.3, 0.3), Vector2::new(0.3, 0.3)]),
            Err(ConfigError::CoincidentModules(0, 1))
        ));
    }

    #[test]
    fn test_straight_travel() {
        let kinematics = SwerveKinematics::new(&square(0.25)).unwrap();
        let deltas = vec![ModulePosition::new(0.1, Rotation::new(FRAC_PI_2)); 4];
        let twist = kinematics.to_twist(&deltas).unwrap();
        assert_abs_diff_eq!(twist.dx, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(twist.dy, 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(twist.dtheta, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_spin_in_place_round_trips() {
        let kinematics = SwerveKinematics::new(&square(0.25)).unwrap();
        let states = kinematics.to_module_states(&ChassisSpeeds::new(0.0, 0.0, 2.0));

        // Every wheel is tangent to the circle through the module positions.
        let radius = 0.25 * 2f64.sqrt();
        for state in &states {
            assert_abs_diff_eq!(state.speed_mps, 2.0 * radius, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(states[0].angle.angle(), 3.0 * FRAC_PI_4, epsilon = 1e-12);

        let speeds = kinematics.to_chassis_speeds(&states).unwrap();
        assert_abs_diff_eq!(speeds.omega, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(speeds.vx, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_least_squares_averages_inconsistent_wheels() {
        let kinematics = SwerveKinematics::new(&square(0.25)).unwrap();
        let mut deltas = vec![ModulePosition::new(0.1, Rotation::identity()); 4];
        deltas[3].distance_m = 0.2;
        let twist = kinematics.to_twist(&deltas).unwrap();
        assert_abs_diff_eq!(twist.dx, 0.125, epsilon = 1e-12);
    }

    #[test]
    fn test_wrong_module_count_yields_none() {
        let kinematics = SwerveKinematics::new(&square(0.25)).unwrap();
        assert!(kinematics
            .to_twist(&[ModulePosition::new(0.1, Rotation::identity())])
            .is_none());
    }

    #[test]
    fn test_desaturate_preserves_ratios() {
        let mut states = vec![
            ModuleState {
                speed_mps: 8.0,
                angle: Rotation::identity(),
            },
            ModuleState {
                speed_mps: -4.0,
                angle: Rotation::identity(),
            },
        ];
        desaturate_wheel_speeds(&mut states, 4.0);
        assert_abs_diff_eq!(states[0].speed_mps, 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(states[1].speed_mps, -2.0, epsilon = 1e-12);
    }
}
