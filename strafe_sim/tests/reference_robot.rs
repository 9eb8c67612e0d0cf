// strafe_sim/tests/reference_robot.rs

use std::path::PathBuf;
use strafe_sim::prelude::*;

fn reference_config() -> RobotConfig {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../assets/robot.toml");
    RobotConfig::load(&path).unwrap()
}

#[test]
fn reference_robot_file_builds() {
    let params = reference_config().build().unwrap();
    assert_eq!(params.modules.len(), 4);
    assert_eq!(params.cameras.len(), 2);
    assert_eq!(params.landmarks.len(), 8);
    assert!(params.modules.iter().all(|m| m.calibration.turn_inverted));
}

#[test]
fn fused_pose_beats_odometry_over_a_lap() {
    let mut config = reference_config();
    config.simulation.duration_seconds = 12.0;
    config.simulation.wheel_scale_error = 0.03;
    let summary = Simulation::new(&config).unwrap().run().unwrap();

    assert!(summary.vision_observations > 0);
    assert!(summary.odometry_frames > 2500);
    assert!(
        summary.fused_error_m < summary.odometry_error_m.max(0.15),
        "fused {} vs odometry {}",
        summary.fused_error_m,
        summary.odometry_error_m
    );
}
