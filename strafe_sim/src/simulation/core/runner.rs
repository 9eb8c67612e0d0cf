// strafe_sim/src/simulation/core/runner.rs

//! The control loop that closes the pipeline over the simulated robot.
//!
//! In lockstep mode a manual clock is stepped one sampler tick at a time and
//! the sampler is polled inline, so a run is fully reproducible from its
//! seed. In realtime mode the sampler runs on its own thread against the
//! wall clock and the control loop sleeps between cycles.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use strafe_core::kinematics::desaturate_wheel_speeds;
use strafe_core::messages::{ModuleSample, OdometryBatch};
use strafe_core::sampling::{Clock, ManualClock, MonotonicClock};
use strafe_core::types::Pose2;
use strafe_core::vision::CameraIo;
use tracing::{debug, info, warn};

use crate::error::SimError;
use crate::simulation::config::{RobotConfig, RunMode};
use crate::simulation::core::prng::SimulationRng;
use crate::simulation::core::simulation_setup::SimRobot;
use crate::simulation::plugins::control::script::DriveScript;

// =========================================================================
// == Run Summary ==
// =========================================================================

/// What a finished run reports. Written as TOML when requested.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub mode: RunMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub simulated_seconds: f64,
    pub control_cycles: u64,
    /// Control cycles that started late in realtime mode.
    pub overruns: u64,
    pub odometry_frames: u64,
    pub degraded_batches: u64,
    pub discarded_samples: u64,
    pub overflowed_ticks: u64,
    pub failed_reads: u64,
    pub skipped_frames: u64,
    pub vision_frames: u64,
    pub vision_observations: u64,
    /// Emitted observations with maximal noise, fused as no-ops.
    pub maximal_noise_observations: u64,
    /// Observations the fusion stage refused, usually for being too old.
    pub rejected_observations: u64,
    /// `[x, y, theta]` at the end of the run.
    pub truth_pose: [f64; 3],
    pub fused_pose: [f64; 3],
    pub odometry_pose: [f64; 3],
    pub fused_error_m: f64,
    pub odometry_error_m: f64,
    pub rms_error_m: f64,
    pub max_error_m: f64,
}

impl RunSummary {
    pub fn to_toml(&self) -> Result<String, SimError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn pose_array(pose: &Pose2) -> [f64; 3] {
    [
        pose.translation.vector.x,
        pose.translation.vector.y,
        pose.rotation.angle(),
    ]
}

fn planar_distance(a: &Pose2, b: &Pose2) -> f64 {
    (a.translation.vector - b.translation.vector).norm()
}

// =========================================================================
// == Simulation ==
// =========================================================================

#[derive(Clone)]
enum Timing {
    Lockstep(Arc<ManualClock>),
    Realtime(Arc<MonotonicClock>),
}

pub struct Simulation {
    robot: SimRobot,
    script: DriveScript,
    timing: Timing,
    duration_s: f64,
    control_period_s: f64,
    summary: RunSummary,
    squared_error_sum: f64,
    next_report_s: f64,
}

impl Simulation {
    pub fn new(config: &RobotConfig) -> Result<Self, SimError> {
        let params = config.build()?;
        let sim = &config.simulation;
        let rng = SimulationRng::new(sim.seed);

        let (timing, clock): (Timing, Arc<dyn Clock>) = match sim.mode {
            RunMode::Lockstep => {
                let clock = Arc::new(ManualClock::new(0.0));
                (Timing::Lockstep(Arc::clone(&clock)), clock)
            }
            RunMode::Realtime => {
                let clock = Arc::new(MonotonicClock::new());
                (Timing::Realtime(Arc::clone(&clock)), clock)
            }
        };

        let robot = SimRobot::build(params, sim, &rng, clock)?;
        Ok(Self {
            robot,
            script: DriveScript::square(&sim.script),
            timing,
            duration_s: sim.duration_seconds,
            control_period_s: 1.0 / sim.control_frequency_hz,
            summary: RunSummary {
                mode: sim.mode,
                seed: sim.seed,
                ..RunSummary::default()
            },
            squared_error_sum: 0.0,
            next_report_s: 1.0,
        })
    }

    pub fn robot(&self) -> &SimRobot {
        &self.robot
    }

    /// Runs for the configured duration and reports how it went.
    pub fn run(mut self) -> Result<RunSummary, SimError> {
        info!(
            mode = ?self.summary.mode,
            duration_s = self.duration_s,
            lap_s = self.script.lap_s(),
            "starting run"
        );
        for module in &mut self.robot.modules {
            module.set_brake_mode(true);
        }

        let end = match self.timing.clone() {
            Timing::Lockstep(clock) => self.run_lockstep(&clock),
            Timing::Realtime(clock) => self.run_realtime(&clock)?,
        };

        for module in &mut self.robot.modules {
            module.stop();
        }
        Ok(self.finish(end))
    }

    fn run_lockstep(&mut self, clock: &ManualClock) -> f64 {
        let sample_period = 1.0 / self.robot.params.sampler.frequency_hz;
        let mut next_control = 0.0;
        let mut tick: u64 = 0;
        loop {
            let now = tick as f64 * sample_period;
            if now > self.duration_s {
                return now - sample_period;
            }
            clock.set(now);
            self.robot.sampler.poll_once();
            if now >= next_control {
                self.control_cycle(now);
                next_control += self.control_period_s;
            }
            tick += 1;
        }
    }

    fn run_realtime(&mut self, clock: &MonotonicClock) -> Result<f64, SimError> {
        self.robot.sampler.start()?;
        let period = Duration::from_secs_f64(self.control_period_s);
        let mut deadline = Instant::now();
        let mut now = clock.now();
        while now < self.duration_s {
            self.control_cycle(now);
            deadline += period;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.summary.overruns += 1;
                debug!(now, "control cycle overran its period");
            } else {
                thread::sleep(remaining);
            }
            now = clock.now();
        }
        self.robot.sampler.shutdown();
        Ok(now)
    }

    /// One pass of the main loop: drain, integrate, fuse vision, command.
    fn control_cycle(&mut self, now: f64) {
        let robot = &mut self.robot;

        // --- Odometry ---
        let drain = robot.sampler.drain();
        self.summary.overflowed_ticks += drain.overflowed_ticks;
        let queues: Vec<Vec<ModuleSample>> = robot
            .modules
            .iter()
            .map(|m| drain.signal(m.signal()).to_vec())
            .collect();
        let (batch, report) = OdometryBatch::align(&drain.timestamps, &queues);
        if report.is_degraded() {
            warn!(
                lengths = ?report.queue_lengths,
                aligned = report.aligned,
                discarded = report.discarded,
                misattributed = report.misattributed,
                "odometry queues out of step, truncating batch"
            );
            self.summary.degraded_batches += 1;
            self.summary.discarded_samples += report.discarded as u64;
        }
        for (timestamp, twist) in robot.odometry.apply_batch(&batch) {
            robot.fusion.add_odometry(timestamp, twist);
            self.summary.odometry_frames += 1;
        }

        // --- Vision ---
        let truth = robot.truth_at(now);
        for rig in &mut robot.cameras {
            rig.io.update_sim_pose(&truth, now);
            let Some(frame) = rig.io.latest_detections(now) else {
                continue;
            };
            self.summary.vision_frames += 1;
            if let Some(observation) = rig.estimator.update(&frame) {
                self.summary.vision_observations += 1;
                if observation.std_devs.is_maximal() {
                    self.summary.maximal_noise_observations += 1;
                }
                robot.fusion.add_vision_measurement(&observation);
            }
        }

        // --- Command ---
        let command = self.script.command(now);
        let mut states = robot.params.kinematics.to_module_states(&command.speeds);
        desaturate_wheel_speeds(&mut states, robot.params.drivetrain.max_speed_mps);
        for (module, mut state) in robot.modules.iter_mut().zip(states) {
            if command.steer_only {
                state.speed_mps = 0.0;
            }
            module.apply_state(state);
        }

        // --- Accuracy ---
        let estimate = robot.fusion.pose();
        let error = planar_distance(&truth, &estimate);
        self.squared_error_sum += error * error;
        self.summary.max_error_m = self.summary.max_error_m.max(error);
        self.summary.control_cycles += 1;

        if now >= self.next_report_s {
            self.next_report_s += 1.0;
            info!(
                t = now,
                error_m = error,
                odometry_error_m = planar_distance(&truth, &robot.odometry.pose()),
                "progress"
            );
        }
    }

    fn finish(mut self, end: f64) -> RunSummary {
        let truth = self.robot.truth_at(end);
        let fused = self.robot.fusion.pose();
        let odometry = self.robot.odometry.pose();

        let summary = &mut self.summary;
        summary.simulated_seconds = end;
        summary.failed_reads = self
            .robot
            .sampler
            .failed_reads()
            .iter()
            .map(|(_, count)| count)
            .sum();
        summary.skipped_frames = self.robot.odometry.skipped_frames();
        summary.rejected_observations = self.robot.fusion.dropped_observations();
        summary.truth_pose = pose_array(&truth);
        summary.fused_pose = pose_array(&fused);
        summary.odometry_pose = pose_array(&odometry);
        summary.fused_error_m = planar_distance(&truth, &fused);
        summary.odometry_error_m = planar_distance(&truth, &odometry);
        if summary.control_cycles > 0 {
            summary.rms_error_m = (self.squared_error_sum / summary.control_cycles as f64).sqrt();
        }

        info!(
            cycles = summary.control_cycles,
            fused_error_m = summary.fused_error_m,
            odometry_error_m = summary.odometry_error_m,
            rms_error_m = summary.rms_error_m,
            vision_observations = summary.vision_observations,
            failed_reads = summary.failed_reads,
            "run finished"
        );
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::config::{CameraSection, LandmarkSection, Pose};
    use nalgebra::{UnitQuaternion, Vector3};

    fn config(seed: u64, duration: f64, with_vision: bool) -> RobotConfig {
        let mut config = RobotConfig::default();
        config.simulation.seed = Some(seed);
        config.simulation.duration_seconds = duration;
        config.vision.enabled = with_vision;
        config.cameras.push(CameraSection {
            name: "front".into(),
            transform: Pose {
                translation: Vector3::new(0.3, 0.0, 0.3),
                rotation: UnitQuaternion::identity(),
            },
            width_px: 960,
            height_px: 720,
            diagonal_fov_rad: 90f64.to_radians(),
            fps: 30.0,
            latency_ms: 40.0,
            max_range_m: 7.0,
            pixel_noise_px: 0.3,
        });
        // A wall of landmarks ahead of the first side of the square.
        for (i, y) in [-1.0, 0.0, 1.0].into_iter().enumerate() {
            config.landmarks.push(LandmarkSection {
                id: i as u32 + 1,
                pose: Pose {
                    translation: Vector3::new(4.5, y, 0.5),
                    rotation: UnitQuaternion::from_euler_angles(0.0, 0.0, std::f64::consts::PI),
                },
            });
        }
        config
    }

    #[test]
    fn test_lockstep_runs_are_reproducible() {
        let a = Simulation::new(&config(9, 3.0, true)).unwrap().run().unwrap();
        let b = Simulation::new(&config(9, 3.0, true)).unwrap().run().unwrap();
        assert_eq!(a.fused_pose, b.fused_pose);
        assert_eq!(a.failed_reads, b.failed_reads);
        assert!((299..=301).contains(&a.control_cycles));
    }

    #[test]
    fn test_odometry_tracks_truth_without_vision() {
        let mut config = config(4, 4.0, false);
        config.simulation.wheel_scale_error = 0.0;
        let summary = Simulation::new(&config).unwrap().run().unwrap();
        assert_eq!(summary.vision_frames, 0);
        assert!(summary.odometry_frames > 900);
        // The robot actually drove the first side.
        assert!(summary.truth_pose[0] > 1.0);
        // Only read dropouts disturb odometry here.
        assert!(summary.fused_error_m < 0.05, "error {}", summary.fused_error_m);
    }

    #[test]
    fn test_vision_is_fused_when_landmarks_are_visible() {
        let summary = Simulation::new(&config(4, 2.0, true)).unwrap().run().unwrap();
        assert!(summary.vision_frames > 0);
        assert!(summary.vision_observations > 0);
        assert!(summary.maximal_noise_observations <= summary.vision_observations);
        assert!(summary.fused_error_m < 0.2, "error {}", summary.fused_error_m);
    }

    #[test]
    fn test_summary_serializes_to_toml() {
        let summary = RunSummary {
            mode: RunMode::Lockstep,
            seed: Some(1),
            control_cycles: 10,
            ..RunSummary::default()
        };
        let text = summary.to_toml().unwrap();
        assert!(text.contains("mode = \"lockstep\""));
        assert!(text.contains("control_cycles = 10"));
    }
}
