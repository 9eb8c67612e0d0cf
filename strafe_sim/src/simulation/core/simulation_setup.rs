// strafe_sim/src/simulation/core/simulation_setup.rs

//! Wires the core pipeline to the simulated hardware.

use std::sync::Arc;

use strafe_core::drive::SwerveModule;
use strafe_core::estimation::SwervePoseEstimator;
use strafe_core::kinematics::OdometryIntegrator;
use strafe_core::messages::ModuleSample;
use strafe_core::sampling::{Clock, OdometrySampler};
use strafe_core::types::Pose2;
use strafe_core::vision::CameraEstimator;
use tracing::info;

use crate::error::SimError;
use crate::simulation::config::{RobotParams, SimulationSection};
use crate::simulation::core::prng::SimulationRng;
use crate::simulation::plugins::sensors::camera::SimCameraIo;
use crate::simulation::plugins::vehicles::swerve::{PlantSettings, SharedPlant, SimModuleIo, SwervePlant};

/// Random stream of the plant. Modules use `1..=n`, cameras start here.
const PLANT_STREAM: u64 = 0;
const CAMERA_STREAM_BASE: u64 = 100;

/// One camera backend paired with the estimator that consumes it.
pub struct CameraRig {
    pub io: SimCameraIo,
    pub estimator: CameraEstimator,
}

/// The full robot: simulated hardware plus the estimation pipeline.
pub struct SimRobot {
    pub params: RobotParams,
    pub plant: SharedPlant,
    pub sampler: OdometrySampler<ModuleSample>,
    pub modules: Vec<SwerveModule>,
    pub odometry: OdometryIntegrator,
    pub fusion: SwervePoseEstimator,
    pub cameras: Vec<CameraRig>,
}

impl SimRobot {
    pub fn build(
        params: RobotParams,
        simulation: &SimulationSection,
        rng: &SimulationRng,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SimError> {
        let start = Pose2::identity();
        let settings = PlantSettings {
            drive_time_constant_s: simulation.drive_time_constant_s,
            steer_rate_rad_per_s: simulation.steer_rate_rad_per_s,
        };
        let plant = SwervePlant::new(
            params.drivetrain,
            settings,
            params.kinematics.clone(),
            simulation.wheel_scale_error,
            start,
            &mut rng.fork(PLANT_STREAM),
        )
        .into_shared();

        let sampler = OdometrySampler::new(params.sampler.clone(), clock)?;
        let modules = params
            .modules
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                let io = SimModuleIo::new(
                    spec.name.clone(),
                    index,
                    Arc::clone(&plant),
                    spec.calibration,
                    params.drivetrain,
                    simulation.read_dropout_probability,
                    rng.fork(index as u64 + 1),
                );
                SwerveModule::new(index, Box::new(io), spec.calibration, params.drivetrain, &sampler)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let odometry = OdometryIntegrator::new(params.kinematics.clone(), params.drivetrain.wheel_radius_m);
        let fusion = SwervePoseEstimator::new(params.fusion, start, 0.0)?;

        let cameras = params
            .cameras
            .iter()
            .enumerate()
            .map(|(i, spec)| CameraRig {
                io: SimCameraIo::new(
                    spec.clone(),
                    Arc::clone(&params.landmarks),
                    rng.fork(CAMERA_STREAM_BASE + i as u64),
                ),
                estimator: CameraEstimator::new(
                    spec.params.clone(),
                    Arc::clone(&params.landmarks),
                    params.noise,
                    params.solver,
                ),
            })
            .collect::<Vec<_>>();

        info!(
            modules = modules.len(),
            cameras = cameras.len(),
            landmarks = params.landmarks.len(),
            sampler_hz = params.sampler.frequency_hz,
            "robot assembled"
        );

        Ok(Self {
            params,
            plant,
            sampler,
            modules,
            odometry,
            fusion,
            cameras,
        })
    }

    /// Ground truth at `time`, advancing the plant if needed.
    pub fn truth_at(&self, time: f64) -> Pose2 {
        let mut plant = self.plant.lock();
        plant.advance_to(time);
        plant.pose()
    }
}
