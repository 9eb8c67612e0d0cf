// strafe_core/src/prelude.rs

// --- Core Abstractions (the hardware and algorithm contracts) ---
pub use crate::drive::ModuleIo;
pub use crate::estimation::PoseEstimator;
pub use crate::sampling::Clock;
pub use crate::vision::CameraIo;

// --- Core Data Structures ---
pub use crate::messages::{
    DetectionFrame, FusedPoseEstimate, LandmarkDetection, ModulePosition, ModuleSample,
    ModuleState, OdometryBatch, OdometryFrame, StdDevs, VisionObservation,
};
pub use crate::types::{Pose2, Pose3, Rotation, Twist2d};

// --- Pipeline Stages ---
pub use crate::drive::{DrivetrainParams, ModuleCalibration, ReplayModuleIo, SwerveModule};
pub use crate::estimation::{EstimatorInput, FusionConfig, PoseReader, SwervePoseEstimator};
pub use crate::kinematics::{ChassisSpeeds, OdometryIntegrator, SwerveKinematics};
pub use crate::sampling::{ManualClock, MonotonicClock, OdometrySampler, SamplerConfig};
pub use crate::vision::{
    CameraEstimator, CameraParams, LandmarkMap, SolverConfig, VisionNoiseParams,
};

// --- Errors ---
pub use crate::error::{ConfigError, HardwareError, SolveError};
