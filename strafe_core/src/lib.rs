// strafe_core/src/lib.rs

pub mod drive;
pub mod error;
pub mod estimation;
pub mod kinematics;
pub mod messages;
pub mod prelude;
pub mod sampling;
pub mod types;
pub mod utils;
pub mod vision;
