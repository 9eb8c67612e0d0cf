// strafe_sim/src/simulation/plugins/mod.rs

pub mod control;
pub mod sensors;
pub mod vehicles;
