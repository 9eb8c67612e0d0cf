// strafe_sim/src/simulation/plugins/control/mod.rs

pub mod script;
