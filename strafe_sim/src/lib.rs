// strafe_sim/src/lib.rs

//! Simulated hardware and a closed-loop runner for the `strafe_core`
//! pipeline.

// This prelude is for convenience for other files WITHIN the strafe_sim crate
// and for the binary.
pub mod prelude;

pub mod cli;
pub mod error;
pub mod logging;
pub mod simulation;
