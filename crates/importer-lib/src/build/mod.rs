//! Source builds through Shipwright Build and BuildRun objects

pub mod controller;
pub mod phase;

pub use controller::BuildController;
pub use phase::{build_job, latest_run, phase_of};
