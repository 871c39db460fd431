//! Subcommand implementations

pub mod builds;
pub mod imports;
pub mod workloads;

use std::process::ExitCode;

/// How a command ended, mapped onto the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Rejected request, failed build or failed workload
    Failure,
    Timeout,
}

impl Outcome {
    pub fn exit_code(self) -> ExitCode {
        match self {
            Outcome::Success => ExitCode::SUCCESS,
            Outcome::Failure => ExitCode::from(1),
            Outcome::Timeout => ExitCode::from(2),
        }
    }
}
