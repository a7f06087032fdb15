// Failure modes of a single job run
use thiserror::Error;

/// Errors that abort a job before a meaningful result exists.
///
/// None of these escape `Runner::run_job`; they become `runtime_error` results.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("No testbench found for this problem")]
    MissingTestbench,

    #[error("Testbench content is empty")]
    EmptyTestbench,

    #[error("Catalog lookup failed: {0}")]
    Catalog(String),

    #[error("Sandbox launch failed: {0}")]
    SandboxLaunch(String),
}

impl RunnerError {
    pub fn workspace(context: &str, err: impl std::fmt::Display) -> Self {
        RunnerError::Workspace(format!("{}: {}", context, err))
    }

    pub fn launch(context: &str, err: impl std::fmt::Display) -> Self {
        RunnerError::SandboxLaunch(format!("{}: {}", context, err))
    }
}
