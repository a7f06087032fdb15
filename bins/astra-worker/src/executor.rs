/// Job Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Drive one job through the pipeline and produce its `RunnerResult`.
///
/// **Architecture:**
/// 1. Resolve the testbench (inline or catalog) and prepare the workspace (workspace.rs)
/// 2. Run the synthesized script in the sandbox (engine.rs)
/// 3. Classify the outcome from the captured logs (evaluator.rs)
/// 4. Relocate any waveform dump (artifacts.rs)
///
/// This module is the glue layer. `run_job` never fails: every error on the
/// way is folded into a `runtime_error` result.

use crate::artifacts::ArtifactStore;
use crate::config::RunnerConfig;
use crate::engine::Sandbox;
use crate::error::RunnerError;
use crate::evaluator::{self, RunLogs};
use crate::workspace::{self, Workspace};
use astra_common::catalog::TestbenchCatalog;
use astra_common::types::{JobSpec, RunStatus, RunnerResult};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Runs jobs against one sandbox backend and catalog.
///
/// Holds no per-job state, so independent jobs may run concurrently; they only
/// share the storage root, partitioned by job id.
pub struct Runner {
    config: RunnerConfig,
    sandbox: Arc<dyn Sandbox>,
    catalog: Arc<dyn TestbenchCatalog>,
    artifacts: ArtifactStore,
}

impl Runner {
    pub fn new(config: RunnerConfig, sandbox: Arc<dyn Sandbox>, catalog: Arc<dyn TestbenchCatalog>) -> Self {
        let artifacts = ArtifactStore::new(&config);
        Self {
            config,
            sandbox,
            catalog,
            artifacts,
        }
    }

    /// Execute one job end to end
    #[instrument(
        skip(self, job),
        fields(job_id = %job.submission_id, language = %job.language, backend = self.sandbox.name())
    )]
    pub async fn run_job(&self, job: &JobSpec) -> RunnerResult {
        info!(
            problem_id = %job.problem_id,
            source_size = job.student_code.len(),
            inline_testbench = job.testbench.is_some(),
            "Starting job"
        );

        let result = match self.try_run_job(job).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Job aborted");
                RunnerResult::runtime_error(&job.submission_id, &e)
            }
        };

        info!(
            status = %result.status,
            total = result.total_tests,
            passed = result.passed_tests,
            failed = result.failed_tests,
            execution_ms = result.execution_time_ms,
            waveform = result.waveform_path.is_some(),
            "Job finished"
        );

        result
    }

    fn timeout_for(&self, job: &JobSpec) -> Result<u64, RunnerError> {
        match job.timeout_ms {
            Some(0) => Err(RunnerError::InvalidJob("timeout must be positive".to_string())),
            Some(ms) => Ok(ms),
            None => Ok(self.config.default_timeout_ms),
        }
    }

    async fn try_run_job(&self, job: &JobSpec) -> Result<RunnerResult, RunnerError> {
        workspace::validate_job_id(&job.submission_id)?;
        let timeout_ms = self.timeout_for(job)?;

        let testbench = workspace::resolve_testbench(job, self.catalog.as_ref(), &self.config.uploads_dir).await?;

        // Dropped at the end of this function, removing the job directory
        let workspace = Workspace::prepare(
            &self.config.jobs_dir(),
            &job.submission_id,
            job.language,
            &job.student_code,
            &testbench,
            self.config.keep_workspaces,
        )
        .await?;

        let outcome = self.sandbox.execute(workspace.dir(), timeout_ms).await?;
        debug!(
            exit_code = outcome.exit_code,
            timed_out = outcome.timed_out,
            execution_ms = outcome.execution_time_ms,
            "Sandbox finished"
        );

        let logs = RunLogs {
            compile_log: workspace.read_compile_log().await,
            sim_log: workspace.read_sim_log().await,
        };

        let mut result = evaluator::evaluate(&job.submission_id, &outcome, &logs);

        if !matches!(result.status, RunStatus::Timeout | RunStatus::CompileError) {
            match self
                .artifacts
                .collect_waveform(&workspace.waveform_file(), &job.submission_id)
                .await
            {
                Ok(reference) => result.waveform_path = reference,
                // the grading itself is still valid
                Err(e) => warn!(error = %e, "Failed to store waveform"),
            }
        }

        Ok(result)
    }
}
