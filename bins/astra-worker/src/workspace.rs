/// Workspace Manager - Single-Use Job Directories
///
/// **Responsibility:**
/// Materialize everything a job needs on disk before the sandbox starts:
/// - `student.<ext>` and `testbench.<ext>`, written verbatim
/// - `run.sh` for the job's language, marked executable
///
/// Each job gets `<storage>/jobs/<job_id>/`, created fresh. An existing
/// directory for the same id is an error, never reused. The directory is
/// removed when the `Workspace` is dropped unless it is configured to be kept.

use crate::error::RunnerError;
use crate::script::{self, COMPILE_LOG, SCRIPT_FILE, SIM_LOG, WAVEFORM_FILE};
use astra_common::catalog::TestbenchCatalog;
use astra_common::types::{JobSpec, Language};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Reject pathological submissions before they reach the disk
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB

#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    keep: bool,
}

/// Job ids become directory and artifact names
pub fn validate_job_id(job_id: &str) -> Result<(), RunnerError> {
    if job_id.is_empty() {
        return Err(RunnerError::InvalidJob("job id is empty".to_string()));
    }
    if !job_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(RunnerError::InvalidJob(format!(
            "job id '{}' may only contain letters, digits, '-' and '_'",
            job_id
        )));
    }
    Ok(())
}

impl Workspace {
    /// Create the job directory and write sources plus run script into it
    pub async fn prepare(
        jobs_dir: &Path,
        job_id: &str,
        language: Language,
        student_code: &str,
        testbench: &str,
        keep: bool,
    ) -> Result<Self, RunnerError> {
        validate_job_id(job_id)?;
        if student_code.len() > MAX_SOURCE_CODE_BYTES {
            return Err(RunnerError::InvalidJob(format!(
                "source code exceeds maximum size of {} bytes",
                MAX_SOURCE_CODE_BYTES
            )));
        }

        fs::create_dir_all(jobs_dir)
            .await
            .map_err(|e| RunnerError::workspace("Failed to create jobs directory", e))?;

        let dir = jobs_dir.join(job_id);
        match fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(RunnerError::Workspace(format!(
                    "workspace for job {} already exists",
                    job_id
                )));
            }
            Err(e) => return Err(RunnerError::workspace("Failed to create job directory", e)),
        }

        // From here on a failure removes the half-written directory via Drop
        let workspace = Workspace { dir, keep };

        workspace.write(&language.student_file(), student_code).await?;
        workspace.write(&language.testbench_file(), testbench).await?;
        workspace.write(SCRIPT_FILE, script::run_script(language)).await?;
        workspace.make_executable(SCRIPT_FILE).await?;

        debug!(dir = %workspace.dir.display(), language = %language, "Workspace prepared");
        Ok(workspace)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the simulator leaves its waveform dump
    pub fn waveform_file(&self) -> PathBuf {
        self.dir.join(WAVEFORM_FILE)
    }

    pub async fn read_compile_log(&self) -> Option<String> {
        self.read_optional(COMPILE_LOG).await
    }

    pub async fn read_sim_log(&self) -> Option<String> {
        self.read_optional(SIM_LOG).await
    }

    async fn write(&self, name: &str, content: &str) -> Result<(), RunnerError> {
        fs::write(self.dir.join(name), content)
            .await
            .map_err(|e| RunnerError::workspace(&format!("Failed to write {}", name), e))
    }

    #[cfg(unix)]
    async fn make_executable(&self, name: &str) -> Result<(), RunnerError> {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(self.dir.join(name), std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(|e| RunnerError::workspace(&format!("Failed to chmod {}", name), e))
    }

    #[cfg(not(unix))]
    async fn make_executable(&self, _name: &str) -> Result<(), RunnerError> {
        Ok(())
    }

    /// Logs are produced by the script and may legitimately be missing
    async fn read_optional(&self, name: &str) -> Option<String> {
        match fs::read(self.dir.join(name)).await {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(_) => None,
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != ErrorKind::NotFound {
                warn!(dir = %self.dir.display(), error = %e, "Failed to remove workspace");
            }
        }
    }
}

/// Resolve the testbench text for a job.
///
/// Inline content wins. Otherwise the first catalog record for
/// (problem, language, TESTBENCH) is used, falling back to the uploaded file
/// it names when it carries no inline content.
pub async fn resolve_testbench(
    job: &JobSpec,
    catalog: &dyn TestbenchCatalog,
    uploads_dir: &Path,
) -> Result<String, RunnerError> {
    let content = match job.testbench.as_deref() {
        Some(inline) if !inline.is_empty() => inline.to_string(),
        _ => {
            let records = catalog
                .find_testbenches(&job.problem_id, job.language)
                .await
                .map_err(|e| RunnerError::Catalog(format!("{:#}", e)))?;

            let record = records.into_iter().next().ok_or(RunnerError::MissingTestbench)?;

            match (record.content, record.filename) {
                (Some(content), _) if !content.is_empty() => content,
                (_, Some(filename)) if !filename.is_empty() => {
                    read_upload(uploads_dir, &filename).await?
                }
                _ => String::new(),
            }
        }
    };

    if content.trim().is_empty() {
        return Err(RunnerError::EmptyTestbench);
    }
    Ok(content)
}

async fn read_upload(uploads_dir: &Path, filename: &str) -> Result<String, RunnerError> {
    let plain = Path::new(filename)
        .file_name()
        .is_some_and(|name| name == filename);
    if !plain {
        return Err(RunnerError::Catalog(format!("refusing upload path '{}'", filename)));
    }

    fs::read_to_string(uploads_dir.join(filename))
        .await
        .map_err(|e| RunnerError::Catalog(format!("Failed to read uploaded testbench {}: {}", filename, e)))
}
