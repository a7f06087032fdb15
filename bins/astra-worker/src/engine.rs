/// Execution Engine - Sandboxed Script Execution
///
/// **Core Responsibility:**
/// Run a prepared workspace's `run.sh` under isolation and capture raw output.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (Docker, local process group)
/// - Engine does NOT parse logs or classify results
/// - Engine returns an `ExecutionOutcome` for the evaluator to judge
///
/// **Timeout Contract (all backends):**
/// - Timer starts at launch
/// - On expiry the whole process tree is SIGKILLed, no grace period
/// - Output captured so far is kept, annotated, and reported with exit code 124
///
/// Failing to start the isolation itself is a `SandboxLaunch` error, distinct
/// from the job's script failing.

use crate::config::{RunnerConfig, SandboxBackend};
use crate::error::RunnerError;
use crate::evaluator::{ExecutionOutcome, TIMEOUT_EXIT_CODE};
use crate::script::SCRIPT_FILE;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Mount point of the workspace inside the container
const JOB_MOUNT: &str = "/job";

const TIMEOUT_STDOUT_NOTE: &str = "\n[TIMEOUT] Execution exceeded time limit";
const TIMEOUT_STDERR_NOTE: &str = "\n[TIMEOUT]";

/// How long to keep draining pipes after a kill
const DRAIN_AFTER_KILL: Duration = Duration::from_millis(250);

/// An isolation mechanism able to run one workspace script
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn name(&self) -> &'static str;

    /// Verify the backend is usable without running a job
    async fn check(&self) -> Result<(), RunnerError>;

    /// Run `run.sh` from `workspace`, killing it after `timeout_ms`
    async fn execute(&self, workspace: &Path, timeout_ms: u64) -> Result<ExecutionOutcome, RunnerError>;
}

/// Build the sandbox selected in the configuration
pub fn create_sandbox(config: &RunnerConfig) -> Result<Arc<dyn Sandbox>, RunnerError> {
    match config.backend {
        SandboxBackend::Docker => Ok(Arc::new(DockerEngine::new(config)?)),
        SandboxBackend::Local => {
            warn!("Local sandbox backend selected: jobs run WITHOUT isolation");
            Ok(Arc::new(LocalEngine::new()))
        }
    }
}

/// Mark an outcome as killed by the wall-clock timer
fn timed_out_outcome(mut stdout: String, mut stderr: String, execution_time_ms: u64) -> ExecutionOutcome {
    stdout.push_str(TIMEOUT_STDOUT_NOTE);
    stderr.push_str(TIMEOUT_STDERR_NOTE);
    ExecutionOutcome {
        stdout,
        stderr,
        exit_code: TIMEOUT_EXIT_CODE,
        timed_out: true,
        execution_time_ms,
    }
}

/// Container cleanup guard - guarantees container removal on drop
/// This ensures containers are cleaned up even if execution panics or is cancelled
struct ContainerGuard {
    docker: Docker,
    container_id: String,
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        // Cannot be async in Drop
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            if let Err(e) = docker.remove_container(&container_id, Some(remove_options)).await {
                warn!(container_id = %container_id, error = %e, "Failed to cleanup container");
            }
        });
    }
}

/// Docker-based sandbox
///
/// **Docker Execution Rules:**
/// 1. Pulls the runner image if not present
/// 2. Creates a container with:
///    - Network disabled
///    - Memory ceiling (swap pinned to the same value) and CPU quota
///    - PID limit and no-new-privileges
///    - Workspace bind-mounted read-write at `/job` as working directory
/// 3. Streams stdout/stderr until the container stops
/// 4. Kills with SIGKILL on timeout
/// 5. Force-removes the container on every path
pub struct DockerEngine {
    docker: Docker,
    image: String,
    memory_limit: i64,
    nano_cpus: i64,
    pids_limit: i64,
}

impl DockerEngine {
    pub fn new(config: &RunnerConfig) -> Result<Self, RunnerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RunnerError::launch("Failed to connect to Docker daemon", e))?;

        Ok(DockerEngine {
            docker,
            image: config.image.clone(),
            memory_limit: config.memory_limit_bytes(),
            nano_cpus: config.nano_cpus(),
            pids_limit: config.pids_limit,
        })
    }

    /// Ensure the runner image is available (pull if needed)
    async fn ensure_image(&self) -> Result<(), RunnerError> {
        if self.docker.inspect_image(&self.image).await.is_ok() {
            debug!(image = %self.image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %self.image, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: self.image.as_str(),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| RunnerError::launch(&format!("Failed to pull image '{}'", self.image), e))?;
        }

        info!(image = %self.image, "Image pulled successfully");
        Ok(())
    }

    fn container_config(&self, host_dir: &str) -> Config<String> {
        Config {
            image: Some(self.image.clone()),
            cmd: Some(vec![
                "/bin/bash".to_string(),
                format!("{}/{}", JOB_MOUNT, SCRIPT_FILE),
            ]),
            working_dir: Some(JOB_MOUNT.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true), // SECURITY: No network access
            host_config: Some(HostConfig {
                memory: Some(self.memory_limit),
                memory_swap: Some(self.memory_limit),
                nano_cpus: Some(self.nano_cpus),
                pids_limit: Some(self.pids_limit),
                network_mode: Some("none".to_string()),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                mounts: Some(vec![Mount {
                    target: Some(JOB_MOUNT.to_string()),
                    source: Some(host_dir.to_string()),
                    typ: Some(MountTypeEnum::BIND),
                    read_only: Some(false),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Sandbox for DockerEngine {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn check(&self) -> Result<(), RunnerError> {
        self.docker
            .ping()
            .await
            .map_err(|e| RunnerError::launch("Failed to ping Docker daemon", e))?;
        self.ensure_image().await
    }

    async fn execute(&self, workspace: &Path, timeout_ms: u64) -> Result<ExecutionOutcome, RunnerError> {
        // bind mounts need an absolute host path
        let host_dir = tokio::fs::canonicalize(workspace)
            .await
            .map_err(|e| RunnerError::workspace("Failed to resolve workspace path", e))?;
        let host_dir = host_dir.to_string_lossy().into_owned();

        self.ensure_image().await?;

        let container_name = format!("astra-{}", uuid::Uuid::new_v4());
        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), self.container_config(&host_dir))
            .await
            .map_err(|e| RunnerError::launch("Failed to create container", e))?;

        let container_id = container.id.clone();

        // Set up cleanup guard immediately after container creation
        let _guard = ContainerGuard {
            docker: self.docker.clone(),
            container_id: container_id.clone(),
        };

        let start_time = Instant::now();

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| RunnerError::launch("Failed to start container", e))?;

        debug!(container = %container_name, timeout_ms = timeout_ms, "Container started");

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut exit_code: Option<i64> = None;

        // Buffers live outside the future so a timeout keeps what was read
        let execution_future = async {
            let logs_options = Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            });

            let mut logs_stream = self.docker.logs(&container_id, logs_options);

            while let Some(output) = logs_stream.next().await {
                match output {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Err(e) => {
                        warn!(error = %e, "Error reading container logs");
                        break;
                    }
                    _ => {}
                }
            }

            let wait_options = WaitContainerOptions {
                condition: "not-running",
            };

            let mut wait_stream = self.docker.wait_container(&container_id, Some(wait_options));
            match wait_stream.next().await {
                Some(Ok(response)) => exit_code = Some(response.status_code),
                // bollard reports a nonzero exit as an error carrying the code
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                    exit_code = Some(code)
                }
                Some(Err(e)) => warn!(error = %e, "Failed to get container exit code"),
                None => warn!("No wait response from container"),
            }
        };

        let completed = tokio::time::timeout(Duration::from_millis(timeout_ms), execution_future)
            .await
            .is_ok();

        let execution_time_ms = start_time.elapsed().as_millis() as u64;

        if !completed {
            warn!(timeout_ms = timeout_ms, "Execution timed out, killing container");

            let kill_options = KillContainerOptions { signal: "SIGKILL" };
            if let Err(e) = self.docker.kill_container(&container_id, Some(kill_options)).await {
                warn!(error = %e, "Failed to kill timed-out container");
            }

            return Ok(timed_out_outcome(stdout, stderr, execution_time_ms));
        }

        let exit_code = exit_code.unwrap_or(0);
        if exit_code == 137 {
            stderr.push_str("\n[Container killed: likely OOM or exceeded memory limit]");
        } else if exit_code == 139 {
            stderr.push_str("\n[Container killed: segmentation fault]");
        }

        debug!(exit_code = exit_code, execution_ms = execution_time_ms, "Container exited");

        Ok(ExecutionOutcome {
            stdout,
            stderr,
            exit_code,
            timed_out: false,
            execution_time_ms,
        })
    }
}

/// Unisolated sandbox: runs `bash run.sh` in the workspace as its own
/// process group. For development hosts without Docker; offers no protection
/// against hostile code.
pub struct LocalEngine {
    shell: String,
}

impl LocalEngine {
    pub fn new() -> Self {
        Self {
            shell: "bash".to_string(),
        }
    }
}

impl Default for LocalEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a pipe to EOF, keeping every chunk as soon as it arrives
async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>, buf: &mut Vec<u8>) {
    let Some(mut pipe) = pipe else { return };
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

#[cfg(unix)]
fn exit_code_of(status: std::process::ExitStatus) -> i64 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code as i64,
        (None, Some(signal)) => 128 + signal as i64,
        (None, None) => 0,
    }
}

#[cfg(not(unix))]
fn exit_code_of(status: std::process::ExitStatus) -> i64 {
    status.code().unwrap_or(0) as i64
}

/// SIGKILL every process in the group led by the script's shell.
/// The group outlives its leader, so this still reaches orphans after bash is reaped.
#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        // group already empty
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid = pgid, error = %e, "Failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

#[async_trait]
impl Sandbox for LocalEngine {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn check(&self) -> Result<(), RunnerError> {
        let status = Command::new(&self.shell)
            .arg("-c")
            .arg("true")
            .status()
            .await
            .map_err(|e| RunnerError::launch(&format!("Failed to spawn {}", self.shell), e))?;
        if !status.success() {
            return Err(RunnerError::SandboxLaunch(format!("{} -c true failed", self.shell)));
        }
        Ok(())
    }

    async fn execute(&self, workspace: &Path, timeout_ms: u64) -> Result<ExecutionOutcome, RunnerError> {
        let mut command = Command::new(&self.shell);
        command
            .arg(SCRIPT_FILE)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let start_time = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|e| RunnerError::launch(&format!("Failed to spawn {}", self.shell), e))?;
        // process_group(0) makes the shell's pid the group id
        let pgid = child
            .id()
            .ok_or_else(|| RunnerError::SandboxLaunch("Spawned script has no pid".to_string()))?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let execution_future = async {
            let (status, _, _) = tokio::join!(
                async {
                    let status = child.wait().await;
                    // background jobs left behind would hold the pipes open
                    kill_process_group(pgid);
                    status
                },
                drain(stdout_pipe.as_mut(), &mut stdout),
                drain(stderr_pipe.as_mut(), &mut stderr),
            );
            status
        };

        let timeout_result = tokio::time::timeout(Duration::from_millis(timeout_ms), execution_future).await;
        let execution_time_ms = start_time.elapsed().as_millis() as u64;

        match timeout_result {
            Ok(Ok(status)) => {
                let exit_code = exit_code_of(status);
                debug!(exit_code = exit_code, execution_ms = execution_time_ms, "Script exited");
                Ok(ExecutionOutcome {
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                    exit_code,
                    timed_out: false,
                    execution_time_ms,
                })
            }
            Ok(Err(e)) => Err(RunnerError::launch("Failed to wait for script", e)),
            Err(_) => {
                warn!(timeout_ms = timeout_ms, "Execution timed out, killing process group");
                kill_process_group(pgid);
                let _ = child.start_kill();
                let _ = child.wait().await;

                // pick up whatever was still buffered in the pipes
                let _ = tokio::time::timeout(DRAIN_AFTER_KILL, async {
                    tokio::join!(
                        drain(stdout_pipe.as_mut(), &mut stdout),
                        drain(stderr_pipe.as_mut(), &mut stderr),
                    )
                })
                .await;

                Ok(timed_out_outcome(
                    String::from_utf8_lossy(&stdout).into_owned(),
                    String::from_utf8_lossy(&stderr).into_owned(),
                    execution_time_ms,
                ))
            }
        }
    }
}
