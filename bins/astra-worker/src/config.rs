// Runner configuration for the Astra worker
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which isolation mechanism runs the job script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxBackend {
    /// Docker container with no network and cgroup limits
    Docker,
    /// Plain child process group in the workspace. No isolation.
    Local,
}

impl FromStr for SandboxBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(SandboxBackend::Docker),
            "local" => Ok(SandboxBackend::Local),
            other => bail!("Unknown sandbox backend: {} (expected docker or local)", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Root holding `jobs/` scratch space and durable `waves/`
    pub storage_root: PathBuf,
    /// Where uploaded problem files live
    pub uploads_dir: PathBuf,
    /// Image carrying iverilog/vvp and ghdl
    pub image: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f64,
    pub pids_limit: i64,
    pub default_timeout_ms: u64,
    pub backend: SandboxBackend,
    /// Leave job directories behind for debugging
    pub keep_workspaces: bool,
    /// Public prefix under which relocated waveforms are served
    pub waveform_url_prefix: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("storage"),
            uploads_dir: PathBuf::from("uploads"),
            image: "astra-runner:latest".to_string(),
            memory_limit_mb: 256,
            cpu_limit: 0.5,
            pids_limit: 256,
            default_timeout_ms: 10_000,
            backend: SandboxBackend::Docker,
            keep_workspaces: false,
            waveform_url_prefix: "/storage/waves".to_string(),
        }
    }
}

impl RunnerConfig {
    /// Load runner configuration from a JSON file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Runner config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .context("Failed to read runner config")?;

        let config: RunnerConfig = serde_json::from_str(&content)
            .context("Failed to parse runner config")?;

        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Apply environment overrides on top of file/default values
    pub fn apply_env(mut self) -> Result<Self> {
        self.apply_vars(|key| std::env::var(key).ok())?;
        self.validate()?;
        Ok(self)
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = var("STORAGE_DIR") {
            self.storage_root = PathBuf::from(v);
        }
        if let Some(v) = var("UPLOAD_DIR") {
            self.uploads_dir = PathBuf::from(v);
        }
        if let Some(v) = var("RUNNER_IMAGE") {
            self.image = v;
        }
        if let Some(v) = var("RUNNER_MEMORY_MB") {
            self.memory_limit_mb = v.parse().context("RUNNER_MEMORY_MB must be an integer")?;
        }
        if let Some(v) = var("RUNNER_CPUS") {
            self.cpu_limit = v.parse().context("RUNNER_CPUS must be a number")?;
        }
        if let Some(v) = var("RUNNER_TIMEOUT_MS") {
            self.default_timeout_ms = v.parse().context("RUNNER_TIMEOUT_MS must be an integer")?;
        }
        if let Some(v) = var("SANDBOX_BACKEND") {
            self.backend = v.parse()?;
        }
        if let Some(v) = var("KEEP_WORKSPACES") {
            self.keep_workspaces = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.memory_limit_mb == 0 {
            bail!("memory_limit_mb must be positive");
        }
        if self.cpu_limit.is_nan() || self.cpu_limit <= 0.0 {
            bail!("cpu_limit must be positive");
        }
        if self.default_timeout_ms == 0 {
            bail!("default_timeout_ms must be positive");
        }
        Ok(())
    }

    /// Per-job scratch directories live here
    pub fn jobs_dir(&self) -> PathBuf {
        self.storage_root.join("jobs")
    }

    /// Durable waveform storage
    pub fn waves_dir(&self) -> PathBuf {
        self.storage_root.join("waves")
    }

    pub fn memory_limit_bytes(&self) -> i64 {
        (self.memory_limit_mb as i64) * 1024 * 1024
    }

    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit * 1_000_000_000.0) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.memory_limit_bytes(), 256 * 1024 * 1024);
        assert_eq!(config.nano_cpus(), 500_000_000);
        assert_eq!(config.default_timeout_ms, 10_000);
        assert_eq!(config.backend, SandboxBackend::Docker);
        assert_eq!(config.jobs_dir(), PathBuf::from("storage/jobs"));
        assert_eq!(config.waves_dir(), PathBuf::from("storage/waves"));
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"image": "custom:1", "backend": "local", "memory_limit_mb": 512}}"#).unwrap();

        let config = RunnerConfig::load(file.path()).unwrap();
        assert_eq!(config.image, "custom:1");
        assert_eq!(config.backend, SandboxBackend::Local);
        assert_eq!(config.memory_limit_mb, 512);
        // untouched fields keep their defaults
        assert_eq!(config.cpu_limit, 0.5);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(RunnerConfig::load(Path::new("/nonexistent/runner.json")).is_err());
        assert!(RunnerConfig::load_or_default(None).is_ok());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"default_timeout_ms": 0}}"#).unwrap();
        assert!(RunnerConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("STORAGE_DIR", "/srv/astra"),
            ("RUNNER_CPUS", "1.5"),
            ("SANDBOX_BACKEND", "LOCAL"),
            ("KEEP_WORKSPACES", "true"),
        ]);

        let mut config = RunnerConfig::default();
        config.apply_vars(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.storage_root, PathBuf::from("/srv/astra"));
        assert_eq!(config.nano_cpus(), 1_500_000_000);
        assert_eq!(config.backend, SandboxBackend::Local);
        assert!(config.keep_workspaces);
    }

    #[test]
    fn test_env_bad_number() {
        let mut config = RunnerConfig::default();
        let result = config.apply_vars(|k| (k == "RUNNER_MEMORY_MB").then(|| "lots".to_string()));
        assert!(result.is_err());
    }
}
