// Relocates simulator waveform dumps out of the transient workspace
use crate::config::RunnerConfig;
use crate::error::RunnerError;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Durable waveform storage, one `<job_id>.vcd` per job
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    waves_dir: PathBuf,
    url_prefix: String,
}

impl ArtifactStore {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            waves_dir: config.waves_dir(),
            url_prefix: config.waveform_url_prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Copy `dump` into storage if the simulator produced it.
    ///
    /// Returns the public reference (`<prefix>/<job_id>.vcd`), or `None` when
    /// there is no dump. A missing dump is not an error.
    pub async fn collect_waveform(&self, dump: &Path, job_id: &str) -> Result<Option<String>, RunnerError> {
        if !fs::try_exists(dump).await.unwrap_or(false) {
            return Ok(None);
        }

        fs::create_dir_all(&self.waves_dir)
            .await
            .map_err(|e| RunnerError::workspace("Failed to create waveform directory", e))?;

        let file_name = format!("{}.vcd", job_id);
        let destination = self.waves_dir.join(&file_name);
        fs::copy(dump, &destination)
            .await
            .map_err(|e| RunnerError::workspace("Failed to copy waveform", e))?;

        debug!(destination = %destination.display(), "Waveform stored");
        Ok(Some(format!("{}/{}", self.url_prefix, file_name)))
    }
}
