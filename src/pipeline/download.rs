//! Phase 1: run the model downloader container once, with network access.
//!
//! Success is judged by the sentinel, not just the exit code: the
//! downloader writes it only after every model verified.

use crate::compose::Compose;
use crate::config::DeployConfig;
use crate::error::DeployError;
use crate::models::{read_sentinel, SentinelState};
use serde::Serialize;
use tracing::info;

/// How the download phase was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadOutcome {
    /// The downloader ran and wrote the sentinel.
    Downloaded,
    /// `--skip-download`: models from an earlier run are reused.
    Reused,
}

impl DownloadOutcome {
    /// Reason reported to progress callbacks when nothing was downloaded.
    pub fn skip_reason(&self) -> Option<&'static str> {
        match self {
            DownloadOutcome::Downloaded => None,
            DownloadOutcome::Reused => Some("--skip-download: reusing downloaded models"),
        }
    }
}

/// Run (or skip) the download container and check the sentinel.
///
/// # Errors
/// * [`DeployError::SentinelMissing`] — skipped without a prior download, or
///   the downloader exited without writing the sentinel
/// * [`DeployError::DownloadFailed`] — the downloader container failed
pub async fn run_download_phase(
    compose: &Compose,
    config: &DeployConfig,
) -> Result<DownloadOutcome, DeployError> {
    let sentinel = config.sentinel_path();

    if config.skip_download {
        if read_sentinel(&sentinel).exists() {
            info!(sentinel = %sentinel.display(), "Skipping download, sentinel present");
            return Ok(DownloadOutcome::Reused);
        }
        return Err(DeployError::SentinelMissing { path: sentinel });
    }

    info!(service = %config.download_service, "Downloading models (Phase 1)");
    compose
        .run_once(&config.download_profile, &config.download_service)
        .await
        .map_err(|e| DeployError::DownloadFailed(e.to_string()))?;

    match read_sentinel(&sentinel) {
        SentinelState::Absent => Err(DeployError::SentinelMissing { path: sentinel }),
        SentinelState::Present(_) => {
            info!(sentinel = %sentinel.display(), "Models downloaded");
            Ok(DownloadOutcome::Downloaded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_reuse_reports_a_skip() {
        assert_eq!(DownloadOutcome::Downloaded.skip_reason(), None);
        assert!(DownloadOutcome::Reused
            .skip_reason()
            .unwrap()
            .contains("--skip-download"));
    }
}
