//! Directories phase: create the host-side data directories and make sure a
//! pipeline config exists.

use crate::config::DeployConfig;
use crate::error::DeployError;
use crate::marker_config::MarkerConfig;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// What the directories phase changed on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SetupOutcome {
    /// Directories that did not exist before this run.
    pub created: Vec<PathBuf>,
    /// Whether a default pipeline config was written.
    pub wrote_default_config: bool,
}

/// Create every data directory (idempotent) and the pipeline config.
///
/// An existing pipeline config is never overwritten. It must be a JSON
/// object; validation issues inside it are only logged.
pub async fn prepare_directories(config: &DeployConfig) -> Result<SetupOutcome, DeployError> {
    let mut outcome = SetupOutcome::default();

    let mut dirs: Vec<PathBuf> = config.data_dirs.iter().map(|d| config.resolve(d)).collect();
    let models = config.models_path();
    if !dirs.contains(&models) {
        dirs.push(models);
    }

    for dir in dirs {
        if ensure_dir(&dir).await? {
            info!(path = %dir.display(), "Created directory");
            outcome.created.push(dir);
        } else {
            debug!(path = %dir.display(), "Directory exists");
        }
    }

    let path = config.pipeline_config_path();
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        check_existing(&path)?;
    } else {
        write_default(&path).await?;
        outcome.wrote_default_config = true;
    }

    Ok(outcome)
}

/// Returns `true` if the directory had to be created.
async fn ensure_dir(dir: &Path) -> Result<bool, DeployError> {
    if tokio::fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Ok(false);
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| DeployError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
    Ok(true)
}

async fn write_default(path: &Path) -> Result<(), DeployError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent).await?;
    }
    let body = serde_json::to_string_pretty(&MarkerConfig::default_document())
        .map_err(|e| DeployError::Internal(format!("serialising default pipeline config: {e}")))?;
    tokio::fs::write(path, body + "\n")
        .await
        .map_err(|source| DeployError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })?;
    info!(path = %path.display(), "Wrote default pipeline config");
    Ok(())
}

fn check_existing(path: &Path) -> Result<(), DeployError> {
    let parsed = MarkerConfig::from_path(path)?;
    let report = parsed.validate();
    for issue in report.warnings() {
        warn!(path = %path.display(), "{issue}");
    }
    for issue in report.errors() {
        error!(path = %path.display(), "{issue}");
    }
    info!(
        path = %path.display(),
        use_llm = parsed.use_llm(),
        processors = parsed.active_processors().len(),
        "Pipeline config loaded"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> DeployConfig {
        DeployConfig::builder().project_dir(dir).build().unwrap()
    }

    #[tokio::test]
    async fn creates_dirs_and_default_config() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path());

        let outcome = prepare_directories(&config).await.unwrap();
        for name in ["models", "uploads", "outputs", "logs", "config"] {
            assert!(tmp.path().join(name).is_dir(), "{name} missing");
        }
        assert_eq!(outcome.created.len(), 5);
        assert!(outcome.wrote_default_config);

        let written = MarkerConfig::from_path(&config.pipeline_config_path()).unwrap();
        assert!(!written.use_llm());
    }

    #[tokio::test]
    async fn second_run_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path());
        prepare_directories(&config).await.unwrap();

        let again = prepare_directories(&config).await.unwrap();
        assert!(again.created.is_empty());
        assert!(!again.wrote_default_config);
    }

    #[tokio::test]
    async fn existing_config_is_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path());
        std::fs::create_dir_all(tmp.path().join("config")).unwrap();
        std::fs::write(config.pipeline_config_path(), r#"{"use_llm": true}"#).unwrap();

        let outcome = prepare_directories(&config).await.unwrap();
        assert!(!outcome.wrote_default_config);
        let text = std::fs::read_to_string(config.pipeline_config_path()).unwrap();
        assert_eq!(text, r#"{"use_llm": true}"#);
    }

    #[tokio::test]
    async fn malformed_config_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path());
        std::fs::create_dir_all(tmp.path().join("config")).unwrap();
        std::fs::write(config.pipeline_config_path(), "[1, 2]").unwrap();

        let err = prepare_directories(&config).await.unwrap_err();
        assert!(matches!(err, DeployError::MalformedPipelineConfig { .. }));
    }
}
