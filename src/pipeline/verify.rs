//! Verify phase: check the downloaded models on the host before anything
//! is started offline.

use crate::config::DeployConfig;
use crate::error::DeployError;
use crate::models::{verify_all, VerificationReport};
use tracing::info;

/// Verify every manifest model under the host models directory.
///
/// Runs in `spawn_blocking`: it walks the model directories synchronously.
///
/// # Errors
/// * [`DeployError::SentinelMissing`] — Phase 1 never completed
/// * [`DeployError::VerificationFailed`] — one or more models are incomplete
pub async fn verify_models(config: &DeployConfig) -> Result<VerificationReport, DeployError> {
    let models_dir = config.models_path();
    let sentinel = config.sentinel_path();
    let manifest = config.manifest.clone();

    let report = tokio::task::spawn_blocking(move || verify_all(&models_dir, &manifest, &sentinel))
        .await
        .map_err(|e| DeployError::Internal(format!("Verify task panicked: {}", e)))??;

    let report = report.into_result()?;
    info!(models = report.models.len(), "All models verified");
    Ok(report)
}
