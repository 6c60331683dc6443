//! Phase 2: start the offline services and wait for them.

use super::health::{wait_until_ready, HealthOutcome};
use crate::compose::Compose;
use crate::config::DeployConfig;
use crate::error::DeployError;
use crate::progress::DeployProgressCallback;
use tracing::info;

/// Start the production profile (network-isolated API) and poll its health.
pub async fn start_production(
    compose: &Compose,
    config: &DeployConfig,
    progress: &dyn DeployProgressCallback,
) -> Result<HealthOutcome, DeployError> {
    info!(profile = %config.production_profile, "Starting production services (Phase 2)");
    compose
        .up(&[config.production_profile.as_str()])
        .await
        .map_err(|e| DeployError::ProductionFailed(e.to_string()))?;

    Ok(wait_until_ready(
        compose,
        &config.production_profile,
        &config.api_service,
        config.health_attempts,
        config.health_interval,
        progress,
    )
    .await)
}

/// Start the optional web UI profile and poll its health.
pub async fn start_web(
    compose: &Compose,
    config: &DeployConfig,
    progress: &dyn DeployProgressCallback,
) -> Result<HealthOutcome, DeployError> {
    info!(profile = %config.web_profile, "Starting web interface");
    compose
        .up(&[config.web_profile.as_str()])
        .await
        .map_err(|e| DeployError::WebFailed(e.to_string()))?;

    Ok(wait_until_ready(
        compose,
        &config.web_profile,
        &config.web_service,
        config.health_attempts,
        config.health_interval,
        progress,
    )
    .await)
}
