//! Teardown after a run.
//!
//! Every exit, successful or not, brings all Compose profiles down. With
//! `keep_running` a successful run instead leaves the serving profiles up
//! and only removes what is left of the one-off download container.
//! Teardown errors are logged, never returned: they must not mask the
//! outcome of the run.

use crate::compose::Compose;
use crate::config::DeployConfig;
use crate::error::DeployError;
use tracing::{info, warn};

/// Run after every deployment attempt, once Compose has been detected.
pub async fn teardown(compose: &Compose, config: &DeployConfig, succeeded: bool) {
    if succeeded && config.keep_running {
        if let Err(e) = compose
            .remove(&config.download_profile, &config.download_service)
            .await
        {
            warn!("Could not remove download container: {e}");
        }
        info!("Leaving services running (--keep-running)");
        return;
    }

    info!(succeeded, "Bringing down all profiles");
    if let Err(e) = shutdown(compose, config).await {
        warn!("Cleanup failed: {e}");
    }
}

/// `compose down --remove-orphans` for every known profile.
pub async fn shutdown(compose: &Compose, config: &DeployConfig) -> Result<(), DeployError> {
    compose.down(&config.all_profiles()).await?;
    info!("All services stopped");
    Ok(())
}
