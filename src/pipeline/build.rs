//! Build phase: `compose build` for every profile this run will use.

use crate::compose::Compose;
use crate::config::DeployConfig;
use crate::error::DeployError;
use tracing::info;

/// Profiles whose images are built, in order.
///
/// The download profile is always built so a later run without
/// `--skip-download` finds its image up to date.
pub fn build_profiles(config: &DeployConfig) -> Vec<&str> {
    let mut profiles = vec![config.download_profile.as_str()];
    profiles.extend(config.serving_profiles());
    profiles
}

/// Build the images. Output streams to the terminal.
pub async fn build_images(compose: &Compose, config: &DeployConfig) -> Result<(), DeployError> {
    let profiles = build_profiles(config);
    info!(profiles = %profiles.join(","), "Building images");
    compose
        .build(&profiles)
        .await
        .map_err(|e| DeployError::BuildFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_builds_download_and_production() {
        let config = DeployConfig::default();
        assert_eq!(build_profiles(&config), vec!["download", "production"]);
    }

    #[test]
    fn skip_download_still_builds_downloader() {
        let config = DeployConfig::builder()
            .skip_download(true)
            .with_web(true)
            .build()
            .unwrap();
        assert_eq!(build_profiles(&config), vec!["download", "production", "web"]);
    }
}
