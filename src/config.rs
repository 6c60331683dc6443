//! Configuration types for a deployment run.
//!
//! Every knob of the orchestrator lives in [`DeployConfig`], built via its
//! [`DeployConfigBuilder`]. Paths are stored as given and resolved against
//! [`DeployConfig::project_dir`] on use, so a config can be built before the
//! project directory exists.

use crate::error::DeployError;
use crate::models::{default_manifest, ModelSpec};
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the Phase 1 sentinel inside the models directory.
pub const SENTINEL_FILE: &str = ".models_downloaded";

/// Configuration for one deployment run.
///
/// Built via [`DeployConfig::builder()`] or using [`DeployConfig::default()`].
///
/// # Example
/// ```rust
/// use marker_deploy::DeployConfig;
///
/// let config = DeployConfig::builder()
///     .project_dir("/srv/marker")
///     .with_web(true)
///     .build()
///     .unwrap();
/// assert!(config.sentinel_path().ends_with("models/.models_downloaded"));
/// ```
#[derive(Clone)]
pub struct DeployConfig {
    /// Directory holding the compose file and the data directories. Default: `.`.
    pub project_dir: PathBuf,

    /// Compose file, relative to `project_dir` unless absolute. Default: `docker-compose.yml`.
    pub compose_file: PathBuf,

    /// Compose project name (`-p`). If None, Compose derives it from the directory.
    pub project_name: Option<String>,

    /// Models directory, relative to `project_dir` unless absolute. Default: `models`.
    ///
    /// Must be the host side of the volume the download container writes to.
    pub models_dir: PathBuf,

    /// Data directories created by the directories phase. Default:
    /// `models`, `uploads`, `outputs`, `logs`, `config`.
    pub data_dirs: Vec<PathBuf>,

    /// Pipeline config file, relative to `project_dir` unless absolute.
    /// Default: `config/marker_config.json`. A default one is written if absent.
    pub pipeline_config: PathBuf,

    /// Compose profile of the Phase 1 downloader. Default: `download`.
    pub download_profile: String,
    /// Compose profile of the API service. Default: `production`.
    pub production_profile: String,
    /// Compose profile of the optional web UI. Default: `web`.
    pub web_profile: String,

    /// Service run once in Phase 1. Default: `model-downloader`.
    pub download_service: String,
    /// Service whose health gates the API. Default: `marker-api`.
    pub api_service: String,
    /// Service whose health gates the web UI. Default: `marker-web`.
    pub web_service: String,

    /// Host port of the API. Default: 8000.
    pub api_port: u16,
    /// Host port of the web UI. Default: 8501.
    pub web_port: u16,

    /// Reuse models from a previous run instead of running Phase 1. Default: false.
    ///
    /// The sentinel must already exist; otherwise the run aborts before any
    /// container is started.
    pub skip_download: bool,

    /// Also start the web UI profile. Default: false.
    pub with_web: bool,

    /// Leave the serving profiles up after a successful run. Default: false.
    ///
    /// Without it every exit tears down all profiles. With it a successful
    /// run only removes the download container; failed runs still tear down.
    pub keep_running: bool,

    /// Maximum number of readiness checks per service. Default: 12.
    pub health_attempts: u32,

    /// Delay between two readiness checks. Default: 5 s.
    pub health_interval: Duration,

    /// Timeout of each HTTP probe in the status report. Default: 3 s.
    pub probe_timeout: Duration,

    /// Models expected in `models_dir`. Default: the surya set.
    pub manifest: Vec<ModelSpec>,

    /// Optional phase-level progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            compose_file: PathBuf::from("docker-compose.yml"),
            project_name: None,
            models_dir: PathBuf::from("models"),
            data_dirs: ["models", "uploads", "outputs", "logs", "config"]
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            pipeline_config: PathBuf::from("config/marker_config.json"),
            download_profile: "download".into(),
            production_profile: "production".into(),
            web_profile: "web".into(),
            download_service: "model-downloader".into(),
            api_service: "marker-api".into(),
            web_service: "marker-web".into(),
            api_port: 8000,
            web_port: 8501,
            skip_download: false,
            with_web: false,
            keep_running: false,
            health_attempts: 12,
            health_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(3),
            manifest: default_manifest(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for DeployConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployConfig")
            .field("project_dir", &self.project_dir)
            .field("compose_file", &self.compose_file)
            .field("project_name", &self.project_name)
            .field("models_dir", &self.models_dir)
            .field("skip_download", &self.skip_download)
            .field("with_web", &self.with_web)
            .field("keep_running", &self.keep_running)
            .field("health_attempts", &self.health_attempts)
            .field("health_interval", &self.health_interval)
            .field("manifest", &self.manifest.len())
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn DeployProgressCallback>"),
            )
            .finish()
    }
}

impl DeployConfig {
    /// Create a new builder for `DeployConfig`.
    pub fn builder() -> DeployConfigBuilder {
        DeployConfigBuilder {
            config: Self::default(),
        }
    }

    /// Resolve `path` against the project directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    /// Absolute-or-project-relative compose file path.
    pub fn compose_path(&self) -> PathBuf {
        self.resolve(&self.compose_file)
    }

    /// Host models directory.
    pub fn models_path(&self) -> PathBuf {
        self.resolve(&self.models_dir)
    }

    /// Location of the Phase 1 sentinel.
    pub fn sentinel_path(&self) -> PathBuf {
        self.models_path().join(SENTINEL_FILE)
    }

    /// Location of the pipeline config file.
    pub fn pipeline_config_path(&self) -> PathBuf {
        self.resolve(&self.pipeline_config)
    }

    /// Profiles brought up by this run, in start order.
    pub fn serving_profiles(&self) -> Vec<&str> {
        let mut profiles = vec![self.production_profile.as_str()];
        if self.with_web {
            profiles.push(self.web_profile.as_str());
        }
        profiles
    }

    /// Every profile this tool knows about.
    pub fn all_profiles(&self) -> Vec<&str> {
        vec![
            self.download_profile.as_str(),
            self.production_profile.as_str(),
            self.web_profile.as_str(),
        ]
    }
}

/// Builder for [`DeployConfig`].
#[derive(Debug)]
pub struct DeployConfigBuilder {
    config: DeployConfig,
}

impl DeployConfigBuilder {
    pub fn project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.project_dir = dir.into();
        self
    }

    pub fn compose_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.config.compose_file = file.into();
        self
    }

    pub fn project_name(mut self, name: impl Into<String>) -> Self {
        self.config.project_name = Some(name.into());
        self
    }

    pub fn models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.models_dir = dir.into();
        self
    }

    pub fn data_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.config.data_dirs = dirs;
        self
    }

    pub fn pipeline_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pipeline_config = path.into();
        self
    }

    pub fn download_service(mut self, name: impl Into<String>) -> Self {
        self.config.download_service = name.into();
        self
    }

    pub fn api_service(mut self, name: impl Into<String>) -> Self {
        self.config.api_service = name.into();
        self
    }

    pub fn web_service(mut self, name: impl Into<String>) -> Self {
        self.config.web_service = name.into();
        self
    }

    pub fn api_port(mut self, port: u16) -> Self {
        self.config.api_port = port;
        self
    }

    pub fn web_port(mut self, port: u16) -> Self {
        self.config.web_port = port;
        self
    }

    pub fn skip_download(mut self, v: bool) -> Self {
        self.config.skip_download = v;
        self
    }

    pub fn with_web(mut self, v: bool) -> Self {
        self.config.with_web = v;
        self
    }

    pub fn keep_running(mut self, v: bool) -> Self {
        self.config.keep_running = v;
        self
    }

    pub fn health_attempts(mut self, n: u32) -> Self {
        self.config.health_attempts = n;
        self
    }

    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.config.health_interval = interval;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe_timeout = timeout;
        self
    }

    pub fn manifest(mut self, manifest: Vec<ModelSpec>) -> Self {
        self.config.manifest = manifest;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DeployConfig, DeployError> {
        let c = &self.config;
        if c.health_attempts == 0 {
            return Err(DeployError::InvalidConfig(
                "health attempts must be ≥ 1".into(),
            ));
        }
        if c.api_port == 0 || c.web_port == 0 {
            return Err(DeployError::InvalidConfig("ports must be non-zero".into()));
        }
        if c.api_port == c.web_port {
            return Err(DeployError::InvalidConfig(format!(
                "API and web UI cannot share port {}",
                c.api_port
            )));
        }
        let names = [
            ("download profile", &c.download_profile),
            ("production profile", &c.production_profile),
            ("web profile", &c.web_profile),
            ("download service", &c.download_service),
            ("API service", &c.api_service),
            ("web service", &c.web_service),
        ];
        for (what, value) in names {
            if value.trim().is_empty() {
                return Err(DeployError::InvalidConfig(format!("{what} must not be empty")));
            }
        }
        if c.manifest.is_empty() {
            return Err(DeployError::InvalidConfig(
                "model manifest must list at least one model".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_two_phase_layout() {
        let c = DeployConfig::default();
        assert_eq!(c.health_attempts, 12);
        assert_eq!(c.health_interval, Duration::from_secs(5));
        assert_eq!(c.api_port, 8000);
        assert_eq!(c.web_port, 8501);
        assert_eq!(c.sentinel_path(), PathBuf::from("./models/.models_downloaded"));
        assert_eq!(c.serving_profiles(), vec!["production"]);
    }

    #[test]
    fn web_adds_profile() {
        let c = DeployConfig::builder().with_web(true).build().unwrap();
        assert_eq!(c.serving_profiles(), vec!["production", "web"]);
    }

    #[test]
    fn absolute_paths_are_kept() {
        let c = DeployConfig::builder()
            .project_dir("/srv/marker")
            .models_dir("/mnt/models")
            .build()
            .unwrap();
        assert_eq!(c.models_path(), PathBuf::from("/mnt/models"));
        assert_eq!(c.compose_path(), PathBuf::from("/srv/marker/docker-compose.yml"));
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = DeployConfig::builder().health_attempts(0).build().unwrap_err();
        assert!(err.to_string().contains("health attempts"));
    }

    #[test]
    fn shared_port_rejected() {
        let err = DeployConfig::builder()
            .api_port(9000)
            .web_port(9000)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("9000"));
    }

    #[test]
    fn empty_manifest_rejected() {
        assert!(DeployConfig::builder().manifest(vec![]).build().is_err());
    }

    #[test]
    fn blank_service_rejected() {
        let err = DeployConfig::builder().api_service(" ").build().unwrap_err();
        assert!(err.to_string().contains("API service"));
    }
}
