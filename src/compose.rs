//! Docker Compose invocation.
//!
//! All subprocesses go through the [`CommandRunner`] trait. Production code
//! uses [`SystemRunner`]; tests substitute a scripted runner and assert on
//! the exact command lines the orchestrator would have executed.
//!
//! [`Compose`] knows how to spell a command for either Compose flavour
//! (`docker compose` plugin or standalone `docker-compose`) and always
//! passes the compose file, the project name and the requested profiles.

use crate::config::DeployConfig;
use crate::error::DeployError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tracing::debug;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `-1` if the process was killed by a signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Executes external programs.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion, capturing stdout and stderr.
    async fn output(&self, program: &str, args: &[String]) -> Result<CommandOutput, DeployError>;

    /// Run to completion with the terminal attached (build logs, download
    /// output). Returns the exit code.
    async fn status(&self, program: &str, args: &[String]) -> Result<i32, DeployError>;
}

/// Runs real processes via `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn output(&self, program: &str, args: &[String]) -> Result<CommandOutput, DeployError> {
        debug!(program, ?args, "exec (captured)");
        let out = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| DeployError::Spawn {
                program: program.to_string(),
                source,
            })?;
        Ok(CommandOutput {
            code: out.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }

    async fn status(&self, program: &str, args: &[String]) -> Result<i32, DeployError> {
        debug!(program, ?args, "exec (attached)");
        let status = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| DeployError::Spawn {
                program: program.to_string(),
                source,
            })?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// Which Compose executable is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComposeFlavor {
    /// `docker compose` (v2 CLI plugin).
    Plugin,
    /// `docker-compose` (standalone binary).
    Standalone,
}

impl ComposeFlavor {
    pub fn program(self) -> &'static str {
        match self {
            ComposeFlavor::Plugin => "docker",
            ComposeFlavor::Standalone => "docker-compose",
        }
    }
}

/// Container state as reported by `docker inspect --format '{{json .State}}'`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub health: Option<ContainerHealth>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerHealth {
    #[serde(default)]
    pub status: String,
}

/// A Compose project bound to one compose file.
#[derive(Clone)]
pub struct Compose {
    runner: Arc<dyn CommandRunner>,
    flavor: ComposeFlavor,
    file: PathBuf,
    project_name: Option<String>,
}

impl Compose {
    pub fn new(runner: Arc<dyn CommandRunner>, flavor: ComposeFlavor, config: &DeployConfig) -> Self {
        Self {
            runner,
            flavor,
            file: config.compose_path(),
            project_name: config.project_name.clone(),
        }
    }

    pub fn flavor(&self) -> ComposeFlavor {
        self.flavor
    }

    /// Full argument list (after the program name) for a compose subcommand.
    pub fn args(&self, profiles: &[&str], subcommand: &[&str]) -> Vec<String> {
        let mut args = Vec::new();
        if self.flavor == ComposeFlavor::Plugin {
            args.push("compose".to_string());
        }
        args.push("-f".to_string());
        args.push(self.file.display().to_string());
        if let Some(ref name) = self.project_name {
            args.push("-p".to_string());
            args.push(name.clone());
        }
        for profile in profiles {
            args.push("--profile".to_string());
            args.push((*profile).to_string());
        }
        args.extend(subcommand.iter().map(|s| s.to_string()));
        args
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} {}", self.flavor.program(), args.join(" "))
    }

    /// Run attached; a non-zero exit becomes [`DeployError::CommandFailed`].
    async fn attached(&self, profiles: &[&str], subcommand: &[&str]) -> Result<(), DeployError> {
        let args = self.args(profiles, subcommand);
        let code = self.runner.status(self.flavor.program(), &args).await?;
        if code != 0 {
            return Err(DeployError::CommandFailed {
                command: self.describe(&args),
                code,
                stderr: "see output above".into(),
            });
        }
        Ok(())
    }

    /// Run captured; a non-zero exit becomes [`DeployError::CommandFailed`].
    async fn captured(&self, profiles: &[&str], subcommand: &[&str]) -> Result<String, DeployError> {
        let args = self.args(profiles, subcommand);
        let out = self.runner.output(self.flavor.program(), &args).await?;
        if !out.success() {
            return Err(DeployError::CommandFailed {
                command: self.describe(&args),
                code: out.code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(out.stdout)
    }

    pub async fn build(&self, profiles: &[&str]) -> Result<(), DeployError> {
        self.attached(profiles, &["build"]).await
    }

    /// Run a one-off container of `service` and remove it afterwards.
    pub async fn run_once(&self, profile: &str, service: &str) -> Result<(), DeployError> {
        self.attached(&[profile], &["run", "--rm", service]).await
    }

    /// Start every service of `profiles` in the background.
    pub async fn up(&self, profiles: &[&str]) -> Result<(), DeployError> {
        self.attached(profiles, &["up", "-d"]).await
    }

    pub async fn down(&self, profiles: &[&str]) -> Result<(), DeployError> {
        self.captured(profiles, &["down", "--remove-orphans"]).await.map(drop)
    }

    /// Stop and remove any container left over from `service`.
    pub async fn remove(&self, profile: &str, service: &str) -> Result<(), DeployError> {
        self.captured(&[profile], &["rm", "--force", "--stop", service])
            .await
            .map(drop)
    }

    /// Human-readable `ps` table for `profiles`.
    pub async fn ps(&self, profiles: &[&str]) -> Result<String, DeployError> {
        self.captured(profiles, &["ps"]).await
    }

    /// Id of the running container of `service`, if any.
    pub async fn container_id(&self, profile: &str, service: &str) -> Result<Option<String>, DeployError> {
        let out = self.captured(&[profile], &["ps", "-q", service]).await?;
        Ok(out
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string))
    }

    /// `docker inspect` state of a container.
    pub async fn inspect_state(&self, container_id: &str) -> Result<ContainerState, DeployError> {
        let args: Vec<String> = ["inspect", "--format", "{{json .State}}", container_id]
            .into_iter()
            .map(String::from)
            .collect();
        let out = self.runner.output("docker", &args).await?;
        if !out.success() {
            return Err(DeployError::CommandFailed {
                command: format!("docker {}", args.join(" ")),
                code: out.code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        serde_json::from_str(out.stdout.trim())
            .map_err(|e| DeployError::Internal(format!("unexpected docker inspect output: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compose(flavor: ComposeFlavor, project: Option<&str>) -> Compose {
        let mut builder = DeployConfig::builder().project_dir("/srv/marker");
        if let Some(p) = project {
            builder = builder.project_name(p);
        }
        Compose::new(Arc::new(SystemRunner), flavor, &builder.build().unwrap())
    }

    #[test]
    fn plugin_args_include_subcommand_prefix() {
        let c = compose(ComposeFlavor::Plugin, Some("marker"));
        assert_eq!(
            c.args(&["download"], &["run", "--rm", "model-downloader"]),
            vec![
                "compose", "-f", "/srv/marker/docker-compose.yml", "-p", "marker",
                "--profile", "download", "run", "--rm", "model-downloader"
            ]
        );
    }

    #[test]
    fn standalone_args_have_no_prefix() {
        let c = compose(ComposeFlavor::Standalone, None);
        assert_eq!(
            c.args(&["production", "web"], &["up", "-d"]),
            vec![
                "-f", "/srv/marker/docker-compose.yml", "--profile", "production",
                "--profile", "web", "up", "-d"
            ]
        );
        assert_eq!(c.flavor().program(), "docker-compose");
    }

    #[test]
    fn container_state_parses_with_and_without_health() {
        let healthy: ContainerState = serde_json::from_str(
            r#"{"Status":"running","Running":true,"Health":{"Status":"healthy","FailingStreak":0}}"#,
        )
        .unwrap();
        assert_eq!(healthy.health.unwrap().status, "healthy");

        let plain: ContainerState =
            serde_json::from_str(r#"{"Status":"exited","Running":false,"ExitCode":1}"#).unwrap();
        assert!(!plain.running);
        assert!(plain.health.is_none());
    }

    #[test]
    fn system_runner_reports_missing_program() {
        let err = tokio_test::block_on(
            SystemRunner.output("definitely-not-a-real-binary-4f2a", &[]),
        )
        .unwrap_err();
        assert!(matches!(err, DeployError::Spawn { .. }));
    }
}
