//! Prerequisite checks: Docker CLI, Docker daemon, Compose.
//!
//! Nothing else runs until these pass. The Compose flavour detected here is
//! used for every later compose invocation.

use crate::compose::{CommandRunner, ComposeFlavor};
use crate::error::DeployError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

static VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"v?(\d+\.\d+(?:\.\d+)?)").unwrap());

const DOCKER_HINT: &str = "Install Docker: https://docs.docker.com/get-docker/";
const COMPOSE_HINT: &str =
    "Install the Compose plugin (or standalone docker-compose): https://docs.docker.com/compose/install/";

/// What the prerequisite phase found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prerequisites {
    pub docker_version: Option<String>,
    pub server_version: Option<String>,
    pub compose_flavor: ComposeFlavor,
    pub compose_version: Option<String>,
}

/// First `x.y[.z]` version number in `text`.
pub fn parse_version(text: &str) -> Option<String> {
    VERSION.captures(text).map(|c| c[1].to_string())
}

fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Verify that Docker and Compose are usable.
///
/// # Errors
/// * [`DeployError::MissingPrerequisite`] — `docker` or Compose is not installed
/// * [`DeployError::DaemonUnavailable`] — the daemon does not answer `docker info`
pub async fn check_prerequisites(runner: &dyn CommandRunner) -> Result<Prerequisites, DeployError> {
    let docker = match runner.output("docker", &argv(&["--version"])).await {
        Ok(out) if out.success() => out,
        Ok(out) => {
            return Err(DeployError::MissingPrerequisite {
                program: "docker".into(),
                hint: format!("`docker --version` failed: {}\n{DOCKER_HINT}", out.stderr.trim()),
            })
        }
        Err(DeployError::Spawn { .. }) => {
            return Err(DeployError::MissingPrerequisite {
                program: "docker".into(),
                hint: DOCKER_HINT.into(),
            })
        }
        Err(e) => return Err(e),
    };
    let docker_version = parse_version(&docker.stdout);
    debug!(version = ?docker_version, "Docker CLI found");

    let info = runner
        .output("docker", &argv(&["info", "--format", "{{.ServerVersion}}"]))
        .await?;
    if !info.success() {
        let detail = info.stderr.trim();
        return Err(DeployError::DaemonUnavailable {
            detail: if detail.is_empty() {
                format!("`docker info` exited with status {}", info.code)
            } else {
                detail.to_string()
            },
        });
    }
    let server_version = parse_version(&info.stdout);

    let (compose_flavor, compose_version) = detect_compose(runner).await?;
    info!(
        docker = ?docker_version,
        server = ?server_version,
        compose = compose_flavor.program(),
        compose_version = ?compose_version,
        "Prerequisites satisfied"
    );

    Ok(Prerequisites {
        docker_version,
        server_version,
        compose_flavor,
        compose_version,
    })
}

/// Prefer the `docker compose` plugin; fall back to standalone `docker-compose`.
async fn detect_compose(
    runner: &dyn CommandRunner,
) -> Result<(ComposeFlavor, Option<String>), DeployError> {
    match runner.output("docker", &argv(&["compose", "version"])).await {
        Ok(out) if out.success() => return Ok((ComposeFlavor::Plugin, parse_version(&out.stdout))),
        Ok(out) => debug!(code = out.code, "docker compose plugin unavailable"),
        Err(e) => debug!("docker compose plugin unavailable: {e}"),
    }

    match runner.output("docker-compose", &argv(&["--version"])).await {
        Ok(out) if out.success() => Ok((ComposeFlavor::Standalone, parse_version(&out.stdout))),
        Ok(_) | Err(DeployError::Spawn { .. }) => Err(DeployError::MissingPrerequisite {
            program: "docker compose".into(),
            hint: COMPOSE_HINT.into(),
        }),
        Err(e) => Err(e),
    }
}
