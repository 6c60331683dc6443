//! Readiness polling for a started service.
//!
//! A service is ready when its container reports `healthy`, or when it is
//! running and defines no healthcheck. The poll runs at most `attempts`
//! checks spaced by `interval`, with no wait after the last one. Running
//! out of checks is not an error: the run continues with a warning.

use crate::compose::{Compose, ContainerState};
use crate::progress::DeployProgressCallback;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What one readiness check observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HealthState {
    /// Healthcheck passing.
    Healthy,
    /// Running without a healthcheck.
    Running,
    /// Healthcheck still in its start period.
    Starting,
    /// Healthcheck failing.
    Unhealthy,
    /// No running container (not created yet, exited, restarting…).
    NotRunning { status: String },
    /// The check itself failed.
    Unknown { detail: String },
}

impl HealthState {
    pub fn is_ready(&self) -> bool {
        matches!(self, HealthState::Healthy | HealthState::Running)
    }

    /// Classify `docker inspect` output.
    pub fn from_container(state: &ContainerState) -> Self {
        if !state.running {
            let status = if state.status.is_empty() {
                "stopped".to_string()
            } else {
                state.status.clone()
            };
            return HealthState::NotRunning { status };
        }
        match state.health.as_ref().map(|h| h.status.as_str()) {
            Some("healthy") => HealthState::Healthy,
            Some("starting") => HealthState::Starting,
            Some("unhealthy") => HealthState::Unhealthy,
            _ => HealthState::Running,
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Healthy => f.write_str("healthy"),
            HealthState::Running => f.write_str("running"),
            HealthState::Starting => f.write_str("starting"),
            HealthState::Unhealthy => f.write_str("unhealthy"),
            HealthState::NotRunning { status } => write!(f, "not running ({status})"),
            HealthState::Unknown { detail } => write!(f, "unknown ({detail})"),
        }
    }
}

/// Result of polling one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthOutcome {
    pub service: String,
    pub ready: bool,
    /// Number of checks performed.
    pub attempts: u32,
    pub last_state: HealthState,
}

/// Inspect the current state of `service`.
pub async fn probe(compose: &Compose, profile: &str, service: &str) -> HealthState {
    let id = match compose.container_id(profile, service).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            return HealthState::NotRunning {
                status: "no container".into(),
            }
        }
        Err(e) => {
            return HealthState::Unknown {
                detail: e.to_string(),
            }
        }
    };
    match compose.inspect_state(&id).await {
        Ok(state) => HealthState::from_container(&state),
        Err(e) => HealthState::Unknown {
            detail: e.to_string(),
        },
    }
}

/// Poll `service` until ready or until `attempts` checks have been made.
pub async fn wait_until_ready(
    compose: &Compose,
    profile: &str,
    service: &str,
    attempts: u32,
    interval: Duration,
    progress: &dyn DeployProgressCallback,
) -> HealthOutcome {
    let attempts = attempts.max(1);
    let mut last_state = HealthState::Unknown {
        detail: "not checked".into(),
    };

    for attempt in 1..=attempts {
        last_state = probe(compose, profile, service).await;
        progress.on_health_check(service, attempt, attempts, &last_state);

        if last_state.is_ready() {
            info!(service, attempt, state = %last_state, "Service ready");
            return HealthOutcome {
                service: service.to_string(),
                ready: true,
                attempts: attempt,
                last_state,
            };
        }
        debug!(service, attempt, max = attempts, state = %last_state, "Service not ready yet");

        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }

    warn!(
        service,
        attempts,
        state = %last_state,
        "Service did not report ready; continuing. Check `docker compose logs {}`",
        service
    );
    HealthOutcome {
        service: service.to_string(),
        ready: false,
        attempts,
        last_state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{CommandOutput, CommandRunner, ComposeFlavor, ContainerHealth};
    use crate::config::DeployConfig;
    use crate::error::DeployError;
    use crate::progress::NoopProgressCallback;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// Answers every inspect with `inspect` and records when each one ran.
    struct StaticInspect {
        inspect: &'static str,
        checks: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl CommandRunner for StaticInspect {
        async fn output(&self, program: &str, args: &[String]) -> Result<CommandOutput, DeployError> {
            let stdout = if program == "docker" && args.first().map(String::as_str) == Some("inspect") {
                self.checks.lock().unwrap().push(Instant::now());
                self.inspect.to_string()
            } else {
                "0123abcd\n".to_string()
            };
            Ok(CommandOutput {
                code: 0,
                stdout,
                stderr: String::new(),
            })
        }

        async fn status(&self, _program: &str, _args: &[String]) -> Result<i32, DeployError> {
            Ok(0)
        }
    }

    fn compose_with(inspect: &'static str) -> (Compose, Arc<StaticInspect>) {
        let runner = Arc::new(StaticInspect {
            inspect,
            checks: Mutex::new(Vec::new()),
        });
        let compose = Compose::new(runner.clone(), ComposeFlavor::Plugin, &DeployConfig::default());
        (compose, runner)
    }

    fn state(running: bool, health: Option<&str>) -> ContainerState {
        ContainerState {
            status: if running { "running" } else { "exited" }.into(),
            running,
            health: health.map(|h| ContainerHealth { status: h.into() }),
        }
    }

    #[test]
    fn healthcheck_states() {
        assert_eq!(HealthState::from_container(&state(true, Some("healthy"))), HealthState::Healthy);
        assert_eq!(HealthState::from_container(&state(true, Some("starting"))), HealthState::Starting);
        assert_eq!(
            HealthState::from_container(&state(true, Some("unhealthy"))),
            HealthState::Unhealthy
        );
    }

    #[test]
    fn running_without_healthcheck_is_ready() {
        let s = HealthState::from_container(&state(true, None));
        assert_eq!(s, HealthState::Running);
        assert!(s.is_ready());
    }

    #[test]
    fn exited_container_is_not_ready() {
        let s = HealthState::from_container(&state(false, Some("healthy")));
        assert_eq!(
            s,
            HealthState::NotRunning {
                status: "exited".into()
            }
        );
        assert!(!s.is_ready());
    }

    #[test]
    fn display_is_lowercase() {
        assert_eq!(HealthState::Starting.to_string(), "starting");
        assert_eq!(
            HealthState::NotRunning {
                status: "restarting".into()
            }
            .to_string(),
            "not running (restarting)"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_poll_waits_between_checks_only() {
        let (compose, runner) =
            compose_with(r#"{"Status":"running","Running":true,"Health":{"Status":"starting"}}"#);
        let started = Instant::now();

        let outcome = wait_until_ready(
            &compose,
            "production",
            "marker-api",
            12,
            Duration::from_secs(5),
            &NoopProgressCallback,
        )
        .await;

        assert!(!outcome.ready);
        assert_eq!(outcome.attempts, 12);
        assert_eq!(outcome.last_state, HealthState::Starting);
        assert_eq!(started.elapsed(), Duration::from_secs(55));

        let checks = runner.checks.lock().unwrap().clone();
        assert_eq!(checks.len(), 12);
        for pair in checks.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ready_on_first_check_does_not_wait() {
        let (compose, _runner) =
            compose_with(r#"{"Status":"running","Running":true,"Health":{"Status":"healthy"}}"#);
        let started = Instant::now();

        let outcome = wait_until_ready(
            &compose,
            "production",
            "marker-api",
            12,
            Duration::from_secs(5),
            &NoopProgressCallback,
        )
        .await;

        assert!(outcome.ready);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
