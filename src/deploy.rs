//! Deployment entry points.
//!
//! [`deploy`] runs every phase once, in order, and always finishes with the
//! cleanup step. [`status`] and [`down`] are the standalone operator
//! commands for an already-deployed stack.

use crate::compose::{CommandRunner, Compose};
use crate::config::DeployConfig;
use crate::error::DeployError;
use crate::output::{DeploySummary, PhaseRecord};
use crate::pipeline::status::StatusReport;
use crate::pipeline::{build, cleanup, download, prereq, serve, setup, status as status_phase, verify};
use crate::progress::{callback_or_noop, ProgressCallback};
use crate::Phase;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;
use tracing::{error, info, warn};

/// Run a full two-phase deployment.
///
/// Ctrl-C aborts the current phase with [`DeployError::Interrupted`]; the
/// cleanup step still runs.
///
/// # Errors
/// Returns the first fatal error of any phase. Services that did not become
/// ready are not an error: see [`DeploySummary::unready_services`].
pub async fn deploy(
    config: &DeployConfig,
    runner: Arc<dyn CommandRunner>,
) -> Result<DeploySummary, DeployError> {
    deploy_until(config, runner, async {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Ctrl-C handler unavailable; interrupts will not trigger cleanup");
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// [`deploy`] with a caller-supplied interrupt signal instead of Ctrl-C.
pub async fn deploy_until(
    config: &DeployConfig,
    runner: Arc<dyn CommandRunner>,
    interrupt: impl Future<Output = ()>,
) -> Result<DeploySummary, DeployError> {
    let progress = callback_or_noop(config.progress_callback.as_ref());
    let plan = Phase::plan(config);
    info!(phases = plan.len(), skip_download = config.skip_download, with_web = config.with_web, "Starting deployment");
    progress.on_deploy_start(&plan);

    let run = Run {
        config,
        runner,
        progress: progress.clone(),
        compose: OnceLock::new(),
        current: Mutex::new(Phase::Prerequisites),
    };

    let result = tokio::select! {
        result = run.execute() => result,
        _ = interrupt => {
            let phase = run.current_phase();
            warn!(%phase, "Interrupted");
            progress.on_phase_error(phase, "interrupted");
            Err(DeployError::Interrupted { phase })
        }
    };

    // Compose is only known once prerequisites passed; before that nothing
    // can have been started.
    if let Some(compose) = run.compose.get() {
        cleanup::teardown(compose, config, result.is_ok()).await;
    }

    match &result {
        Ok(summary) => info!(
            duration_ms = summary.total_duration_ms,
            unready = summary.unready_services().len(),
            "Deployment complete"
        ),
        Err(e) => error!("Deployment failed: {e}"),
    }
    progress.on_deploy_complete(result.is_ok());
    result
}

/// Status report for the profiles `config` would serve.
pub async fn status(
    config: &DeployConfig,
    runner: Arc<dyn CommandRunner>,
) -> Result<StatusReport, DeployError> {
    let found = prereq::check_prerequisites(runner.as_ref()).await?;
    let compose = Compose::new(runner, found.compose_flavor, config);
    Ok(status_phase::collect(&compose, config).await)
}

/// Stop and remove every service of every profile.
pub async fn down(config: &DeployConfig, runner: Arc<dyn CommandRunner>) -> Result<(), DeployError> {
    let found = prereq::check_prerequisites(runner.as_ref()).await?;
    let compose = Compose::new(runner, found.compose_flavor, config);
    cleanup::shutdown(&compose, config).await
}

struct Run<'a> {
    config: &'a DeployConfig,
    runner: Arc<dyn CommandRunner>,
    progress: ProgressCallback,
    compose: OnceLock<Compose>,
    current: Mutex<Phase>,
}

fn never_skipped<T>(_: &T) -> Option<&'static str> {
    None
}

impl Run<'_> {
    fn current_phase(&self) -> Phase {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one phase: bookkeeping, progress events and timing around `work`.
    async fn phase<T>(
        &self,
        phase: Phase,
        records: &mut Vec<PhaseRecord>,
        work: impl Future<Output = Result<T, DeployError>>,
        skipped_when: fn(&T) -> Option<&'static str>,
    ) -> Result<T, DeployError> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = phase;
        info!(%phase, "Phase started");
        self.progress.on_phase_start(phase);
        let start = Instant::now();

        match work.await {
            Ok(value) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                let skip = skipped_when(&value);
                match skip {
                    Some(reason) => {
                        info!(%phase, reason, "Phase skipped");
                        self.progress.on_phase_skipped(phase, reason);
                    }
                    None => {
                        info!(%phase, duration_ms, "Phase complete");
                        self.progress.on_phase_complete(phase, duration_ms);
                    }
                }
                records.push(PhaseRecord {
                    phase,
                    duration_ms,
                    skipped: skip.is_some(),
                });
                Ok(value)
            }
            Err(e) => {
                error!(%phase, "{e}");
                self.progress.on_phase_error(phase, &e.to_string());
                Err(e)
            }
        }
    }

    async fn execute(&self) -> Result<DeploySummary, DeployError> {
        let config = self.config;
        let progress = self.progress.as_ref();
        let started = Instant::now();
        let mut summary = DeploySummary::default();
        let records = &mut summary.phases;

        // ── Prerequisites ────────────────────────────────────────────────
        let found = self
            .phase(
                Phase::Prerequisites,
                records,
                prereq::check_prerequisites(self.runner.as_ref()),
                never_skipped,
            )
            .await?;
        let compose = self
            .compose
            .get_or_init(|| Compose::new(self.runner.clone(), found.compose_flavor, config));

        // ── Directories ──────────────────────────────────────────────────
        let setup = self
            .phase(Phase::Directories, records, setup::prepare_directories(config), never_skipped)
            .await?;

        // ── Build ────────────────────────────────────────────────────────
        self.phase(Phase::Build, records, build::build_images(compose, config), never_skipped)
            .await?;

        // ── Phase 1: download ────────────────────────────────────────────
        let downloaded = self
            .phase(
                Phase::Download,
                records,
                download::run_download_phase(compose, config),
                download::DownloadOutcome::skip_reason,
            )
            .await?;

        // ── Verify (exactly once, before anything starts offline) ────────
        let models = self
            .phase(Phase::Verify, records, verify::verify_models(config), never_skipped)
            .await?;

        // ── Phase 2: production, then optional web UI ────────────────────
        let api = self
            .phase(
                Phase::Production,
                records,
                serve::start_production(compose, config, progress),
                never_skipped,
            )
            .await?;
        let mut health = vec![api];

        if config.with_web {
            let web = self
                .phase(
                    Phase::WebInterface,
                    records,
                    serve::start_web(compose, config, progress),
                    never_skipped,
                )
                .await?;
            health.push(web);
        }

        // ── Status ───────────────────────────────────────────────────────
        let report = self
            .phase(
                Phase::Status,
                records,
                async { Ok(status_phase::collect(compose, config).await) },
                never_skipped,
            )
            .await?;

        summary.prerequisites = Some(found);
        summary.setup = Some(setup);
        summary.download = Some(downloaded);
        summary.models = Some(models);
        summary.health = health;
        summary.status = Some(report);
        summary.total_duration_ms = started.elapsed().as_millis() as u64;
        Ok(summary)
    }
}
