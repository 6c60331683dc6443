//! CLI binary for marker-deploy.
//!
//! A thin shim over the library crate that maps CLI flags to `DeployConfig`
//! and prints results. Without a subcommand it runs the full two-phase
//! deployment.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use marker_deploy::marker_config::ProcessorKind;
use marker_deploy::models::{download_all, verify_all};
use marker_deploy::{
    default_manifest, deploy, down, status, DeployConfig, DeployProgressCallback, DeploySummary,
    HealthState, MarkerConfig, ModelSpec, Phase, ProgressCallback, StatusReport, SystemRunner,
    VerificationReport, SENTINEL_FILE,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one spinner per phase, one byte bar per model file.
///
/// Build and download stream container output to the terminal, so those
/// phases get a header line instead of a spinner.
#[derive(Default)]
struct CliProgressCallback {
    spinner: Mutex<Option<ProgressBar>>,
    model_bar: Mutex<Option<ProgressBar>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn start_spinner(&self, prefix: &str, msg: &str) {
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        let bar = ProgressBar::new_spinner();
        bar.set_style(style);
        bar.set_prefix(prefix.to_string());
        bar.set_message(msg.to_string());
        bar.enable_steady_tick(Duration::from_millis(80));
        *self.spinner.lock().unwrap() = Some(bar);
    }

    fn stop_spinner(&self) {
        if let Some(bar) = self.spinner.lock().unwrap().take() {
            bar.finish_and_clear();
        }
    }

    /// Print above the spinner if one is active.
    fn println(&self, line: String) {
        match self.spinner.lock().unwrap().as_ref() {
            Some(bar) => bar.println(line),
            None => eprintln!("{line}"),
        }
    }
}

impl DeployProgressCallback for CliProgressCallback {
    fn on_deploy_start(&self, phases: &[Phase]) {
        eprintln!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Deploying marker ({} phases)", phases.len()))
        );
    }

    fn on_phase_start(&self, phase: Phase) {
        match phase {
            Phase::Build | Phase::Download => {
                eprintln!("{} {}", cyan("▸"), bold(phase.label()));
            }
            _ => self.start_spinner(phase.label(), "…"),
        }
    }

    fn on_phase_complete(&self, phase: Phase, duration_ms: u64) {
        self.stop_spinner();
        eprintln!(
            "  {} {:<14} {}",
            green("✓"),
            phase.label(),
            dim(&format!("{:.1}s", duration_ms as f64 / 1000.0)),
        );
    }

    fn on_phase_skipped(&self, phase: Phase, reason: &str) {
        self.stop_spinner();
        eprintln!("  {} {:<14} {}", dim("–"), phase.label(), dim(reason));
    }

    fn on_phase_error(&self, phase: Phase, error: &str) {
        self.stop_spinner();
        self.errors.fetch_add(1, Ordering::SeqCst);
        let first_line = error.lines().next().unwrap_or(error);
        eprintln!("  {} {:<14} {}", red("✗"), phase.label(), red(first_line));
    }

    fn on_health_check(&self, service: &str, attempt: u32, max: u32, state: &HealthState) {
        if let Some(bar) = self.spinner.lock().unwrap().as_ref() {
            bar.set_message(format!("{service}: {state} (check {attempt}/{max})"));
        }
        if !state.is_ready() && attempt == max {
            self.println(format!(
                "  {} {service} not ready after {max} checks ({state}); continuing",
                yellow("⚠"),
            ));
        }
    }

    fn on_model_start(&self, name: &str, repo_id: &str) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:32.green/238}] {bytes}/{total_bytes}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        let bar = ProgressBar::new(0);
        bar.set_style(style);
        bar.set_prefix(name.to_string());
        bar.set_message(repo_id.to_string());
        bar.enable_steady_tick(Duration::from_millis(80));
        *self.model_bar.lock().unwrap() = Some(bar);
    }

    fn on_model_progress(&self, _name: &str, file: &str, downloaded: u64, total: Option<u64>) {
        if let Some(bar) = self.model_bar.lock().unwrap().as_ref() {
            if let Some(t) = total {
                if bar.length().unwrap_or(0) != t {
                    bar.set_length(t);
                }
            }
            bar.set_position(downloaded);
            bar.set_message(file.to_string());
        }
    }

    fn on_model_complete(&self, name: &str, error: Option<&str>) {
        if let Some(bar) = self.model_bar.lock().unwrap().take() {
            bar.finish_and_clear();
        }
        match error {
            None => eprintln!("  {} {name}", green("✓")),
            Some(e) => {
                self.errors.fetch_add(1, Ordering::SeqCst);
                eprintln!("  {} {}", red("✗"), red(e));
            }
        }
    }

    fn on_deploy_complete(&self, success: bool) {
        self.stop_spinner();
        if success {
            eprintln!("{} {}", green("✔"), bold("Deployment complete"));
        } else {
            eprintln!("{} {}", red("✘"), bold("Deployment failed"));
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Full deployment: download models, verify, start the offline API,
  # report status, then tear every profile down
  marker-deploy

  # Same, but leave the API running afterwards
  marker-deploy --keep-running

  # Reuse models from an earlier run and add the web UI
  marker-deploy --skip-download --with-web

  # Show service status and endpoint reachability
  marker-deploy status

  # Stop everything
  marker-deploy down

  # Inside the image (Phase 1 downloader)
  marker-deploy models download --models-dir /app/models

  # Check a pipeline config and list the processors it enables
  marker-deploy config check config/marker_config.json
  marker-deploy config processors config/marker_config.json

PHASES:
  prerequisites → directories → build → download → verify → production → [web] → status

  Phase 1 runs the model-downloader service once with network access and
  writes models/.models_downloaded. Phase 2 starts marker-api with
  HF_HUB_OFFLINE=1 against the verified models. On exit, successful or
  not, all profiles are brought down unless --keep-running is given.

ENVIRONMENT VARIABLES:
  MARKER_DEPLOY_*     Every flag (e.g. MARKER_DEPLOY_SKIP_DOWNLOAD=true)
  MARKER_MODELS_DIR   Models directory for `models download|verify`
  HF_ENDPOINT         Model hub base URL (default https://huggingface.co)
  HF_TOKEN            Bearer token for gated or private models
  HF_HUB_OFFLINE      Refuse hub downloads when set to 1
  RUST_LOG            Log filter (overrides -v / -q)
"#;

/// Two-phase Docker deployment for the marker PDF pipeline.
#[derive(Parser, Debug)]
#[command(
    name = "marker-deploy",
    version,
    about = "Two-phase Docker deployment for the marker PDF pipeline",
    long_about = "Download marker's models once with network access, verify them, then run \
the marker API (and optionally its web UI) in network-restricted containers.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    deploy: DeployArgs,

    /// Output structured JSON instead of text.
    #[arg(long, global = true, env = "MARKER_DEPLOY_JSON")]
    json: bool,

    /// Disable progress output.
    #[arg(long, global = true, env = "MARKER_DEPLOY_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "MARKER_DEPLOY_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "MARKER_DEPLOY_QUIET")]
    quiet: bool,
}

#[derive(Args, Debug)]
struct DeployArgs {
    /// Reuse previously downloaded models (the sentinel must exist).
    #[arg(long, env = "MARKER_DEPLOY_SKIP_DOWNLOAD")]
    skip_download: bool,

    /// Also start the web UI profile.
    #[arg(long, global = true, env = "MARKER_DEPLOY_WITH_WEB")]
    with_web: bool,

    /// Leave the services running after a successful deployment.
    #[arg(long, env = "MARKER_DEPLOY_KEEP_RUNNING")]
    keep_running: bool,

    /// Directory holding the compose file and data directories.
    #[arg(long, global = true, env = "MARKER_DEPLOY_PROJECT_DIR", default_value = ".")]
    project_dir: PathBuf,

    /// Compose file, relative to the project directory.
    #[arg(long, global = true, env = "MARKER_DEPLOY_COMPOSE_FILE", default_value = "docker-compose.yml")]
    compose_file: PathBuf,

    /// Compose project name (`-p`).
    #[arg(long, global = true, env = "MARKER_DEPLOY_PROJECT_NAME")]
    project_name: Option<String>,

    /// Maximum readiness checks per service.
    #[arg(long, env = "MARKER_DEPLOY_HEALTH_ATTEMPTS", default_value_t = 12,
          value_parser = clap::value_parser!(u32).range(1..))]
    health_attempts: u32,

    /// Seconds between readiness checks.
    #[arg(long, env = "MARKER_DEPLOY_HEALTH_INTERVAL", default_value_t = 5)]
    health_interval: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stop and remove all services of every profile.
    Down,
    /// Show service status and probe the published endpoints.
    Status,
    /// Download or verify models (used inside the image).
    Models {
        #[command(subcommand)]
        command: ModelsCommand,
    },
    /// Inspect a pipeline config file.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ModelsCommand {
    /// Fetch every model from the hub, verify it, write the offline marker.
    Download {
        /// Models directory.
        #[arg(long, env = "MARKER_MODELS_DIR")]
        models_dir: Option<PathBuf>,

        /// Only fetch these models (by name). Repeatable.
        #[arg(long = "only", value_name = "NAME")]
        only: Vec<String>,
    },
    /// Check that every model is present and complete.
    Verify {
        /// Models directory.
        #[arg(long, env = "MARKER_MODELS_DIR")]
        models_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate a pipeline config; exits non-zero on errors.
    Check { file: PathBuf },
    /// List the processors a pipeline config enables.
    Processors { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress output covers what INFO logs would say, so INFO is only
    // on when it is disabled.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if show_progress {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn DeployProgressCallback>)
    } else {
        None
    };

    match cli.command {
        None => run_deploy(&cli, progress).await,
        Some(Command::Down) => {
            let config = build_config(&cli.deploy, None)?;
            down(&config, Arc::new(SystemRunner))
                .await
                .context("Failed to stop services")?;
            if !cli.quiet {
                eprintln!("{} All services stopped", green("✔"));
            }
            Ok(())
        }
        Some(Command::Status) => {
            let config = build_config(&cli.deploy, None)?;
            let report = status(&config, Arc::new(SystemRunner))
                .await
                .context("Failed to collect status")?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("Failed to serialise status")?
                );
            } else {
                print_status(&report);
            }
            Ok(())
        }
        Some(Command::Models { ref command }) => run_models(command, &cli, progress),
        Some(Command::Config { ref command }) => run_config(command, cli.json),
    }
}

/// Map CLI args to `DeployConfig`.
fn build_config(args: &DeployArgs, progress: Option<ProgressCallback>) -> Result<DeployConfig> {
    let mut builder = DeployConfig::builder()
        .project_dir(&args.project_dir)
        .compose_file(&args.compose_file)
        .skip_download(args.skip_download)
        .with_web(args.with_web)
        .keep_running(args.keep_running)
        .health_attempts(args.health_attempts)
        .health_interval(Duration::from_secs(args.health_interval));

    if let Some(ref name) = args.project_name {
        builder = builder.project_name(name);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn run_deploy(cli: &Cli, progress: Option<ProgressCallback>) -> Result<()> {
    let config = build_config(&cli.deploy, progress)?;
    let summary = deploy(&config, Arc::new(SystemRunner))
        .await
        .context("Deployment failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &DeploySummary) {
    if let Some(ref report) = summary.status {
        print_status(report);
    }
    for service in summary.unready_services() {
        eprintln!(
            "{} {} did not report ready; check `docker compose logs {}`",
            yellow("⚠"),
            bold(service),
            service
        );
    }
    eprintln!(
        "{}",
        dim(&format!("Finished in {:.1}s", summary.total_duration_ms as f64 / 1000.0))
    );
}

fn print_status(report: &StatusReport) {
    println!("{}", report.services.trim_end());
    println!();
    for endpoint in &report.endpoints {
        let mark = match endpoint.reachable {
            Some(true) => green("●"),
            Some(false) => red("●"),
            None => dim("○"),
        };
        println!(
            "{mark} {:<10} {}  {}",
            endpoint.name,
            endpoint.url,
            dim(endpoint.detail.as_deref().unwrap_or(""))
        );
    }
}

// ── models ───────────────────────────────────────────────────────────────────

fn select_models(only: &[String]) -> Result<Vec<ModelSpec>> {
    let manifest = default_manifest();
    if only.is_empty() {
        return Ok(manifest);
    }
    for name in only {
        if !manifest.iter().any(|m| &m.name == name) {
            let known: Vec<&str> = manifest.iter().map(|m| m.name.as_str()).collect();
            bail!("Unknown model '{name}' (known: {})", known.join(", "));
        }
    }
    Ok(manifest
        .into_iter()
        .filter(|m| only.contains(&m.name))
        .collect())
}

fn run_models(command: &ModelsCommand, cli: &Cli, progress: Option<ProgressCallback>) -> Result<()> {
    match command {
        ModelsCommand::Download { models_dir, only } => {
            let dir = models_dir.clone().unwrap_or_else(model_fetch::default_models_dir);
            let manifest = select_models(only)?;
            let sentinel = dir.join(SENTINEL_FILE);
            let progress = progress
                .unwrap_or_else(|| Arc::new(marker_deploy::NoopProgressCallback) as ProgressCallback);

            if !cli.quiet && !cli.json {
                eprintln!(
                    "{} {}",
                    cyan("◆"),
                    bold(&format!("Downloading {} models to {}", manifest.len(), dir.display()))
                );
            }

            // block_in_place keeps borrowed arguments valid while moving the
            // blocking hub downloads off the async worker's hot path.
            let report = tokio::task::block_in_place(|| {
                download_all(&dir, &manifest, &sentinel, progress.as_ref())
            })
            .context("Model download failed")?;
            finish_models(report, cli)
        }
        ModelsCommand::Verify { models_dir } => {
            let dir = models_dir.clone().unwrap_or_else(model_fetch::default_models_dir);
            let sentinel = dir.join(SENTINEL_FILE);
            let report = verify_all(&dir, &default_manifest(), &sentinel)
                .context("Model verification failed")?;
            finish_models(report, cli)
        }
    }
}

fn finish_models(report: VerificationReport, cli: &Cli) -> Result<()> {
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        for model in &report.models {
            match model.error {
                None => println!("{} {:<12} {}", green("✓"), model.name, dim(&model.path.display().to_string())),
                Some(ref e) => println!("{} {:<12} {}", red("✗"), model.name, red(&e.to_string())),
            }
        }
    }
    report.into_result()?;
    Ok(())
}

// ── config ───────────────────────────────────────────────────────────────────

fn run_config(command: &ConfigCommand, json: bool) -> Result<()> {
    match command {
        ConfigCommand::Check { file } => {
            let config = MarkerConfig::from_path(file)?;
            let report = config.validate();
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("Failed to serialise report")?
                );
            } else {
                for issue in &report.issues {
                    println!("{issue}");
                }
                let errors = report.errors().count();
                let warnings = report.warnings().count();
                println!(
                    "{} {}: {errors} error(s), {warnings} warning(s)",
                    if errors == 0 { green("✔") } else { red("✘") },
                    file.display()
                );
            }
            if !report.is_valid() {
                bail!("{} is not a valid pipeline config", file.display());
            }
            Ok(())
        }
        ConfigCommand::Processors { file } => {
            let config = MarkerConfig::from_path(file)?;
            let plan = config.processor_plan();
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&plan).context("Failed to serialise plan")?
                );
                return Ok(());
            }
            for p in &plan {
                let kind = match p.kind {
                    ProcessorKind::Core => "core",
                    ProcessorKind::Llm => "llm",
                };
                if p.active {
                    println!("{} {:<30} {}", green("●"), p.name, dim(kind));
                } else {
                    println!(
                        "{} {:<30} {}  {}",
                        dim("○"),
                        p.name,
                        dim(kind),
                        dim(p.reason.as_deref().unwrap_or(""))
                    );
                }
            }
            let active = plan.iter().filter(|p| p.active).count();
            println!("{active}/{} processors active", plan.len());
            Ok(())
        }
    }
}
