//! # marker-deploy
//!
//! Two-phase Docker deployment for the marker PDF-to-Markdown pipeline.
//!
//! ## Why two phases?
//!
//! Marker's layout, OCR and table models are fetched from a model hub on
//! first use. A production container with network access can therefore
//! silently download (or fail to download) weights at request time. This
//! crate splits deployment so that all network access happens up front:
//!
//! ```text
//! Phase 1  download   one-off container, network on, writes models/.models_downloaded
//!          verify     host checks every model directory before anything starts
//! Phase 2  production API container, offline (HF_HUB_OFFLINE=1), models mounted
//!          web        optional UI profile
//! ```
//!
//! ## Phases
//!
//! ```text
//! prerequisites → directories → build → download → verify → production → [web] → status
//! ```
//!
//! A phase runs to completion or aborts the whole run. After every run the
//! cleanup step brings every profile down. With
//! [`DeployConfig::keep_running`] a successful run only removes the one-off
//! download container.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use marker_deploy::{deploy, DeployConfig, SystemRunner};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DeployConfig::builder()
//!         .project_dir("/srv/marker")
//!         .with_web(true)
//!         .build()?;
//!     let summary = deploy(&config, Arc::new(SystemRunner)).await?;
//!     for endpoint in summary.status.iter().flat_map(|s| &s.endpoints) {
//!         println!("{}: {}", endpoint.name, endpoint.url);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `marker-deploy` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! marker-deploy = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod compose;
pub mod config;
pub mod deploy;
pub mod error;
pub mod marker_config;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use compose::{CommandOutput, CommandRunner, Compose, ComposeFlavor, SystemRunner};
pub use config::{DeployConfig, DeployConfigBuilder, SENTINEL_FILE};
pub use deploy::{deploy, deploy_until, down, status};
pub use error::{DeployError, ModelError};
pub use marker_config::{ConfigReport, MarkerConfig, ProcessorKind};
pub use models::{default_manifest, ModelSpec, OfflineMarker, VerificationReport};
pub use output::{DeploySummary, PhaseRecord};
pub use pipeline::health::{HealthOutcome, HealthState};
pub use pipeline::status::{Endpoint, StatusReport};
pub use pipeline::Phase;
pub use progress::{DeployProgressCallback, NoopProgressCallback, ProgressCallback};
