//! Error types for the marker-deploy library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DeployError`] — **Fatal**: the run cannot continue (Docker missing,
//!   image build failed, sentinel absent). Returned as `Err(DeployError)`
//!   from [`crate::deploy`] and the phase functions; the orchestrator aborts
//!   before the next phase starts.
//!
//! * [`ModelError`] — **Non-fatal** on its own: one model failed to download
//!   or verify. Collected into a [`crate::models::VerificationReport`] so the
//!   operator sees every broken model at once; the report is then turned into
//!   a single [`DeployError::VerificationFailed`].

use crate::Phase;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the marker-deploy library.
#[derive(Debug, Error)]
pub enum DeployError {
    // ── Prerequisites ─────────────────────────────────────────────────────
    /// A required executable is not installed.
    #[error("'{program}' was not found on PATH.\n{hint}")]
    MissingPrerequisite { program: String, hint: String },

    /// `docker info` failed: the CLI exists but the daemon does not answer.
    #[error("Docker daemon is not reachable: {detail}\nStart Docker (or check your permissions on the socket) and retry.")]
    DaemonUnavailable { detail: String },

    // ── Subprocesses ──────────────────────────────────────────────────────
    /// The process could not be spawned at all.
    #[error("Failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A command ran but exited unsuccessfully.
    #[error("`{command}` exited with status {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    // ── Phases ────────────────────────────────────────────────────────────
    /// `compose build` failed.
    #[error("Image build failed: {0}")]
    BuildFailed(String),

    /// The Phase 1 download container failed.
    #[error("Model download failed: {0}\nPhase 1 needs network access to the model hub.")]
    DownloadFailed(String),

    /// The download sentinel is absent.
    #[error("Download sentinel '{path}' not found.\nRun without --skip-download to fetch the models first.")]
    SentinelMissing { path: PathBuf },

    /// One or more models are missing files.
    #[error("{failed}/{total} models failed verification: {names}")]
    VerificationFailed {
        failed: usize,
        total: usize,
        names: String,
    },

    /// `compose --profile production up` failed.
    #[error("Production services failed to start: {0}")]
    ProductionFailed(String),

    /// `compose --profile web up` failed.
    #[error("Web interface failed to start: {0}")]
    WebFailed(String),

    /// The run was cancelled by the operator (Ctrl-C).
    #[error("Deployment interrupted during {phase}")]
    Interrupted { phase: Phase },

    // ── I/O errors ────────────────────────────────────────────────────────
    #[error("Failed to create directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write '{path}': {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The pipeline config file is not a well-formed flat JSON object.
    #[error("Malformed pipeline config '{path}': {detail}")]
    MalformedPipelineConfig { path: PathBuf, detail: String },

    // ── Hub downloads ─────────────────────────────────────────────────────
    #[error(transparent)]
    Fetch(#[from] model_fetch::FetchError),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single model.
///
/// Stored in [`crate::models::ModelReport`]; the loop over the manifest
/// continues so all failures are reported together.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ModelError {
    /// The model directory does not exist.
    #[error("{name}: directory '{path}' does not exist")]
    Missing { name: String, path: PathBuf },

    /// No `config.json` in the model directory.
    #[error("{name}: missing config.json")]
    MissingConfig { name: String },

    /// No `*.bin` / `*.safetensors` file in the model directory.
    #[error("{name}: no weight files (*.bin, *.safetensors)")]
    MissingWeights { name: String },

    /// Hub download failed for this model.
    #[error("{name}: download failed: {detail}")]
    DownloadFailed { name: String, detail: String },
}

impl ModelError {
    /// Name of the model this error refers to.
    pub fn model(&self) -> &str {
        match self {
            ModelError::Missing { name, .. }
            | ModelError::MissingConfig { name }
            | ModelError::MissingWeights { name }
            | ModelError::DownloadFailed { name, .. } => name,
        }
    }
}
