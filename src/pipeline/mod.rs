//! Deployment phases.
//!
//! Each submodule implements exactly one phase. [`crate::deploy`] runs them
//! once each, in this order, aborting at the first fatal error:
//!
//! ```text
//! prerequisites ─▶ directories ─▶ build ─▶ download ─▶ verify ─▶ production ─▶ [web] ─▶ status
//!  (docker CLI)     (host dirs)   (images)  (Phase 1)   (host)    (Phase 2)     (opt.)   (ps + HTTP)
//! ```
//!
//! 1. [`prereq`]   — Docker CLI, daemon and Compose flavour
//! 2. [`setup`]    — data directories and the default pipeline config
//! 3. [`build`]    — `compose build`
//! 4. [`download`] — one-off downloader container, or sentinel reuse
//! 5. [`verify`]   — model files on the host, before anything starts offline
//! 6. [`serve`]    — `compose up -d` plus [`health`] polling
//! 7. [`status`]   — `compose ps` and endpoint probes
//!
//! [`cleanup`] runs after every attempt.

pub mod build;
pub mod cleanup;
pub mod download;
pub mod health;
pub mod prereq;
pub mod serve;
pub mod setup;
pub mod status;
pub mod verify;

use crate::config::DeployConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A named step of a deployment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Prerequisites,
    Directories,
    Build,
    Download,
    Verify,
    Production,
    WebInterface,
    Status,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Prerequisites => "prerequisites",
            Phase::Directories => "directories",
            Phase::Build => "build",
            Phase::Download => "download",
            Phase::Verify => "verify",
            Phase::Production => "production",
            Phase::WebInterface => "web interface",
            Phase::Status => "status",
        }
    }

    /// Phases a run with `config` will go through, in order.
    pub fn plan(config: &DeployConfig) -> Vec<Phase> {
        let mut phases = vec![
            Phase::Prerequisites,
            Phase::Directories,
            Phase::Build,
            Phase::Download,
            Phase::Verify,
            Phase::Production,
        ];
        if config.with_web {
            phases.push(Phase::WebInterface);
        }
        phases.push(Phase::Status);
        phases
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
