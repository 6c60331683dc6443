//! Result types returned by a deployment run.

use crate::models::VerificationReport;
use crate::pipeline::download::DownloadOutcome;
use crate::pipeline::health::HealthOutcome;
use crate::pipeline::prereq::Prerequisites;
use crate::pipeline::setup::SetupOutcome;
use crate::pipeline::status::StatusReport;
use crate::Phase;
use serde::Serialize;

/// Timing of one finished phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub duration_ms: u64,
    /// `true` if the phase was satisfied without doing its work.
    pub skipped: bool,
}

/// Everything a successful run found and did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeploySummary {
    /// Finished phases, in run order.
    pub phases: Vec<PhaseRecord>,
    pub prerequisites: Option<Prerequisites>,
    pub setup: Option<SetupOutcome>,
    pub download: Option<DownloadOutcome>,
    pub models: Option<VerificationReport>,
    /// One entry per started service, API first.
    pub health: Vec<HealthOutcome>,
    pub status: Option<StatusReport>,
    pub total_duration_ms: u64,
}

impl DeploySummary {
    /// Services that never reported ready within the poll budget.
    pub fn unready_services(&self) -> Vec<&str> {
        self.health
            .iter()
            .filter(|h| !h.ready)
            .map(|h| h.service.as_str())
            .collect()
    }
}
