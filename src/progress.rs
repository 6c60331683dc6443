//! Progress-callback trait for phase-level deployment events.
//!
//! Inject an [`Arc<dyn DeployProgressCallback>`] via
//! [`crate::config::DeployConfigBuilder::progress_callback`] to receive
//! events as the orchestrator moves through its phases. The same trait
//! reports per-model progress during the in-container download
//! ([`crate::models::download_all`]).
//!
//! # Example
//!
//! ```rust
//! use marker_deploy::{DeployConfig, DeployProgressCallback, Phase};
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct PhaseLog(Mutex<Vec<Phase>>);
//!
//! impl DeployProgressCallback for PhaseLog {
//!     fn on_phase_start(&self, phase: Phase) {
//!         self.0.lock().unwrap().push(phase);
//!     }
//! }
//!
//! let log = Arc::new(PhaseLog::default());
//! let config = DeployConfig::builder()
//!     .progress_callback(log as Arc<dyn DeployProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::health::HealthState;
use crate::Phase;
use std::sync::Arc;

/// Called by the orchestrator as it runs each phase.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must be `Send + Sync`: the download
/// progress hook is called from a blocking section of the runtime.
pub trait DeployProgressCallback: Send + Sync {
    /// Called once, before the first phase, with every phase that will run.
    fn on_deploy_start(&self, phases: &[Phase]) {
        let _ = phases;
    }

    fn on_phase_start(&self, phase: Phase) {
        let _ = phase;
    }

    /// Called when a phase finishes successfully.
    fn on_phase_complete(&self, phase: Phase, duration_ms: u64) {
        let _ = (phase, duration_ms);
    }

    /// Called when a phase is satisfied without running (e.g. `--skip-download`).
    fn on_phase_skipped(&self, phase: Phase, reason: &str) {
        let _ = (phase, reason);
    }

    /// Called when a phase aborts the run.
    fn on_phase_error(&self, phase: Phase, error: &str) {
        let _ = (phase, error);
    }

    /// Called after every readiness check.
    ///
    /// # Arguments
    /// * `service` — compose service being polled
    /// * `attempt` — 1-indexed check number
    /// * `max`     — configured maximum number of checks
    /// * `state`   — what the check observed
    fn on_health_check(&self, service: &str, attempt: u32, max: u32, state: &HealthState) {
        let _ = (service, attempt, max, state);
    }

    /// Called when a model download begins.
    fn on_model_start(&self, name: &str, repo_id: &str) {
        let _ = (name, repo_id);
    }

    /// Byte-level download progress for one file of a model.
    fn on_model_progress(&self, name: &str, file: &str, downloaded: u64, total: Option<u64>) {
        let _ = (name, file, downloaded, total);
    }

    /// Called when a model has been downloaded and verified (or failed to).
    fn on_model_complete(&self, name: &str, error: Option<&str>) {
        let _ = (name, error);
    }

    /// Called once after cleanup, with the overall outcome.
    fn on_deploy_complete(&self, success: bool) {
        let _ = success;
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl DeployProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::DeployConfig`].
pub type ProgressCallback = Arc<dyn DeployProgressCallback>;

/// The configured callback, or a no-op one.
pub(crate) fn callback_or_noop(cb: Option<&ProgressCallback>) -> ProgressCallback {
    cb.cloned()
        .unwrap_or_else(|| Arc::new(NoopProgressCallback) as ProgressCallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        checks: AtomicUsize,
    }

    impl DeployProgressCallback for TrackingCallback {
        fn on_phase_start(&self, _phase: Phase) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_phase_complete(&self, _phase: Phase, _duration_ms: u64) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_phase_error(&self, _phase: Phase, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_health_check(&self, _service: &str, _attempt: u32, _max: u32, _state: &HealthState) {
            self.checks.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_deploy_start(&[Phase::Prerequisites, Phase::Build]);
        cb.on_phase_start(Phase::Build);
        cb.on_phase_complete(Phase::Build, 12);
        cb.on_phase_skipped(Phase::Download, "--skip-download");
        cb.on_health_check("marker-api", 1, 12, &HealthState::Starting);
        cb.on_model_progress("layout", "model.safetensors", 10, Some(100));
        cb.on_deploy_complete(true);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_phase_start(Phase::Prerequisites);
        tracker.on_phase_complete(Phase::Prerequisites, 5);
        tracker.on_phase_start(Phase::Build);
        tracker.on_phase_error(Phase::Build, "exit 1");
        tracker.on_health_check("marker-api", 1, 12, &HealthState::Healthy);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.checks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn noop_fallback_when_unset() {
        let cb = callback_or_noop(None);
        cb.on_phase_start(Phase::Status);
    }
}
