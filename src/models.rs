//! Model manifest, on-disk verification and the Phase 1 sentinel.
//!
//! The orchestrator never loads a model. It only needs to know that every
//! manifest entry sits in `<models_dir>/<name>/` with a `config.json` and at
//! least one weight file, and that Phase 1 completed (the sentinel exists).
//!
//! The sentinel doubles as an *offline marker*: the downloader writes a small
//! JSON record into it, but any existing file counts, whatever it holds.

use crate::error::{DeployError, ModelError};
use crate::progress::DeployProgressCallback;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// One model the pipeline needs at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Directory name under the models dir, e.g. `layout`.
    pub name: String,
    /// Hub repository, e.g. `vikp/surya_layout3`.
    pub repo_id: String,
    /// Branch, tag or commit. Default: `main`.
    #[serde(default = "default_revision")]
    pub revision: String,
}

fn default_revision() -> String {
    model_fetch::DEFAULT_REVISION.to_string()
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, repo_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repo_id: repo_id.into(),
            revision: default_revision(),
        }
    }
}

/// The surya model set marker loads for detection, OCR, layout, reading
/// order and table recognition.
pub fn default_manifest() -> Vec<ModelSpec> {
    vec![
        ModelSpec::new("detection", "vikp/surya_det3"),
        ModelSpec::new("recognition", "vikp/surya_rec2"),
        ModelSpec::new("layout", "vikp/surya_layout3"),
        ModelSpec::new("order", "vikp/surya_order"),
        ModelSpec::new("table_rec", "vikp/surya_tablerec"),
    ]
}

// ── Single-model verification ────────────────────────────────────────────

/// Check one model directory. Returns its path on success.
pub fn verify_model(spec: &ModelSpec, models_dir: &Path) -> Result<PathBuf, ModelError> {
    let dir = models_dir.join(&spec.name);
    let missing = || ModelError::Missing {
        name: spec.name.clone(),
        path: dir.clone(),
    };

    if !dir.is_dir() {
        return Err(missing());
    }
    if !dir.join("config.json").is_file() {
        return Err(ModelError::MissingConfig {
            name: spec.name.clone(),
        });
    }

    let has_weights = std::fs::read_dir(&dir)
        .map_err(|_| missing())?
        .filter_map(Result::ok)
        .any(|entry| is_weight_file(&entry.path()));
    if !has_weights {
        return Err(ModelError::MissingWeights {
            name: spec.name.clone(),
        });
    }

    Ok(dir)
}

fn is_weight_file(path: &Path) -> bool {
    path.is_file()
        && matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("bin" | "safetensors")
        )
}

// ── Reports ──────────────────────────────────────────────────────────────

/// Verification outcome for one model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelReport {
    pub name: String,
    pub path: PathBuf,
    pub error: Option<ModelError>,
}

impl ModelReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome for a whole manifest.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationReport {
    pub models: Vec<ModelReport>,
}

impl VerificationReport {
    pub fn failed(&self) -> impl Iterator<Item = &ModelReport> {
        self.models.iter().filter(|m| !m.is_ok())
    }

    pub fn is_ok(&self) -> bool {
        self.failed().next().is_none()
    }

    /// Names of the models that passed, in manifest order.
    pub fn verified_names(&self) -> Vec<String> {
        self.models
            .iter()
            .filter(|m| m.is_ok())
            .map(|m| m.name.clone())
            .collect()
    }

    /// Treat any failed model as a fatal error.
    pub fn into_result(self) -> Result<Self, DeployError> {
        let failed: Vec<&str> = self.failed().map(|m| m.name.as_str()).collect();
        if failed.is_empty() {
            return Ok(self);
        }
        Err(DeployError::VerificationFailed {
            failed: failed.len(),
            total: self.models.len(),
            names: failed.join(", "),
        })
    }
}

// ── Sentinel / offline marker ────────────────────────────────────────────

/// Record written into the sentinel by a successful download.
///
/// Every field is optional when reading: the sentinel is a flag, and older
/// downloaders wrote different keys (a Unix-time string for
/// `downloaded_at`, CUDA and PyTorch versions). Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfflineMarker {
    #[serde(default)]
    pub downloaded_at: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub tool_version: Option<String>,
}

impl OfflineMarker {
    pub fn new(models: Vec<String>) -> Self {
        Self {
            downloaded_at: Some(Utc::now().to_rfc3339()),
            models,
            tool_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), DeployError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DeployError::Internal(format!("serialising offline marker: {e}")))?;
        std::fs::write(path, json).map_err(|source| DeployError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// What was found at the sentinel location.
#[derive(Debug, Clone, PartialEq)]
pub enum SentinelState {
    /// No file: Phase 1 never completed.
    Absent,
    /// File present. `None` when the content is empty, unreadable or not a
    /// JSON object.
    Present(Option<OfflineMarker>),
}

impl SentinelState {
    pub fn exists(&self) -> bool {
        !matches!(self, SentinelState::Absent)
    }
}

/// Inspect the sentinel at `path`.
///
/// Only existence matters. The content is parsed for logging and never
/// turns a present sentinel into an error.
pub fn read_sentinel(path: &Path) -> SentinelState {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return SentinelState::Absent,
        Err(e) => {
            warn!(path = %path.display(), "Cannot read download sentinel: {e}");
            return SentinelState::Present(None);
        }
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return SentinelState::Present(None);
    }
    match serde_json::from_slice::<OfflineMarker>(&bytes) {
        Ok(marker) => SentinelState::Present(Some(marker)),
        Err(e) => {
            debug!(path = %path.display(), "Sentinel holds no offline marker: {e}");
            SentinelState::Present(None)
        }
    }
}

// ── Manifest-wide operations ─────────────────────────────────────────────

/// Verify every manifest entry. Requires the sentinel to exist.
///
/// Returns the full report even when models fail; call
/// [`VerificationReport::into_result`] to abort on failure.
pub fn verify_all(
    models_dir: &Path,
    manifest: &[ModelSpec],
    sentinel: &Path,
) -> Result<VerificationReport, DeployError> {
    match read_sentinel(sentinel) {
        SentinelState::Absent => {
            return Err(DeployError::SentinelMissing {
                path: sentinel.to_path_buf(),
            })
        }
        SentinelState::Present(Some(marker)) => info!(
            models = %marker.models.join(", "),
            downloaded_at = marker.downloaded_at.as_deref().unwrap_or("unknown"),
            tool_version = marker.tool_version.as_deref().unwrap_or("unknown"),
            "Found offline marker"
        ),
        SentinelState::Present(None) => info!("Found download sentinel"),
    }

    let models = manifest
        .iter()
        .map(|spec| {
            let path = models_dir.join(&spec.name);
            let error = verify_model(spec, models_dir).err();
            match &error {
                None => info!(model = %spec.name, "Model verified"),
                Some(e) => error!(model = %spec.name, "{e}"),
            }
            ModelReport {
                name: spec.name.clone(),
                path,
                error,
            }
        })
        .collect();

    Ok(VerificationReport { models })
}

/// Phase 1 body, run inside the download container: fetch every model,
/// verify it, and write the offline marker only if all of them passed.
///
/// Any stale sentinel is removed first so a failed rerun can never leave a
/// previous "downloaded" flag behind.
///
/// This function blocks; call it from `spawn_blocking` or `block_in_place`.
pub fn download_all(
    models_dir: &Path,
    manifest: &[ModelSpec],
    sentinel: &Path,
    progress: &dyn DeployProgressCallback,
) -> Result<VerificationReport, DeployError> {
    std::fs::create_dir_all(models_dir).map_err(|source| DeployError::CreateDir {
        path: models_dir.to_path_buf(),
        source,
    })?;

    match std::fs::remove_file(sentinel) {
        Ok(()) => warn!(path = %sentinel.display(), "Removed stale download sentinel"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(DeployError::WriteFailed {
                path: sentinel.to_path_buf(),
                source,
            })
        }
    }

    info!(count = manifest.len(), dir = %models_dir.display(), "Starting model download");
    let mut models = Vec::with_capacity(manifest.len());

    for spec in manifest {
        progress.on_model_start(&spec.name, &spec.repo_id);
        let dest = models_dir.join(&spec.name);
        let on_file = |file: &str, done: u64, total: Option<u64>| {
            progress.on_model_progress(&spec.name, file, done, total)
        };

        let error = match model_fetch::fetch_snapshot(&spec.repo_id, &spec.revision, &dest, Some(&on_file)) {
            Ok(snapshot) => {
                info!(
                    model = %spec.name,
                    files = snapshot.files.len(),
                    skipped = snapshot.skipped,
                    bytes = snapshot.downloaded_bytes,
                    "Snapshot ready"
                );
                verify_model(spec, models_dir).err()
            }
            // Offline mode means every other model fails the same way.
            Err(e @ model_fetch::FetchError::Offline { .. }) => return Err(e.into()),
            Err(e) => Some(ModelError::DownloadFailed {
                name: spec.name.clone(),
                detail: e.to_string(),
            }),
        };

        if let Some(ref e) = error {
            error!(model = %spec.name, "{e}");
        }
        progress.on_model_complete(&spec.name, error.as_ref().map(|e| e.to_string()).as_deref());
        models.push(ModelReport {
            name: spec.name.clone(),
            path: dest,
            error,
        });
    }

    let report = VerificationReport { models }.into_result()?;
    OfflineMarker::new(report.verified_names()).write(sentinel)?;
    info!(path = %sentinel.display(), "Wrote offline marker");

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SENTINEL_FILE;
    use tempfile::TempDir;

    fn write_model(root: &Path, name: &str, weights: Option<&str>, config: bool) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        if config {
            std::fs::write(dir.join("config.json"), "{}").unwrap();
        }
        if let Some(w) = weights {
            std::fs::write(dir.join(w), b"\0\0").unwrap();
        }
    }

    #[test]
    fn default_manifest_is_surya_set() {
        let names: Vec<_> = default_manifest().into_iter().map(|m| m.name).collect();
        assert_eq!(names, ["detection", "recognition", "layout", "order", "table_rec"]);
    }

    #[test]
    fn verify_model_accepts_either_weight_format() {
        let tmp = TempDir::new().unwrap();
        write_model(tmp.path(), "a", Some("model.safetensors"), true);
        write_model(tmp.path(), "b", Some("pytorch_model.bin"), true);
        assert!(verify_model(&ModelSpec::new("a", "x/a"), tmp.path()).is_ok());
        assert!(verify_model(&ModelSpec::new("b", "x/b"), tmp.path()).is_ok());
    }

    #[test]
    fn verify_model_reports_each_failure() {
        let tmp = TempDir::new().unwrap();
        write_model(tmp.path(), "noconfig", Some("model.bin"), false);
        write_model(tmp.path(), "noweights", Some("README.md"), true);

        assert!(matches!(
            verify_model(&ModelSpec::new("absent", "x/y"), tmp.path()),
            Err(ModelError::Missing { .. })
        ));
        assert!(matches!(
            verify_model(&ModelSpec::new("noconfig", "x/y"), tmp.path()),
            Err(ModelError::MissingConfig { .. })
        ));
        assert!(matches!(
            verify_model(&ModelSpec::new("noweights", "x/y"), tmp.path()),
            Err(ModelError::MissingWeights { .. })
        ));
    }

    #[test]
    fn sentinel_states() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(SENTINEL_FILE);
        assert_eq!(read_sentinel(&path), SentinelState::Absent);

        std::fs::write(&path, b"").unwrap();
        assert_eq!(read_sentinel(&path), SentinelState::Present(None));

        std::fs::write(&path, b"done").unwrap();
        assert_eq!(read_sentinel(&path), SentinelState::Present(None));

        std::fs::write(&path, b"{}").unwrap();
        assert_eq!(
            read_sentinel(&path),
            SentinelState::Present(Some(OfflineMarker::default()))
        );

        let marker = OfflineMarker::new(vec!["layout".into()]);
        marker.write(&path).unwrap();
        assert_eq!(read_sentinel(&path), SentinelState::Present(Some(marker)));
    }

    #[test]
    fn legacy_marker_is_read_leniently() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(SENTINEL_FILE);
        std::fs::write(
            &path,
            r#"{
  "downloaded_at": "1718000000.5",
  "models": ["detection", "layout"],
  "cuda_available": true,
  "cuda_version": null,
  "pytorch_version": "2.3.0"
}"#,
        )
        .unwrap();

        match read_sentinel(&path) {
            SentinelState::Present(Some(marker)) => {
                assert_eq!(marker.downloaded_at.as_deref(), Some("1718000000.5"));
                assert_eq!(marker.models, ["detection", "layout"]);
                assert_eq!(marker.tool_version, None);
            }
            other => panic!("unexpected sentinel state: {other:?}"),
        }
    }

    #[test]
    fn verify_all_accepts_any_sentinel_content() {
        let tmp = TempDir::new().unwrap();
        let sentinel = tmp.path().join(SENTINEL_FILE);
        for name in ["detection", "recognition", "layout", "order", "table_rec"] {
            write_model(tmp.path(), name, Some("model.safetensors"), true);
        }

        let legacy = r#"{"downloaded_at": "1718000000.5", "models": [], "cuda_available": false}"#;
        for content in [legacy, "{}", "done", "[1, 2]"] {
            std::fs::write(&sentinel, content).unwrap();
            let report = verify_all(tmp.path(), &default_manifest(), &sentinel)
                .unwrap_or_else(|e| panic!("sentinel {content:?} rejected: {e}"));
            assert!(report.is_ok(), "sentinel {content:?}");
        }
    }

    #[test]
    fn verify_all_requires_sentinel() {
        let tmp = TempDir::new().unwrap();
        let err = verify_all(tmp.path(), &default_manifest(), &tmp.path().join(SENTINEL_FILE))
            .unwrap_err();
        assert!(matches!(err, DeployError::SentinelMissing { .. }));
    }

    #[test]
    fn verify_all_collects_every_failure() {
        let tmp = TempDir::new().unwrap();
        let sentinel = tmp.path().join(SENTINEL_FILE);
        std::fs::write(&sentinel, b"").unwrap();
        write_model(tmp.path(), "detection", Some("model.safetensors"), true);

        let manifest = default_manifest();
        let report = verify_all(tmp.path(), &manifest, &sentinel).unwrap();
        assert_eq!(report.models.len(), 5);
        assert_eq!(report.failed().count(), 4);
        assert_eq!(report.verified_names(), vec!["detection".to_string()]);

        match report.into_result().unwrap_err() {
            DeployError::VerificationFailed { failed, total, names } => {
                assert_eq!((failed, total), (4, 5));
                assert!(names.contains("table_rec"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
