//! # model-fetch
//!
//! Download model snapshots from a Hugging Face compatible hub into a plain
//! directory, so that network-restricted containers can later load them
//! without ever touching the network.
//!
//! ## How it works
//!
//! On each call to [`fetch_snapshot`]:
//!
//! 1. Lists the repository files via `{endpoint}/api/models/{repo}/revision/{rev}`.
//! 2. Skips every file that already exists on disk with content (reruns resume).
//! 3. Streams the rest from `{endpoint}/{repo}/resolve/{rev}/{file}` into a temp
//!    file next to the target and renames it into place.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use model_fetch::{fetch_snapshot, DEFAULT_REVISION};
//! use std::path::Path;
//!
//! let snapshot = fetch_snapshot(
//!     "vikp/surya_det3",
//!     DEFAULT_REVISION,
//!     Path::new("/app/models/detection"),
//!     Some(&|file, downloaded, total| {
//!         if let Some(t) = total {
//!             eprint!("\r{file}: {downloaded}/{t} bytes");
//!         }
//!     }),
//! ).expect("download failed");
//! println!("{} files in {}", snapshot.files.len(), snapshot.dir.display());
//! ```
//!
//! ## Environment variable overrides
//!
//! - `HF_ENDPOINT` — hub base URL (default `https://huggingface.co`).
//! - `HF_TOKEN` — bearer token for gated or private repositories.
//! - `HF_HUB_OFFLINE=1` — refuse all network access; [`fetch_snapshot`]
//!   fails with [`FetchError::Offline`].
//! - `MARKER_MODELS_DIR` — override [`default_models_dir`].

use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

// ── Public constants ─────────────────────────────────────────────────────────

/// Hub used when `HF_ENDPOINT` is unset.
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Branch fetched when the caller does not pin a revision.
pub const DEFAULT_REVISION: &str = "main";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by model-fetch operations.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The repository id is not of the form `owner/name`.
    #[error("Invalid repository id '{0}': expected 'owner/name'")]
    InvalidRepoId(String),

    /// `HF_HUB_OFFLINE` is set; no request was made.
    #[error("Hub access disabled (HF_HUB_OFFLINE is set); cannot fetch '{repo_id}'")]
    Offline { repo_id: String },

    /// Could not create the destination directory.
    #[error("Cannot create model directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file listing for a repository could not be retrieved.
    #[error("Listing '{repo_id}' failed: {reason}")]
    Listing { repo_id: String, reason: String },

    /// Network download of a single file failed.
    #[error("Download failed: {0}")]
    Download(String),

    /// Writing a downloaded file to disk failed.
    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The hub listed a file whose path would escape the destination.
    #[error("Refusing unsafe file path '{0}' from hub listing")]
    UnsafePath(String),
}

// ── Snapshot result ──────────────────────────────────────────────────────────

/// Outcome of a [`fetch_snapshot`] call.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Repository id that was fetched.
    pub repo_id: String,
    /// Directory holding the snapshot.
    pub dir: PathBuf,
    /// Every file of the snapshot, relative to `dir`.
    pub files: Vec<String>,
    /// Files that were already present and left untouched.
    pub skipped: usize,
    /// Bytes transferred over the network during this call.
    pub downloaded_bytes: u64,
}

#[derive(Debug, Deserialize)]
struct RepoInfo {
    #[serde(default)]
    siblings: Vec<Sibling>,
}

#[derive(Debug, Deserialize)]
struct Sibling {
    rfilename: String,
}

// ── Environment resolution ───────────────────────────────────────────────────

/// Hub base URL, honouring `HF_ENDPOINT`. Never ends with a slash.
pub fn hub_endpoint() -> String {
    endpoint_from(std::env::var("HF_ENDPOINT").ok())
}

fn endpoint_from(value: Option<String>) -> String {
    value
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
}

/// Returns `true` when `HF_HUB_OFFLINE` asks for network access to be refused.
pub fn is_offline() -> bool {
    offline_from(std::env::var("HF_HUB_OFFLINE").ok().as_deref())
}

fn offline_from(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

/// Directory that holds all model snapshots.
///
/// Default locations:
/// - **Linux**: `~/.local/share/marker/models/`
/// - **macOS**: `~/Library/Application Support/marker/models/`
/// - **Windows**: `%APPDATA%\marker\models\`
///
/// Override by setting `MARKER_MODELS_DIR`.
pub fn default_models_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MARKER_MODELS_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    let base = dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
        .unwrap_or_else(std::env::temp_dir);

    base.join("marker").join("models")
}

/// Returns `true` if `repo_id` looks like `owner/name`.
pub fn is_valid_repo_id(repo_id: &str) -> bool {
    let mut parts = repo_id.split('/');
    let (Some(owner), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    let ok = |s: &str| {
        !s.is_empty()
            && !s.starts_with('.')
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    ok(owner) && ok(name)
}

/// URL of a single file inside a repository snapshot.
pub fn file_url(endpoint: &str, repo_id: &str, revision: &str, file: &str) -> String {
    format!("{endpoint}/{repo_id}/resolve/{revision}/{file}")
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Downloads every file of `repo_id@revision` into `dest`.
///
/// `on_progress` receives `(file, bytes_downloaded, total_size_option)` for
/// each file being transferred. Pass `None` to suppress progress callbacks.
///
/// Files already present with non-zero size are skipped, so an interrupted
/// run picks up where it stopped.
pub fn fetch_snapshot(
    repo_id: &str,
    revision: &str,
    dest: &Path,
    on_progress: Option<&dyn Fn(&str, u64, Option<u64>)>,
) -> Result<Snapshot, FetchError> {
    if !is_valid_repo_id(repo_id) {
        return Err(FetchError::InvalidRepoId(repo_id.to_string()));
    }
    if is_offline() {
        return Err(FetchError::Offline {
            repo_id: repo_id.to_string(),
        });
    }

    std::fs::create_dir_all(dest).map_err(|source| FetchError::CreateDir {
        path: dest.to_path_buf(),
        source,
    })?;

    let endpoint = hub_endpoint();
    let client = build_client()?;
    let files = list_repo_files(&client, &endpoint, repo_id, revision)?;
    info!(repo = repo_id, files = files.len(), "Fetching snapshot");

    let mut skipped = 0;
    let mut downloaded_bytes = 0;

    for file in &files {
        let target = safe_join(dest, file)?;
        if is_present(&target) {
            debug!(repo = repo_id, file = %file, "Already present, skipping");
            skipped += 1;
            continue;
        }

        let url = file_url(&endpoint, repo_id, revision, file);
        let progress = on_progress.map(|cb| move |done: u64, total: Option<u64>| cb(file, done, total));
        downloaded_bytes += download_to(
            &client,
            &url,
            &target,
            progress.as_ref().map(|p| p as &dyn Fn(u64, Option<u64>)),
        )?;
    }

    Ok(Snapshot {
        repo_id: repo_id.to_string(),
        dir: dest.to_path_buf(),
        files,
        skipped,
        downloaded_bytes,
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────────

/// An unset or blank `HF_TOKEN` means anonymous access.
fn token_from(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn auth_headers(token: Option<String>) -> Result<reqwest::header::HeaderMap, FetchError> {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Some(token) = token_from(token) {
        let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| FetchError::Download(format!("invalid HF_TOKEN: {e}")))?;
        headers.insert(reqwest::header::AUTHORIZATION, value);
    }
    Ok(headers)
}

fn build_client() -> Result<reqwest::blocking::Client, FetchError> {
    let headers = auth_headers(std::env::var("HF_TOKEN").ok())?;

    reqwest::blocking::Client::builder()
        .user_agent(concat!("model-fetch/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .default_headers(headers)
        .build()
        .map_err(|e| FetchError::Download(e.to_string()))
}

fn list_repo_files(
    client: &reqwest::blocking::Client,
    endpoint: &str,
    repo_id: &str,
    revision: &str,
) -> Result<Vec<String>, FetchError> {
    let url = format!("{endpoint}/api/models/{repo_id}/revision/{revision}");
    let listing_err = |reason: String| FetchError::Listing {
        repo_id: repo_id.to_string(),
        reason,
    };

    let response = client
        .get(&url)
        .send()
        .map_err(|e| listing_err(format!("GET {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(listing_err(format!("HTTP {} for {url}", response.status())));
    }

    let info: RepoInfo = response
        .json()
        .map_err(|e| listing_err(format!("unexpected listing payload: {e}")))?;

    let files: Vec<String> = info.siblings.into_iter().map(|s| s.rfilename).collect();
    if files.is_empty() {
        return Err(listing_err("repository has no files".into()));
    }
    Ok(files)
}

/// Joins a hub-relative path onto `dest`, rejecting anything that would
/// climb out of it.
fn safe_join(dest: &Path, file: &str) -> Result<PathBuf, FetchError> {
    let rel = Path::new(file);
    let clean = rel
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !clean || file.is_empty() {
        return Err(FetchError::UnsafePath(file.to_string()));
    }
    Ok(dest.join(rel))
}

fn is_present(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Streams `url` into `target`, calling `on_progress` every 64 KiB.
/// Returns the number of bytes written.
fn download_to(
    client: &reqwest::blocking::Client,
    url: &str,
    target: &Path,
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<u64, FetchError> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|source| FetchError::CreateDir {
        path: parent.to_path_buf(),
        source,
    })?;

    let mut response = client
        .get(url)
        .send()
        .map_err(|e| FetchError::Download(format!("GET {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(FetchError::Download(format!(
            "HTTP {} for {url}",
            response.status()
        )));
    }

    let total = response.content_length();
    let write_err = |source: std::io::Error| FetchError::Write {
        path: target.to_path_buf(),
        source,
    };

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
    let mut chunk = vec![0u8; 64 * 1024]; // 64 KiB
    let mut downloaded: u64 = 0;

    loop {
        match response.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                tmp.write_all(&chunk[..n]).map_err(write_err)?;
                downloaded += n as u64;
                if let Some(cb) = on_progress {
                    cb(downloaded, total);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(FetchError::Download(format!("Read error on {url}: {e}")));
            }
        }
    }

    tmp.flush().map_err(write_err)?;
    tmp.persist(target).map_err(|e| write_err(e.error))?;
    debug!(url, bytes = downloaded, "Downloaded");

    Ok(downloaded)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_id_validation() {
        assert!(is_valid_repo_id("vikp/surya_det3"));
        assert!(is_valid_repo_id("org-name/model.v2"));
        assert!(!is_valid_repo_id("surya_det3"));
        assert!(!is_valid_repo_id("a/b/c"));
        assert!(!is_valid_repo_id("/model"));
        assert!(!is_valid_repo_id("owner/"));
        assert!(!is_valid_repo_id("owner/../etc"));
        assert!(!is_valid_repo_id("owner/na me"));
    }

    #[test]
    fn endpoint_defaults_and_trims() {
        assert_eq!(endpoint_from(None), DEFAULT_ENDPOINT);
        assert_eq!(endpoint_from(Some("   ".into())), DEFAULT_ENDPOINT);
        assert_eq!(
            endpoint_from(Some("https://hub.internal/".into())),
            "https://hub.internal"
        );
    }

    #[test]
    fn blank_token_means_anonymous() {
        assert_eq!(token_from(None), None);
        assert_eq!(token_from(Some(String::new())), None);
        assert_eq!(token_from(Some("  \n".into())), None);
        assert_eq!(token_from(Some(" hf_abc \n".into())).as_deref(), Some("hf_abc"));
    }

    #[test]
    fn blank_token_sends_no_authorization_header() {
        let headers = auth_headers(Some(String::new())).unwrap();
        assert!(headers.get(reqwest::header::AUTHORIZATION).is_none());

        let headers = auth_headers(Some("hf_abc".into())).unwrap();
        assert_eq!(headers[reqwest::header::AUTHORIZATION], "Bearer hf_abc");
    }

    #[test]
    fn offline_flag_values() {
        assert!(offline_from(Some("1")));
        assert!(offline_from(Some("TRUE")));
        assert!(!offline_from(Some("0")));
        assert!(!offline_from(None));
    }

    #[test]
    fn file_url_layout() {
        assert_eq!(
            file_url("https://huggingface.co", "vikp/surya_rec2", "main", "config.json"),
            "https://huggingface.co/vikp/surya_rec2/resolve/main/config.json"
        );
    }

    #[test]
    fn safe_join_rejects_escapes() {
        let dest = Path::new("/app/models/layout");
        assert_eq!(
            safe_join(dest, "onnx/model.onnx").unwrap(),
            dest.join("onnx/model.onnx")
        );
        assert!(safe_join(dest, "../secrets").is_err());
        assert!(safe_join(dest, "/etc/passwd").is_err());
        assert!(safe_join(dest, "").is_err());
    }

    #[test]
    fn present_requires_content() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.bin");
        let full = dir.path().join("full.bin");
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&full, b"weights").unwrap();
        assert!(!is_present(&empty));
        assert!(is_present(&full));
        assert!(!is_present(&dir.path().join("missing.bin")));
    }

    #[test]
    fn invalid_repo_rejected_before_network() {
        let dir = tempfile::tempdir().unwrap();
        let err = fetch_snapshot("not-a-repo", DEFAULT_REVISION, dir.path(), None).unwrap_err();
        assert!(matches!(err, FetchError::InvalidRepoId(_)));
    }
}
