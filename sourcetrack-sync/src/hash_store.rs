//! Hash baseline store: a file-backed [`LocalChangeStore`].
//!
//! Persists a `BaselineFile` JSON document at
//! `<project>/.sourcetrack/orgs/<org_id>/local-baseline.json` mapping every tracked
//! project-relative path to the SHA-256 of its contents (CRLF normalized to LF).
//! Writes use an atomic `.tmp` + rename.
//!
//! Status compares a fresh scan of the package directories with the baseline and is
//! cached until a refresh or a commit. Scanning and hashing run on the blocking pool;
//! the baseline itself is read and written through `tokio::fs`.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use sourcetrack_core::error::store_io_err;
use sourcetrack_core::project::{self, STATE_DIR};
use sourcetrack_core::{ChangeState, CommitRequest, LocalChangeStore, LocalFileStatus, StoreError};

/// File name of the baseline inside the org state directory.
pub const BASELINE_FILE: &str = "local-baseline.json";

/// Relative path → SHA-256 hex digest.
pub type Baseline = BTreeMap<String, String>;

/// On-disk baseline payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BaselineFile {
    pub synced_at: DateTime<Utc>,
    pub files: Baseline,
}

impl BaselineFile {
    fn empty() -> Self {
        Self {
            synced_at: Utc::now(),
            files: Baseline::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// 1. Load / save
// ---------------------------------------------------------------------------

/// `<root>/.sourcetrack/orgs/<org_id>/local-baseline.json`
pub fn baseline_path_at(root: &Path, org_id: &str) -> PathBuf {
    project::org_state_dir_at(root, org_id).join(BASELINE_FILE)
}

/// Load the baseline; an absent file is an empty baseline.
pub async fn load_at(root: &Path, org_id: &str) -> Result<BaselineFile, StoreError> {
    let path = baseline_path_at(root, org_id);
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BaselineFile::empty()),
        Err(err) => return Err(store_io_err(&path, err)),
    };
    serde_json::from_str(&contents).map_err(|e| StoreError::Corrupt {
        path,
        message: e.to_string(),
    })
}

/// Save the baseline atomically: `<path>.tmp` then rename.
pub async fn save_at(root: &Path, org_id: &str, baseline: &BaselineFile) -> Result<(), StoreError> {
    let path = baseline_path_at(root, org_id);
    let Some(dir) = path.parent() else {
        return Err(store_io_err(
            path,
            std::io::Error::other("invalid baseline path"),
        ));
    };
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| store_io_err(dir, e))?;

    let json = serde_json::to_string_pretty(baseline).map_err(|e| StoreError::Corrupt {
        path: path.clone(),
        message: e.to_string(),
    })?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| store_io_err(&tmp, e))?;
    tokio::fs::rename(&tmp, &path)
        .await
        .map_err(|e| store_io_err(&path, e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// 2. Hashing and scanning
// ---------------------------------------------------------------------------

/// SHA-256 hex of the file contents with CRLF normalized to LF.
pub fn hash_file(path: &Path) -> Result<String, StoreError> {
    let bytes = std::fs::read(path).map_err(|e| store_io_err(path, e))?;
    let mut normalized = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().peekable();
    while let Some(&b) = iter.next() {
        if b == b'\r' && iter.peek() == Some(&&b'\n') {
            continue;
        }
        normalized.push(b);
    }
    let mut hasher = Sha256::new();
    hasher.update(&normalized);
    Ok(hex::encode(hasher.finalize()))
}

/// Hash every file under the given package directories.
///
/// Missing package directories are skipped; the state directory is never scanned.
pub fn scan_at(root: &Path, package_paths: &[String]) -> Result<Baseline, StoreError> {
    let mut found = Baseline::new();
    for package in package_paths {
        walk(root, &root.join(package), &mut found)?;
    }
    Ok(found)
}

fn walk(root: &Path, dir: &Path, found: &mut Baseline) -> Result<(), StoreError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(store_io_err(dir, err)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| store_io_err(dir, e))?;
        let path = entry.path();
        if entry.file_name() == STATE_DIR {
            continue;
        }
        let file_type = entry.file_type().map_err(|e| store_io_err(&path, e))?;
        if file_type.is_dir() {
            walk(root, &path, found)?;
        } else if file_type.is_file() {
            let relative = project::relative_to_root(&path.to_string_lossy(), root);
            found.insert(relative, hash_file(&path)?);
        }
    }
    Ok(())
}

/// Run filesystem-heavy work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StoreError::Background(e.to_string()))?
}

/// Classify `current` against `baseline`. Sorted by path.
pub fn compare(baseline: &Baseline, current: &Baseline) -> Vec<LocalFileStatus> {
    let mut statuses: Vec<LocalFileStatus> = Vec::new();
    for (path, hash) in current {
        match baseline.get(path) {
            None => statuses.push(LocalFileStatus {
                path: path.clone(),
                state: ChangeState::Add,
            }),
            Some(expected) if expected != hash => statuses.push(LocalFileStatus {
                path: path.clone(),
                state: ChangeState::Modify,
            }),
            Some(_) => {}
        }
    }
    for path in baseline.keys().filter(|p| !current.contains_key(*p)) {
        statuses.push(LocalFileStatus {
            path: path.clone(),
            state: ChangeState::Delete,
        });
    }
    statuses.sort_by(|a, b| a.path.cmp(&b.path));
    statuses
}

// ---------------------------------------------------------------------------
// 3. Store
// ---------------------------------------------------------------------------

/// File-backed local store for one (project, org).
pub struct HashBaselineStore {
    root: PathBuf,
    org_id: String,
    package_paths: Vec<String>,
    cache: Mutex<Option<Vec<LocalFileStatus>>>,
}

impl HashBaselineStore {
    pub fn new(root: impl Into<PathBuf>, org_id: impl Into<String>, package_paths: Vec<String>) -> Self {
        Self {
            root: root.into(),
            org_id: org_id.into(),
            package_paths,
            cache: Mutex::new(None),
        }
    }

    pub fn baseline_path(&self) -> PathBuf {
        baseline_path_at(&self.root, &self.org_id)
    }

    async fn filenames_where(
        &self,
        keep: impl Fn(ChangeState) -> bool,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .get_status(false)
            .await?
            .into_iter()
            .filter(|s| keep(s.state))
            .map(|s| s.path)
            .collect())
    }
}

#[async_trait]
impl LocalChangeStore for HashBaselineStore {
    async fn get_status(&self, refresh: bool) -> Result<Vec<LocalFileStatus>, StoreError> {
        let mut cache = self.cache.lock().await;
        if let Some(statuses) = cache.as_ref().filter(|_| !refresh) {
            return Ok(statuses.clone());
        }
        let baseline = load_at(&self.root, &self.org_id).await?;
        let (root, packages) = (self.root.clone(), self.package_paths.clone());
        let current = blocking(move || scan_at(&root, &packages)).await?;
        let statuses = compare(&baseline.files, &current);
        tracing::debug!(
            tracked = baseline.files.len(),
            scanned = current.len(),
            changed = statuses.len(),
            "local status computed"
        );
        *cache = Some(statuses.clone());
        Ok(statuses)
    }

    async fn get_non_delete_filenames(&self) -> Result<Vec<String>, StoreError> {
        self.filenames_where(|s| s != ChangeState::Delete).await
    }

    async fn get_delete_filenames(&self) -> Result<Vec<String>, StoreError> {
        self.filenames_where(|s| s == ChangeState::Delete).await
    }

    async fn get_add_filenames(&self) -> Result<Vec<String>, StoreError> {
        self.filenames_where(|s| s == ChangeState::Add).await
    }

    async fn get_modify_filenames(&self) -> Result<Vec<String>, StoreError> {
        self.filenames_where(|s| s == ChangeState::Modify).await
    }

    async fn commit_changes(&self, request: CommitRequest) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().await;
        let mut baseline = load_at(&self.root, &self.org_id).await?;
        let (root, deployed) = (self.root.clone(), request.deployed_files.clone());
        let hashed: Vec<(String, Option<String>)> = blocking(move || {
            deployed
                .into_iter()
                .map(|file| {
                    let path = root.join(&file);
                    if path.is_file() {
                        hash_file(&path).map(|hash| (file, Some(hash)))
                    } else {
                        Ok((file, None))
                    }
                })
                .collect()
        })
        .await?;
        for (file, hash) in hashed {
            match hash {
                Some(hash) => {
                    baseline.files.insert(file, hash);
                }
                None => {
                    baseline.files.remove(&file);
                }
            }
        }
        for file in &request.deleted_files {
            baseline.files.remove(file);
        }
        baseline.synced_at = Utc::now();
        save_at(&self.root, &self.org_id, &baseline).await?;
        *cache = None;
        tracing::debug!(
            deployed = request.deployed_files.len(),
            deleted = request.deleted_files.len(),
            message = request.message.as_deref().unwrap_or(""),
            "local baseline committed"
        );
        Ok(())
    }

    async fn delete(&self) -> Result<PathBuf, StoreError> {
        let mut cache = self.cache.lock().await;
        let path = self.baseline_path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(store_io_err(&path, err)),
        }
        *cache = None;
        Ok(path)
    }
}
