//! Project configuration and runtime tracking options.
//!
//! # Storage layout
//!
//! ```text
//! <project>/
//!   sourcetrack-project.yaml   (package directories, api version, push defaults)
//!   .sourcetrack/              (tracking state, owned by the stores)
//! ```
//!
//! # API pattern
//!
//! `load_at(root)` / `save_at(root, config)` take the project root explicitly so tests
//! can point them at a `TempDir`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProjectError;

/// File name of the project configuration, relative to the project root.
pub const PROJECT_FILE: &str = "sourcetrack-project.yaml";

/// Directory (relative to the project root) where tracking state lives.
pub const STATE_DIR: &str = ".sourcetrack";

// ---------------------------------------------------------------------------
// 1. Types
// ---------------------------------------------------------------------------

/// One package directory declared by the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDirectory {
    /// Project-relative, `/`-separated path.
    pub path: String,
    #[serde(default)]
    pub default: bool,
}

impl PackageDirectory {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            default: false,
        }
    }

    /// Whether `file` (project-relative) lives inside this directory.
    pub fn contains(&self, file: &str) -> bool {
        path_is_in_folder(file, &self.path)
    }
}

/// Root of `sourcetrack-project.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub package_directories: Vec<PackageDirectory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_api_version: Option<String>,
    /// Project-level default for partitioning local changes by package directory.
    #[serde(default)]
    pub push_package_directories_sequentially: bool,
}

impl ProjectConfig {
    pub fn new(package_directories: Vec<PackageDirectory>) -> Self {
        Self {
            package_directories,
            source_api_version: None,
            push_package_directories_sequentially: false,
        }
    }

    pub fn has_multiple_package_directories(&self) -> bool {
        self.package_directories.len() > 1
    }

    pub fn package_paths(&self) -> Vec<String> {
        self.package_directories
            .iter()
            .map(|dir| dir.path.clone())
            .collect()
    }
}

/// Remote poll budget used after a deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
    /// Skip polling entirely. A sync then skips identities the cursor has never
    /// seen, so a component deployed for the first time later shows up as a remote
    /// add.
    pub disabled: bool,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
            disabled: false,
        }
    }
}

/// Runtime options of a tracking session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingOptions {
    /// Register with the operation lifecycle so conflicts and tracking run automatically.
    pub subscribe_operation_events: bool,
    /// Never fail an operation because of conflicts.
    pub ignore_conflicts: bool,
    /// Re-scan the filesystem instead of trusting a cached local status on first use.
    pub ignore_local_cache: bool,
    pub poll: PollSettings,
}

// ---------------------------------------------------------------------------
// 2. Path helpers
// ---------------------------------------------------------------------------

/// `<root>/sourcetrack-project.yaml`, pure, no I/O.
pub fn config_path_at(root: &Path) -> PathBuf {
    root.join(PROJECT_FILE)
}

/// `<root>/.sourcetrack/orgs/<org_id>/`, pure, no I/O.
pub fn org_state_dir_at(root: &Path, org_id: &str) -> PathBuf {
    root.join(STATE_DIR).join("orgs").join(org_id)
}

/// Segment-aware containment for `/`-separated relative paths.
pub fn path_is_in_folder(file: &str, folder: &str) -> bool {
    let folder = folder.trim_end_matches('/');
    folder.is_empty() || file == folder || file.starts_with(&format!("{folder}/"))
}

/// Make `path` relative to `root` and `/`-separated.
///
/// Paths outside `root` are returned unchanged apart from separator normalization.
pub fn relative_to_root(path: &str, root: &Path) -> String {
    let candidate = Path::new(path);
    let relative = candidate.strip_prefix(root).unwrap_or(candidate);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

// ---------------------------------------------------------------------------
// 3. Load / save
// ---------------------------------------------------------------------------

/// Load `<root>/sourcetrack-project.yaml`.
///
/// Returns `ProjectError::NotFound` if absent, `ProjectError::Parse` (with path and line
/// context) if malformed, and `ProjectError::NoPackageDirectories` if the list is empty.
pub fn load_at(root: &Path) -> Result<ProjectConfig, ProjectError> {
    let path = config_path_at(root);
    if !path.exists() {
        return Err(ProjectError::NotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    let config: ProjectConfig =
        serde_yaml::from_str(&contents).map_err(|e| ProjectError::Parse {
            path: path.clone(),
            source: e,
        })?;
    if config.package_directories.is_empty() {
        return Err(ProjectError::NoPackageDirectories { path });
    }
    Ok(config)
}

/// Atomically save the config: serialize → `.yaml.tmp` sibling → `rename`.
pub fn save_at(root: &Path, config: &ProjectConfig) -> Result<(), ProjectError> {
    std::fs::create_dir_all(root)?;
    let path = config_path_at(root);
    let tmp_path = path.with_extension("yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
