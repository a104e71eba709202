//! Interfaces to the two tracking stores and the provider that opens them.
//!
//! The local store answers "what changed on disk since the last commit"; the remote
//! store answers "what changed in the org since the recorded revision". Both are
//! single-writer per (org, project) and take `&self`; implementations use interior
//! mutability.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::project::{PollSettings, ProjectConfig};
use crate::types::{ChangeState, OrgTarget, RemoteChangeElement, RemoteSyncInput};

/// One file the local store reports as changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileStatus {
    pub path: String,
    pub state: ChangeState,
}

/// A new baseline for the local store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitRequest {
    pub deployed_files: Vec<String>,
    pub deleted_files: Vec<String>,
    pub message: Option<String>,
}

#[async_trait]
pub trait LocalChangeStore: Send + Sync {
    /// Current status; `refresh` discards any cached scan.
    async fn get_status(&self, refresh: bool) -> Result<Vec<LocalFileStatus>, StoreError>;

    async fn get_non_delete_filenames(&self) -> Result<Vec<String>, StoreError>;

    async fn get_delete_filenames(&self) -> Result<Vec<String>, StoreError>;

    async fn get_add_filenames(&self) -> Result<Vec<String>, StoreError>;

    async fn get_modify_filenames(&self) -> Result<Vec<String>, StoreError>;

    async fn commit_changes(&self, request: CommitRequest) -> Result<(), StoreError>;

    /// Remove the persisted baseline and return the path that was removed.
    async fn delete(&self) -> Result<PathBuf, StoreError>;
}

#[async_trait]
pub trait RemoteChangeStore: Send + Sync {
    /// Elements changed since the recorded revision.
    async fn retrieve_updates(&self) -> Result<Vec<RemoteChangeElement>, StoreError>;

    /// Block until the org reports a new revision for every given element.
    async fn poll_for_source_tracking(&self, expected: &[RemoteSyncInput])
        -> Result<(), StoreError>;

    /// Mark exactly these elements as synced at their current revision.
    async fn sync_specified_elements(&self, elements: &[RemoteSyncInput])
        -> Result<(), StoreError>;

    /// Mark everything synced, optionally only up to `revision`. Returns the members reset.
    async fn reset(&self, revision: Option<i64>) -> Result<Vec<RemoteChangeElement>, StoreError>;
}

/// Everything a provider needs to open the stores of one session.
#[derive(Debug, Clone)]
pub struct StoreContext {
    pub project_root: PathBuf,
    pub project: ProjectConfig,
    pub org: OrgTarget,
    pub poll: PollSettings,
}

/// Constructs the stores of a session. Called at most once per store per session.
#[async_trait]
pub trait StoreProvider: Send + Sync {
    async fn open_local(&self, ctx: &StoreContext) -> Result<Arc<dyn LocalChangeStore>, StoreError>;

    async fn open_remote(&self, ctx: &StoreContext)
        -> Result<Arc<dyn RemoteChangeStore>, StoreError>;

    /// Remove the persisted remote cursor without opening the store.
    async fn delete_remote(&self, ctx: &StoreContext) -> Result<PathBuf, StoreError>;
}
