//! The tracking session: one project, one org, two lazily-opened stores.
//!
//! Every reconciliation operation is a method on [`SourceTracking`]; the method
//! bodies live in the module that owns the concern (`classify`, `assemble`,
//! `conflicts`, `tracking`, `status`).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;

use sourcetrack_core::{
    project, AcceptAll, IgnoreRules, LocalChangeStore, MetadataRegistry, OrgTarget, ProjectConfig,
    RemoteChangeStore, StoreContext, StoreProvider, TrackingOptions,
};

use crate::error::TrackingError;

/// A reconciliation session for one (project, org) pair.
pub struct SourceTracking {
    ctx: StoreContext,
    pub(crate) registry: Arc<dyn MetadataRegistry>,
    pub(crate) ignore: Arc<dyn IgnoreRules>,
    provider: Arc<dyn StoreProvider>,
    options: TrackingOptions,
    ignore_conflicts: AtomicBool,
    local: OnceCell<Arc<dyn LocalChangeStore>>,
    remote: OnceCell<Arc<dyn RemoteChangeStore>>,
}

impl std::fmt::Debug for SourceTracking {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceTracking")
            .field("project_root", &self.ctx.project_root)
            .field("org", &self.ctx.org)
            .field("options", &self.options)
            .field("local_open", &self.local.initialized())
            .field("remote_open", &self.remote.initialized())
            .finish()
    }
}

impl SourceTracking {
    /// Load `<project_root>/sourcetrack-project.yaml` and build a session.
    ///
    /// No store is opened here; each is opened on first use.
    pub fn new(
        project_root: impl Into<PathBuf>,
        org: OrgTarget,
        registry: Arc<dyn MetadataRegistry>,
        provider: Arc<dyn StoreProvider>,
        options: TrackingOptions,
    ) -> Result<Self, TrackingError> {
        let project_root = project_root.into();
        let config = project::load_at(&project_root)?;
        Ok(Self::with_config(
            project_root,
            config,
            org,
            registry,
            provider,
            options,
        ))
    }

    /// Build a session from an already-loaded project config.
    pub fn with_config(
        project_root: impl Into<PathBuf>,
        config: ProjectConfig,
        org: OrgTarget,
        registry: Arc<dyn MetadataRegistry>,
        provider: Arc<dyn StoreProvider>,
        options: TrackingOptions,
    ) -> Self {
        let ctx = StoreContext {
            project_root: project_root.into(),
            project: config,
            org,
            poll: options.poll,
        };
        Self {
            ctx,
            registry,
            ignore: Arc::new(AcceptAll),
            provider,
            ignore_conflicts: AtomicBool::new(options.ignore_conflicts),
            options,
            local: OnceCell::new(),
            remote: OnceCell::new(),
        }
    }

    /// Replace the ignore rules (default: accept every path).
    pub fn with_ignore(mut self, ignore: Arc<dyn IgnoreRules>) -> Self {
        self.ignore = ignore;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.ctx.project_root
    }

    pub fn project(&self) -> &ProjectConfig {
        &self.ctx.project
    }

    pub fn org(&self) -> &OrgTarget {
        &self.ctx.org
    }

    pub fn options(&self) -> &TrackingOptions {
        &self.options
    }

    pub fn ignore_conflicts(&self) -> bool {
        self.ignore_conflicts.load(Ordering::SeqCst)
    }

    pub fn set_ignore_conflicts(&self, value: bool) {
        self.ignore_conflicts.store(value, Ordering::SeqCst);
    }

    // -----------------------------------------------------------------------
    // Store initialization
    // -----------------------------------------------------------------------

    /// Open the local store on first call; later calls return the same instance.
    pub async fn ensure_local_tracking(&self) -> Result<Arc<dyn LocalChangeStore>, TrackingError> {
        let store = self
            .local
            .get_or_try_init(|| async {
                let store = self.provider.open_local(&self.ctx).await?;
                store.get_status(self.options.ignore_local_cache).await?;
                tracing::debug!(
                    project = %self.ctx.project_root.display(),
                    "local tracking store opened"
                );
                Ok::<_, TrackingError>(store)
            })
            .await?;
        Ok(Arc::clone(store))
    }

    /// Open the remote store on first call.
    ///
    /// Fails with [`TrackingError::NotSourceTracked`] when the org does not track source.
    pub async fn ensure_remote_tracking(
        &self,
    ) -> Result<Arc<dyn RemoteChangeStore>, TrackingError> {
        if !self.ctx.org.tracks_source {
            return Err(TrackingError::NotSourceTracked {
                org_id: self.ctx.org.org_id.clone(),
            });
        }
        let store = self
            .remote
            .get_or_try_init(|| async {
                let store = self.provider.open_remote(&self.ctx).await?;
                tracing::debug!(org = %self.ctx.org.org_id, "remote tracking store opened");
                Ok::<_, TrackingError>(store)
            })
            .await?;
        Ok(Arc::clone(store))
    }

    // -----------------------------------------------------------------------
    // Cache and reset operations
    // -----------------------------------------------------------------------

    /// Discard the local store's cached status and rescan.
    pub async fn re_read_local_tracking_cache(&self) -> Result<(), TrackingError> {
        let store = self.ensure_local_tracking().await?;
        store.get_status(true).await?;
        Ok(())
    }

    /// Accept every current local change as the new baseline.
    ///
    /// Returns the files that were committed (changed and deleted).
    pub async fn reset_local_tracking(&self) -> Result<Vec<String>, TrackingError> {
        let store = self.ensure_local_tracking().await?;
        let (deletes, non_deletes) =
            tokio::try_join!(store.get_delete_filenames(), store.get_non_delete_filenames())?;
        store
            .commit_changes(sourcetrack_core::CommitRequest {
                deployed_files: non_deletes.clone(),
                deleted_files: deletes.clone(),
                message: Some("reset local tracking".into()),
            })
            .await?;
        tracing::info!(
            changed = non_deletes.len(),
            deleted = deletes.len(),
            "local tracking reset"
        );
        let mut files = non_deletes;
        files.extend(deletes);
        Ok(files)
    }

    /// Mark remote members synced, optionally only up to `revision`.
    ///
    /// Returns how many members were reset.
    pub async fn reset_remote_tracking(
        &self,
        revision: Option<i64>,
    ) -> Result<usize, TrackingError> {
        let store = self.ensure_remote_tracking().await?;
        let members = store.reset(revision).await?;
        tracing::info!(
            org = %self.ctx.org.org_id,
            revision = ?revision,
            members = members.len(),
            "remote tracking reset"
        );
        Ok(members.len())
    }

    /// Remove the persisted local baseline. Returns the removed path.
    pub async fn delete_local_tracking(&self) -> Result<PathBuf, TrackingError> {
        let store = self.ensure_local_tracking().await?;
        Ok(store.delete().await?)
    }

    /// Remove the persisted remote cursor without opening the remote store.
    pub async fn delete_remote_tracking(&self) -> Result<PathBuf, TrackingError> {
        Ok(self.provider.delete_remote(&self.ctx).await?)
    }
}
