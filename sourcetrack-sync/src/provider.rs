//! Default [`StoreProvider`]: file-backed stores under the project's state directory.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use sourcetrack_core::{LocalChangeStore, RemoteChangeStore, StoreContext, StoreError, StoreProvider};

use crate::hash_store::HashBaselineStore;
use crate::remote_store::{self, RevisionCursorStore, SourceMemberQuery};

/// Opens a [`HashBaselineStore`] and a [`RevisionCursorStore`] for a session.
pub struct FileStoreProvider {
    query: Arc<dyn SourceMemberQuery>,
}

impl FileStoreProvider {
    pub fn new(query: Arc<dyn SourceMemberQuery>) -> Self {
        Self { query }
    }
}

#[async_trait]
impl StoreProvider for FileStoreProvider {
    async fn open_local(&self, ctx: &StoreContext) -> Result<Arc<dyn LocalChangeStore>, StoreError> {
        Ok(Arc::new(HashBaselineStore::new(
            ctx.project_root.clone(),
            ctx.org.org_id.0.clone(),
            ctx.project.package_paths(),
        )))
    }

    async fn open_remote(&self, ctx: &StoreContext) -> Result<Arc<dyn RemoteChangeStore>, StoreError> {
        let store = RevisionCursorStore::open(
            ctx.project_root.clone(),
            ctx.org.org_id.0.clone(),
            Arc::clone(&self.query),
            ctx.poll,
        )
        .await?;
        Ok(Arc::new(store))
    }

    async fn delete_remote(&self, ctx: &StoreContext) -> Result<PathBuf, StoreError> {
        let path = remote_store::delete_at(&ctx.project_root, &ctx.org.org_id.0).await?;
        tracing::debug!(path = %path.display(), "remote cursor deleted");
        Ok(path)
    }
}
