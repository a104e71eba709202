//! Tracking updates after a completed deploy or retrieve.
//!
//! The local baseline and the remote cursor are only ever advanced here (apart from
//! explicit reset/delete). Local and remote updates run concurrently; when exactly
//! one side fails the error says which side was committed. Nothing is rolled back.

use std::collections::BTreeMap;
use std::io::ErrorKind;

use sourcetrack_core::{
    project, ChangeOrigin, CommitRequest, Component, ComponentSet, ComponentStatus, DeployResult,
    FileResponse, RemoteSyncInput, ResolveTree, RetrieveResult, StateFilter,
};

use crate::classify::{component_files, path_string, resolve_each, ChangeFormat, ChangeQuery};
use crate::error::{io_err, TrackingError, TrackingSide};
use crate::session::SourceTracking;

// ---------------------------------------------------------------------------
// 1. Pure helpers
// ---------------------------------------------------------------------------

/// Pending deletes implied by deploying part of a bundle.
///
/// For every bundle directory that has at least one file in `files`, its members in
/// `pending_deletes` that are not themselves in `files` are implied deletions.
pub fn bundle_implied_deletions(
    bundle_dirs: &[String],
    pending_deletes: &[String],
    files: &[String],
) -> Vec<String> {
    let mut implied = Vec::new();
    for dir in bundle_dirs {
        if !files.iter().any(|f| project::path_is_in_folder(f, dir)) {
            continue;
        }
        for pending in pending_deletes {
            if project::path_is_in_folder(pending, dir)
                && !files.contains(pending)
                && !implied.contains(pending)
            {
                implied.push(pending.clone());
            }
        }
    }
    implied
}

/// Combine the outcomes of a paired local/remote update.
///
/// If both sides fail the local error is returned and the remote one is logged.
pub fn settle(
    local: Result<(), TrackingError>,
    remote: Result<(), TrackingError>,
) -> Result<(), TrackingError> {
    match (local, remote) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(err)) => Err(TrackingError::PartialTrackingUpdate {
            committed: TrackingSide::Local,
            source: Box::new(err),
        }),
        (Err(err), Ok(())) => Err(TrackingError::PartialTrackingUpdate {
            committed: TrackingSide::Remote,
            source: Box::new(err),
        }),
        (Err(local), Err(remote)) => {
            tracing::warn!(error = %remote, "remote tracking update failed alongside local");
            Err(local)
        }
    }
}

fn deleted_input(component: &Component) -> RemoteSyncInput {
    RemoteSyncInput {
        type_name: component.type_name.clone(),
        full_name: component.full_name.clone(),
        state: ComponentStatus::Deleted,
        file_path: None,
    }
}

/// Outcome of [`SourceTracking::maybe_apply_remote_deletes_to_local`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDeletesApplied {
    /// Remote non-deletes, ready to retrieve.
    pub component_set: ComponentSet,
    /// One Deleted response per removed local file, when requested.
    pub file_responses: Option<Vec<FileResponse>>,
}

// ---------------------------------------------------------------------------
// 2. Session operations
// ---------------------------------------------------------------------------

impl SourceTracking {
    /// Commit `files` and `deleted_files` to the local baseline.
    ///
    /// Paths may be absolute or project-relative. Pending-delete members of a bundle
    /// that has another member in `files` are committed as deleted too.
    pub async fn update_local_tracking(
        &self,
        files: &[String],
        deleted_files: &[String],
    ) -> Result<(), TrackingError> {
        let store = self.ensure_local_tracking().await?;
        let root = self.project_root();
        let files: Vec<String> = files
            .iter()
            .map(|f| project::relative_to_root(f, root))
            .collect();
        let mut deleted: Vec<String> = deleted_files
            .iter()
            .map(|f| project::relative_to_root(f, root))
            .collect();

        if !files.is_empty() {
            let pending = store.get_delete_filenames().await?;
            if !pending.is_empty() {
                let registry = self.registry.as_ref();
                let bundle_dirs: Vec<String> =
                    resolve_each(registry, &pending, ResolveTree::Virtual(&pending))
                        .into_iter()
                        .filter(|c| registry.is_bundle(c))
                        .filter_map(|c| c.content.as_deref().map(|d| path_string(d, root)))
                        .collect();
                for file in bundle_implied_deletions(&bundle_dirs, &pending, &files) {
                    if !deleted.contains(&file) {
                        deleted.push(file);
                    }
                }
            }
        }

        let (changed_count, deleted_count) = (files.len(), deleted.len());
        store
            .commit_changes(CommitRequest {
                deployed_files: files,
                deleted_files: deleted,
                message: None,
            })
            .await?;
        tracing::info!(
            changed = changed_count,
            deleted = deleted_count,
            "local tracking updated"
        );
        Ok(())
    }

    /// Advance the remote cursor for exactly `elements`, polling first unless skipped.
    pub async fn update_remote_tracking(
        &self,
        elements: &[RemoteSyncInput],
        skip_polling: bool,
    ) -> Result<(), TrackingError> {
        let store = self.ensure_remote_tracking().await?;
        if elements.is_empty() {
            return Ok(());
        }
        if !skip_polling {
            store.poll_for_source_tracking(elements).await?;
        }
        store.sync_specified_elements(elements).await?;
        tracing::info!(
            org = %self.org().org_id,
            count = elements.len(),
            "remote tracking updated"
        );
        Ok(())
    }

    /// Remote half of a composite update; a no-op for orgs that do not track source.
    async fn update_remote_if_tracked(
        &self,
        elements: &[RemoteSyncInput],
        skip_polling: bool,
    ) -> Result<(), TrackingError> {
        if !self.org().tracks_source {
            tracing::debug!(org = %self.org().org_id, "org does not track source, skipping remote update");
            return Ok(());
        }
        self.update_remote_tracking(elements, skip_polling).await
    }

    /// Delete every source file of `components` and record the deletions on both sides.
    ///
    /// Files already missing are skipped. Any other I/O failure aborts the batch;
    /// files deleted before it are not restored.
    pub async fn delete_files_and_update_tracking(
        &self,
        components: &ComponentSet,
    ) -> Result<Vec<FileResponse>, TrackingError> {
        if components.is_empty() {
            return Ok(Vec::new());
        }

        let root = self.project_root();
        let mut owners: BTreeMap<String, &Component> = BTreeMap::new();
        for component in components.source_components() {
            for file in component_files(self.registry.as_ref(), component, root) {
                owners.entry(file).or_insert(component);
            }
        }

        for file in owners.keys() {
            let path = root.join(file);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    tracing::debug!(path = %file, "file already gone");
                }
                Err(err) => return Err(io_err(path, err)),
            }
        }

        let files: Vec<String> = owners.keys().cloned().collect();
        let inputs: Vec<RemoteSyncInput> =
            components.source_components().map(deleted_input).collect();
        let (local, remote) = tokio::join!(
            self.update_local_tracking(&[], &files),
            self.update_remote_if_tracked(&inputs, true)
        );
        settle(local, remote)?;

        Ok(owners
            .into_iter()
            .map(|(file, component)| FileResponse {
                type_name: component.type_name.clone(),
                full_name: component.full_name.clone(),
                state: ComponentStatus::Deleted,
                file_path: Some(file),
                error: None,
            })
            .collect())
    }

    /// Record a successful deploy: successes with a path only, remote side polled.
    pub async fn update_tracking_from_deploy(
        &self,
        result: &DeployResult,
    ) -> Result<(), TrackingError> {
        let successes: Vec<&FileResponse> = result
            .file_responses
            .iter()
            .filter(|r| r.state.is_success() && r.file_path.is_some())
            .collect();
        if successes.is_empty() {
            return Ok(());
        }

        let (deleted, changed): (Vec<&FileResponse>, Vec<&FileResponse>) = successes
            .iter()
            .copied()
            .partition(|r| r.state == ComponentStatus::Deleted);
        let paths = |responses: Vec<&FileResponse>| -> Vec<String> {
            responses
                .into_iter()
                .filter_map(|r| r.file_path.clone())
                .collect()
        };
        let (deleted, changed) = (paths(deleted), paths(changed));
        let inputs: Vec<RemoteSyncInput> = successes.iter().map(|r| RemoteSyncInput::from(*r)).collect();

        tracing::debug!(deploy = %result.id, files = successes.len(), "updating tracking from deploy");
        let (local, remote) = tokio::join!(
            self.update_local_tracking(&changed, &deleted),
            self.update_remote_if_tracked(&inputs, false)
        );
        settle(local, remote)
    }

    /// Record a successful retrieve. The remote side is not polled.
    pub async fn update_tracking_from_retrieve(
        &self,
        result: &RetrieveResult,
    ) -> Result<(), TrackingError> {
        let successes: Vec<&FileResponse> = result
            .file_responses
            .iter()
            .filter(|r| r.state.is_success())
            .collect();
        if successes.is_empty() {
            return Ok(());
        }

        let files: Vec<String> = successes
            .iter()
            .filter_map(|r| r.file_path.clone())
            .collect();
        let inputs: Vec<RemoteSyncInput> = successes.iter().map(|r| RemoteSyncInput::from(*r)).collect();

        tracing::debug!(retrieve = %result.id, files = successes.len(), "updating tracking from retrieve");
        let (local, remote) = tokio::join!(
            self.update_local_tracking(&files, &[]),
            self.update_remote_if_tracked(&inputs, true)
        );
        settle(local, remote)
    }

    /// Delete local source for components deleted remotely, then return the remote
    /// non-deletes as a set (ignore rules applied).
    pub async fn maybe_apply_remote_deletes_to_local(
        &self,
        return_delete_responses: bool,
    ) -> Result<RemoteDeletesApplied, TrackingError> {
        let (deletes, component_set) = tokio::try_join!(
            self.get_changes(ChangeQuery::new(
                ChangeOrigin::Remote,
                StateFilter::Delete,
                ChangeFormat::Components,
            )),
            self.remote_non_deletes_as_component_set(true)
        )?;

        let delete_set: ComponentSet = deletes.into_components().unwrap_or_default().into_iter().collect();
        if !delete_set.is_empty() {
            tracing::info!(count = delete_set.len(), "applying remote deletes locally");
        }
        let responses = self.delete_files_and_update_tracking(&delete_set).await?;

        Ok(RemoteDeletesApplied {
            component_set,
            file_responses: return_delete_responses.then_some(responses),
        })
    }
}
