//! Three-way conflict detection.
//!
//! A conflict is a component changed locally and remotely since the last sync.
//! Local changes are matched to remote ones by identity, or by filename when the
//! local file cannot be resolved to a component.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use sourcetrack_core::{ChangeOrigin, ChangeResult, ComponentKey, ComponentSet, Conflict, IgnoreRules, StateFilter};

use crate::classify::{ChangeFormat, ChangeQuery};
use crate::error::TrackingError;
use crate::session::SourceTracking;

/// Intersect local and remote changes into one conflict per remote identity.
///
/// Ignored files are left out of each conflict's filename set. Output is sorted by
/// identity and independent of input order.
pub fn dedupe_conflicts(
    local: &[ChangeResult],
    remote: &[ChangeResult],
    ignore: &dyn IgnoreRules,
) -> Vec<Conflict> {
    let mut by_key: HashMap<ComponentKey, &ChangeResult> = HashMap::new();
    let mut by_file: HashMap<&str, &ChangeResult> = HashMap::new();
    for change in remote {
        if let Some(key) = change.key() {
            by_key.insert(key, change);
        }
        for file in &change.filenames {
            by_file.insert(file.as_str(), change);
        }
    }

    let mut found: BTreeMap<ComponentKey, BTreeSet<String>> = BTreeMap::new();
    for change in local {
        let hit = change
            .key()
            .and_then(|k| by_key.get(&k).copied())
            .or_else(|| {
                change
                    .filenames
                    .iter()
                    .find_map(|f| by_file.get(f.as_str()).copied())
            });
        let Some(remote_change) = hit else {
            continue;
        };
        let Some(key) = remote_change.key() else {
            continue;
        };
        found.entry(key).or_default().extend(
            remote_change
                .filenames
                .iter()
                .filter(|f| !ignore.denies(f))
                .cloned(),
        );
    }

    found
        .into_iter()
        .map(|(key, filenames)| Conflict {
            type_name: key.type_name,
            name: key.full_name,
            filenames,
        })
        .collect()
}

/// `Err(Conflicts)` when the list is non-empty.
pub fn throw_if_conflicts(conflicts: Vec<Conflict>) -> Result<(), TrackingError> {
    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(TrackingError::Conflicts(conflicts))
    }
}

/// Conflicts whose component is part of `set`.
pub fn conflicts_in_component_set(set: &ComponentSet, conflicts: Vec<Conflict>) -> Vec<Conflict> {
    conflicts
        .into_iter()
        .filter(|c| set.contains_key(&c.key()))
        .collect()
}

impl SourceTracking {
    /// Components changed on both sides since the last sync.
    ///
    /// The remote side is only queried when there are local changes.
    pub async fn get_conflicts(&self) -> Result<Vec<Conflict>, TrackingError> {
        tokio::try_join!(self.ensure_local_tracking(), self.ensure_remote_tracking())?;

        let local = self
            .get_changes(ChangeQuery::new(
                ChangeOrigin::Local,
                StateFilter::NonDelete,
                ChangeFormat::ChangeResults,
            ))
            .await?
            .into_change_results()
            .unwrap_or_default();
        if local.is_empty() {
            return Ok(Vec::new());
        }

        let remote = self
            .get_changes(ChangeQuery::new(
                ChangeOrigin::Remote,
                StateFilter::NonDelete,
                ChangeFormat::ChangeResultsWithPaths,
            ))
            .await?
            .into_change_results()
            .unwrap_or_default();
        if remote.is_empty() {
            return Ok(Vec::new());
        }

        let local = self.populate_types_and_names(local, false, false)?;
        let conflicts = dedupe_conflicts(&local, &remote, self.ignore.as_ref());
        if !conflicts.is_empty() {
            tracing::debug!(count = conflicts.len(), "conflicts detected");
        }
        Ok(conflicts)
    }
}
