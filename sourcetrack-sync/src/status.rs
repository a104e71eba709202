//! Unified status report across both sides.

use std::collections::BTreeSet;

use sourcetrack_core::{ChangeResult, ChangeState, IgnoreRules, StateFilter, StatusOutputRow};

use crate::classify::{filter_remote, ChangeFormat, Changes};
use crate::error::TrackingError;
use crate::session::SourceTracking;

/// One row per filename, or one path-less row for a change with no local file.
///
/// Changes without a resolved type, name and state produce no rows.
pub fn change_to_rows(change: &ChangeResult, ignore: &dyn IgnoreRules) -> Vec<StatusOutputRow> {
    let (Some(type_name), Some(full_name), Some(state)) =
        (&change.type_name, &change.name, change.state)
    else {
        return Vec::new();
    };
    let row = |file_path: Option<String>| StatusOutputRow {
        type_name: type_name.clone(),
        origin: change.origin,
        state,
        full_name: full_name.clone(),
        ignored: file_path.as_deref().map(|f| ignore.denies(f)),
        file_path,
        conflict: None,
    };
    if change.filenames.is_empty() {
        vec![row(None)]
    } else {
        change.filenames.iter().map(|f| row(Some(f.clone()))).collect()
    }
}

impl SourceTracking {
    /// Status rows for the requested sides.
    ///
    /// Local rows include ignored files, flagged. When both sides are requested each
    /// row is flagged `conflict` if its path belongs to a conflict.
    pub async fn get_status(
        &self,
        local: bool,
        remote: bool,
    ) -> Result<Vec<StatusOutputRow>, TrackingError> {
        let mut rows = Vec::new();
        if local {
            rows.extend(self.local_status_rows().await?);
        }
        if remote {
            rows.extend(self.remote_status_rows().await?);
        }
        if local && remote {
            let conflict_files: BTreeSet<String> = self
                .get_conflicts()
                .await?
                .into_iter()
                .flat_map(|c| c.filenames)
                .collect();
            for row in &mut rows {
                row.conflict = Some(
                    row.file_path
                        .as_ref()
                        .is_some_and(|p| conflict_files.contains(p)),
                );
            }
        }
        Ok(rows)
    }

    async fn local_status_rows(&self) -> Result<Vec<StatusOutputRow>, TrackingError> {
        let store = self.ensure_local_tracking().await?;
        let (adds, modifies, deletes) = tokio::try_join!(
            store.get_add_filenames(),
            store.get_modify_filenames(),
            store.get_delete_filenames()
        )?;

        let mut rows = Vec::new();
        for (state, files, resolve_deleted) in [
            (ChangeState::Add, adds, false),
            (ChangeState::Modify, modifies, false),
            (ChangeState::Delete, deletes, true),
        ] {
            let changes = files
                .into_iter()
                .map(|f| ChangeResult {
                    state: Some(state),
                    ..ChangeResult::local_file(f)
                })
                .collect();
            for change in self.populate_types_and_names(changes, true, resolve_deleted)? {
                rows.extend(change_to_rows(&change, self.ignore.as_ref()));
            }
        }
        Ok(rows)
    }

    async fn remote_status_rows(&self) -> Result<Vec<StatusOutputRow>, TrackingError> {
        let store = self.ensure_remote_tracking().await?;
        let elements = store.retrieve_updates().await?;
        let registry = self.registry.as_ref();
        let deletes = filter_remote(elements.clone(), StateFilter::Delete, registry);
        let non_deletes = filter_remote(elements, StateFilter::NonDelete, registry);

        let mut changes = Vec::new();
        for (elements, format) in [
            (deletes, ChangeFormat::ChangeResults),
            (non_deletes, ChangeFormat::ChangeResultsWithPaths),
        ] {
            if let Changes::ChangeResults(results) = self.shape_remote(&elements, format) {
                changes.extend(results);
            }
        }
        Ok(changes
            .iter()
            .flat_map(|c| change_to_rows(c, self.ignore.as_ref()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sourcetrack_core::{AcceptAll, ChangeOrigin};

    struct DenyMeta;

    impl IgnoreRules for DenyMeta {
        fn denies(&self, path: &str) -> bool {
            path.ends_with("-meta.xml")
        }
    }

    fn resolved(files: &[&str]) -> ChangeResult {
        ChangeResult {
            origin: ChangeOrigin::Remote,
            state: Some(ChangeState::Modify),
            type_name: Some("ApexClass".into()),
            name: Some("Foo".into()),
            filenames: files.iter().map(|f| f.to_string()).collect(),
            ignored: None,
        }
    }

    #[test]
    fn one_row_per_file_with_ignore_flag() {
        let rows = change_to_rows(
            &resolved(&["classes/Foo.cls", "classes/Foo.cls-meta.xml"]),
            &DenyMeta,
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].ignored, Some(false));
        assert_eq!(rows[1].ignored, Some(true));
        assert!(rows.iter().all(|r| r.full_name == "Foo" && r.conflict.is_none()));
    }

    #[test]
    fn path_less_change_gives_single_row() {
        let rows = change_to_rows(&resolved(&[]), &AcceptAll);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].file_path, None);
        assert_eq!(rows[0].ignored, None);
    }

    #[test]
    fn unresolved_change_gives_no_rows() {
        let change = ChangeResult {
            state: Some(ChangeState::Add),
            ..ChangeResult::local_file("unknown/thing.txt")
        };
        assert!(change_to_rows(&change, &AcceptAll).is_empty());
    }
}
