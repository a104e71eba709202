//! Component-set assembly for deploy and retrieve.
//!
//! Local changes become one or more [`ComponentSet`]s (one per package directory when
//! partitioning is on). Pending deletes become destructive entries, except for a
//! bundle that still has files on disk: deleting one member of a bundle is an update
//! of the bundle, not a delete of it.

use std::collections::BTreeSet;
use std::path::Path;

use sourcetrack_core::{
    project, ComponentKey, ComponentSet, MetadataRegistry, PackageDirectory, ResolveTree,
    StateFilter,
};

use crate::classify::{component_files, local_components_for, resolve_each};
use crate::error::TrackingError;
use crate::session::SourceTracking;

/// Local filenames belonging to one deploy group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileGroup {
    /// Package directory path, or `None` for the single unpartitioned group.
    pub package_dir: Option<String>,
    pub non_deletes: Vec<String>,
    pub deletes: Vec<String>,
}

impl FileGroup {
    pub fn is_empty(&self) -> bool {
        self.non_deletes.is_empty() && self.deletes.is_empty()
    }
}

/// Split files by package directory, or keep them as one group.
///
/// With partitioning every file lands in the first package directory containing it;
/// files outside every package directory are dropped with a warning. Empty groups
/// are removed.
pub fn partition_files(
    non_deletes: Vec<String>,
    deletes: Vec<String>,
    package_dirs: &[PackageDirectory],
    by_package_dir: bool,
) -> Vec<FileGroup> {
    if !by_package_dir {
        let group = FileGroup {
            package_dir: None,
            non_deletes,
            deletes,
        };
        return if group.is_empty() { Vec::new() } else { vec![group] };
    }

    let mut groups: Vec<FileGroup> = package_dirs
        .iter()
        .map(|dir| FileGroup {
            package_dir: Some(dir.path.clone()),
            ..FileGroup::default()
        })
        .collect();
    let owner = |file: &str| package_dirs.iter().position(|dir| dir.contains(file));

    for file in non_deletes {
        match owner(&file) {
            Some(i) => groups[i].non_deletes.push(file),
            None => tracing::warn!(path = %file, "file is outside every package directory"),
        }
    }
    for file in deletes {
        match owner(&file) {
            Some(i) => groups[i].deletes.push(file),
            None => tracing::warn!(path = %file, "file is outside every package directory"),
        }
    }
    groups.retain(|g| !g.is_empty());
    groups
}

/// Whether `dir` (project-relative) exists under `root` and holds at least one entry.
fn dir_has_files(root: &Path, dir: &str) -> bool {
    std::fs::read_dir(root.join(dir))
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Build the component set of one group.
pub fn build_component_set(
    registry: &dyn MetadataRegistry,
    root: &Path,
    group: &FileGroup,
    source_api_version: Option<String>,
) -> ComponentSet {
    let mut set = ComponentSet::new();
    set.source_api_version = source_api_version;

    let deleted = resolve_each(registry, &group.deletes, ResolveTree::Virtual(&group.deletes));
    for component in deleted {
        let surviving_bundle_dir = component
            .content
            .as_deref()
            .filter(|_| registry.is_bundle(&component))
            .map(|dir| project::relative_to_root(&dir.to_string_lossy(), root))
            .filter(|dir| dir_has_files(root, dir));
        if let Some(bundle_dir) = surviving_bundle_dir {
            tracing::debug!(
                component = %component.key(),
                "bundle still has files on disk, deploying instead of deleting"
            );
            for current in resolve_each(registry, &[bundle_dir], ResolveTree::Filesystem) {
                set.add(current);
            }
        } else {
            set.add_destructive(component);
        }
    }

    for component in resolve_each(registry, &group.non_deletes, ResolveTree::Filesystem) {
        set.add(component);
    }
    set
}

impl SourceTracking {
    /// Local changes grouped into component sets, ready to deploy.
    ///
    /// `by_package_dir` overrides the project's `push_package_directories_sequentially`
    /// default; partitioning only happens when the project has several package
    /// directories. Empty sets are never returned.
    pub async fn local_changes_as_component_sets(
        &self,
        by_package_dir: Option<bool>,
    ) -> Result<Vec<ComponentSet>, TrackingError> {
        let (non_deletes, deletes) = tokio::try_join!(
            self.local_filenames(StateFilter::NonDelete),
            self.local_filenames(StateFilter::Delete)
        )?;

        let project = self.project();
        let partition = by_package_dir.unwrap_or(project.push_package_directories_sequentially)
            && project.has_multiple_package_directories();
        let groups = partition_files(
            non_deletes,
            deletes,
            &project.package_directories,
            partition,
        );

        let sets: Vec<ComponentSet> = groups
            .iter()
            .map(|group| {
                build_component_set(
                    self.registry.as_ref(),
                    self.project_root(),
                    group,
                    project.source_api_version.clone(),
                )
            })
            .filter(|set| !set.is_empty())
            .collect();
        tracing::debug!(sets = sets.len(), "local changes assembled");
        Ok(sets)
    }

    /// Remote non-delete changes as one set, ready to retrieve.
    ///
    /// Components found locally are added with their source; remote changes with no
    /// local source are added by identity. With `apply_ignore`, components having any
    /// ignored file are left out. Identity-only entries have no local path to ignore
    /// and are always kept.
    pub async fn remote_non_deletes_as_component_set(
        &self,
        apply_ignore: bool,
    ) -> Result<ComponentSet, TrackingError> {
        let elements = self.remote_elements(StateFilter::NonDelete).await?;
        let mut set = ComponentSet::new();
        set.source_api_version = self.project().source_api_version.clone();
        if elements.is_empty() {
            return Ok(set);
        }

        let root = self.project_root();
        let registry = self.registry.as_ref();
        let keys: BTreeSet<ComponentKey> = elements.iter().map(|e| e.key()).collect();
        let components = local_components_for(registry, &self.project().package_paths(), &keys);
        for component in &components {
            let ignored = apply_ignore
                && component_files(registry, component, root)
                    .iter()
                    .any(|f| self.ignore.denies(f));
            if !ignored {
                set.add(component.clone());
            }
        }

        let found: BTreeSet<ComponentKey> = components.iter().map(|c| c.key()).collect();
        for key in keys.into_iter().filter(|k| !found.contains(k)) {
            set.add_key(key);
        }
        Ok(set)
    }
}
