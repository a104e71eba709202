//! Change classification.
//!
//! Turns raw store output (local filenames, remote elements) into one of four
//! shapes chosen by [`ChangeFormat`]. Every shape of a query is derived from the
//! same filtered set, so the formats never disagree about which changes exist.
//!
//! Resolution failures and unsupported remote types are never errors here: they
//! are logged at `warn` and dropped.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use sourcetrack_core::{
    project, ChangeOrigin, ChangeResult, ChangeState, Component, ComponentKey, IgnoreRules,
    LocalChangeStore, MetadataRegistry, RemoteChangeElement, ResolveTree, StateFilter, StoreError,
};

use crate::error::TrackingError;
use crate::session::SourceTracking;

// ---------------------------------------------------------------------------
// 1. Request and result shapes
// ---------------------------------------------------------------------------

/// Output shape of a change query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeFormat {
    Filenames,
    ChangeResults,
    /// Remote results carry the local files backing each component.
    ChangeResultsWithPaths,
    Components,
}

impl fmt::Display for ChangeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeFormat::Filenames => write!(f, "filenames"),
            ChangeFormat::ChangeResults => write!(f, "changeresults"),
            ChangeFormat::ChangeResultsWithPaths => write!(f, "changeresultswithpaths"),
            ChangeFormat::Components => write!(f, "components"),
        }
    }
}

impl FromStr for ChangeFormat {
    type Err = TrackingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "filenames" => Ok(ChangeFormat::Filenames),
            "changeresults" => Ok(ChangeFormat::ChangeResults),
            "changeresultswithpaths" => Ok(ChangeFormat::ChangeResultsWithPaths),
            "components" | "sourcecomponents" => Ok(ChangeFormat::Components),
            other => Err(TrackingError::UnsupportedRequest(format!(
                "format '{other}'"
            ))),
        }
    }
}

/// Result of a change query, tagged by shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Changes {
    Filenames(Vec<String>),
    ChangeResults(Vec<ChangeResult>),
    Components(Vec<Component>),
}

impl Changes {
    pub fn len(&self) -> usize {
        match self {
            Changes::Filenames(v) => v.len(),
            Changes::ChangeResults(v) => v.len(),
            Changes::Components(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_filenames(self) -> Option<Vec<String>> {
        match self {
            Changes::Filenames(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_change_results(self) -> Option<Vec<ChangeResult>> {
        match self {
            Changes::ChangeResults(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_components(self) -> Option<Vec<Component>> {
        match self {
            Changes::Components(v) => Some(v),
            _ => None,
        }
    }
}

/// `(origin, state, format)` of a change query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeQuery {
    pub origin: ChangeOrigin,
    pub state: StateFilter,
    pub format: ChangeFormat,
}

impl ChangeQuery {
    pub fn new(origin: ChangeOrigin, state: StateFilter, format: ChangeFormat) -> Self {
        Self {
            origin,
            state,
            format,
        }
    }

    /// Parse the string form used by text-driven callers.
    ///
    /// An unknown state is a caller contract violation; an unknown origin or format
    /// is a request this engine does not implement.
    pub fn parse(origin: &str, state: &str, format: &str) -> Result<Self, TrackingError> {
        let origin = match origin.to_ascii_lowercase().as_str() {
            "local" => ChangeOrigin::Local,
            "remote" => ChangeOrigin::Remote,
            other => {
                return Err(TrackingError::UnsupportedRequest(format!(
                    "origin '{other}'"
                )))
            }
        };
        let state = match state.to_ascii_lowercase().as_str() {
            "add" => StateFilter::Add,
            "modify" => StateFilter::Modify,
            "delete" => StateFilter::Delete,
            "nondelete" => StateFilter::NonDelete,
            other => {
                return Err(TrackingError::InvariantViolation(format!(
                    "unrecognized change state '{other}'"
                )))
            }
        };
        Ok(Self::new(origin, state, format.parse()?))
    }
}

// ---------------------------------------------------------------------------
// 2. Pure helpers
// ---------------------------------------------------------------------------

pub(crate) async fn local_filenames_for(
    store: &dyn LocalChangeStore,
    state: StateFilter,
) -> Result<Vec<String>, StoreError> {
    match state {
        StateFilter::Add => store.get_add_filenames().await,
        StateFilter::Modify => store.get_modify_filenames().await,
        StateFilter::Delete => store.get_delete_filenames().await,
        StateFilter::NonDelete => store.get_non_delete_filenames().await,
    }
}

pub(crate) fn drop_ignored(filenames: Vec<String>, ignore: &dyn IgnoreRules) -> Vec<String> {
    filenames
        .into_iter()
        .filter(|f| !ignore.denies(f))
        .collect()
}

/// Keep elements matching `state` whose type the registry knows.
pub fn filter_remote(
    elements: Vec<RemoteChangeElement>,
    state: StateFilter,
    registry: &dyn MetadataRegistry,
) -> Vec<RemoteChangeElement> {
    elements
        .into_iter()
        .filter(|e| state.matches(e.state()))
        .filter(|e| {
            let supported = registry.supports_type(&e.type_name);
            if !supported {
                tracing::warn!(
                    type_name = %e.type_name,
                    name = %e.name,
                    "dropping remote change of unsupported type"
                );
            }
            supported
        })
        .collect()
}

/// Resolve each path, dropping the ones the registry rejects.
pub(crate) fn resolve_each(
    registry: &dyn MetadataRegistry,
    paths: &[String],
    tree: ResolveTree<'_>,
) -> Vec<Component> {
    paths
        .iter()
        .flat_map(|path| match registry.resolve(path, tree) {
            Ok(components) => components,
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "dropping unresolvable path");
                Vec::new()
            }
        })
        .collect()
}

/// First occurrence of each identity, in input order.
pub(crate) fn dedupe_components(components: Vec<Component>) -> Vec<Component> {
    let mut seen = BTreeSet::new();
    components
        .into_iter()
        .filter(|c| seen.insert(c.key()))
        .collect()
}

pub(crate) fn path_string(path: &Path, root: &Path) -> String {
    project::relative_to_root(&path.to_string_lossy(), root)
}

/// Definition file followed by content files, project-relative and unique.
pub fn component_files(
    registry: &dyn MetadataRegistry,
    component: &Component,
    root: &Path,
) -> Vec<String> {
    let mut files = Vec::new();
    if let Some(xml) = &component.xml {
        files.push(path_string(xml, root));
    }
    for content in registry.walk_content(component) {
        let file = path_string(&content, root);
        if !files.contains(&file) {
            files.push(file);
        }
    }
    files
}

/// Local components whose identity is in `keys`, found by resolving every package
/// directory against the filesystem.
pub(crate) fn local_components_for(
    registry: &dyn MetadataRegistry,
    package_paths: &[String],
    keys: &BTreeSet<ComponentKey>,
) -> Vec<Component> {
    if keys.is_empty() {
        return Vec::new();
    }
    let components = resolve_each(registry, package_paths, ResolveTree::Filesystem);
    dedupe_components(
        components
            .into_iter()
            .filter(|c| keys.contains(&c.key()))
            .collect(),
    )
}

/// Fill `filenames` on remote results from the matching local components.
/// Ignored files are left out.
pub(crate) fn populate_file_paths(
    changes: Vec<ChangeResult>,
    components: &[Component],
    registry: &dyn MetadataRegistry,
    ignore: &dyn IgnoreRules,
    root: &Path,
) -> Vec<ChangeResult> {
    let files_by_key: HashMap<ComponentKey, Vec<String>> = components
        .iter()
        .map(|c| (c.key(), drop_ignored(component_files(registry, c, root), ignore)))
        .collect();
    changes
        .into_iter()
        .map(|mut change| {
            if let Some(files) = change.key().and_then(|k| files_by_key.get(&k)) {
                change.filenames = files.clone();
            }
            change
        })
        .collect()
}

fn single_state(filter: StateFilter) -> Option<ChangeState> {
    match filter {
        StateFilter::Add => Some(ChangeState::Add),
        StateFilter::Modify => Some(ChangeState::Modify),
        StateFilter::Delete => Some(ChangeState::Delete),
        StateFilter::NonDelete => None,
    }
}

// ---------------------------------------------------------------------------
// 3. Session operations
// ---------------------------------------------------------------------------

impl SourceTracking {
    /// Enumerate changes on one side, filtered by state, in the requested shape.
    pub async fn get_changes(&self, query: ChangeQuery) -> Result<Changes, TrackingError> {
        match query.origin {
            ChangeOrigin::Local => {
                let filenames = self.local_filenames(query.state).await?;
                Ok(self.shape_local(filenames, query.state, query.format))
            }
            ChangeOrigin::Remote => {
                let elements = self.remote_elements(query.state).await?;
                Ok(self.shape_remote(&elements, query.format))
            }
        }
    }

    /// Local filenames for `state`, ignored paths removed.
    pub(crate) async fn local_filenames(
        &self,
        state: StateFilter,
    ) -> Result<Vec<String>, TrackingError> {
        let store = self.ensure_local_tracking().await?;
        let filenames = local_filenames_for(store.as_ref(), state).await?;
        Ok(drop_ignored(filenames, self.ignore.as_ref()))
    }

    /// Remote elements for `state`, unsupported types removed.
    pub(crate) async fn remote_elements(
        &self,
        state: StateFilter,
    ) -> Result<Vec<RemoteChangeElement>, TrackingError> {
        let store = self.ensure_remote_tracking().await?;
        let elements = store.retrieve_updates().await?;
        tracing::debug!(count = elements.len(), "remote updates retrieved");
        Ok(filter_remote(elements, state, self.registry.as_ref()))
    }

    pub(crate) fn shape_local(
        &self,
        filenames: Vec<String>,
        state: StateFilter,
        format: ChangeFormat,
    ) -> Changes {
        match format {
            ChangeFormat::Filenames => Changes::Filenames(filenames),
            ChangeFormat::ChangeResults | ChangeFormat::ChangeResultsWithPaths => {
                Changes::ChangeResults(
                    filenames
                        .into_iter()
                        .map(|f| ChangeResult {
                            state: single_state(state),
                            ..ChangeResult::local_file(f)
                        })
                        .collect(),
                )
            }
            ChangeFormat::Components => {
                let tree = if state == StateFilter::Delete {
                    ResolveTree::Virtual(&filenames)
                } else {
                    ResolveTree::Filesystem
                };
                Changes::Components(dedupe_components(resolve_each(
                    self.registry.as_ref(),
                    &filenames,
                    tree,
                )))
            }
        }
    }

    pub(crate) fn shape_remote(
        &self,
        elements: &[RemoteChangeElement],
        format: ChangeFormat,
    ) -> Changes {
        let results: Vec<ChangeResult> = elements.iter().map(ChangeResult::from).collect();
        if format == ChangeFormat::ChangeResults {
            return Changes::ChangeResults(results);
        }

        let keys: BTreeSet<ComponentKey> = elements.iter().map(|e| e.key()).collect();
        let components = local_components_for(
            self.registry.as_ref(),
            &self.project().package_paths(),
            &keys,
        );
        match format {
            ChangeFormat::ChangeResultsWithPaths | ChangeFormat::ChangeResults => {
                Changes::ChangeResults(populate_file_paths(
                    results,
                    &components,
                    self.registry.as_ref(),
                    self.ignore.as_ref(),
                    self.project_root(),
                ))
            }
            ChangeFormat::Filenames => Changes::Filenames(
                components
                    .iter()
                    .flat_map(|c| component_files(self.registry.as_ref(), c, self.project_root()))
                    .filter(|f| !self.ignore.denies(f))
                    .collect(),
            ),
            ChangeFormat::Components => Changes::Components(components),
        }
    }

    /// Fill type and name on local change results from the registry.
    ///
    /// `resolve_deleted` resolves against a virtual tree of the given filenames so
    /// files no longer on disk still map to a component. `ignored` is set on every
    /// resolved result from its own filenames. Fails if a local result carries no
    /// filename.
    pub fn populate_types_and_names(
        &self,
        changes: Vec<ChangeResult>,
        exclude_unresolvable: bool,
        resolve_deleted: bool,
    ) -> Result<Vec<ChangeResult>, TrackingError> {
        if changes.is_empty() {
            return Ok(changes);
        }
        if changes
            .iter()
            .any(|c| c.origin == ChangeOrigin::Local && c.filenames.is_empty())
        {
            return Err(TrackingError::InvariantViolation(
                "local change result without a filename".into(),
            ));
        }

        let filenames: Vec<String> = changes
            .iter()
            .flat_map(|c| c.filenames.iter().cloned())
            .collect();
        let tree = if resolve_deleted {
            ResolveTree::Virtual(&filenames)
        } else {
            ResolveTree::Filesystem
        };

        let root = self.project_root();
        let mut by_file: HashMap<String, ComponentKey> = HashMap::new();
        for filename in &filenames {
            if by_file.contains_key(filename) {
                continue;
            }
            let resolved = match self.registry.resolve(filename, tree) {
                Ok(components) => components,
                Err(err) => {
                    tracing::warn!(path = %filename, error = %err, "dropping unresolvable path");
                    continue;
                }
            };
            for component in resolved {
                let mut files = component_files(self.registry.as_ref(), &component, root);
                files.push(filename.clone());
                for file in files {
                    by_file.entry(file).or_insert_with(|| component.key());
                }
            }
        }

        Ok(changes
            .into_iter()
            .filter_map(|mut change| {
                let hit = change.filenames.iter().find_map(|f| by_file.get(f)).cloned();
                match hit {
                    Some(key) => {
                        let ignored = change.filenames.iter().any(|f| self.ignore.denies(f));
                        change.ignored = Some(ignored);
                        change.type_name = Some(key.type_name);
                        change.name = Some(key.full_name);
                        Some(change)
                    }
                    None if exclude_unresolvable => None,
                    None => Some(change),
                }
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
