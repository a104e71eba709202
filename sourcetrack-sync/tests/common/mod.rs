//! Shared fixtures: a convention-based registry, in-memory stores and a counting
//! provider.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sourcetrack_core::project;
use sourcetrack_core::{
    ChangeState, CommitRequest, Component, IgnoreRules, LocalChangeStore, LocalFileStatus,
    MetadataRegistry, OrgTarget, PackageDirectory, ProjectConfig, RemoteChangeElement,
    RemoteChangeStore, RemoteSyncInput, ResolveError, ResolveTree, StoreContext, StoreError,
    StoreProvider, TrackingOptions,
};
use sourcetrack_sync::{SourceMember, SourceMemberQuery, SourceTracking};

pub const ORG: &str = "00Dtest";
pub const LWC: &str = "LightningComponentBundle";

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt().with_env_filter(filter).with_test_writer().try_init();
}

pub fn write_file(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("create parent dirs");
    std::fs::write(path, contents).expect("write file");
}

pub fn project_config(dirs: &[&str]) -> ProjectConfig {
    ProjectConfig::new(dirs.iter().map(|d| PackageDirectory::new(*d)).collect())
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn element(type_name: &str, name: &str, deleted: bool, modified: bool) -> RemoteChangeElement {
    RemoteChangeElement {
        type_name: type_name.into(),
        name: name.into(),
        deleted,
        modified,
        revision_num: 1,
    }
}

/// Session over `root` with the convention registry and the given provider.
pub fn session(
    root: &Path,
    config: ProjectConfig,
    provider: Arc<dyn StoreProvider>,
    options: TrackingOptions,
) -> SourceTracking {
    SourceTracking::with_config(
        root,
        config,
        OrgTarget::new(ORG, true),
        Arc::new(ConventionRegistry::new(root)),
        provider,
        options,
    )
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// `*.cls` files are `ApexClass`; anything under `lwc/<name>/` is the bundle `<name>`.
pub struct ConventionRegistry {
    root: PathBuf,
}

impl ConventionRegistry {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn classify(path: &str) -> Option<Component> {
        let segments: Vec<&str> = path.split('/').collect();
        if let Some(i) = segments.iter().position(|s| *s == "lwc") {
            let name = segments.get(i + 1)?;
            if segments.len() < i + 3 {
                return None;
            }
            return Some(Component {
                type_name: LWC.into(),
                full_name: name.to_string(),
                xml: None,
                content: Some(PathBuf::from(segments[..=i + 1].join("/"))),
            });
        }
        let file = segments.last()?;
        let name = file.strip_suffix(".cls")?;
        Some(Component {
            type_name: "ApexClass".into(),
            full_name: name.into(),
            xml: None,
            content: Some(PathBuf::from(path)),
        })
    }

    fn resolve_all(paths: impl Iterator<Item = String>) -> Vec<Component> {
        let mut seen = BTreeSet::new();
        paths
            .filter_map(|p| Self::classify(&p))
            .filter(|c| seen.insert(c.key()))
            .collect()
    }

    fn files_under(&self, rel_dir: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![self.root.join(rel_dir)];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    if entry.file_name() != project::STATE_DIR {
                        stack.push(path);
                    }
                } else {
                    out.push(project::relative_to_root(&path.to_string_lossy(), &self.root));
                }
            }
        }
        out.sort();
        out
    }
}

impl MetadataRegistry for ConventionRegistry {
    fn resolve(&self, path: &str, tree: ResolveTree<'_>) -> Result<Vec<Component>, ResolveError> {
        match tree {
            ResolveTree::Virtual(paths) => {
                if paths.iter().any(|p| p == path) {
                    return Self::classify(path)
                        .map(|c| vec![c])
                        .ok_or_else(|| ResolveError::new(path, "unknown file type"));
                }
                let inside: Vec<String> = paths
                    .iter()
                    .filter(|p| project::path_is_in_folder(p, path))
                    .cloned()
                    .collect();
                if inside.is_empty() {
                    return Err(ResolveError::new(path, "not in virtual tree"));
                }
                Ok(Self::resolve_all(inside.into_iter()))
            }
            ResolveTree::Filesystem => {
                let abs = self.root.join(path);
                if abs.is_dir() {
                    Ok(Self::resolve_all(self.files_under(path).into_iter()))
                } else if abs.is_file() {
                    Self::classify(path)
                        .map(|c| vec![c])
                        .ok_or_else(|| ResolveError::new(path, "unknown file type"))
                } else {
                    Err(ResolveError::new(path, "no such file"))
                }
            }
        }
    }

    fn is_bundle(&self, component: &Component) -> bool {
        component.type_name == LWC
    }

    fn walk_content(&self, component: &Component) -> Vec<PathBuf> {
        let Some(content) = &component.content else {
            return Vec::new();
        };
        if self.is_bundle(component) {
            self.files_under(&content.to_string_lossy())
                .into_iter()
                .map(PathBuf::from)
                .collect()
        } else {
            vec![content.clone()]
        }
    }

    fn supports_type(&self, type_name: &str) -> bool {
        matches!(type_name, "ApexClass" | LWC)
    }
}

/// Denies any path containing one of the patterns.
pub struct PatternIgnore(pub Vec<String>);

impl IgnoreRules for PatternIgnore {
    fn denies(&self, path: &str) -> bool {
        self.0.iter().any(|p| path.contains(p.as_str()))
    }
}

// ---------------------------------------------------------------------------
// In-memory stores
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryLocalStore {
    pub statuses: Mutex<Vec<LocalFileStatus>>,
    pub commits: Mutex<Vec<CommitRequest>>,
    pub fail_commit: AtomicBool,
}

impl MemoryLocalStore {
    pub fn with(changes: &[(&str, ChangeState)]) -> Self {
        let store = Self::default();
        *store.statuses.lock().expect("lock") = changes
            .iter()
            .map(|(path, state)| LocalFileStatus {
                path: path.to_string(),
                state: *state,
            })
            .collect();
        store
    }

    fn names(&self, keep: impl Fn(ChangeState) -> bool) -> Vec<String> {
        self.statuses
            .lock()
            .expect("lock")
            .iter()
            .filter(|s| keep(s.state))
            .map(|s| s.path.clone())
            .collect()
    }
}

#[async_trait]
impl LocalChangeStore for MemoryLocalStore {
    async fn get_status(&self, _refresh: bool) -> Result<Vec<LocalFileStatus>, StoreError> {
        Ok(self.statuses.lock().expect("lock").clone())
    }

    async fn get_non_delete_filenames(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.names(|s| s != ChangeState::Delete))
    }

    async fn get_delete_filenames(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.names(|s| s == ChangeState::Delete))
    }

    async fn get_add_filenames(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.names(|s| s == ChangeState::Add))
    }

    async fn get_modify_filenames(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.names(|s| s == ChangeState::Modify))
    }

    async fn commit_changes(&self, request: CommitRequest) -> Result<(), StoreError> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Query("local commit refused".into()));
        }
        self.statuses.lock().expect("lock").retain(|s| {
            !request.deployed_files.contains(&s.path) && !request.deleted_files.contains(&s.path)
        });
        self.commits.lock().expect("lock").push(request);
        Ok(())
    }

    async fn delete(&self) -> Result<PathBuf, StoreError> {
        self.statuses.lock().expect("lock").clear();
        Ok(PathBuf::from("memory/local-baseline.json"))
    }
}

#[derive(Default)]
pub struct MemoryRemoteStore {
    pub elements: Mutex<Vec<RemoteChangeElement>>,
    pub synced: Mutex<Vec<RemoteSyncInput>>,
    pub polled: Mutex<Vec<RemoteSyncInput>>,
    pub resets: Mutex<Vec<Option<i64>>>,
    /// Every query fails; proves a code path never reaches the remote side.
    pub refuse_queries: bool,
    pub fail_sync: AtomicBool,
}

impl MemoryRemoteStore {
    pub fn with(elements: Vec<RemoteChangeElement>) -> Self {
        let store = Self::default();
        *store.elements.lock().expect("lock") = elements;
        store
    }

    pub fn refusing() -> Self {
        Self {
            refuse_queries: true,
            ..Self::default()
        }
    }

    fn refused() -> StoreError {
        StoreError::Query("remote store must not be queried".into())
    }
}

#[async_trait]
impl RemoteChangeStore for MemoryRemoteStore {
    async fn retrieve_updates(&self) -> Result<Vec<RemoteChangeElement>, StoreError> {
        if self.refuse_queries {
            return Err(Self::refused());
        }
        Ok(self.elements.lock().expect("lock").clone())
    }

    async fn poll_for_source_tracking(&self, expected: &[RemoteSyncInput]) -> Result<(), StoreError> {
        if self.refuse_queries {
            return Err(Self::refused());
        }
        self.polled.lock().expect("lock").extend_from_slice(expected);
        Ok(())
    }

    async fn sync_specified_elements(&self, elements: &[RemoteSyncInput]) -> Result<(), StoreError> {
        if self.fail_sync.load(Ordering::SeqCst) {
            return Err(StoreError::Query("remote sync refused".into()));
        }
        self.elements
            .lock()
            .expect("lock")
            .retain(|e| !elements.iter().any(|i| i.key() == e.key()));
        self.synced.lock().expect("lock").extend_from_slice(elements);
        Ok(())
    }

    async fn reset(&self, revision: Option<i64>) -> Result<Vec<RemoteChangeElement>, StoreError> {
        self.resets.lock().expect("lock").push(revision);
        Ok(std::mem::take(&mut *self.elements.lock().expect("lock")))
    }
}

/// Hands out the same two stores and counts how often each is opened.
pub struct CountingProvider {
    pub local: Arc<MemoryLocalStore>,
    pub remote: Arc<MemoryRemoteStore>,
    pub local_opens: AtomicUsize,
    pub remote_opens: AtomicUsize,
    pub remote_deletes: AtomicUsize,
}

impl CountingProvider {
    pub fn new(local: MemoryLocalStore, remote: MemoryRemoteStore) -> Arc<Self> {
        Arc::new(Self {
            local: Arc::new(local),
            remote: Arc::new(remote),
            local_opens: AtomicUsize::new(0),
            remote_opens: AtomicUsize::new(0),
            remote_deletes: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl StoreProvider for CountingProvider {
    async fn open_local(&self, _ctx: &StoreContext) -> Result<Arc<dyn LocalChangeStore>, StoreError> {
        self.local_opens.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(Arc::clone(&self.local) as Arc<dyn LocalChangeStore>)
    }

    async fn open_remote(&self, _ctx: &StoreContext) -> Result<Arc<dyn RemoteChangeStore>, StoreError> {
        self.remote_opens.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(Arc::clone(&self.remote) as Arc<dyn RemoteChangeStore>)
    }

    async fn delete_remote(&self, _ctx: &StoreContext) -> Result<PathBuf, StoreError> {
        self.remote_deletes.fetch_add(1, Ordering::SeqCst);
        Ok(PathBuf::from("memory/remote-cursor.json"))
    }
}

// ---------------------------------------------------------------------------
// Scripted org for the file-backed remote store
// ---------------------------------------------------------------------------

/// Source members the "org" reports; tests push rows to simulate server changes.
#[derive(Default)]
pub struct ScriptedOrg {
    members: Mutex<Vec<SourceMember>>,
}

impl ScriptedOrg {
    /// Record a new revision of `(type, name)`, one above the current maximum.
    pub fn touch(&self, member_type: &str, name: &str, obsolete: bool) -> i64 {
        let mut members = self.members.lock().expect("lock");
        let revision = members.iter().map(|m| m.revision_counter).max().unwrap_or(0) + 1;
        members.retain(|m| !(m.member_type == member_type && m.member_name == name));
        members.push(SourceMember {
            member_type: member_type.into(),
            member_name: name.into(),
            revision_counter: revision,
            is_name_obsolete: obsolete,
        });
        revision
    }
}

#[async_trait]
impl SourceMemberQuery for ScriptedOrg {
    async fn members_after(&self, after: Option<i64>) -> Result<Vec<SourceMember>, StoreError> {
        Ok(self
            .members
            .lock()
            .expect("lock")
            .iter()
            .filter(|m| after.map_or(true, |a| m.revision_counter > a))
            .cloned()
            .collect())
    }
}
