//! Domain types shared by the tracking stores and the reconciliation engine.
//!
//! Filenames crossing these types are project-relative, `/`-separated strings.
//! All types are serializable via serde so status reports can be emitted as JSON.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed identifier for a remote org.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrgId(pub String);

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for OrgId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrgId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identity of a logical component: `(type, full_name)`.
///
/// A bundle keeps one identity no matter which of its member files changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentKey {
    #[serde(rename = "type")]
    pub type_name: String,
    pub full_name: String,
}

impl ComponentKey {
    pub fn new(type_name: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            full_name: full_name.into(),
        }
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name, self.full_name)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which side of the sync a change was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOrigin {
    Local,
    Remote,
}

impl fmt::Display for ChangeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeOrigin::Local => write!(f, "local"),
            ChangeOrigin::Remote => write!(f, "remote"),
        }
    }
}

/// The kind of change recorded for a single file or element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeState {
    Add,
    Modify,
    Delete,
}

impl fmt::Display for ChangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeState::Add => write!(f, "add"),
            ChangeState::Modify => write!(f, "modify"),
            ChangeState::Delete => write!(f, "delete"),
        }
    }
}

/// The state a caller asks for when enumerating changes.
///
/// `NonDelete` is the union of `Add` and `Modify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFilter {
    Add,
    Modify,
    Delete,
    NonDelete,
}

impl StateFilter {
    pub fn matches(self, state: ChangeState) -> bool {
        match self {
            StateFilter::Add => state == ChangeState::Add,
            StateFilter::Modify => state == ChangeState::Modify,
            StateFilter::Delete => state == ChangeState::Delete,
            StateFilter::NonDelete => state != ChangeState::Delete,
        }
    }
}

impl fmt::Display for StateFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateFilter::Add => write!(f, "add"),
            StateFilter::Modify => write!(f, "modify"),
            StateFilter::Delete => write!(f, "delete"),
            StateFilter::NonDelete => write!(f, "nondelete"),
        }
    }
}

/// Per-file outcome reported by a deploy or retrieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentStatus {
    Created,
    Changed,
    Unchanged,
    Deleted,
    Failed,
}

impl ComponentStatus {
    pub fn is_success(self) -> bool {
        self != ComponentStatus::Failed
    }
}

// ---------------------------------------------------------------------------
// Change records
// ---------------------------------------------------------------------------

/// Normalized record of one change, local or remote.
///
/// A result with no filenames is a remote change that has no local file yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeResult {
    pub origin: ChangeOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ChangeState>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub filenames: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored: Option<bool>,
}

impl ChangeResult {
    /// A local change for a single file; type and name are filled in later.
    pub fn local_file(filename: impl Into<String>) -> Self {
        Self {
            origin: ChangeOrigin::Local,
            state: None,
            type_name: None,
            name: None,
            filenames: vec![filename.into()],
            ignored: None,
        }
    }

    /// The component identity, when both type and name are known.
    pub fn key(&self) -> Option<ComponentKey> {
        match (&self.type_name, &self.name) {
            (Some(t), Some(n)) => Some(ComponentKey::new(t.clone(), n.clone())),
            _ => None,
        }
    }
}

impl From<&RemoteChangeElement> for ChangeResult {
    fn from(element: &RemoteChangeElement) -> Self {
        Self {
            origin: ChangeOrigin::Remote,
            state: Some(element.state()),
            type_name: Some(element.type_name.clone()),
            name: Some(element.name.clone()),
            filenames: Vec::new(),
            ignored: None,
        }
    }
}

/// One element the remote store reports as changed since its cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChangeElement {
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub modified: bool,
    pub revision_num: i64,
}

impl RemoteChangeElement {
    /// `deleted` wins over `modified`; neither flag means the element was added.
    pub fn state(&self) -> ChangeState {
        if self.deleted {
            ChangeState::Delete
        } else if self.modified {
            ChangeState::Modify
        } else {
            ChangeState::Add
        }
    }

    pub fn key(&self) -> ComponentKey {
        ComponentKey::new(self.type_name.clone(), self.name.clone())
    }
}

/// A component changed independently on both sides since the last sync.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Conflict {
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    pub filenames: BTreeSet<String>,
}

impl Conflict {
    pub fn key(&self) -> ComponentKey {
        ComponentKey::new(self.type_name.clone(), self.name.clone())
    }
}

/// Per-file projection of a [`ChangeResult`] for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusOutputRow {
    #[serde(rename = "type")]
    pub type_name: String,
    pub origin: ChangeOrigin,
    pub state: ChangeState,
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<bool>,
}

// ---------------------------------------------------------------------------
// Operation payloads
// ---------------------------------------------------------------------------

/// One per-file outcome of a deploy or retrieve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResponse {
    #[serde(rename = "type")]
    pub type_name: String,
    pub full_name: String,
    pub state: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Completion payload of a deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployResult {
    pub id: String,
    #[serde(default)]
    pub file_responses: Vec<FileResponse>,
}

/// Completion payload of a retrieve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrieveResult {
    pub id: String,
    #[serde(default)]
    pub file_responses: Vec<FileResponse>,
}

/// Common input for advancing the remote revision cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSyncInput {
    #[serde(rename = "type")]
    pub type_name: String,
    pub full_name: String,
    pub state: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl RemoteSyncInput {
    pub fn key(&self) -> ComponentKey {
        ComponentKey::new(self.type_name.clone(), self.full_name.clone())
    }
}

impl From<&FileResponse> for RemoteSyncInput {
    fn from(response: &FileResponse) -> Self {
        Self {
            type_name: response.type_name.clone(),
            full_name: response.full_name.clone(),
            state: response.state,
            file_path: response.file_path.clone(),
        }
    }
}

/// The org a session tracks against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgTarget {
    pub org_id: OrgId,
    /// Whether the org records source-member revisions at all.
    pub tracks_source: bool,
}

impl OrgTarget {
    pub fn new(org_id: impl Into<OrgId>, tracks_source: bool) -> Self {
        Self {
            org_id: org_id.into(),
            tracks_source,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
