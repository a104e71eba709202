//! Revision cursor store: a file-backed [`RemoteChangeStore`].
//!
//! Keeps the last seen source-member revision of every component of the org in
//! `<project>/.sourcetrack/orgs/<org_id>/remote-cursor.json`. The platform is only
//! reached through [`SourceMemberQuery`].
//!
//! A member has a pending remote change while `server_revision > last_retrieved`.
//! The cursor file is read and written through `tokio::fs`.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use sourcetrack_core::error::store_io_err;
use sourcetrack_core::project;
use sourcetrack_core::{
    ComponentStatus, PollSettings, RemoteChangeElement, RemoteChangeStore, RemoteSyncInput,
    StoreError,
};

/// File name of the cursor inside the org state directory.
pub const CURSOR_FILE: &str = "remote-cursor.json";

// ---------------------------------------------------------------------------
// 1. Platform seam
// ---------------------------------------------------------------------------

/// One row of the org's source-member listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMember {
    pub member_type: String,
    pub member_name: String,
    pub revision_counter: i64,
    #[serde(default)]
    pub is_name_obsolete: bool,
}

/// Reads source members from the org.
#[async_trait]
pub trait SourceMemberQuery: Send + Sync {
    /// Members with a revision above `after`, or every member when `None`.
    async fn members_after(&self, after: Option<i64>) -> Result<Vec<SourceMember>, StoreError>;
}

// ---------------------------------------------------------------------------
// 2. Persisted cursor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub member_type: String,
    pub member_name: String,
    pub server_revision: i64,
    /// `None` until the member has been retrieved or deployed once.
    #[serde(default)]
    pub last_retrieved: Option<i64>,
    #[serde(default)]
    pub is_name_obsolete: bool,
}

impl MemberRecord {
    pub fn is_pending(&self) -> bool {
        self.last_retrieved
            .map_or(true, |seen| self.server_revision > seen)
    }

    fn to_element(&self) -> RemoteChangeElement {
        RemoteChangeElement {
            type_name: self.member_type.clone(),
            name: self.member_name.clone(),
            deleted: self.is_name_obsolete,
            modified: !self.is_name_obsolete && self.last_retrieved.is_some(),
            revision_num: self.server_revision,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorFile {
    pub server_max_revision: i64,
    pub members: BTreeMap<String, MemberRecord>,
}

impl CursorFile {
    /// Record queried members; `last_retrieved` of known members is kept.
    fn merge(&mut self, members: Vec<SourceMember>) {
        for member in members {
            self.server_max_revision = self.server_max_revision.max(member.revision_counter);
            let key = member_key(&member.member_type, &member.member_name);
            let record = self.members.entry(key).or_insert_with(|| MemberRecord {
                member_type: member.member_type.clone(),
                member_name: member.member_name.clone(),
                server_revision: member.revision_counter,
                last_retrieved: None,
                is_name_obsolete: false,
            });
            record.server_revision = member.revision_counter;
            record.is_name_obsolete = member.is_name_obsolete;
        }
    }

    fn pending_elements(&self) -> Vec<RemoteChangeElement> {
        self.members
            .values()
            .filter(|m| m.is_pending())
            .map(MemberRecord::to_element)
            .collect()
    }
}

/// `<type>__<name>`
pub fn member_key(type_name: &str, name: &str) -> String {
    format!("{type_name}__{name}")
}

/// `<root>/.sourcetrack/orgs/<org_id>/remote-cursor.json`
pub fn cursor_path_at(root: &Path, org_id: &str) -> PathBuf {
    project::org_state_dir_at(root, org_id).join(CURSOR_FILE)
}

/// Load the cursor; an absent file is an empty cursor at revision 0.
pub async fn load_at(root: &Path, org_id: &str) -> Result<CursorFile, StoreError> {
    let path = cursor_path_at(root, org_id);
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(CursorFile::default()),
        Err(err) => return Err(store_io_err(&path, err)),
    };
    serde_json::from_str(&contents).map_err(|e| StoreError::Corrupt {
        path,
        message: e.to_string(),
    })
}

/// Save the cursor atomically: `<path>.tmp` then rename.
pub async fn save_at(root: &Path, org_id: &str, cursor: &CursorFile) -> Result<(), StoreError> {
    let path = cursor_path_at(root, org_id);
    let Some(dir) = path.parent() else {
        return Err(store_io_err(path, std::io::Error::other("invalid cursor path")));
    };
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| store_io_err(dir, e))?;

    let json = serde_json::to_string_pretty(cursor).map_err(|e| StoreError::Corrupt {
        path: path.clone(),
        message: e.to_string(),
    })?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| store_io_err(&tmp, e))?;
    tokio::fs::rename(&tmp, &path)
        .await
        .map_err(|e| store_io_err(&path, e))?;
    Ok(())
}

/// Remove the cursor file, if any, and return its path.
pub async fn delete_at(root: &Path, org_id: &str) -> Result<PathBuf, StoreError> {
    let path = cursor_path_at(root, org_id);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(path),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(path),
        Err(err) => Err(store_io_err(&path, err)),
    }
}

// ---------------------------------------------------------------------------
// 3. Store
// ---------------------------------------------------------------------------

/// File-backed remote store for one (project, org).
pub struct RevisionCursorStore {
    root: PathBuf,
    org_id: String,
    query: Arc<dyn SourceMemberQuery>,
    poll: PollSettings,
    cursor: Mutex<CursorFile>,
}

impl RevisionCursorStore {
    pub async fn open(
        root: impl Into<PathBuf>,
        org_id: impl Into<String>,
        query: Arc<dyn SourceMemberQuery>,
        poll: PollSettings,
    ) -> Result<Self, StoreError> {
        let root = root.into();
        let org_id = org_id.into();
        let cursor = load_at(&root, &org_id).await?;
        Ok(Self {
            root,
            org_id,
            query,
            poll,
            cursor: Mutex::new(cursor),
        })
    }

    pub async fn server_max_revision(&self) -> i64 {
        self.cursor.lock().await.server_max_revision
    }

    pub async fn member(&self, type_name: &str, name: &str) -> Option<MemberRecord> {
        self.cursor
            .lock()
            .await
            .members
            .get(&member_key(type_name, name))
            .cloned()
    }
}

#[async_trait]
impl RemoteChangeStore for RevisionCursorStore {
    async fn retrieve_updates(&self) -> Result<Vec<RemoteChangeElement>, StoreError> {
        let mut cursor = self.cursor.lock().await;
        let members = self
            .query
            .members_after(Some(cursor.server_max_revision))
            .await?;
        tracing::debug!(
            from_revision = cursor.server_max_revision,
            queried = members.len(),
            "source members queried"
        );
        if !members.is_empty() {
            cursor.merge(members);
            save_at(&self.root, &self.org_id, &cursor).await?;
        }
        Ok(cursor.pending_elements())
    }

    async fn poll_for_source_tracking(
        &self,
        expected: &[RemoteSyncInput],
    ) -> Result<(), StoreError> {
        if self.poll.disabled {
            return Ok(());
        }
        let mut pending: BTreeMap<String, bool> = expected
            .iter()
            .filter(|e| {
                matches!(
                    e.state,
                    ComponentStatus::Created | ComponentStatus::Changed | ComponentStatus::Deleted
                )
            })
            .map(|e| {
                (
                    member_key(&e.type_name, &e.full_name),
                    e.state == ComponentStatus::Deleted,
                )
            })
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let mut cursor = self.cursor.lock().await;
        let deadline = tokio::time::Instant::now() + self.poll.timeout;
        loop {
            let members = self
                .query
                .members_after(Some(cursor.server_max_revision))
                .await?;
            for member in &members {
                let key = member_key(&member.member_type, &member.member_name);
                if let Some(&expect_delete) = pending.get(&key) {
                    if !expect_delete || member.is_name_obsolete {
                        pending.remove(&key);
                    }
                }
            }
            if !members.is_empty() {
                cursor.merge(members);
                save_at(&self.root, &self.org_id, &cursor).await?;
            }
            if pending.is_empty() {
                return Ok(());
            }

            let now = tokio::time::Instant::now();
            if now + self.poll.interval > deadline {
                let waiting: BTreeSet<&String> = pending.keys().collect();
                tracing::warn!(pending = ?waiting, "gave up waiting for source members");
                return Err(StoreError::PollTimeout {
                    pending: pending.len(),
                    waited_secs: self.poll.timeout.as_secs(),
                });
            }
            tracing::debug!(pending = pending.len(), "waiting for source members");
            tokio::time::sleep(self.poll.interval).await;
        }
    }

    async fn sync_specified_elements(&self, elements: &[RemoteSyncInput]) -> Result<(), StoreError> {
        let mut cursor = self.cursor.lock().await;
        let mut synced = 0usize;
        for element in elements {
            match cursor
                .members
                .get_mut(&member_key(&element.type_name, &element.full_name))
            {
                Some(record) => {
                    record.last_retrieved = Some(record.server_revision);
                    synced += 1;
                }
                None => tracing::debug!(
                    type_name = %element.type_name,
                    name = %element.full_name,
                    "no source member to sync"
                ),
            }
        }
        save_at(&self.root, &self.org_id, &cursor).await?;
        tracing::debug!(synced, requested = elements.len(), "source members synced");
        Ok(())
    }

    async fn reset(&self, revision: Option<i64>) -> Result<Vec<RemoteChangeElement>, StoreError> {
        let mut cursor = self.cursor.lock().await;
        let members: Vec<SourceMember> = self
            .query
            .members_after(None)
            .await?
            .into_iter()
            .filter(|m| revision.map_or(true, |r| m.revision_counter <= r))
            .collect();

        let mut fresh = CursorFile::default();
        fresh.merge(members);
        for record in fresh.members.values_mut() {
            record.last_retrieved = Some(record.server_revision);
        }
        if let Some(revision) = revision {
            fresh.server_max_revision = revision;
        }
        save_at(&self.root, &self.org_id, &fresh).await?;

        let reset: Vec<RemoteChangeElement> =
            fresh.members.values().map(MemberRecord::to_element).collect();
        *cursor = fresh;
        Ok(reset)
    }
}
