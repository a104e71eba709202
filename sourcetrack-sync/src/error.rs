//! Error types for sourcetrack-sync.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use sourcetrack_core::{Conflict, OrgId, ProjectError, StoreError};

/// Which half of a paired tracking update went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingSide {
    Local,
    Remote,
}

impl fmt::Display for TrackingSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingSide::Local => write!(f, "local"),
            TrackingSide::Remote => write!(f, "remote"),
        }
    }
}

/// All errors that can arise from reconciliation and tracking operations.
#[derive(Debug, Error)]
pub enum TrackingError {
    /// Components changed on both sides; carries the full list.
    #[error("{} conflict(s) detected: {}", .0.len(), conflict_preview(.0))]
    Conflicts(Vec<Conflict>),

    /// A store or caller broke a contract (e.g. a local change without a filename).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("unsupported change request: {0}")]
    UnsupportedRequest(String),

    #[error("org {org_id} does not have source tracking enabled")]
    NotSourceTracked { org_id: OrgId },

    /// File deletion failed. Earlier deletions in the same batch are not rolled back.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("project error: {0}")]
    Project(#[from] ProjectError),

    /// One half of a paired local/remote update was committed, the other failed.
    #[error("{committed} tracking was updated but the other side failed: {source}")]
    PartialTrackingUpdate {
        committed: TrackingSide,
        #[source]
        source: Box<TrackingError>,
    },
}

fn conflict_preview(conflicts: &[Conflict]) -> String {
    let mut shown: Vec<String> = conflicts
        .iter()
        .take(3)
        .map(|c| format!("{}:{}", c.type_name, c.name))
        .collect();
    if conflicts.len() > shown.len() {
        shown.push(format!("+{} more", conflicts.len() - shown.len()));
    }
    shown.join(", ")
}

/// Convenience constructor for [`TrackingError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> TrackingError {
    TrackingError::Io {
        path: path.into(),
        source,
    }
}
