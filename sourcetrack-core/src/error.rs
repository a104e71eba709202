//! Error types for sourcetrack-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from loading or saving the project configuration.
#[derive(Debug, Error)]
pub enum ProjectError {
    /// Underlying I/O failure (permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the file path and serde_yaml's line context.
    #[error("failed to parse project config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The project config file did not exist at the expected path.
    #[error("project config not found at {path}")]
    NotFound { path: PathBuf },

    /// The config parsed but declares no package directory.
    #[error("project config at {path} declares no package directories")]
    NoPackageDirectories { path: PathBuf },
}

/// Errors raised by a tracking store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store file {path} is not valid JSON: {message}")]
    Corrupt { path: PathBuf, message: String },

    /// The platform query behind the remote store failed.
    #[error("source member query failed: {0}")]
    Query(String),

    #[error("timed out after {waited_secs}s waiting for {pending} source member(s) to update")]
    PollTimeout { pending: usize, waited_secs: u64 },

    /// A store task on the blocking pool panicked or was cancelled.
    #[error("blocking store task failed: {0}")]
    Background(String),
}

/// A path could not be resolved to a typed component.
///
/// Always recoverable: callers log it and drop the path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("could not resolve {path}: {message}")]
pub struct ResolveError {
    pub path: String,
    pub message: String,
}

impl ResolveError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Convenience constructor for [`StoreError::Io`].
pub fn store_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
