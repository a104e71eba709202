//! sourcetrack core library: domain types, project configuration, store and
//! registry interfaces, errors.
//!
//! - [`types`]: change records, identities, operation payloads
//! - [`metadata`]: components, [`ComponentSet`], registry and ignore seams
//! - [`stores`]: local/remote tracking store traits and their provider
//! - [`project`]: `sourcetrack-project.yaml` load / save, runtime options
//! - [`error`]: [`ProjectError`], [`StoreError`], [`ResolveError`]

pub mod error;
pub mod metadata;
pub mod project;
pub mod stores;
pub mod types;

pub use error::{ProjectError, ResolveError, StoreError};
pub use metadata::{
    AcceptAll, Component, ComponentEntry, ComponentSet, IgnoreRules, MetadataRegistry, ResolveTree,
};
pub use project::{PackageDirectory, PollSettings, ProjectConfig, TrackingOptions};
pub use stores::{
    CommitRequest, LocalChangeStore, LocalFileStatus, RemoteChangeStore, StoreContext,
    StoreProvider,
};
pub use types::{
    ChangeOrigin, ChangeResult, ChangeState, ComponentKey, ComponentStatus, Conflict,
    DeployResult, FileResponse, OrgId, OrgTarget, RemoteChangeElement, RemoteSyncInput,
    RetrieveResult, StateFilter, StatusOutputRow,
};
