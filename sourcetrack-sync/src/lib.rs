//! # sourcetrack-sync
//!
//! Reconciles a local source tree with a remote org.
//!
//! Build a [`SourceTracking`] session for one project and org, then ask it for
//! changes ([`SourceTracking::get_changes`]), deployable component sets,
//! conflicts or a status report. After a deploy or retrieve completes, feed the
//! result back with [`SourceTracking::update_tracking_from_deploy`] /
//! [`SourceTracking::update_tracking_from_retrieve`], or let a
//! [`LifecycleGateway`] do it through [`OperationHooks`].
//!
//! [`FileStoreProvider`] supplies file-backed stores; any other
//! [`sourcetrack_core::StoreProvider`] can be plugged in.

pub mod assemble;
pub mod classify;
pub mod conflicts;
pub mod error;
pub mod hash_store;
pub mod lifecycle;
pub mod provider;
pub mod remote_store;
pub mod session;
pub mod status;
pub mod tracking;

pub use assemble::{build_component_set, partition_files, FileGroup};
pub use classify::{ChangeFormat, ChangeQuery, Changes};
pub use conflicts::{conflicts_in_component_set, dedupe_conflicts, throw_if_conflicts};
pub use error::{TrackingError, TrackingSide};
pub use hash_store::HashBaselineStore;
pub use lifecycle::{
    LifecycleGateway, OperationHooks, OperationKind, OperationObserver, PostOperation,
    PreOperation,
};
pub use provider::FileStoreProvider;
pub use remote_store::{RevisionCursorStore, SourceMember, SourceMemberQuery};
pub use session::SourceTracking;
pub use tracking::RemoteDeletesApplied;
