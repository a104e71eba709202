//! Automatic conflict gating and tracking around deploy/retrieve operations.
//!
//! An orchestrator holds an [`OperationHooks`] and notifies it before and after each
//! operation. [`LifecycleGateway::register`] wires a tracking session into those
//! hooks: before an operation it checks for conflicts on the components involved,
//! after it updates tracking from the result.

use std::sync::Arc;

use async_trait::async_trait;

use sourcetrack_core::{ComponentSet, DeployResult, OrgId, RetrieveResult};

use crate::conflicts::{conflicts_in_component_set, throw_if_conflicts};
use crate::error::TrackingError;
use crate::session::SourceTracking;

/// Which kind of operation an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Deploy,
    Retrieve,
}

/// Emitted before an operation starts.
#[derive(Debug, Clone)]
pub struct PreOperation {
    pub org_id: OrgId,
    pub kind: OperationKind,
    pub component_set: ComponentSet,
}

/// Emitted after an operation succeeded.
#[derive(Debug, Clone)]
pub enum PostOperation {
    Deploy { org_id: OrgId, result: DeployResult },
    Retrieve { org_id: OrgId, result: RetrieveResult },
}

impl PostOperation {
    pub fn org_id(&self) -> &OrgId {
        match self {
            PostOperation::Deploy { org_id, .. } | PostOperation::Retrieve { org_id, .. } => org_id,
        }
    }
}

/// Receives operation events. Both callbacks default to doing nothing.
#[async_trait]
pub trait OperationObserver: Send + Sync {
    /// An error aborts the operation.
    async fn before_operation(&self, _event: &PreOperation) -> Result<(), TrackingError> {
        Ok(())
    }

    async fn after_operation(&self, _event: &PostOperation) -> Result<(), TrackingError> {
        Ok(())
    }
}

/// Observers registered for pre- and post-operation events.
#[derive(Default)]
pub struct OperationHooks {
    pre: Vec<Arc<dyn OperationObserver>>,
    post: Vec<Arc<dyn OperationObserver>>,
}

impl OperationHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_pre(&mut self, observer: Arc<dyn OperationObserver>) {
        self.pre.push(observer);
    }

    pub fn on_post(&mut self, observer: Arc<dyn OperationObserver>) {
        self.post.push(observer);
    }

    pub fn pre_count(&self) -> usize {
        self.pre.len()
    }

    pub fn post_count(&self) -> usize {
        self.post.len()
    }

    /// Run pre hooks in order, stopping at the first error.
    pub async fn notify_pre(&self, event: &PreOperation) -> Result<(), TrackingError> {
        for observer in &self.pre {
            observer.before_operation(event).await?;
        }
        Ok(())
    }

    /// Run every post hook in order and return the first error, if any.
    pub async fn notify_post(&self, event: &PostOperation) -> Result<(), TrackingError> {
        let mut first_err = None;
        for observer in &self.post {
            if let Err(err) = observer.after_operation(event).await {
                tracing::warn!(error = %err, "post-operation hook failed");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Session-backed observer for one org.
pub struct LifecycleGateway {
    tracking: Arc<SourceTracking>,
}

impl LifecycleGateway {
    /// Register with `hooks` when the session opted in and its org tracks source.
    ///
    /// The pre hook is only installed if conflicts are not ignored. Returns whether
    /// anything was registered.
    pub fn register(tracking: Arc<SourceTracking>, hooks: &mut OperationHooks) -> bool {
        if !tracking.options().subscribe_operation_events || !tracking.org().tracks_source {
            return false;
        }
        let check_conflicts = !tracking.ignore_conflicts();
        let gateway: Arc<dyn OperationObserver> = Arc::new(Self { tracking });
        if check_conflicts {
            hooks.on_pre(Arc::clone(&gateway));
        }
        hooks.on_post(gateway);
        true
    }

    fn is_own_org(&self, org_id: &OrgId) -> bool {
        &self.tracking.org().org_id == org_id
    }
}

#[async_trait]
impl OperationObserver for LifecycleGateway {
    async fn before_operation(&self, event: &PreOperation) -> Result<(), TrackingError> {
        if !self.is_own_org(&event.org_id) || self.tracking.ignore_conflicts() {
            return Ok(());
        }
        let conflicts = self.tracking.get_conflicts().await?;
        let scoped = conflicts_in_component_set(&event.component_set, conflicts);
        if !scoped.is_empty() {
            tracing::warn!(
                kind = ?event.kind,
                count = scoped.len(),
                "operation blocked by conflicts"
            );
        }
        throw_if_conflicts(scoped)
    }

    async fn after_operation(&self, event: &PostOperation) -> Result<(), TrackingError> {
        if !self.is_own_org(event.org_id()) {
            return Ok(());
        }
        match event {
            PostOperation::Deploy { result, .. } => {
                self.tracking.update_tracking_from_deploy(result).await
            }
            PostOperation::Retrieve { result, .. } => {
                self.tracking.update_tracking_from_retrieve(result).await
            }
        }
    }
}
