//! Narrow contracts for the remote systems the workflow drives.
//!
//! Every call is awaited before the next stage starts. Implementations report
//! failure as [`WorkflowError::Remote`](crate::WorkflowError::Remote) and never
//! retry; retries belong to the transport.

use crate::error::WorkflowResult;
use crate::ledger::LedgerRow;
use crate::types::{CorrelationId, EntryMetadata, LinkRequest, TaskRequest, TaskType};
use async_trait::async_trait;
use std::sync::Arc;

/// Archive lookup for the entry an event refers to.
#[async_trait]
pub trait EntryMetadataSource: Send + Sync {
    async fn fetch(
        &self,
        entry_id: &str,
        correlation_id: &CorrelationId,
    ) -> WorkflowResult<Option<EntryMetadata>>;
}

/// Maps a raw person reference to the canonical identifier.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(
        &self,
        raw_subject_ref: &str,
        correlation_id: &CorrelationId,
    ) -> WorkflowResult<Option<String>>;
}

/// Obtains (or creates) the subject's case and binds the entry to it.
///
/// Binding an entry that is already bound to the same case succeeds.
#[async_trait]
pub trait CaseLinker: Send + Sync {
    async fn link(
        &self,
        request: &LinkRequest,
        correlation_id: &CorrelationId,
    ) -> WorkflowResult<String>;
}

/// Locks an archived entry once it belongs to a case. Idempotent remotely.
#[async_trait]
pub trait ArchiveFinalizer: Send + Sync {
    async fn finalize(&self, entry_id: &str, correlation_id: &CorrelationId)
        -> WorkflowResult<()>;
}

#[async_trait]
pub trait TaskCreator: Send + Sync {
    /// Open task of `task_type` already registered for the entry, if any.
    async fn find_open_task(
        &self,
        entry_id: &str,
        task_type: TaskType,
        correlation_id: &CorrelationId,
    ) -> WorkflowResult<Option<String>>;

    async fn create(
        &self,
        request: &TaskRequest,
        correlation_id: &CorrelationId,
    ) -> WorkflowResult<String>;
}

/// External toggle consulted before the task stage.
///
/// Refusal leaves the entry at its last persisted stage; it never changes
/// which stages exist.
pub trait TaskCreationPolicy: Send + Sync {
    fn allows(&self, row: &LedgerRow) -> bool;

    fn label(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysCreateTasks;

impl TaskCreationPolicy for AlwaysCreateTasks {
    fn allows(&self, _row: &LedgerRow) -> bool {
        true
    }

    fn label(&self) -> &'static str {
        "enabled"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TaskCreationDisabled;

impl TaskCreationPolicy for TaskCreationDisabled {
    fn allows(&self, _row: &LedgerRow) -> bool {
        false
    }

    fn label(&self) -> &'static str {
        "disabled"
    }
}

/// Remote collaborators, built once by the composition root.
#[derive(Clone)]
pub struct Collaborators {
    pub metadata: Arc<dyn EntryMetadataSource>,
    pub identity: Arc<dyn IdentityResolver>,
    pub cases: Arc<dyn CaseLinker>,
    pub archive: Arc<dyn ArchiveFinalizer>,
    pub tasks: Arc<dyn TaskCreator>,
}
