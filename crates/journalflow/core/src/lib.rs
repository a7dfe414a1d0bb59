//! Journal entry workflow core.
//!
//! Drives each incoming journal entry through subject resolution, case
//! linking, archive finalization and task creation. Progress is recorded per
//! entry in a durable ledger so redelivered events resume instead of repeating
//! side effects.

#![deny(unsafe_code)]

pub mod collaborators;
pub mod error;
pub mod flow;
pub mod ledger;
pub mod orchestrator;
pub mod storage;
pub mod types;

pub use collaborators::{
    AlwaysCreateTasks, ArchiveFinalizer, CaseLinker, Collaborators, EntryMetadataSource,
    IdentityResolver, TaskCreationDisabled, TaskCreationPolicy, TaskCreator,
};
pub use error::{WorkflowError, WorkflowResult};
pub use flow::{next_stage, required_task_type, EntryState, Stage};
pub use ledger::LedgerRow;
pub use orchestrator::{Disposition, JournalOrchestrator, ProcessReport, TaskResolution};
pub use storage::{InMemoryLedgerStore, LedgerStorageConfig, LedgerStore, PostgresLedgerStore};
pub use types::{
    is_valid_entry_id, task_due_date, CorrelationId, EntryCategory, EntryMetadata, LinkRequest, SubjectRef,
    TaskPriority, TaskRequest, TaskType, APPEAL_CODE, AUTOMATED_UNIT, COMPLAINT_CODE, DEFAULT_THEME,
    EMPLOYMENT_REPORT_CODE, PAPER_SUBMISSION_CODE,
};
