//! Journal entry orchestrator: the resumable workflow engine.
//!
//! For every event the orchestrator loads the entry's ledger row, asks the
//! stage machine for the next stage whose guard still holds, runs it, and
//! persists the completion marker before moving on. Redelivery after any
//! failure resumes from the last persisted marker.

use crate::collaborators::{Collaborators, TaskCreationPolicy};
use crate::error::{WorkflowError, WorkflowResult};
use crate::flow::{next_stage, required_task_type, EntryState, Stage};
use crate::ledger::LedgerRow;
use crate::storage::LedgerStore;
use crate::types::{CorrelationId, EntryMetadata, LinkRequest, TaskRequest, TaskType};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

/// How an event ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Disposition {
    /// At least one guard held and every such stage ran.
    Progressed,
    /// Redelivery of an entry whose workflow already finished.
    AlreadyComplete,
    /// No ledger row and the archive reports the entry as journaled: not ours to drive.
    ArchivedElsewhere,
    /// The task creation policy refused the task stage.
    TaskCreationDeferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TaskResolution {
    Created(String),
    Adopted(String),
}

impl TaskResolution {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Created(id) | Self::Adopted(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub entry_id: String,
    pub correlation_id: CorrelationId,
    pub disposition: Disposition,
    pub executed: Vec<Stage>,
    pub state: EntryState,
    pub task: Option<TaskResolution>,
}

pub struct JournalOrchestrator {
    ledger: Arc<dyn LedgerStore>,
    remotes: Collaborators,
    policy: Arc<dyn TaskCreationPolicy>,
}

impl JournalOrchestrator {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        remotes: Collaborators,
        policy: Arc<dyn TaskCreationPolicy>,
    ) -> Self {
        Self {
            ledger,
            remotes,
            policy,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    pub fn policy_label(&self) -> &'static str {
        self.policy.label()
    }

    /// Drives one entry as far as its guards allow.
    ///
    /// Any stage failure aborts the remaining stages and is returned as is;
    /// markers persisted before the failure stay in place.
    pub async fn process(
        &self,
        entry_id: &str,
        category_hint: Option<&str>,
    ) -> WorkflowResult<ProcessReport> {
        let correlation_id = CorrelationId::generate();
        let span = info_span!(
            "journal_entry",
            entry_id = %entry_id,
            correlation_id = %correlation_id
        );
        self.process_entry(entry_id, category_hint, correlation_id)
            .instrument(span)
            .await
    }

    async fn process_entry(
        &self,
        entry_id: &str,
        category_hint: Option<&str>,
        correlation_id: CorrelationId,
    ) -> WorkflowResult<ProcessReport> {
        let metadata = self
            .remotes
            .metadata
            .fetch(entry_id, &correlation_id)
            .await?
            .ok_or_else(|| {
                WorkflowError::NotFound(format!("journal entry '{entry_id}' not found in archive"))
            })?;

        info!(
            archived = metadata.archived,
            category = ?metadata.category_code,
            created_at = ?metadata.created_at,
            "journal entry metadata fetched"
        );

        let mut report = ProcessReport {
            entry_id: entry_id.to_string(),
            correlation_id: correlation_id.clone(),
            disposition: Disposition::Progressed,
            executed: Vec::new(),
            state: EntryState::Received,
            task: None,
        };

        let mut row = match self.ledger.load(entry_id).await? {
            Some(row) if row.is_complete() => {
                info!(state = row.state().name(), "journal entry already processed");
                report.disposition = Disposition::AlreadyComplete;
                report.state = row.state();
                return Ok(report);
            }
            Some(row) => row,
            None if metadata.archived => {
                info!("journal entry already journaled elsewhere, ignoring");
                report.disposition = Disposition::ArchivedElsewhere;
                return Ok(report);
            }
            None => LedgerRow::new(entry_id, Utc::now()),
        };

        row.record_category(category_hint.or(metadata.category_code.as_deref()));
        if let Some(category) = row.category() {
            info!(category = category.name(), "processing journal entry");
        }

        let mut subject_missing = false;
        while let Some(stage) = next_stage(&row, subject_missing) {
            match stage {
                Stage::Resolve => match self.resolve_subject(&metadata, &correlation_id).await? {
                    Some(subject_id) => {
                        row.record_subject(subject_id);
                        self.persist(&mut row).await?;
                    }
                    None => {
                        warn!("no subject found for journal entry, routing");
                        subject_missing = true;
                    }
                },
                Stage::Link => {
                    let Some(subject_id) = row.subject_id.clone() else {
                        return Err(WorkflowError::stage_violation(
                            Stage::Resolve.name(),
                            Stage::Link.name(),
                        ));
                    };
                    let request = LinkRequest {
                        entry_id: entry_id.to_string(),
                        subject_id,
                        sender_is_subject: row.requires_finalization(),
                    };
                    let case_number = self.remotes.cases.link(&request, &correlation_id).await?;
                    row.mark_linked(case_number, Utc::now())?;
                    self.persist(&mut row).await?;
                    info!(case_number = ?row.case_number, "journal entry linked to case");
                }
                Stage::Finalize => {
                    self.remotes
                        .archive
                        .finalize(entry_id, &correlation_id)
                        .await?;
                    row.mark_finalized(Utc::now())?;
                    self.persist(&mut row).await?;
                    info!("journal entry finalized");
                }
                Stage::CreateTask => {
                    if !self.policy.allows(&row) {
                        info!(
                            policy = self.policy.label(),
                            "task creation disabled by policy, leaving entry at current stage"
                        );
                        report.disposition = Disposition::TaskCreationDeferred;
                        break;
                    }
                    let task_type = required_task_type(&row);
                    let resolution = self
                        .create_or_adopt_task(&row, task_type, &metadata, &correlation_id)
                        .await?;
                    row.mark_task_created(resolution.task_id(), task_type, Utc::now())?;
                    self.persist(&mut row).await?;
                    info!(
                        task_id = resolution.task_id(),
                        task_type = %task_type,
                        "task recorded for journal entry"
                    );
                    report.task = Some(resolution);
                }
            }
            report.executed.push(stage);
        }

        report.state = EntryState::derive(&row, subject_missing);
        info!(
            state = report.state.name(),
            stages = report.executed.len(),
            "finished processing journal entry"
        );
        Ok(report)
    }

    async fn resolve_subject(
        &self,
        metadata: &EntryMetadata,
        correlation_id: &CorrelationId,
    ) -> WorkflowResult<Option<String>> {
        match metadata.subject.raw_id() {
            Some(raw) => self.remotes.identity.resolve(raw, correlation_id).await,
            None => {
                warn!("journal entry has no subject reference");
                Ok(None)
            }
        }
    }

    /// Always checks the task service before creating, so a task created just
    /// before a crash (and never recorded locally) is adopted rather than duplicated.
    async fn create_or_adopt_task(
        &self,
        row: &LedgerRow,
        task_type: TaskType,
        metadata: &EntryMetadata,
        correlation_id: &CorrelationId,
    ) -> WorkflowResult<TaskResolution> {
        if let Some(existing) = self
            .remotes
            .tasks
            .find_open_task(&row.entry_id, task_type, correlation_id)
            .await?
        {
            warn!(
                task_id = %existing,
                task_type = %task_type,
                "open task already exists for journal entry, adopting it"
            );
            return Ok(TaskResolution::Adopted(existing));
        }

        let request = TaskRequest::new(
            &row.entry_id,
            row.subject_id.clone(),
            task_type,
            metadata.title.as_deref(),
            Utc::now().date_naive(),
        );
        let task_id = self.remotes.tasks.create(&request, correlation_id).await?;
        Ok(TaskResolution::Created(task_id))
    }

    async fn persist(&self, row: &mut LedgerRow) -> WorkflowResult<()> {
        row.updated_at = row.updated_at.max(Utc::now());
        self.ledger.upsert(row).await
    }
}
