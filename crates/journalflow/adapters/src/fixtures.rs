//! Deterministic in-process stand-ins for every remote system.
//!
//! Used by the `local` profile and by service tests. The fixture keeps the
//! same observable semantics as the real systems: case numbers are stable per
//! subject, finalizing journals the entry, and task search sees created tasks.

use async_trait::async_trait;
use journalflow_core::{
    ArchiveFinalizer, CaseLinker, Collaborators, CorrelationId, EntryMetadata,
    EntryMetadataSource, IdentityResolver, LinkRequest, TaskCreator, TaskRequest, TaskType,
    WorkflowError, WorkflowResult,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

const FIRST_CASE_NUMBER: u64 = 10_000;
const FIRST_TASK_ID: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureTask {
    pub id: String,
    pub entry_id: String,
    pub task_type: TaskType,
    pub subject_id: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Default)]
struct FixtureState {
    entries: HashMap<String, EntryMetadata>,
    identities: HashMap<String, Option<String>>,
    cases: HashMap<String, String>,
    bindings: HashMap<String, String>,
    tasks: Vec<FixtureTask>,
    failures: HashSet<&'static str>,
    calls: Vec<&'static str>,
}

#[derive(Debug, Default)]
pub struct FixtureRemotes {
    state: Mutex<FixtureState>,
}

impl FixtureRemotes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            metadata: self.clone(),
            identity: self.clone(),
            cases: self.clone(),
            archive: self.clone(),
            tasks: self.clone(),
        }
    }

    pub fn insert_entry(&self, metadata: EntryMetadata) {
        if let Ok(mut state) = self.state.lock() {
            state.entries.insert(metadata.entry_id.clone(), metadata);
        }
    }

    /// Maps a raw subject reference; `None` makes the person unknown to the registry.
    /// Unmapped references resolve to themselves.
    pub fn insert_identity(&self, raw: impl Into<String>, canonical: Option<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.identities.insert(raw.into(), canonical);
        }
    }

    /// Makes the next call of `operation` fail with a remote error.
    pub fn fail_next(&self, operation: &'static str) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.insert(operation);
        }
    }

    pub fn entry(&self, entry_id: &str) -> Option<EntryMetadata> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.entries.get(entry_id).cloned())
    }

    pub fn tasks(&self) -> Vec<FixtureTask> {
        self.state
            .lock()
            .map(|state| state.tasks.clone())
            .unwrap_or_default()
    }

    pub fn binding(&self, entry_id: &str) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.bindings.get(entry_id).cloned())
    }

    /// Operation names in call order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state
            .lock()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    fn enter(&self, operation: &'static str) -> WorkflowResult<MutexGuard<'_, FixtureState>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| WorkflowError::remote(operation, "fixture state poisoned"))?;
        state.calls.push(operation);
        if state.failures.remove(operation) {
            return Err(WorkflowError::remote(operation, "injected failure"));
        }
        Ok(state)
    }
}

#[async_trait]
impl EntryMetadataSource for FixtureRemotes {
    async fn fetch(
        &self,
        entry_id: &str,
        _correlation_id: &CorrelationId,
    ) -> WorkflowResult<Option<EntryMetadata>> {
        let state = self.enter("archive.metadata")?;
        Ok(state.entries.get(entry_id).cloned())
    }
}

#[async_trait]
impl IdentityResolver for FixtureRemotes {
    async fn resolve(
        &self,
        raw_subject_ref: &str,
        _correlation_id: &CorrelationId,
    ) -> WorkflowResult<Option<String>> {
        let state = self.enter("identity.resolve")?;
        Ok(state
            .identities
            .get(raw_subject_ref)
            .cloned()
            .unwrap_or_else(|| Some(raw_subject_ref.to_string())))
    }
}

#[async_trait]
impl CaseLinker for FixtureRemotes {
    async fn link(
        &self,
        request: &LinkRequest,
        _correlation_id: &CorrelationId,
    ) -> WorkflowResult<String> {
        let mut state = self.enter("case.link")?;
        let next = FIRST_CASE_NUMBER + state.cases.len() as u64;
        let case_number = state
            .cases
            .entry(request.subject_id.clone())
            .or_insert_with(|| next.to_string())
            .clone();
        state
            .bindings
            .insert(request.entry_id.clone(), case_number.clone());
        Ok(case_number)
    }
}

#[async_trait]
impl ArchiveFinalizer for FixtureRemotes {
    async fn finalize(&self, entry_id: &str, _correlation_id: &CorrelationId) -> WorkflowResult<()> {
        let mut state = self.enter("archive.finalize")?;
        if !state.bindings.contains_key(entry_id) {
            return Err(WorkflowError::remote(
                "archive.finalize",
                format!("entry '{entry_id}' is not bound to a case"),
            ));
        }
        if let Some(entry) = state.entries.get_mut(entry_id) {
            entry.archived = true;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskCreator for FixtureRemotes {
    async fn find_open_task(
        &self,
        entry_id: &str,
        task_type: TaskType,
        _correlation_id: &CorrelationId,
    ) -> WorkflowResult<Option<String>> {
        let state = self.enter("task.search")?;
        Ok(state
            .tasks
            .iter()
            .find(|task| task.entry_id == entry_id && task.task_type == task_type)
            .map(|task| task.id.clone()))
    }

    async fn create(
        &self,
        request: &TaskRequest,
        _correlation_id: &CorrelationId,
    ) -> WorkflowResult<String> {
        let mut state = self.enter("task.create")?;
        let id = (FIRST_TASK_ID + state.tasks.len() as u64).to_string();
        state.tasks.push(FixtureTask {
            id: id.clone(),
            entry_id: request.entry_id.clone(),
            task_type: request.task_type,
            subject_id: request.subject_id.clone(),
            description: request.description.clone(),
        });
        Ok(id)
    }
}
