use crate::error::{WorkflowError, WorkflowResult};
use crate::flow::{next_stage, required_task_type, EntryState, Stage};
use crate::types::{EntryCategory, TaskType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable per-entry progress record, one row per `entry_id`.
///
/// Invariant handling:
/// - Completion markers are only set through the `mark_*` transitions, which
///   refuse to run out of stage order.
/// - `case_number`/`linked_at` and the task triple are always set together.
/// - [`LedgerRow::merge`] never clears or rewinds a marker that is already set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub entry_id: String,
    pub subject_id: Option<String>,
    pub case_number: Option<String>,
    pub category: Option<String>,
    pub linked_at: Option<DateTime<Utc>>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub task_id: Option<String>,
    pub task_type: Option<TaskType>,
    pub task_created_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerRow {
    pub fn new(entry_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            entry_id: entry_id.into(),
            subject_id: None,
            case_number: None,
            category: None,
            linked_at: None,
            finalized_at: None,
            task_id: None,
            task_type: None,
            task_created_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn category(&self) -> Option<EntryCategory> {
        self.category.as_deref().map(EntryCategory::from_code)
    }

    pub fn requires_finalization(&self) -> bool {
        self.category()
            .map(|category| category.requires_finalization())
            .unwrap_or(false)
    }

    pub fn is_linked(&self) -> bool {
        self.linked_at.is_some()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized_at.is_some()
    }

    pub fn has_task(&self) -> bool {
        self.task_created_at.is_some()
    }

    pub fn state(&self) -> EntryState {
        EntryState::derive(self, false)
    }

    /// Whether every stage that applies to this entry has recorded completion.
    pub fn is_complete(&self) -> bool {
        if !self.has_task() {
            return false;
        }
        if self.subject_id.is_none() {
            return true;
        }
        self.is_linked() && (!self.requires_finalization() || self.is_finalized())
    }

    /// Records the category once; later hints never overwrite it.
    pub fn record_category(&mut self, code: Option<&str>) {
        if self.category.is_none() {
            self.category = code
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(str::to_string);
        }
    }

    /// Records the canonical subject once; a known subject is kept.
    pub fn record_subject(&mut self, subject_id: impl Into<String>) {
        if self.subject_id.is_none() {
            self.subject_id = Some(subject_id.into());
        }
    }

    pub fn mark_linked(
        &mut self,
        case_number: impl Into<String>,
        at: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        self.ensure_next(Stage::Link)?;
        self.case_number = Some(case_number.into());
        self.linked_at = Some(at);
        self.touch(at);
        Ok(())
    }

    pub fn mark_finalized(&mut self, at: DateTime<Utc>) -> WorkflowResult<()> {
        self.ensure_next(Stage::Finalize)?;
        self.finalized_at = Some(at);
        self.touch(at);
        Ok(())
    }

    pub fn mark_task_created(
        &mut self,
        task_id: impl Into<String>,
        task_type: TaskType,
        at: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        if self.has_task() {
            return Err(WorkflowError::InvariantViolation(format!(
                "task already recorded for entry '{}'",
                self.entry_id
            )));
        }
        if self.subject_id.is_some() {
            self.ensure_next(Stage::CreateTask)?;
        }
        let expected = required_task_type(self);
        if expected != task_type {
            return Err(WorkflowError::InvariantViolation(format!(
                "entry '{}' requires a {} task, got {}",
                self.entry_id, expected, task_type
            )));
        }

        self.task_id = Some(task_id.into());
        self.task_type = Some(task_type);
        self.task_created_at = Some(at);
        self.touch(at);
        Ok(())
    }

    /// Combines a stored row with an incoming write without regressing progress.
    ///
    /// `self` is the stored row. Fields already set on it win; grouped fields
    /// move as a group.
    pub fn merge(&self, incoming: &LedgerRow) -> LedgerRow {
        let (case_number, linked_at) = if self.linked_at.is_some() {
            (self.case_number.clone(), self.linked_at)
        } else {
            (incoming.case_number.clone(), incoming.linked_at)
        };
        let (task_id, task_type, task_created_at) = if self.task_created_at.is_some() {
            (self.task_id.clone(), self.task_type, self.task_created_at)
        } else {
            (
                incoming.task_id.clone(),
                incoming.task_type,
                incoming.task_created_at,
            )
        };

        LedgerRow {
            entry_id: self.entry_id.clone(),
            subject_id: self
                .subject_id
                .clone()
                .or_else(|| incoming.subject_id.clone()),
            case_number,
            category: self.category.clone().or_else(|| incoming.category.clone()),
            linked_at,
            finalized_at: self.finalized_at.or(incoming.finalized_at),
            task_id,
            task_type,
            task_created_at,
            created_at: self.created_at,
            updated_at: self.updated_at.max(incoming.updated_at),
        }
    }

    fn ensure_next(&self, stage: Stage) -> WorkflowResult<()> {
        match next_stage(self, false) {
            Some(next) if next == stage => Ok(()),
            Some(next) => Err(WorkflowError::stage_violation(next.name(), stage.name())),
            None => Err(WorkflowError::stage_violation(
                EntryState::TaskCreated.name(),
                stage.name(),
            )),
        }
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = self.updated_at.max(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{COMPLAINT_CODE, PAPER_SUBMISSION_CODE};
    use chrono::Duration;
    use proptest::prelude::*;

    fn linked_complaint() -> LedgerRow {
        let mut row = LedgerRow::new("4567", Utc::now());
        row.record_category(Some(COMPLAINT_CODE));
        row.record_subject("12345678910");
        row.mark_linked("34567", Utc::now()).unwrap();
        row
    }

    #[test]
    fn rejects_task_before_link() {
        let mut row = LedgerRow::new("4567", Utc::now());
        row.record_category(Some(COMPLAINT_CODE));
        row.record_subject("12345678910");

        let err = row
            .mark_task_created("9876", TaskType::Filing, Utc::now())
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("expected 'link', got 'create_task'"));
        assert!(!row.has_task());
    }

    #[test]
    fn rejects_task_before_paper_submission_is_finalized() {
        let mut row = LedgerRow::new("4567", Utc::now());
        row.record_category(Some(PAPER_SUBMISSION_CODE));
        row.record_subject("12345678910");
        row.mark_linked("34567", Utc::now()).unwrap();

        assert!(row
            .mark_task_created("9876", TaskType::CaseWork, Utc::now())
            .is_err());
        row.mark_finalized(Utc::now()).unwrap();
        assert!(row
            .mark_task_created("9876", TaskType::CaseWork, Utc::now())
            .is_ok());
        assert!(row.is_complete());
    }

    #[test]
    fn rejects_wrong_task_type_and_second_task() {
        let mut row = linked_complaint();
        assert!(row
            .mark_task_created("9876", TaskType::CaseWork, Utc::now())
            .is_err());
        row.mark_task_created("9876", TaskType::Filing, Utc::now())
            .unwrap();
        assert!(row
            .mark_task_created("9877", TaskType::Filing, Utc::now())
            .is_err());
        assert_eq!(row.task_id.as_deref(), Some("9876"));
    }

    #[test]
    fn rejects_second_link() {
        let mut row = linked_complaint();
        assert!(row.mark_linked("99999", Utc::now()).is_err());
        assert_eq!(row.case_number.as_deref(), Some("34567"));
    }

    #[test]
    fn routing_row_is_complete_without_link() {
        let mut row = LedgerRow::new("4567", Utc::now());
        row.mark_task_created("9876", TaskType::Routing, Utc::now())
            .unwrap();
        assert!(row.is_complete());
        assert_eq!(row.linked_at, None);
        assert_eq!(row.case_number, None);
    }

    #[test]
    fn category_and_subject_are_recorded_once() {
        let mut row = LedgerRow::new("4567", Utc::now());
        row.record_category(Some("  "));
        assert_eq!(row.category, None);
        row.record_category(Some(PAPER_SUBMISSION_CODE));
        row.record_category(Some(COMPLAINT_CODE));
        assert_eq!(row.category.as_deref(), Some(PAPER_SUBMISSION_CODE));

        row.record_subject("12345678910");
        row.record_subject("10987654321");
        assert_eq!(row.subject_id.as_deref(), Some("12345678910"));
    }

    #[test]
    fn merge_keeps_stored_markers() {
        let stored = linked_complaint();
        let mut stale = LedgerRow::new("4567", stored.created_at + Duration::seconds(5));
        stale.case_number = Some("11111".to_string());
        stale.linked_at = Some(stored.created_at - Duration::days(1));

        let merged = stored.merge(&stale);
        assert_eq!(merged.case_number, stored.case_number);
        assert_eq!(merged.linked_at, stored.linked_at);
        assert_eq!(merged.created_at, stored.created_at);
        assert_eq!(merged.updated_at, stale.updated_at);
    }

    fn arbitrary_row() -> impl Strategy<Value = LedgerRow> {
        let base = Utc::now();
        (
            proptest::option::of(0i64..1_000),
            proptest::option::of(0i64..1_000),
            proptest::option::of(0i64..1_000),
            proptest::option::of("[0-9]{11}"),
            0i64..1_000,
        )
            .prop_map(move |(linked, finalized, task, subject, updated)| {
                let mut row = LedgerRow::new("4567", base);
                row.subject_id = subject;
                if let Some(offset) = linked {
                    row.case_number = Some(format!("case-{offset}"));
                    row.linked_at = Some(base + Duration::seconds(offset));
                }
                row.finalized_at = finalized.map(|offset| base + Duration::seconds(offset));
                if let Some(offset) = task {
                    row.task_id = Some(format!("task-{offset}"));
                    row.task_type = Some(TaskType::Filing);
                    row.task_created_at = Some(base + Duration::seconds(offset));
                }
                row.updated_at = base + Duration::seconds(updated);
                row
            })
    }

    proptest! {
        #[test]
        fn replayed_writes_never_clear_or_rewind_markers(
            writes in proptest::collection::vec(arbitrary_row(), 1..12)
        ) {
            let mut stored = writes[0].clone();
            for incoming in &writes[1..] {
                let merged = stored.merge(incoming);

                if stored.linked_at.is_some() {
                    prop_assert_eq!(merged.linked_at, stored.linked_at);
                    prop_assert_eq!(&merged.case_number, &stored.case_number);
                }
                if stored.finalized_at.is_some() {
                    prop_assert_eq!(merged.finalized_at, stored.finalized_at);
                }
                if stored.task_created_at.is_some() {
                    prop_assert_eq!(merged.task_created_at, stored.task_created_at);
                    prop_assert_eq!(&merged.task_id, &stored.task_id);
                }
                if stored.subject_id.is_some() {
                    prop_assert_eq!(&merged.subject_id, &stored.subject_id);
                }
                prop_assert!(merged.updated_at >= stored.updated_at);
                prop_assert_eq!(merged.linked_at.is_some(), merged.case_number.is_some());
                prop_assert_eq!(merged.task_created_at.is_some(), merged.task_id.is_some());

                stored = merged;
            }
        }
    }
}
