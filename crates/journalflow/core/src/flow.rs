use crate::ledger::LedgerRow;
use crate::types::TaskType;
use serde::Serialize;

/// Guarded units of work, executed strictly in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Resolve,
    Link,
    Finalize,
    CreateTask,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Link => "link",
            Self::Finalize => "finalize",
            Self::CreateTask => "create_task",
        }
    }
}

/// Workflow state of one entry, derived from ledger fields.
///
/// ```text
/// Received -> SubjectResolved -> Linked -> [Finalized] -> TaskCreated
/// Received -> NoSubject -> TaskCreated(Routing)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryState {
    Received,
    SubjectResolved,
    Linked,
    Finalized,
    NoSubject,
    TaskCreated,
}

impl EntryState {
    /// `subject_missing` is only known while processing: identity resolution
    /// came back empty for this event.
    pub fn derive(row: &LedgerRow, subject_missing: bool) -> Self {
        if row.has_task() {
            Self::TaskCreated
        } else if row.subject_id.is_none() {
            if subject_missing {
                Self::NoSubject
            } else {
                Self::Received
            }
        } else if row.is_finalized() {
            Self::Finalized
        } else if row.is_linked() {
            Self::Linked
        } else {
            Self::SubjectResolved
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::SubjectResolved => "subject_resolved",
            Self::Linked => "linked",
            Self::Finalized => "finalized",
            Self::NoSubject => "no_subject",
            Self::TaskCreated => "task_created",
        }
    }
}

/// The single guard evaluator: the first stage whose guard still holds.
///
/// A later stage is never returned while an earlier stage required for the
/// entry's category has not recorded its completion marker.
pub fn next_stage(row: &LedgerRow, subject_missing: bool) -> Option<Stage> {
    if row.has_task() {
        return None;
    }
    if row.subject_id.is_none() {
        return if subject_missing {
            Some(Stage::CreateTask)
        } else {
            Some(Stage::Resolve)
        };
    }
    if !row.is_linked() {
        return Some(Stage::Link);
    }
    if row.requires_finalization() && !row.is_finalized() {
        return Some(Stage::Finalize);
    }
    Some(Stage::CreateTask)
}

/// Task type the entry ends with: routing without a subject, otherwise by category.
pub fn required_task_type(row: &LedgerRow) -> TaskType {
    match (&row.subject_id, row.category()) {
        (None, _) => TaskType::Routing,
        (Some(_), Some(category)) => category.linked_task_type(),
        (Some(_), None) => TaskType::Filing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PAPER_SUBMISSION_CODE;
    use chrono::Utc;

    fn paper_row() -> LedgerRow {
        let mut row = LedgerRow::new("4567", Utc::now());
        row.record_category(Some(PAPER_SUBMISSION_CODE));
        row
    }

    #[test]
    fn walks_paper_submission_stages_in_order() {
        let mut row = paper_row();
        assert_eq!(next_stage(&row, false), Some(Stage::Resolve));
        assert_eq!(EntryState::derive(&row, false), EntryState::Received);

        row.record_subject("12345678910");
        assert_eq!(next_stage(&row, false), Some(Stage::Link));
        assert_eq!(EntryState::derive(&row, false), EntryState::SubjectResolved);

        row.mark_linked("34567", Utc::now()).unwrap();
        assert_eq!(next_stage(&row, false), Some(Stage::Finalize));

        row.mark_finalized(Utc::now()).unwrap();
        assert_eq!(next_stage(&row, false), Some(Stage::CreateTask));
        assert_eq!(required_task_type(&row), TaskType::CaseWork);

        row.mark_task_created("9876", TaskType::CaseWork, Utc::now())
            .unwrap();
        assert_eq!(next_stage(&row, false), None);
        assert_eq!(EntryState::derive(&row, false), EntryState::TaskCreated);
    }

    #[test]
    fn other_categories_skip_finalize() {
        let mut row = LedgerRow::new("4568", Utc::now());
        row.record_category(Some("NAV 90-00.08 K"));
        row.record_subject("12345678910");
        row.mark_linked("34567", Utc::now()).unwrap();

        assert_eq!(next_stage(&row, false), Some(Stage::CreateTask));
        assert_eq!(required_task_type(&row), TaskType::Filing);
    }

    #[test]
    fn missing_subject_goes_straight_to_routing_task() {
        let row = paper_row();
        assert_eq!(next_stage(&row, true), Some(Stage::CreateTask));
        assert_eq!(EntryState::derive(&row, true), EntryState::NoSubject);
        assert_eq!(required_task_type(&row), TaskType::Routing);
    }
}
