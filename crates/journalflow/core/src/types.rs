use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Theme code for the benefit area handled by this workflow.
pub const DEFAULT_THEME: &str = "IND";

/// Organisational unit recorded as creator of tasks and finalizer of entries.
pub const AUTOMATED_UNIT: &str = "9999";

pub const PAPER_SUBMISSION_CODE: &str = "NAV 76-13.45";
pub const COMPLAINT_CODE: &str = "NAV 90-00.08 K";
pub const APPEAL_CODE: &str = "NAV 90-00.08 A";
pub const EMPLOYMENT_REPORT_CODE: &str = "NAV 00-10.02";

const PAPER_SUBMISSION_DESCRIPTION: &str =
    "Ny søknad om tiltakspenger mottatt på papir. Behandles i ny løsning.";
const DEFAULT_FILING_DESCRIPTION: &str = "Mottatt dokument";
const TASK_DUE_DAYS: i64 = 3;

/// Archive journal entry ids are plain decimal numbers.
pub fn is_valid_entry_id(entry_id: &str) -> bool {
    !entry_id.is_empty() && entry_id.bytes().all(|byte| byte.is_ascii_digit())
}

/// Classification of a journal entry, derived from its document code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryCategory {
    PaperSubmission,
    Complaint,
    Appeal,
    EmploymentReport,
    Other(String),
}

impl EntryCategory {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            PAPER_SUBMISSION_CODE => Self::PaperSubmission,
            COMPLAINT_CODE => Self::Complaint,
            APPEAL_CODE => Self::Appeal,
            EMPLOYMENT_REPORT_CODE => Self::EmploymentReport,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::PaperSubmission => PAPER_SUBMISSION_CODE,
            Self::Complaint => COMPLAINT_CODE,
            Self::Appeal => APPEAL_CODE,
            Self::EmploymentReport => EMPLOYMENT_REPORT_CODE,
            Self::Other(code) => code,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::PaperSubmission => "paper_submission",
            Self::Complaint => "complaint",
            Self::Appeal => "appeal",
            Self::EmploymentReport => "employment_report",
            Self::Other(_) => "other",
        }
    }

    /// Only paper submissions are finalized in the archive by this workflow.
    pub fn requires_finalization(&self) -> bool {
        matches!(self, Self::PaperSubmission)
    }

    /// Task type created once an entry of this category is linked to a case.
    pub fn linked_task_type(&self) -> TaskType {
        if self.requires_finalization() {
            TaskType::CaseWork
        } else {
            TaskType::Filing
        }
    }
}

/// Downstream task kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    CaseWork,
    Routing,
    Filing,
}

impl TaskType {
    /// Code understood by the task service.
    pub fn code(self) -> &'static str {
        match self {
            Self::CaseWork => "BEH_SAK",
            Self::Routing => "FDR",
            Self::Filing => "JFR",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "BEH_SAK" => Some(Self::CaseWork),
            "FDR" => Some(Self::Routing),
            "JFR" => Some(Self::Filing),
            _ => None,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Correlation id propagated to every remote call made for one event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw reference to the person an entry belongs to, as stored in the archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRef {
    pub id: Option<String>,
    pub kind: Option<String>,
}

impl SubjectRef {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            kind: Some(kind.into()),
        }
    }

    pub fn missing() -> Self {
        Self::default()
    }

    /// Both id and id kind are needed before the reference can be resolved.
    pub fn raw_id(&self) -> Option<&str> {
        match (&self.id, &self.kind) {
            (Some(id), Some(_)) if !id.trim().is_empty() => Some(id.as_str()),
            _ => None,
        }
    }
}

/// Archive metadata for one journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub entry_id: String,
    pub subject: SubjectRef,
    /// The entry has already been journaled, by this workflow or by someone else.
    pub archived: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub category_code: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRequest {
    pub entry_id: String,
    pub subject_id: String,
    /// Paper submissions also record the subject as sender of the entry.
    pub sender_is_subject: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskPriority {
    #[serde(rename = "HOY")]
    High,
    #[serde(rename = "NORM")]
    Normal,
    #[serde(rename = "LAV")]
    Low,
}

/// Payload for creating a downstream task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub entry_id: String,
    pub subject_id: Option<String>,
    pub task_type: TaskType,
    pub theme: String,
    pub description: Option<String>,
    pub created_by_unit: String,
    pub active_date: NaiveDate,
    pub due_date: NaiveDate,
    pub priority: TaskPriority,
}

impl TaskRequest {
    pub fn new(
        entry_id: impl Into<String>,
        subject_id: Option<String>,
        task_type: TaskType,
        title: Option<&str>,
        today: NaiveDate,
    ) -> Self {
        let description = match task_type {
            TaskType::CaseWork => Some(PAPER_SUBMISSION_DESCRIPTION.to_string()),
            TaskType::Filing => Some(title.unwrap_or(DEFAULT_FILING_DESCRIPTION).to_string()),
            TaskType::Routing => None,
        };
        let subject_id = match task_type {
            TaskType::Routing => None,
            _ => subject_id,
        };

        Self {
            entry_id: entry_id.into(),
            subject_id,
            task_type,
            theme: DEFAULT_THEME.to_string(),
            description,
            created_by_unit: AUTOMATED_UNIT.to_string(),
            active_date: today,
            due_date: task_due_date(today),
            priority: TaskPriority::Normal,
        }
    }
}

/// Tasks are due three days out, moved to the following Monday when that lands on a weekend.
pub fn task_due_date(today: NaiveDate) -> NaiveDate {
    next_working_day(today + Duration::days(TASK_DUE_DAYS))
}

fn next_working_day(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date + Duration::days(2),
        Weekday::Sun => date + Duration::days(1),
        _ => date,
    }
}
