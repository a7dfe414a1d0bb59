//! Journal change events as published by the document archive.

use journalflow_core::is_valid_entry_id;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Kind of archive change an event reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChangeType {
    Received,
    ThemeChanged,
    FinallyArchived,
    Expired,
    Other(String),
}

impl ChangeType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Received => "JournalpostMottatt",
            Self::ThemeChanged => "TemaEndret",
            Self::FinallyArchived => "EndeligJournalført",
            Self::Expired => "JournalpostUtgått",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for ChangeType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "JournalpostMottatt" => Self::Received,
            "TemaEndret" => Self::ThemeChanged,
            "EndeligJournalført" => Self::FinallyArchived,
            "JournalpostUtgått" => Self::Expired,
            _ => Self::Other(raw),
        }
    }
}

impl From<ChangeType> for String {
    fn from(value: ChangeType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One archive change event, keyed by the archive's field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEvent {
    #[serde(rename = "hendelsesId", default)]
    pub event_id: Option<String>,
    #[serde(rename = "journalpostId", deserialize_with = "string_or_number")]
    pub entry_id: String,
    #[serde(rename = "hendelsesType")]
    pub change_type: ChangeType,
    /// Theme after the change.
    #[serde(rename = "temaNytt", default)]
    pub theme: Option<String>,
    /// Document code, when the producer already knows it.
    #[serde(rename = "brevkode", default, skip_serializing_if = "Option::is_none")]
    pub category_hint: Option<String>,
    #[serde(rename = "mottaksKanal", default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl JournalEvent {
    pub fn new(entry_id: impl Into<String>, change_type: ChangeType, theme: &str) -> Self {
        Self {
            event_id: None,
            entry_id: entry_id.into(),
            change_type,
            theme: Some(theme.to_string()),
            category_hint: None,
            channel: None,
        }
    }

    pub fn with_category_hint(mut self, code: impl Into<String>) -> Self {
        self.category_hint = Some(code.into());
        self
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(value) => value,
        serde_json::Value::Number(value) => value.to_string(),
        other => {
            return Err(D::Error::custom(format!(
                "journalpostId must be a string or number, got {other}"
            )))
        }
    };
    if !is_valid_entry_id(&value) {
        return Err(D::Error::custom(format!(
            "journalpostId must be a decimal id, got '{value}'"
        )));
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Process,
    Skip(&'static str),
}

/// Admits only new or re-themed entries belonging to the configured theme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    theme: String,
}

impl EventFilter {
    pub fn new(theme: impl Into<String>) -> Self {
        Self {
            theme: theme.into(),
        }
    }

    pub fn theme(&self) -> &str {
        &self.theme
    }

    pub fn decide(&self, event: &JournalEvent) -> FilterDecision {
        if !matches!(
            event.change_type,
            ChangeType::Received | ChangeType::ThemeChanged
        ) {
            return FilterDecision::Skip("change type not handled");
        }
        if event.theme.as_deref() != Some(self.theme.as_str()) {
            return FilterDecision::Skip("other theme");
        }
        FilterDecision::Process
    }
}
