use thiserror::Error;

/// Result type for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Journal workflow errors.
///
/// A missing subject and an already existing task are not errors: they are
/// handled as the routing branch and as task adoption respectively.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Remote operation '{operation}' failed: {message}")]
    Remote {
        operation: &'static str,
        message: String,
    },

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl WorkflowError {
    pub fn remote(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Remote {
            operation,
            message: message.into(),
        }
    }

    pub fn stage_violation(expected: &str, actual: &str) -> Self {
        Self::InvariantViolation(format!(
            "stage order violation: expected '{}', got '{}'",
            expected, actual
        ))
    }

    /// Whether redelivering the same event can succeed without operator action.
    pub fn is_redeliverable(&self) -> bool {
        matches!(self, Self::Remote { .. } | Self::Ledger(_))
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}
