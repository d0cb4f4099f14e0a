//! Error types for the finance agent orchestrator

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Caller Input Errors
    // =============================

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    // =============================
    // Registry / Startup Errors
    // =============================

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Duplicate tool: {0}")]
    DuplicateTool(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // Tool Invocation Errors
    // =============================

    #[error("Transient tool failure: {0}")]
    TransientTool(String),

    #[error("Permanent tool failure: {0}")]
    PermanentTool(String),

    #[error("Tool timed out after {0} ms")]
    Timeout(u64),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Stable, serializable classification of an error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    InvalidSession,
    UnknownTool,
    Transient,
    Permanent,
    Timeout,
    Cancelled,
    Internal,
}

impl OrchestrationError {
    /// Only network-ish failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestrationError::TransientTool(_) | OrchestrationError::Timeout(_)
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestrationError::InvalidInput(_) => ErrorKind::InvalidInput,
            OrchestrationError::InvalidSession(_) => ErrorKind::InvalidSession,
            OrchestrationError::UnknownTool(_) => ErrorKind::UnknownTool,
            OrchestrationError::TransientTool(_) => ErrorKind::Transient,
            OrchestrationError::PermanentTool(_) => ErrorKind::Permanent,
            OrchestrationError::Timeout(_) => ErrorKind::Timeout,
            OrchestrationError::Cancelled(_) => ErrorKind::Cancelled,
            OrchestrationError::DuplicateTool(_)
            | OrchestrationError::Config(_)
            | OrchestrationError::Internal(_)
            | OrchestrationError::SerializationError(_) => ErrorKind::Internal,
        }
    }

    /// Text that is safe to show to an end user.
    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }
}

impl ErrorKind {
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => {
                "I couldn't understand that request. Please rephrase it and try again."
            }
            ErrorKind::InvalidSession => {
                "Your session could not be identified. Please start a new conversation."
            }
            ErrorKind::UnknownTool => "That capability is not available right now.",
            ErrorKind::Transient | ErrorKind::Timeout => {
                "A data provider is temporarily unavailable. Please try again in a moment."
            }
            ErrorKind::Permanent => {
                "The request could not be completed by the data provider."
            }
            ErrorKind::Cancelled => "The request was cancelled before it finished.",
            ErrorKind::Internal => "Something went wrong while handling your request.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(OrchestrationError::TransientTool("503".into()).is_retryable());
        assert!(OrchestrationError::Timeout(50).is_retryable());
        assert!(!OrchestrationError::PermanentTool("401".into()).is_retryable());
        assert!(!OrchestrationError::InvalidInput("empty".into()).is_retryable());
        assert!(!OrchestrationError::Internal("tool panicked".into()).is_retryable());
    }

    #[test]
    fn test_retryable_errors_are_transient_kinds() {
        let errors = [
            OrchestrationError::TransientTool("503".into()),
            OrchestrationError::Timeout(50),
            OrchestrationError::PermanentTool("401".into()),
            OrchestrationError::Internal("boom".into()),
            OrchestrationError::Config("bad".into()),
        ];
        for err in errors {
            let transient = matches!(err.kind(), ErrorKind::Transient | ErrorKind::Timeout);
            assert_eq!(err.is_retryable(), transient, "{}", err);
        }
    }

    #[test]
    fn test_user_message_hides_internal_text() {
        let err = OrchestrationError::PermanentTool("db password=hunter2 rejected".into());
        assert!(!err.user_message().contains("hunter2"));
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }
}
