//! Error types with actionable suggestions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for failed lookups, commands and flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ElementNotFound,
    DriverTransport,
    InvalidSelector,
    FlowAborted,
    Cancelled,
    AssertionFailed,
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::ElementNotFound => write!(f, "ELEMENT_NOT_FOUND"),
            ErrorCode::DriverTransport => write!(f, "DRIVER_TRANSPORT"),
            ErrorCode::InvalidSelector => write!(f, "INVALID_SELECTOR"),
            ErrorCode::FlowAborted => write!(f, "FLOW_ABORTED"),
            ErrorCode::Cancelled => write!(f, "CANCELLED"),
            ErrorCode::AssertionFailed => write!(f, "ASSERTION_FAILED"),
            ErrorCode::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// A failure raised while resolving elements or executing a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestraError {
    pub code: ErrorCode,
    pub message: String,
    pub suggestion: Option<String>,
    /// Visible elements at the time of failure, one per line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hierarchy_dump: Option<String>,
}

pub type Result<T> = std::result::Result<T, OrchestraError>;

impl fmt::Display for OrchestraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (hint: {})", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for OrchestraError {}

impl OrchestraError {
    fn new(code: ErrorCode, message: String, suggestion: impl Into<String>) -> Self {
        Self {
            code,
            message,
            suggestion: Some(suggestion.into()),
            hierarchy_dump: None,
        }
    }

    /// A required element did not appear before its deadline.
    pub fn element_not_found(description: &str, hierarchy_dump: Option<String>) -> Self {
        Self {
            code: ErrorCode::ElementNotFound,
            message: format!("Element not found: {}", description),
            suggestion: Some(
                "Check the selector against the visible elements below, or mark it optional"
                    .into(),
            ),
            hierarchy_dump,
        }
    }

    /// The device could not be reached or rejected an operation.
    pub fn transport(operation: &str, error: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::DriverTransport,
            format!("Driver failed during {}: {}", operation, error),
            "Verify the device connection is alive and the driver session is open",
        )
    }

    pub fn invalid_selector(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InvalidSelector,
            message.into(),
            "Fix the selector definition; invalid selectors are never retried",
        )
    }

    /// The init sub-flow failed, so the main flow never started.
    pub fn flow_aborted(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::FlowAborted,
            message.into(),
            "Run the init flow on its own to see which command fails",
        )
    }

    pub fn cancelled() -> Self {
        Self::new(
            ErrorCode::Cancelled,
            "Execution was cancelled".to_string(),
            "The run was interrupted externally; start it again to continue",
        )
    }

    pub fn assertion_failed(message: impl Into<String>, hierarchy_dump: Option<String>) -> Self {
        Self {
            code: ErrorCode::AssertionFailed,
            message: message.into(),
            suggestion: Some("Inspect the visible elements to see what the screen shows".into()),
            hierarchy_dump,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::Internal,
            message.into(),
            "This is an internal error. Please report it if it persists.",
        )
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::Cancelled
    }
}
