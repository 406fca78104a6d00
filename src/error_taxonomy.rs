//! Shared error taxonomy for tool failures reported over the serve loop.

use crate::tools::ToolError;

/// Broad category for typed error handling and policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Authorization,
    Timeout,
    InvalidInput,
    Tool,
    State,
}

/// Severity hint for callers and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Warning,
    Error,
}

/// Unified envelope used when crossing subsystem boundaries.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorEnvelope {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub recoverable: bool,
    pub code: String,
    pub message: String,
}

impl ErrorEnvelope {
    #[must_use]
    pub fn new(
        category: ErrorCategory,
        severity: ErrorSeverity,
        recoverable: bool,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            severity,
            recoverable,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Malformed request lines in the serve loop, before any tool runs.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::InvalidInput,
            ErrorSeverity::Error,
            false,
            "bad_request",
            message,
        )
    }
}

impl From<ToolError> for ErrorEnvelope {
    fn from(value: ToolError) -> Self {
        match value {
            ToolError::InvalidInput { message } => Self::new(
                ErrorCategory::InvalidInput,
                ErrorSeverity::Error,
                false,
                "tool_invalid_input",
                message,
            ),
            ToolError::MissingField { field } => Self::new(
                ErrorCategory::InvalidInput,
                ErrorSeverity::Error,
                false,
                "tool_missing_field",
                format!("Missing required field: {field}"),
            ),
            ToolError::ExecutionFailed { message } => Self::new(
                ErrorCategory::Tool,
                ErrorSeverity::Error,
                true,
                "tool_execution_failed",
                message,
            ),
            ToolError::Timeout { seconds } => Self::new(
                ErrorCategory::Timeout,
                ErrorSeverity::Warning,
                true,
                "tool_timeout",
                format!("Tool timed out after {seconds}s"),
            ),
            ToolError::NotAvailable { message } => Self::new(
                ErrorCategory::State,
                ErrorSeverity::Error,
                false,
                "tool_not_available",
                message,
            ),
            ToolError::PermissionDenied { message } => Self::new(
                ErrorCategory::Authorization,
                ErrorSeverity::Error,
                false,
                "tool_permission_denied",
                message,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tool_errors_map_to_categories() {
        let missing = ErrorEnvelope::from(ToolError::missing_field("pid"));
        assert_eq!(missing.category, ErrorCategory::InvalidInput);
        assert_eq!(missing.code, "tool_missing_field");
        assert_eq!(missing.message, "Missing required field: pid");
        assert!(!missing.recoverable);

        let timeout = ErrorEnvelope::from(ToolError::Timeout { seconds: 5 });
        assert_eq!(timeout.category, ErrorCategory::Timeout);
        assert_eq!(timeout.severity, ErrorSeverity::Warning);
        assert!(timeout.recoverable);
    }

    #[test]
    fn envelope_serializes_snake_case() {
        let value = serde_json::to_value(ErrorEnvelope::from(ToolError::not_available("down"))).unwrap();
        assert_eq!(value["category"], "state");
        assert_eq!(value["severity"], "error");
        assert_eq!(value["code"], "tool_not_available");
    }
}
