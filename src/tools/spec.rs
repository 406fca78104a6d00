//! Tool trait, shared execution context, and argument helpers.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::process::{ProcessRegistry, SharedProcessRegistry};

/// What a tool may do when executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCapability {
    /// Spawns local processes.
    ExecutesCode,
    /// Keeps a long-lived external server process.
    ExternalServer,
}

/// State shared by every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub workspace: PathBuf,
    pub processes: SharedProcessRegistry,
}

impl ToolContext {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            processes: ProcessRegistry::shared(),
        }
    }

    #[must_use]
    pub fn with_processes(mut self, processes: SharedProcessRegistry) -> Self {
        self.processes = processes;
        self
    }
}

/// Tool output as handed back to the agent.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolResult {
    pub content: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: true,
            metadata: None,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: false,
            metadata: None,
        }
    }

    /// Pretty-printed JSON content.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::success(serde_json::to_string_pretty(value)?))
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[must_use]
    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }
}

/// Errors surfaced to the caller of a tool.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
    #[error("Missing required field: {field}")]
    MissingField { field: String },
    #[error("Execution failed: {message}")]
    ExecutionFailed { message: String },
    #[error("Timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("Not available: {message}")]
    NotAvailable { message: String },
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },
}

impl ToolError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
        }
    }

    pub fn not_available(message: impl Into<String>) -> Self {
        Self::NotAvailable {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait ToolSpec: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn input_schema(&self) -> Value;

    fn capabilities(&self) -> Vec<ToolCapability> {
        Vec::new()
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError>;

    /// Release resources held across calls (server processes and the like).
    async fn shutdown(&self) {}
}

// === Argument Helpers ===

pub fn required_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    match input.get(field) {
        None | Some(Value::Null) => Err(ToolError::missing_field(field)),
        Some(Value::String(value)) => Ok(value),
        Some(_) => Err(ToolError::invalid_input(format!(
            "Field '{field}' must be a string"
        ))),
    }
}

pub fn optional_str<'a>(input: &'a Value, field: &str) -> Option<&'a str> {
    input.get(field).and_then(Value::as_str)
}

pub fn optional_bool(input: &Value, field: &str, default: bool) -> bool {
    input.get(field).and_then(Value::as_bool).unwrap_or(default)
}

pub fn optional_i64(input: &Value, field: &str, default: i64) -> Result<i64, ToolError> {
    match input.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value.as_i64().ok_or_else(|| {
            ToolError::invalid_input(format!("Field '{field}' must be an integer"))
        }),
    }
}

pub fn required_u32(input: &Value, field: &str) -> Result<u32, ToolError> {
    let value = input
        .get(field)
        .filter(|value| !value.is_null())
        .ok_or_else(|| ToolError::missing_field(field))?;
    value
        .as_u64()
        .and_then(|value| u32::try_from(value).ok())
        .ok_or_else(|| {
            ToolError::invalid_input(format!("Field '{field}' must be a positive integer"))
        })
}

/// An array of strings; absent or null is empty.
pub fn optional_str_list(input: &Value, field: &str) -> Result<Vec<String>, ToolError> {
    match input.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    ToolError::invalid_input(format!("Field '{field}' must contain only strings"))
                })
            })
            .collect(),
        Some(_) => Err(ToolError::invalid_input(format!(
            "Field '{field}' must be an array of strings"
        ))),
    }
}
