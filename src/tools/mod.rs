//! Tool adapters and re-exports.

// === Modules ===

pub mod mcp;
mod output;
pub mod process;
pub mod registry;
pub mod spec;

// === Re-exports ===

pub use spec::{ToolCapability, ToolContext, ToolError, ToolResult, ToolSpec};

pub use registry::{ToolRegistry, ToolRegistryBuilder};

pub use mcp::McpTool;
pub use process::{ProcessTool, ProcessToolConfig, ProcessToolKind};
