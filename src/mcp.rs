//! MCP (Model Context Protocol) stdio client.
//!
//! One `McpTransport` owns one long-lived server child and exchanges
//! line-delimited JSON-RPC with it. Tool calls are proxied with the tool's
//! own name as the RPC method.

mod envelope;
mod transport;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::process::CommandSpec;

pub use envelope::{FIXED_REQUEST_ID, Inbound, JSONRPC_VERSION, RpcErrorObject, RpcRequest, decode_line};
pub use transport::McpTransport;

// === Configuration Types ===

/// `[mcp]` section of the toolbelt config.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct McpConfig {
    #[serde(default)]
    pub timeouts: McpTimeouts,
    #[serde(default, alias = "mcpServers")]
    pub servers: HashMap<String, McpServerConfig>,
}

/// Global timeout configuration
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct McpTimeouts {
    #[serde(default = "default_call_timeout")]
    pub call_timeout: u64,
}

fn default_call_timeout() -> u64 {
    5
}

impl Default for McpTimeouts {
    fn default() -> Self {
        Self {
            call_timeout: default_call_timeout(),
        }
    }
}

/// Configuration for a single MCP server
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct McpServerConfig {
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Tool names proxied to this server; each becomes one RPC method.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub call_timeout: Option<u64>,
    #[serde(default)]
    pub disabled: bool,
}

impl McpServerConfig {
    pub fn effective_call_timeout(&self, global: &McpTimeouts) -> Duration {
        Duration::from_secs(self.call_timeout.unwrap_or(global.call_timeout))
    }

    /// Validate the launch settings and build the server's command.
    ///
    /// A relative `working_dir` resolves against `workspace`.
    pub fn command_spec(&self, name: &str, workspace: &Path) -> Result<CommandSpec, TransportError> {
        let command = self
            .command
            .as_deref()
            .map(str::trim)
            .filter(|command| !command.is_empty())
            .ok_or_else(|| {
                TransportError::Config(format!("MCP server '{name}' has no command configured"))
            })?;

        let working_dir = match &self.working_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => workspace.join(dir),
            None => workspace.to_path_buf(),
        };
        if !working_dir.is_dir() {
            return Err(TransportError::Config(format!(
                "MCP server '{name}' working directory does not exist: {}",
                working_dir.display()
            )));
        }

        let mut env: Vec<(String, String)> = self
            .env
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        env.sort();

        Ok(CommandSpec::new(command, working_dir)
            .args(self.args.iter().cloned())
            .envs(env))
    }
}

// === Errors ===

/// Failures of the stdio JSON-RPC transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("MCP transport is not running")]
    NotStarted,
    #[error("Invalid MCP configuration: {0}")]
    Config(String),
    #[error("Failed to spawn MCP server `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("MCP transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode MCP request: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Failed to decode MCP response `{line}`: {source}")]
    Decode {
        line: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("MCP error in '{method}' (code {code}): {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("MCP protocol error: {0}")]
    Protocol(String),
    #[error("MCP method '{method}' timed out after {after:?}")]
    Timeout { method: String, after: Duration },
    #[error("MCP server closed its output before responding")]
    Closed,
    #[error("MCP transport closed while a call was in flight")]
    Cancelled,
}

// === Result Rendering ===

/// Flatten an MCP tool result to text.
///
/// Results carrying `content` blocks become their text (non-text blocks are
/// named); anything else is pretty JSON.
pub fn format_tool_result(result: &Value) -> String {
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let content = result.get("content").and_then(Value::as_array).map_or_else(
        || match result {
            Value::String(text) => text.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_default(),
        },
        |arr| {
            arr.iter()
                .filter_map(|item| match item.get("type")?.as_str()? {
                    "text" => item.get("text")?.as_str().map(String::from),
                    other => Some(format!("[{other} content]")),
                })
                .collect::<Vec<_>>()
                .join("\n")
        },
    );

    if is_error {
        format!("Error: {content}")
    } else {
        content
    }
}
