//! Tools proxied to an MCP server: the tool name is the RPC method and the
//! input object is forwarded as `params`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::spec::{ToolCapability, ToolContext, ToolError, ToolResult, ToolSpec};
use crate::mcp::{McpTransport, TransportError, format_tool_result};
use crate::process::CommandSpec;

pub struct McpTool {
    name: String,
    description: String,
    server: String,
    launch: CommandSpec,
    transport: Arc<McpTransport>,
}

impl McpTool {
    /// Several tools of one server share `transport`, and with it the
    /// server process.
    pub fn new(
        name: impl Into<String>,
        server: impl Into<String>,
        launch: CommandSpec,
        transport: Arc<McpTransport>,
    ) -> Self {
        let name = name.into();
        let server = server.into();
        Self {
            description: format!("Call `{name}` on MCP server '{server}'."),
            name,
            server,
            launch,
            transport,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn transport(&self) -> &Arc<McpTransport> {
        &self.transport
    }
}

#[async_trait]
impl ToolSpec for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "description": "Forwarded unchanged as the RPC params",
            "additionalProperties": true
        })
    }

    fn capabilities(&self) -> Vec<ToolCapability> {
        vec![ToolCapability::ExternalServer]
    }

    async fn execute(&self, input: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        // Starts the server on first use, and again if it has since died.
        self.transport
            .start(&self.launch)
            .await
            .map_err(transport_error)?;

        let result = match self.transport.invoke(&self.name, input).await {
            Ok(result) => result,
            Err(err) => {
                if leaves_stream_unsynced(&err) {
                    // A late or half-read reply would otherwise answer the next call.
                    tracing::warn!(server = %self.server, method = %self.name, "closing MCP session after: {err}");
                    self.transport.close().await;
                }
                return Err(transport_error(err));
            }
        };

        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(ToolResult::success(format_tool_result(&result))
            .with_success(!is_error)
            .with_metadata(json!({
                "server": self.server,
                "method": self.name,
                "result": result,
            })))
    }

    async fn shutdown(&self) {
        self.transport.close().await;
    }
}

fn leaves_stream_unsynced(err: &TransportError) -> bool {
    matches!(
        err,
        TransportError::Timeout { .. } | TransportError::Decode { .. } | TransportError::Protocol(_)
    )
}

fn transport_error(err: TransportError) -> ToolError {
    match err {
        TransportError::Timeout { after, .. } => ToolError::Timeout {
            seconds: after.as_secs() + u64::from(after.subsec_nanos() > 0),
        },
        TransportError::Config(_) | TransportError::Spawn { .. } => {
            ToolError::not_available(err.to_string())
        }
        other => ToolError::execution_failed(other.to_string()),
    }
}
