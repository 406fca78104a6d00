//! Name-to-tool lookup built from configuration.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde_json::Value;

use super::mcp::McpTool;
use super::process::{ProcessTool, ProcessToolConfig};
use super::spec::{ToolContext, ToolError, ToolResult, ToolSpec};
use crate::mcp::{McpConfig, McpTransport};

/// Tools by name, plus the context they execute in.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn ToolSpec>>,
    context: ToolContext,
}

impl ToolRegistry {
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolSpec>> {
        self.tools.get(name).cloned()
    }

    /// Every tool, ordered by name.
    pub fn all(&self) -> Vec<Arc<dyn ToolSpec>> {
        self.tools.values().cloned().collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn context(&self) -> &ToolContext {
        &self.context
    }

    pub async fn execute(&self, name: &str, input: Value) -> Result<ToolResult, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::not_available(format!("Unknown tool '{name}'")))?;
        tracing::debug!(tool = name, "executing tool");
        tool.execute(input, &self.context).await
    }

    /// Close MCP sessions and terminate tracked background processes.
    pub async fn shutdown(&self) {
        for tool in self.tools.values() {
            tool.shutdown().await;
        }
        self.context.processes.terminate_all().await;
    }
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: Vec<Arc<dyn ToolSpec>>,
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn ToolSpec>) -> Self {
        self.tools.push(tool);
        self
    }

    /// One Process or Bash tool per `[tools.<name>]` section.
    pub fn with_process_tools(
        mut self,
        tools: &HashMap<String, ProcessToolConfig>,
        workspace: &Path,
    ) -> Result<Self> {
        let mut names: Vec<&String> = tools.keys().collect();
        names.sort();
        for name in names {
            let tool = ProcessTool::from_config(name, &tools[name], workspace)
                .with_context(|| format!("Invalid configuration for tool '{name}'"))?;
            self.tools.push(Arc::new(tool));
        }
        Ok(self)
    }

    /// One tool per name in each enabled server's `tools` list; tools of the
    /// same server share its transport.
    pub fn with_mcp_tools(mut self, mcp: &McpConfig, workspace: &Path) -> Result<Self> {
        let mut servers: Vec<(&String, _)> = mcp.servers.iter().collect();
        servers.sort_by(|a, b| a.0.cmp(b.0));
        for (server_name, server) in servers {
            if server.disabled {
                tracing::debug!(server = %server_name, "skipping disabled MCP server");
                continue;
            }
            let launch = server
                .command_spec(server_name, workspace)
                .with_context(|| format!("Invalid configuration for MCP server '{server_name}'"))?;
            if server.tools.is_empty() {
                tracing::warn!(server = %server_name, "MCP server declares no tools");
                continue;
            }

            let transport = Arc::new(McpTransport::new(
                server_name.clone(),
                server.effective_call_timeout(&mcp.timeouts),
            ));
            for tool_name in &server.tools {
                self.tools.push(Arc::new(McpTool::new(
                    tool_name.clone(),
                    server_name.clone(),
                    launch.clone(),
                    Arc::clone(&transport),
                )));
            }
        }
        Ok(self)
    }

    /// Fails on duplicate tool names.
    pub fn build(self, context: ToolContext) -> Result<ToolRegistry> {
        let mut tools = BTreeMap::new();
        for tool in self.tools {
            let name = tool.name().to_string();
            if tools.insert(name.clone(), tool).is_some() {
                bail!("Tool name '{name}' is configured more than once");
            }
        }
        Ok(ToolRegistry { tools, context })
    }
}
