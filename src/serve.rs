//! Line-oriented stdio front end: one JSON request per input line, one JSON
//! response per output line.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error_taxonomy::ErrorEnvelope;
use crate::tools::ToolRegistry;

#[derive(Debug, Deserialize)]
struct ServeRequest {
    tool: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ServeResponse {
    pub ok: bool,
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
}

impl ServeResponse {
    fn failure(error: ErrorEnvelope) -> Self {
        Self {
            ok: false,
            content: Value::Null,
            metadata: None,
            error: Some(error),
        }
    }
}

/// Answer requests until `input` ends, then shut every tool down.
///
/// Background processes and MCP sessions live across requests.
pub async fn serve<R, W>(registry: &ToolRegistry, input: R, output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let outcome = answer_lines(registry, input, output).await;
    registry.shutdown().await;
    outcome
}

async fn answer_lines<R, W>(registry: &ToolRegistry, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read request")? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(registry, &line).await;
        let mut encoded =
            serde_json::to_string(&response).context("Failed to encode response")?;
        encoded.push('\n');
        output
            .write_all(encoded.as_bytes())
            .await
            .context("Failed to write response")?;
        output.flush().await.context("Failed to flush response")?;
    }
    Ok(())
}

async fn handle_line(registry: &ToolRegistry, line: &str) -> ServeResponse {
    let request: ServeRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            return ServeResponse::failure(ErrorEnvelope::bad_request(format!(
                "Invalid request line: {err}"
            )));
        }
    };
    let arguments = match request.arguments {
        Value::Null => json!({}),
        other => other,
    };

    match registry.execute(&request.tool, arguments).await {
        Ok(result) => ServeResponse {
            ok: result.success,
            content: Value::String(result.content),
            metadata: result.metadata,
            error: None,
        },
        Err(err) => {
            tracing::info!(tool = %request.tool, "tool call failed: {err}");
            ServeResponse::failure(err.into())
        }
    }
}
