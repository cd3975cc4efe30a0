//! Line-oriented JSON stdio transport (spec.md §4.6): one JSON object per
//! line in, one JSON object per line out. New code — the teacher has no
//! inbound stdio framing (its `integrations::mcp` client only ever speaks
//! *outbound* MCP) — but it shares [`super::execute_tool`] and friends with
//! the HTTP transport so request semantics stay identical across both.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::GatewayState;
use crate::health::SystemHealth;
use crate::registry::ToolInfo;
use crate::types::{ToolRequest, ToolResult};

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum StdioRequest {
    Execute {
        tool: String,
        #[serde(flatten)]
        request: ToolRequest,
    },
    ListTools,
    Enable {
        tool: String,
    },
    Disable {
        tool: String,
    },
    Health,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum StdioResponse {
    Result(ToolResult),
    Tools(Vec<ToolInfo>),
    Health(Box<SystemHealth>),
    Ack { status: &'static str },
    Error { error: String },
}

async fn handle_line(state: &GatewayState, line: &str) -> StdioResponse {
    let request: StdioRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => return StdioResponse::Error { error: format!("malformed request: {e}") },
    };

    match request {
        StdioRequest::Execute { tool, request } => match super::execute_tool(state, &tool, request).await {
            Ok(result) => StdioResponse::Result(result),
            Err(e) => StdioResponse::Error { error: e.to_string() },
        },
        StdioRequest::ListTools => StdioResponse::Tools(super::list_tools(state).await),
        StdioRequest::Enable { tool } => match super::enable_tool(state, &tool).await {
            Ok(()) => StdioResponse::Ack { status: "enabled" },
            Err(e) => StdioResponse::Error { error: e.to_string() },
        },
        StdioRequest::Disable { tool } => match super::disable_tool(state, &tool).await {
            Ok(()) => StdioResponse::Ack { status: "disabled" },
            Err(e) => StdioResponse::Error { error: e.to_string() },
        },
        StdioRequest::Health => match state.health.latest().await {
            Some(health) => StdioResponse::Health(Box::new(health)),
            None => StdioResponse::Error {
                error: "no health cycle has run yet".to_string(),
            },
        },
    }
}

/// Read framed requests from `reader`, dispatch each, and write the framed
/// response to `writer`. Runs until `reader` reaches EOF (stdin closed).
pub async fn run<R, W>(state: GatewayState, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(&state, &line).await;
        let encoded = serde_json::to_string(&response).unwrap_or_else(|e| {
            format!("{{\"error\":\"failed to encode response: {e}\"}}")
        });
        writer.write_all(encoded.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Serve over real stdin/stdout. Entry point for the composition root when
/// `server.transport = "stdio"` (spec.md §6).
pub async fn serve(state: GatewayState) -> std::io::Result<()> {
    run(state, tokio::io::stdin(), tokio::io::stdout()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_state() -> GatewayState {
        let registry = Arc::new(crate::registry::ToolRegistry::new(&[], &[]));
        let breakers = Arc::new(crate::resilience::circuit_breaker::CircuitBreakerRegistry::new());
        crate::registry::register_breakers(&registry, &breakers);
        GatewayState {
            registry,
            breakers,
            metrics: Arc::new(crate::metrics::MetricsRegistry::new(0)),
            health: Arc::new(crate::health::HealthMonitor::new(
                crate::health::HealthMonitorConfig::default(),
                vec![],
            )),
            max_args_length: 2048,
        }
    }

    #[tokio::test]
    async fn list_tools_round_trip() {
        let state = test_state();
        let input = b"{\"action\":\"list_tools\"}\n".to_vec();
        let mut output = Vec::new();
        run(state, input.as_slice(), &mut output).await.unwrap();
        let text = String::from_utf8(output).unwrap();
        let value: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert!(value.as_array().unwrap().len() >= 5);
    }

    #[tokio::test]
    async fn malformed_line_yields_error_response_not_a_crash() {
        let state = test_state();
        let input = b"not json\n".to_vec();
        let mut output = Vec::new();
        run(state, input.as_slice(), &mut output).await.unwrap();
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("malformed request"));
    }

    #[tokio::test]
    async fn execute_against_validation_error_target() {
        let state = test_state();
        let input = b"{\"action\":\"execute\",\"tool\":\"nmap\",\"target\":\"8.8.8.8\"}\n".to_vec();
        let mut output = Vec::new();
        run(state, input.as_slice(), &mut output).await.unwrap();
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("validation_error"));
    }
}
