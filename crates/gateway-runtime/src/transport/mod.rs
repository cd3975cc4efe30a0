//! Shared dispatch (spec.md §4.6): HTTP and stdio are thin framings over one
//! function, mirroring how `api::routes` handlers are thin wrappers over a
//! shared `RuntimeApiProvider` trait object in the teacher.

#[cfg(feature = "http-api")]
pub mod http;
pub mod stdio;

use std::sync::Arc;
use std::time::Instant;

use crate::health::HealthMonitor;
use crate::metrics::{ExecutionStatus, MetricsRegistry};
use crate::registry::{ToolInfo, ToolRegistry};
use crate::resilience::circuit_breaker::{CircuitBreakerRegistry, CircuitCallError};
use crate::supervisor::ToolSupervisor;
use crate::types::{ErrorKind, GatewayError, ToolRequest, ToolResult};

/// Shared ownership of every long-lived component, handed to both
/// transports and constructed once by the composition root.
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<ToolRegistry>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub metrics: Arc<MetricsRegistry>,
    pub health: Arc<HealthMonitor>,
    /// `security.max_args_length` (spec.md §3, §6), enforced by the
    /// supervisor before tokenizing `extra_args`.
    pub max_args_length: u32,
}

/// A dispatch-layer error that precedes ever constructing a [`ToolResult`] —
/// these are the two conditions the router turns into a bare status code
/// (spec.md §4.6: 404 unknown, 403 disabled) rather than a 200 body.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("tool disabled: {0}")]
    ToolDisabled(String),
}

impl DispatchError {
    fn from_gateway(err: GatewayError) -> Self {
        match err {
            GatewayError::UnknownTool(name) => DispatchError::UnknownTool(name),
            GatewayError::ToolDisabled(name) => DispatchError::ToolDisabled(name),
            other => DispatchError::UnknownTool(other.to_string()),
        }
    }
}

/// Whether a completed [`ToolResult`] should count as a circuit-breaker
/// failure. Validation errors are rejected before the subprocess is ever
/// spawned (spec.md §7: "request rejected before spawn") and say nothing
/// about the external tool's health, so they are excluded.
fn counts_as_breaker_failure(result: &ToolResult) -> bool {
    !matches!(result.error_kind, None | Some(ErrorKind::ValidationError)) || result.return_code != 0
}

/// Execute `name` against `req` (spec.md §5 "Concurrency contract"): resolve
/// the tool, acquire its concurrency permit, then pass the breaker gate.
pub async fn execute_tool(
    state: &GatewayState,
    name: &str,
    req: ToolRequest,
) -> Result<ToolResult, DispatchError> {
    let desc = state
        .registry
        .resolve(name)
        .await
        .map_err(DispatchError::from_gateway)?;

    let _permit = state.registry.acquire_permit(name).await;
    let guard = state.metrics.begin(name);
    let start = Instant::now();

    let outcome = state
        .breakers
        .call(name, || async {
            let result = ToolSupervisor::execute(desc, &req, state.max_args_length).await;
            if counts_as_breaker_failure(&result) {
                Err(result)
            } else {
                Ok(result)
            }
        })
        .await;

    drop(guard);
    let elapsed = start.elapsed().as_secs_f64();

    let result = match outcome {
        Ok(result) => {
            state.metrics.record(name, elapsed, ExecutionStatus::Success, None);
            result
        }
        Err(CircuitCallError::Inner(result)) => {
            let status = if result.timed_out {
                ExecutionStatus::Timeout
            } else {
                ExecutionStatus::Failure
            };
            state.metrics.record(name, elapsed, status, result.error_kind);
            result
        }
        Err(CircuitCallError::Open(open_err)) => {
            state
                .metrics
                .record(name, elapsed, ExecutionStatus::Failure, Some(ErrorKind::CircuitBreakerOpen));
            let gw_err = GatewayError::CircuitOpen {
                tool: name.to_string(),
                retry_after: open_err.retry_after,
            };
            ToolResult::from_error(req.correlation_id_or_generate(), &gw_err, elapsed)
                .with_metadata("tool", name.to_string())
                .with_metadata("state", "OPEN".to_string())
        }
    };

    Ok(result)
}

/// `GET /tools` / `ListEnabled`+`Describe` composed (spec.md §4.5, §4.6).
pub async fn list_tools(state: &GatewayState) -> Vec<ToolInfo> {
    state.registry.describe_all().await
}

pub async fn enable_tool(state: &GatewayState, name: &str) -> Result<(), DispatchError> {
    state.registry.enable(name).await.map_err(DispatchError::from_gateway)
}

pub async fn disable_tool(state: &GatewayState, name: &str) -> Result<(), DispatchError> {
    state.registry.disable(name).await.map_err(DispatchError::from_gateway)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{HealthMonitor, HealthMonitorConfig};

    fn test_state() -> GatewayState {
        let registry = Arc::new(ToolRegistry::new(&[], &[]));
        let breakers = Arc::new(CircuitBreakerRegistry::new());
        crate::registry::register_breakers(&registry, &breakers);
        GatewayState {
            registry,
            breakers,
            metrics: Arc::new(MetricsRegistry::new(0)),
            health: Arc::new(HealthMonitor::new(HealthMonitorConfig::default(), vec![])),
            max_args_length: 2048,
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_dispatch_error() {
        let state = test_state();
        let err = execute_tool(&state, "not-a-tool", ToolRequest::new("192.168.1.1"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn disabled_tool_is_dispatch_error() {
        let state = test_state();
        state.registry.disable("nmap").await.unwrap();
        let err = execute_tool(&state, "nmap", ToolRequest::new("192.168.1.1"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::ToolDisabled(_)));
    }

    #[tokio::test]
    async fn validation_failure_does_not_trip_breaker() {
        let state = test_state();
        for _ in 0..10 {
            let result = execute_tool(&state, "nmap", ToolRequest::new("8.8.8.8")).await.unwrap();
            assert_eq!(result.error_kind, Some(ErrorKind::ValidationError));
        }
        let snapshot = state.breakers.snapshot("nmap").await.unwrap();
        assert_eq!(snapshot.state, crate::resilience::circuit_breaker::CircuitState::Closed);
    }
}
