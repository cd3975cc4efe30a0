//! Error taxonomy for the tool execution gateway

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The `error_type` string surfaced in a [`crate::types::ToolResult`] and in
/// HTTP error bodies. Values match the external interface's wire grammar
/// verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    NotFound,
    ValidationError,
    ExecutionError,
    ResourceExhausted,
    CircuitBreakerOpen,
    Unknown,
}

impl ErrorKind {
    /// Return code a [`crate::types::ToolResult`] carries for this error kind,
    /// absent a more specific value (e.g. `Timeout` always implies 124).
    pub fn default_return_code(self) -> i32 {
        match self {
            ErrorKind::NotFound => 127,
            ErrorKind::Timeout => 124,
            ErrorKind::ValidationError
            | ErrorKind::ExecutionError
            | ErrorKind::ResourceExhausted
            | ErrorKind::CircuitBreakerOpen => 1,
            ErrorKind::Unknown => 1,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::ExecutionError => "execution_error",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::CircuitBreakerOpen => "circuit_breaker_open",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Gateway-internal error type. Supervisor and registry errors are always
/// converted into a `ToolResult` before crossing the transport boundary —
/// this type only ever surfaces as an HTTP 500 for genuine internal bugs.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("tool '{0}' not found")]
    UnknownTool(String),

    #[error("tool '{0}' is disabled")]
    ToolDisabled(String),

    #[error("executable not found on PATH: {0}")]
    NotFound(String),

    #[error("execution timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("circuit breaker open for '{tool}', retry after {retry_after:?}")]
    CircuitOpen {
        tool: String,
        retry_after: std::time::Duration,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Validation(_) => ErrorKind::ValidationError,
            GatewayError::UnknownTool(_) | GatewayError::ToolDisabled(_) => {
                ErrorKind::ValidationError
            }
            GatewayError::NotFound(_) => ErrorKind::NotFound,
            GatewayError::Timeout(_) => ErrorKind::Timeout,
            GatewayError::Execution(_) => ErrorKind::ExecutionError,
            GatewayError::CircuitOpen { .. } => ErrorKind::CircuitBreakerOpen,
            GatewayError::Config(_) => ErrorKind::ValidationError,
            GatewayError::Internal(_) => ErrorKind::Unknown,
        }
    }

    /// A short human-readable hint the client can act on, echoed into
    /// `ToolResult::recovery_suggestion`.
    pub fn recovery_suggestion(&self) -> String {
        match self {
            GatewayError::Validation(_) => {
                "target must be an RFC1918 IPv4 address, a private IPv4 CIDR, a loopback \
                 address, or a hostname ending in '.lab.internal'"
                    .to_string()
            }
            GatewayError::UnknownTool(_) => "check GET /tools for the registered tool names".to_string(),
            GatewayError::ToolDisabled(name) => {
                format!("enable the tool first via POST /tools/{name}/enable")
            }
            GatewayError::NotFound(cmd) => {
                format!("install '{cmd}' and ensure it is resolvable on PATH")
            }
            GatewayError::Timeout(_) => {
                "retry with a shorter scope or a larger timeout_sec, up to the tool's default_timeout_seconds".to_string()
            }
            GatewayError::Execution(_) => "inspect stderr for the underlying tool's diagnostics".to_string(),
            GatewayError::CircuitOpen { retry_after, .. } => {
                format!("circuit is open, retry after approximately {retry_after:?}")
            }
            GatewayError::Config(_) => "fix the configuration value and restart".to_string(),
            GatewayError::Internal(_) => "this is a gateway bug, please report it".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_wire_format() {
        assert_eq!(ErrorKind::CircuitBreakerOpen.to_string(), "circuit_breaker_open");
        assert_eq!(ErrorKind::NotFound.default_return_code(), 127);
        assert_eq!(ErrorKind::Timeout.default_return_code(), 124);
    }

    #[test]
    fn serializes_snake_case() {
        let v = serde_json::to_string(&ErrorKind::ValidationError).unwrap();
        assert_eq!(v, "\"validation_error\"");
    }
}
