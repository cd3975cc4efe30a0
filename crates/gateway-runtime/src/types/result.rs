//! The outcome of a single tool invocation

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::error::{ErrorKind, GatewayError};

/// Result of executing one [`super::request::ToolRequest`] against a
/// [`super::descriptor::ToolDescriptor`]. Field names match the external
/// JSON interface from spec.md §6 exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "returncode")]
    pub return_code: i32,
    #[serde(rename = "truncated_stdout")]
    pub stdout_truncated: bool,
    #[serde(rename = "truncated_stderr")]
    pub stderr_truncated: bool,
    pub timed_out: bool,
    pub execution_time: f64,
    pub correlation_id: String,
    #[serde(rename = "error", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(rename = "error_type", skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_suggestion: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolResult {
    /// Build a successful/completed result (return code may still be non-zero
    /// if the underlying tool itself exited non-zero — that is not a gateway
    /// error, see spec.md §7).
    pub fn completed(
        correlation_id: String,
        stdout: String,
        stderr: String,
        return_code: i32,
        stdout_truncated: bool,
        stderr_truncated: bool,
        execution_time: f64,
    ) -> Self {
        Self {
            stdout,
            stderr,
            return_code,
            stdout_truncated,
            stderr_truncated,
            timed_out: false,
            execution_time,
            correlation_id,
            error_message: None,
            error_kind: None,
            recovery_suggestion: None,
            metadata: HashMap::new(),
        }
    }

    pub fn timed_out(correlation_id: String, partial_stdout: String, partial_stderr: String, execution_time: f64) -> Self {
        let err = GatewayError::Timeout(std::time::Duration::from_secs_f64(execution_time));
        Self {
            stdout: partial_stdout,
            stderr: partial_stderr,
            return_code: ErrorKind::Timeout.default_return_code(),
            stdout_truncated: false,
            stderr_truncated: false,
            timed_out: true,
            execution_time,
            correlation_id,
            error_message: Some("execution timed out".to_string()),
            error_kind: Some(ErrorKind::Timeout),
            recovery_suggestion: Some(err.recovery_suggestion()),
            metadata: HashMap::new(),
        }
    }

    /// Build a result from a gateway error raised before or during spawn.
    /// Never constructed for transport-level bugs — those stay `GatewayError`
    /// and surface as HTTP 500 (spec.md §7).
    pub fn from_error(correlation_id: String, error: &GatewayError, execution_time: f64) -> Self {
        let kind = error.kind();
        Self {
            stdout: String::new(),
            stderr: String::new(),
            return_code: kind.default_return_code(),
            stdout_truncated: false,
            stderr_truncated: false,
            timed_out: matches!(kind, ErrorKind::Timeout),
            execution_time,
            correlation_id,
            error_message: Some(error.to_string()),
            error_kind: Some(kind),
            recovery_suggestion: Some(error.recovery_suggestion()),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.error_kind.is_none() && self.return_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_has_no_error_fields_in_json() {
        let r = ToolResult::completed("cid".into(), "out".into(), "".into(), 0, false, false, 1.2);
        let v = serde_json::to_value(&r).unwrap();
        assert!(v.get("error").is_none());
        assert!(v.get("error_type").is_none());
        assert_eq!(v["returncode"], 0);
    }

    #[test]
    fn timeout_implies_124() {
        let r = ToolResult::timed_out("cid".into(), String::new(), String::new(), 5.0);
        assert_eq!(r.return_code, 124);
        assert!(r.timed_out);
    }

    #[test]
    fn error_kind_implies_nonzero_return_code() {
        let err = GatewayError::Validation("bad target".into());
        let r = ToolResult::from_error("cid".into(), &err, 0.0);
        assert!(r.error_kind.is_some());
        assert_ne!(r.return_code, 0);
    }
}
