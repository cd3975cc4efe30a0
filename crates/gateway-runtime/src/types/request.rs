//! Per-invocation request type

use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_extra_args() -> String {
    String::new()
}

/// A single tool invocation request, as received from either transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Required. See [`crate::target`] for the accepted grammar.
    pub target: String,
    /// Optional, ≤ 2048 bytes after trim, no shell metacharacters.
    #[serde(default = "default_extra_args")]
    pub extra_args: String,
    /// Optional positive float, capped by the descriptor's default timeout.
    #[serde(default, rename = "timeout_sec")]
    pub timeout_seconds: Option<f64>,
    /// Optional; generated if absent.
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl ToolRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            extra_args: String::new(),
            timeout_seconds: None,
            correlation_id: None,
        }
    }

    /// The correlation id to echo back, generating one if the caller omitted it.
    pub fn correlation_id_or_generate(&self) -> String {
        self.correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }
}
