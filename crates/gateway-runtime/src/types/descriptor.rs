//! Static, immutable-after-registration tool descriptors

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::resilience::circuit_breaker::CircuitBreakerConfig;

/// How a descriptor's target must be shaped, and where it goes in argv.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
    /// Target is appended as the final positional argument.
    Positional,
    /// Target is injected as `-u <target>`; must be an `http(s)://` URL.
    UrlFlag,
    /// Target is injected as `-d <target>`; must NOT be an `http(s)://` URL.
    DnsFlag,
}

/// A sub-command token accepted as the first non-flag token of `extra_args`
/// (spec.md §3 `allowedModes`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSpec {
    /// The literal token, e.g. "dir", "dns", "vhost".
    pub token: String,
    /// Target shape/placement required when this mode is selected.
    pub target_kind: TargetKind,
    /// Defaults injected only when this mode is selected, overriding any
    /// descriptor-level default with the same governing flag (e.g. the
    /// directory brute-forcer's dns mode uses more threads than dir/vhost).
    pub mode_defaults: Vec<String>,
}

/// The static, declarative record for one registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Stable identifier used in transport (URL path segment, stdio `tool` field).
    pub name: String,
    /// Executable base name, resolved on `PATH` at spawn time.
    pub command: String,
    /// Ordered set of permitted flag tokens (both `-x` and `--xyz` forms).
    pub allowed_flags: Vec<String>,
    /// Permitted positional sub-command tokens, if this tool has modes.
    pub allowed_modes: Vec<ModeSpec>,
    /// Bounds concurrent executions of this tool.
    pub concurrency_limit: usize,
    /// Positive float, seconds.
    pub default_timeout_seconds: f64,
    /// Initial circuit-breaker configuration for this tool.
    pub circuit_breaker_config: CircuitBreakerConfig,
    /// Flag tokens injected by the supervisor when absent from the request.
    pub optimizer_defaults: Vec<String>,
    /// How the target is placed in argv absent a mode-specific flag.
    pub default_target_kind: TargetKind,
    /// Maximum host count for a CIDR target (network-mapper only; spec.md §3).
    pub max_cidr_hosts: Option<u32>,
}

impl ToolDescriptor {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.default_timeout_seconds.max(0.0))
    }

    pub fn mode(&self, token: &str) -> Option<&ModeSpec> {
        self.allowed_modes.iter().find(|m| m.token == token)
    }

    pub fn has_modes(&self) -> bool {
        !self.allowed_modes.is_empty()
    }

    /// Does the allow-list contain this exact flag token (no prefix matching)?
    pub fn allows_flag(&self, flag: &str) -> bool {
        self.allowed_flags.iter().any(|f| f == flag)
    }
}
