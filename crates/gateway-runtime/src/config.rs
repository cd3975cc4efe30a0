//! C1 Config (spec.md §6): a typed configuration schema loaded from an
//! optional TOML file plus `MCP_<SECTION>_<KEY>` environment overrides,
//! validated with every ranged field clamped to its documented bounds.
//!
//! Grounded on `config::{Config, ConfigError}`'s shape in the teacher: a
//! `Default`-derived struct tree, a `from_env()` pass layered over the file
//! load, and a `validate()` pass returning the same five `ConfigError`
//! variants. The teacher's domain-specific sections (`database`, `slm`,
//! `storage`, key providers) have no counterpart here and are not carried
//! over.

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required configuration: {key}")]
    MissingRequired { key: String },

    #[error("invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("environment variable error: {message}")]
    EnvError { message: String },

    #[error("IO error reading config file: {message}")]
    IoError { message: String },

    #[error("configuration parsing error: {message}")]
    ParseError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Stdio,
    Http,
}

impl std::str::FromStr for Transport {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(Transport::Stdio),
            "http" => Ok(Transport::Http),
            other => Err(ConfigError::InvalidValue {
                key: "server.transport".to_string(),
                reason: format!("must be stdio or http, got '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub transport: Transport,
    pub shutdown_grace_period: f64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            transport: Transport::Stdio,
            shutdown_grace_period: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub max_args_length: u32,
    pub timeout_seconds: u32,
    pub concurrency_limit: u32,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            max_args_length: 2048,
            timeout_seconds: 300,
            concurrency_limit: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSection {
    pub failure_threshold: u32,
    pub recovery_timeout: f64,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub check_interval: f64,
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
    pub disk_threshold: f64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            check_interval: 30.0,
            cpu_threshold: 80.0,
            memory_threshold: 80.0,
            disk_threshold: 80.0,
        }
    }
}

impl HealthSection {
    pub fn check_interval_duration(&self) -> Duration {
        Duration::from_secs_f64(self.check_interval)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    pub prometheus_enabled: bool,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self { prometheus_enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSection {
    pub default_timeout: u32,
    pub default_concurrency: u32,
}

impl Default for ToolSection {
    fn default() -> Self {
        Self {
            default_timeout: 300,
            default_concurrency: 2,
        }
    }
}

/// Root configuration tree (spec.md §6 schema table).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub security: SecuritySection,
    pub circuit_breaker: CircuitBreakerSection,
    pub health: HealthSection,
    pub metrics: MetricsSection,
    pub tool: ToolSection,

    /// `TOOL_INCLUDE` (comma-separated); empty means "all tools enabled".
    #[serde(skip)]
    pub tool_include: Vec<String>,
    /// `TOOL_EXCLUDE` (comma-separated); wins over `tool_include`.
    #[serde(skip)]
    pub tool_exclude: Vec<String>,
}

fn parse_env<T: std::str::FromStr>(var: &str, key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("could not parse '{raw}'"),
            }),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::EnvError {
            message: format!("{var} is not valid UTF-8"),
        }),
    }
}

fn split_csv_env(var: &str) -> Vec<String> {
    env::var(var)
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl Config {
    /// Load from an optional TOML file at `path`, then layer environment
    /// overrides on top, then validate. Matches `MCP_CONFIG_PATH` resolving
    /// to `None` (built-in defaults) per spec.md §6's CLI surface.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            message: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }

    /// Apply `MCP_<SECTION>_<KEY>` overrides plus `TOOL_INCLUDE`/`TOOL_EXCLUDE`.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = parse_env::<String>("MCP_SERVER_HOST", "server.host")? {
            self.server.host = v;
        }
        if let Some(v) = parse_env::<u16>("MCP_SERVER_PORT", "server.port")? {
            self.server.port = v;
        }
        if let Some(v) = parse_env::<String>("MCP_SERVER_TRANSPORT", "server.transport")? {
            self.server.transport = v.parse()?;
        }
        if let Some(v) = parse_env::<f64>(
            "MCP_SERVER_SHUTDOWN_GRACE_PERIOD",
            "server.shutdown_grace_period",
        )? {
            self.server.shutdown_grace_period = v;
        }

        if let Some(v) = parse_env::<u32>(
            "MCP_SECURITY_MAX_ARGS_LENGTH",
            "security.max_args_length",
        )? {
            self.security.max_args_length = v;
        }
        if let Some(v) = parse_env::<u32>("MCP_SECURITY_TIMEOUT_SECONDS", "security.timeout_seconds")? {
            self.security.timeout_seconds = v;
        }
        if let Some(v) = parse_env::<u32>(
            "MCP_SECURITY_CONCURRENCY_LIMIT",
            "security.concurrency_limit",
        )? {
            self.security.concurrency_limit = v;
        }

        if let Some(v) = parse_env::<u32>(
            "MCP_CIRCUIT_BREAKER_FAILURE_THRESHOLD",
            "circuit_breaker.failure_threshold",
        )? {
            self.circuit_breaker.failure_threshold = v;
        }
        if let Some(v) = parse_env::<f64>(
            "MCP_CIRCUIT_BREAKER_RECOVERY_TIMEOUT",
            "circuit_breaker.recovery_timeout",
        )? {
            self.circuit_breaker.recovery_timeout = v;
        }

        if let Some(v) = parse_env::<f64>("MCP_HEALTH_CHECK_INTERVAL", "health.check_interval")? {
            self.health.check_interval = v;
        }
        if let Some(v) = parse_env::<f64>("MCP_HEALTH_CPU_THRESHOLD", "health.cpu_threshold")? {
            self.health.cpu_threshold = v;
        }
        if let Some(v) = parse_env::<f64>("MCP_HEALTH_MEMORY_THRESHOLD", "health.memory_threshold")? {
            self.health.memory_threshold = v;
        }
        if let Some(v) = parse_env::<f64>("MCP_HEALTH_DISK_THRESHOLD", "health.disk_threshold")? {
            self.health.disk_threshold = v;
        }

        if let Some(v) = parse_env::<bool>(
            "MCP_METRICS_PROMETHEUS_ENABLED",
            "metrics.prometheus_enabled",
        )? {
            self.metrics.prometheus_enabled = v;
        }

        if let Some(v) = parse_env::<u32>("MCP_TOOL_DEFAULT_TIMEOUT", "tool.default_timeout")? {
            self.tool.default_timeout = v;
        }
        if let Some(v) = parse_env::<u32>("MCP_TOOL_DEFAULT_CONCURRENCY", "tool.default_concurrency")? {
            self.tool.default_concurrency = v;
        }

        self.tool_include = split_csv_env("TOOL_INCLUDE");
        self.tool_exclude = split_csv_env("TOOL_EXCLUDE");

        Ok(())
    }

    /// Clamp every ranged field to the bounds in spec.md §6's schema table.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "server.port".to_string(),
                reason: "port cannot be 0".to_string(),
            });
        }
        self.server.shutdown_grace_period = self.server.shutdown_grace_period.clamp(0.0, 300.0);

        self.security.max_args_length = self.security.max_args_length.clamp(1, 10240);
        self.security.timeout_seconds = self.security.timeout_seconds.clamp(1, 3600);
        self.security.concurrency_limit = self.security.concurrency_limit.clamp(1, 100);

        self.circuit_breaker.failure_threshold = self.circuit_breaker.failure_threshold.clamp(1, 100);
        self.circuit_breaker.recovery_timeout = self.circuit_breaker.recovery_timeout.clamp(1.0, 600.0);

        self.health.check_interval = self.health.check_interval.clamp(5.0, 300.0);
        self.health.cpu_threshold = self.health.cpu_threshold.clamp(0.0, 100.0);
        self.health.memory_threshold = self.health.memory_threshold.clamp(0.0, 100.0);
        self.health.disk_threshold = self.health.disk_threshold.clamp(0.0, 100.0);

        self.tool.default_timeout = self.tool.default_timeout.clamp(1, 3600);
        self.tool.default_concurrency = self.tool.default_concurrency.clamp(1, 100);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults_match_schema_table() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.transport, Transport::Stdio);
        assert_eq!(config.security.concurrency_limit, 2);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert!(config.metrics.prometheus_enabled);
    }

    #[test]
    fn validate_clamps_out_of_range_values() {
        let mut config = Config {
            security: SecuritySection {
                max_args_length: 999_999,
                timeout_seconds: 0,
                concurrency_limit: 0,
            },
            ..Config::default()
        };
        config.validate().unwrap();
        assert_eq!(config.security.max_args_length, 10240);
        assert_eq!(config.security.timeout_seconds, 1);
        assert_eq!(config.security.concurrency_limit, 1);
    }

    #[test]
    fn zero_port_is_rejected_not_clamped() {
        let mut config = Config {
            server: ServerSection { port: 0, ..Default::default() },
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    #[serial]
    fn env_overrides_apply_over_defaults() {
        env::set_var("MCP_SERVER_PORT", "9999");
        env::set_var("MCP_SERVER_TRANSPORT", "http");
        env::set_var("TOOL_INCLUDE", "nmap, gobuster");

        let mut config = Config::default();
        config.apply_env_overrides().unwrap();

        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.transport, Transport::Http);
        assert_eq!(config.tool_include, vec!["nmap".to_string(), "gobuster".to_string()]);

        env::remove_var("MCP_SERVER_PORT");
        env::remove_var("MCP_SERVER_TRANSPORT");
        env::remove_var("TOOL_INCLUDE");
    }

    #[test]
    #[serial]
    fn invalid_transport_override_is_rejected() {
        env::set_var("MCP_SERVER_TRANSPORT", "carrier-pigeon");
        let mut config = Config::default();
        let result = config.apply_env_overrides();
        env::remove_var("MCP_SERVER_TRANSPORT");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Config::from_file(Path::new("/nonexistent/gateway.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError { .. }));
    }
}
