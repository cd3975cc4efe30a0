//! ScanGate execution gateway runtime: target validation, tool supervision,
//! circuit breaking, health monitoring, metrics, the tool registry, and the
//! HTTP/stdio transport layer that fronts a fixed catalog of external
//! security-scanning tools.

pub mod config;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod resilience;
pub mod supervisor;
pub mod target;
pub mod transport;
pub mod types;

pub use config::{Config, ConfigError, Transport as ConfigTransport};
pub use health::{HealthMonitor, HealthMonitorConfig, HealthStatus, SystemHealth};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use registry::{ToolInfo, ToolRegistry};
pub use resilience::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
pub use supervisor::ToolSupervisor;
pub use transport::{DispatchError, GatewayState};
pub use types::{ErrorKind, GatewayError, ToolDescriptor, ToolRequest, ToolResult};
