//! Built-in health checks (spec.md §4.3).

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sysinfo::{Pid, System};

use super::{CheckResult, HealthCheck, HealthStatus};
use crate::resilience::circuit_breaker::{CircuitBreakerRegistry, CircuitState};
use crate::supervisor;

/// Priority 0: CPU/memory/disk utilization against configurable thresholds.
pub struct SystemResourcesCheck {
    cpu_threshold: f64,
    memory_threshold: f64,
    disk_threshold: f64,
}

impl SystemResourcesCheck {
    pub fn new(cpu_threshold: f64, memory_threshold: f64, disk_threshold: f64) -> Self {
        Self {
            cpu_threshold,
            memory_threshold,
            disk_threshold,
        }
    }
}

#[async_trait]
impl HealthCheck for SystemResourcesCheck {
    fn name(&self) -> String {
        "system_resources".to_string()
    }

    fn priority(&self) -> u8 {
        0
    }

    async fn check(&self) -> CheckResult {
        let cpu_threshold = self.cpu_threshold;
        let memory_threshold = self.memory_threshold;
        let disk_threshold = self.disk_threshold;

        let (cpu_pct, mem_pct, disk_pct) = tokio::task::spawn_blocking(move || {
            let mut sys = System::new_all();
            sys.refresh_cpu();
            std::thread::sleep(std::time::Duration::from_millis(100));
            sys.refresh_cpu();
            let cpu_pct = sys.global_cpu_info().cpu_usage() as f64;

            sys.refresh_memory();
            let mem_pct = if sys.total_memory() == 0 {
                0.0
            } else {
                (sys.used_memory() as f64 / sys.total_memory() as f64) * 100.0
            };

            let disks = sysinfo::Disks::new_with_refreshed_list();
            let disk_pct = disks
                .iter()
                .map(|d| {
                    let total = d.total_space();
                    if total == 0 {
                        0.0
                    } else {
                        ((total - d.available_space()) as f64 / total as f64) * 100.0
                    }
                })
                .fold(0.0f64, f64::max);

            (cpu_pct, mem_pct, disk_pct)
        })
        .await
        .unwrap_or((0.0, 0.0, 0.0));

        let status = if cpu_pct > cpu_threshold {
            HealthStatus::Unhealthy
        } else if mem_pct > memory_threshold || disk_pct > disk_threshold {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        CheckResult {
            name: self.name(),
            priority: self.priority(),
            status,
            message: format!("cpu={cpu_pct:.1}% mem={mem_pct:.1}% disk={disk_pct:.1}%"),
        }
    }
}

/// Priority 1: own-process liveness, age, memory, cpu.
pub struct ProcessHealthCheck {
    started_at: Instant,
    pid: u32,
}

impl ProcessHealthCheck {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            pid: std::process::id(),
        }
    }
}

impl Default for ProcessHealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthCheck for ProcessHealthCheck {
    fn name(&self) -> String {
        "process_health".to_string()
    }

    fn priority(&self) -> u8 {
        1
    }

    async fn check(&self) -> CheckResult {
        let pid = self.pid;
        let age = self.started_at.elapsed();

        let (mem_kb, cpu_pct) = tokio::task::spawn_blocking(move || {
            let mut sys = System::new_all();
            sys.refresh_processes();
            sys.process(Pid::from_u32(pid))
                .map(|p| (p.memory(), p.cpu_usage() as f64))
                .unwrap_or((0, 0.0))
        })
        .await
        .unwrap_or((0, 0.0));

        CheckResult {
            name: self.name(),
            priority: self.priority(),
            status: HealthStatus::Healthy,
            message: format!("age={}s mem={}KB cpu={:.1}%", age.as_secs(), mem_kb, cpu_pct),
        }
    }
}

/// Priority 2: presence of named optional external dependencies on `PATH`.
pub struct DependenciesCheck {
    names: Vec<String>,
}

impl DependenciesCheck {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }
}

#[async_trait]
impl HealthCheck for DependenciesCheck {
    fn name(&self) -> String {
        "dependencies".to_string()
    }

    fn priority(&self) -> u8 {
        2
    }

    async fn check(&self) -> CheckResult {
        let missing: Vec<&String> = self
            .names
            .iter()
            .filter(|name| !supervisor::is_on_path(name))
            .collect();

        if missing.is_empty() {
            CheckResult {
                name: self.name(),
                priority: self.priority(),
                status: HealthStatus::Healthy,
                message: "all optional dependencies present".to_string(),
            }
        } else {
            CheckResult {
                name: self.name(),
                priority: self.priority(),
                status: HealthStatus::Unhealthy,
                message: format!("missing: {}", missing.into_iter().cloned().collect::<Vec<_>>().join(", ")),
            }
        }
    }
}

/// Priority 2: `tool_<name>` — executable resolvable, breaker not OPEN.
pub struct ToolCheck {
    tool_name: String,
    command: String,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl ToolCheck {
    pub fn new(tool_name: String, command: String, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            tool_name,
            command,
            breakers,
        }
    }
}

#[async_trait]
impl HealthCheck for ToolCheck {
    fn name(&self) -> String {
        format!("tool_{}", self.tool_name)
    }

    fn priority(&self) -> u8 {
        2
    }

    async fn check(&self) -> CheckResult {
        if !supervisor::is_on_path(&self.command) {
            return CheckResult {
                name: self.name(),
                priority: self.priority(),
                status: HealthStatus::Unhealthy,
                message: format!("'{}' not resolvable on PATH", self.command),
            };
        }

        let state = self.breakers.state(&self.tool_name).await;
        if state == Some(CircuitState::Open) {
            return CheckResult {
                name: self.name(),
                priority: self.priority(),
                status: HealthStatus::Degraded,
                message: "circuit breaker open".to_string(),
            };
        }

        CheckResult {
            name: self.name(),
            priority: self.priority(),
            status: HealthStatus::Healthy,
            message: "resolvable, breaker not open".to_string(),
        }
    }
}
