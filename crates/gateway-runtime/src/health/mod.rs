//! Health Monitor (spec.md §4.3): priority-weighted checks aggregated into
//! one of {healthy, degraded, unhealthy}, run on a background timer.
//!
//! No direct teacher module covers this concern, so the shape is new code
//! grounded on the teacher's *style*: an `RwLock`-guarded latest snapshot
//! (the same ownership shape as `resilience::circuit_breaker::CircuitBreakerRegistry`),
//! `tracing`-instrumented transitions, and an `#[async_trait]` check trait
//! mirroring the teacher's provider traits (`api::traits::RuntimeApiProvider`).

pub mod checks;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify, RwLock};
use tokio::task::JoinHandle;

pub use checks::{DependenciesCheck, ProcessHealthCheck, SystemResourcesCheck, ToolCheck};

const HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// HTTP status code for `GET /health` (spec.md §4.6).
    pub fn http_status(self) -> u16 {
        match self {
            HealthStatus::Healthy => 200,
            HealthStatus::Degraded => 207,
            HealthStatus::Unhealthy => 503,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub priority: u8,
    pub status: HealthStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub checks: Vec<CheckResult>,
}

/// One named, prioritized health probe. Priority 0=critical, 1=important,
/// 2=informational, matching spec.md §4.3's built-in checks.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> String;
    fn priority(&self) -> u8;
    async fn check(&self) -> CheckResult;
}

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub check_interval: Duration,
    pub check_timeout: Duration,
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
    pub disk_threshold: f64,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            check_timeout: Duration::from_secs(10),
            cpu_threshold: 80.0,
            memory_threshold: 80.0,
            disk_threshold: 80.0,
        }
    }
}

/// Apply the single-pass aggregation rule from spec.md §4.3.
pub fn aggregate(results: &[CheckResult]) -> HealthStatus {
    if results
        .iter()
        .any(|r| r.priority == 0 && r.status == HealthStatus::Unhealthy)
    {
        return HealthStatus::Unhealthy;
    }
    if results
        .iter()
        .any(|r| r.priority == 1 && r.status == HealthStatus::Unhealthy)
    {
        return HealthStatus::Degraded;
    }
    if results.iter().any(|r| r.status == HealthStatus::Degraded) {
        return HealthStatus::Degraded;
    }
    let informational: Vec<&CheckResult> = results.iter().filter(|r| r.priority == 2).collect();
    if !informational.is_empty()
        && informational
            .iter()
            .all(|r| r.status == HealthStatus::Unhealthy)
    {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

pub struct HealthMonitor {
    config: HealthMonitorConfig,
    checks: Vec<Arc<dyn HealthCheck>>,
    latest: RwLock<Option<SystemHealth>>,
    history: RwLock<VecDeque<SystemHealth>>,
    running: AtomicBool,
    shutdown: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
    watch_tx: watch::Sender<Option<SystemHealth>>,
}

impl HealthMonitor {
    pub fn new(config: HealthMonitorConfig, checks: Vec<Arc<dyn HealthCheck>>) -> Self {
        let (watch_tx, _) = watch::channel(None);
        Self {
            config,
            checks,
            latest: RwLock::new(None),
            history: RwLock::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
            running: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
            handle: Mutex::new(None),
            watch_tx,
        }
    }

    /// Subscribe to every recorded cycle, most recent first on first poll —
    /// used by the SSE `/events` stream to push updates the instant the
    /// status changes rather than only on its own polling cadence.
    pub fn subscribe(&self) -> watch::Receiver<Option<SystemHealth>> {
        self.watch_tx.subscribe()
    }

    /// Run one cycle: all checks concurrently, each bounded by
    /// `check_timeout`; the whole cycle bounded by `check_timeout + 2s`.
    pub async fn run_cycle(&self) -> SystemHealth {
        let cycle_deadline = self.config.check_timeout + Duration::from_secs(2);
        let check_timeout = self.config.check_timeout;

        let futures = self.checks.iter().map(|c| {
            let check = Arc::clone(c);
            async move {
                match tokio::time::timeout(check_timeout, check.check()).await {
                    Ok(result) => result,
                    Err(_) => CheckResult {
                        name: check.name(),
                        priority: check.priority(),
                        status: HealthStatus::Unhealthy,
                        message: "timed out".to_string(),
                    },
                }
            }
        });

        let checks = match tokio::time::timeout(cycle_deadline, futures::future::join_all(futures)).await {
            Ok(results) => results,
            Err(_) => self
                .checks
                .iter()
                .map(|c| CheckResult {
                    name: c.name(),
                    priority: c.priority(),
                    status: HealthStatus::Unhealthy,
                    message: "timed out".to_string(),
                })
                .collect(),
        };

        SystemHealth {
            status: aggregate(&checks),
            timestamp: chrono::Utc::now(),
            checks,
        }
    }

    async fn record(&self, health: SystemHealth) {
        *self.latest.write().await = Some(health.clone());
        let mut history = self.history.write().await;
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(health.clone());
        drop(history);
        let _ = self.watch_tx.send(Some(health));
    }

    pub async fn latest(&self) -> Option<SystemHealth> {
        self.latest.read().await.clone()
    }

    pub async fn history(&self) -> Vec<SystemHealth> {
        self.history.read().await.iter().cloned().collect()
    }

    /// Idempotent: a second `start` on an already-running monitor is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let monitor = Arc::clone(self);
        let shutdown = Arc::clone(&self.shutdown);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.config.check_interval);
            let mut last_status = None;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let health = monitor.run_cycle().await;
                        if last_status != Some(health.status) {
                            tracing::info!(status = ?health.status, "health status changed");
                            last_status = Some(health.status);
                        }
                        monitor.record(health).await;
                    }
                    _ = shutdown.notified() => break,
                }
            }
        });
        *self.handle.lock() = Some(handle);
    }

    /// Signal shutdown and wait up to 5s for the loop to stop, then abort.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_one();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                tracing::warn!("health monitor did not stop within grace period, task left to finish");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedCheck {
        name: &'static str,
        priority: u8,
        status: HealthStatus,
    }

    #[async_trait]
    impl HealthCheck for FixedCheck {
        fn name(&self) -> String {
            self.name.to_string()
        }
        fn priority(&self) -> u8 {
            self.priority
        }
        async fn check(&self) -> CheckResult {
            CheckResult {
                name: self.name.to_string(),
                priority: self.priority,
                status: self.status,
                message: "fixed".to_string(),
            }
        }
    }

    fn result(priority: u8, status: HealthStatus) -> CheckResult {
        CheckResult {
            name: "x".into(),
            priority,
            status,
            message: String::new(),
        }
    }

    #[test]
    fn critical_unhealthy_dominates() {
        let results = vec![
            result(0, HealthStatus::Unhealthy),
            result(2, HealthStatus::Healthy),
        ];
        assert_eq!(aggregate(&results), HealthStatus::Unhealthy);
    }

    #[test]
    fn important_unhealthy_degrades() {
        let results = vec![result(1, HealthStatus::Unhealthy), result(2, HealthStatus::Healthy)];
        assert_eq!(aggregate(&results), HealthStatus::Degraded);
    }

    #[test]
    fn one_informational_unhealthy_is_still_healthy() {
        let results = vec![
            result(2, HealthStatus::Unhealthy),
            result(2, HealthStatus::Healthy),
        ];
        assert_eq!(aggregate(&results), HealthStatus::Healthy);
    }

    #[test]
    fn all_informational_unhealthy_degrades() {
        let results = vec![result(2, HealthStatus::Unhealthy), result(2, HealthStatus::Unhealthy)];
        assert_eq!(aggregate(&results), HealthStatus::Degraded);
    }

    #[test]
    fn no_checks_is_healthy() {
        assert_eq!(aggregate(&[]), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn run_cycle_aggregates_check_results() {
        let checks: Vec<Arc<dyn HealthCheck>> = vec![
            Arc::new(FixedCheck {
                name: "system_resources",
                priority: 0,
                status: HealthStatus::Healthy,
            }),
            Arc::new(FixedCheck {
                name: "tool_nmap",
                priority: 2,
                status: HealthStatus::Degraded,
            }),
        ];
        let monitor = HealthMonitor::new(HealthMonitorConfig::default(), checks);
        let health = monitor.run_cycle().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.checks.len(), 2);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let monitor = Arc::new(HealthMonitor::new(
            HealthMonitorConfig {
                check_interval: Duration::from_millis(20),
                ..HealthMonitorConfig::default()
            },
            vec![],
        ));
        monitor.start();
        monitor.start();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(monitor.latest().await.is_some());
        monitor.stop().await;
    }
}
