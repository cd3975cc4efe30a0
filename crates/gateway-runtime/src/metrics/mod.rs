//! Metrics Registry (spec.md §4.4): per-tool execution counters, a bounded
//! window of recent durations for percentile estimates, capacity-bounded
//! storage with LRU eviction, and Prometheus text exposition.
//!
//! Grounded on the teacher's `metrics::{MetricsError, MetricsExporter,
//! CompositeExporter, file::FileExporter}` shape for the pluggable-exporter
//! side; the per-tool record and Prometheus rendering are new, since the
//! teacher's `MetricsSnapshot` is scheduler/agent-shaped and has no
//! per-tool-execution counterpart.

pub mod file;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resilience::circuit_breaker::CircuitBreakerSnapshot;
use crate::types::ErrorKind;

const HISTORY_CAPACITY: usize = 100;
const DEFAULT_MAX_TOOLS: usize = 1000;
const IDLE_EVICTION_THRESHOLD: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to export metrics: {0}")]
    ExportFailed(String),
    #[error("metrics configuration error: {0}")]
    ConfigError(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure,
    Timeout,
}

struct ExecutionSample {
    duration: f64,
    success: bool,
}

/// One tool's mutable metric state. All mutations happen under the record's
/// own lock (spec.md §4.4 "all record mutations serialized by a per-record
/// lock") — the registry's map lock is never held while a record is updated.
struct ExecutionRecord {
    execution_count: u64,
    success_count: u64,
    failure_count: u64,
    timeout_count: u64,
    total_execution_time: f64,
    min_execution_time: f64,
    max_execution_time: f64,
    last_execution_time: Instant,
    active: u64,
    recent: VecDeque<ExecutionSample>,
    errors_by_kind: HashMap<ErrorKind, u64>,
}

impl ExecutionRecord {
    fn new() -> Self {
        Self {
            execution_count: 0,
            success_count: 0,
            failure_count: 0,
            timeout_count: 0,
            total_execution_time: 0.0,
            min_execution_time: f64::MAX,
            max_execution_time: 0.0,
            last_execution_time: Instant::now(),
            active: 0,
            recent: VecDeque::with_capacity(HISTORY_CAPACITY),
            errors_by_kind: HashMap::new(),
        }
    }

    fn record(&mut self, duration: f64, status: ExecutionStatus, error_kind: Option<ErrorKind>) {
        self.execution_count += 1;
        match status {
            ExecutionStatus::Success => self.success_count += 1,
            ExecutionStatus::Failure => self.failure_count += 1,
            ExecutionStatus::Timeout => {
                self.timeout_count += 1;
                self.failure_count += 1;
            }
        }
        if let Some(kind) = error_kind {
            *self.errors_by_kind.entry(kind).or_insert(0) += 1;
        }
        self.total_execution_time += duration;
        self.min_execution_time = self.min_execution_time.min(duration);
        self.max_execution_time = self.max_execution_time.max(duration);
        self.last_execution_time = Instant::now();

        if self.recent.len() == HISTORY_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(ExecutionSample {
            duration,
            success: matches!(status, ExecutionStatus::Success),
        });
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        let mut durations: Vec<f64> = self.recent.iter().map(|s| s.duration).collect();
        durations.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = (((durations.len() - 1) as f64) * p).round() as usize;
        durations[idx]
    }

    fn recent_failure_rate(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        let failures = self.recent.iter().filter(|s| !s.success).count();
        failures as f64 / self.recent.len() as f64
    }

    fn snapshot(&self, tool: &str) -> ToolMetricsSnapshot {
        ToolMetricsSnapshot {
            tool: tool.to_string(),
            execution_count: self.execution_count,
            success_count: self.success_count,
            failure_count: self.failure_count,
            timeout_count: self.timeout_count,
            active: self.active,
            total_execution_time: self.total_execution_time,
            min_execution_time: if self.execution_count == 0 {
                0.0
            } else {
                self.min_execution_time
            },
            max_execution_time: self.max_execution_time,
            p50: self.percentile(0.50),
            p95: self.percentile(0.95),
            p99: self.percentile(0.99),
            recent_failure_rate: self.recent_failure_rate(),
            errors_by_kind: self
                .errors_by_kind
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        }
    }
}

/// Releases the `active{tool}` gauge increment made by [`MetricsRegistry::begin`]
/// when the in-flight execution finishes, regardless of how it finishes.
pub struct ActiveGuard {
    record: Arc<Mutex<ExecutionRecord>>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut rec = self.record.lock();
        rec.active = rec.active.saturating_sub(1);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetricsSnapshot {
    pub tool: String,
    pub execution_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub timeout_count: u64,
    pub active: u64,
    pub total_execution_time: f64,
    pub min_execution_time: f64,
    pub max_execution_time: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub recent_failure_rate: f64,
    pub errors_by_kind: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub tools: Vec<ToolMetricsSnapshot>,
}

/// Thread-safe per-tool metrics store. The outer `Mutex` guards only the
/// map's shape (lookup/create/evict, spec.md §4.4); per-tool counters are
/// mutated through the per-record `Mutex` obtained from the map, never while
/// holding the outer one.
pub struct MetricsRegistry {
    max_tools: usize,
    records: Mutex<HashMap<String, Arc<Mutex<ExecutionRecord>>>>,
}

impl MetricsRegistry {
    pub fn new(max_tools: usize) -> Self {
        Self {
            max_tools: if max_tools == 0 { DEFAULT_MAX_TOOLS } else { max_tools },
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Look up or lazily create a tool's record. Idempotent: a second call
    /// for an already-registered tool is a no-op beyond returning the
    /// existing handle (spec.md §4.4 "duplicate registration ... no-ops").
    fn ensure(&self, tool: &str) -> Arc<Mutex<ExecutionRecord>> {
        let mut records = self.records.lock();
        if let Some(existing) = records.get(tool) {
            return Arc::clone(existing);
        }
        if records.len() >= self.max_tools {
            self.evict_oldest(&mut records);
        }
        let record = Arc::new(Mutex::new(ExecutionRecord::new()));
        records.insert(tool.to_string(), Arc::clone(&record));
        record
    }

    fn evict_oldest(&self, records: &mut HashMap<String, Arc<Mutex<ExecutionRecord>>>) {
        let oldest = records
            .iter()
            .min_by_key(|(_, rec)| rec.lock().last_execution_time)
            .map(|(name, _)| name.clone());
        if let Some(name) = oldest {
            tracing::debug!(tool = name, "evicting metrics record, registry at capacity");
            records.remove(&name);
        }
    }

    /// Mark the start of an execution, incrementing `active{tool}`. The
    /// returned guard decrements it when dropped.
    pub fn begin(&self, tool: &str) -> ActiveGuard {
        let record = self.ensure(tool);
        record.lock().active += 1;
        ActiveGuard { record }
    }

    pub fn record(
        &self,
        tool: &str,
        duration: f64,
        status: ExecutionStatus,
        error_kind: Option<ErrorKind>,
    ) {
        let record = self.ensure(tool);
        record.lock().record(duration, status, error_kind);
    }

    pub fn snapshot(&self, tool: &str) -> Option<ToolMetricsSnapshot> {
        let records = self.records.lock();
        records.get(tool).map(|r| r.lock().snapshot(tool))
    }

    pub fn snapshot_all(&self) -> Vec<ToolMetricsSnapshot> {
        let records = self.records.lock();
        records
            .iter()
            .map(|(name, rec)| rec.lock().snapshot(name))
            .collect()
    }

    /// Remove records idle longer than 24h (spec.md §4.4 "hourly sweep").
    pub fn sweep_idle(&self) {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, rec| rec.lock().last_execution_time.elapsed() <= IDLE_EVICTION_THRESHOLD);
        let removed = before - records.len();
        if removed > 0 {
            tracing::info!(removed, "swept idle metrics records");
        }
    }
}

/// Spawn the hourly idle sweep as a background task. The caller keeps the
/// returned handle (or drops it to detach) — mirrors the composition root
/// owning the health monitor's own background loop.
pub fn spawn_sweep_loop(registry: Arc<MetricsRegistry>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            registry.sweep_idle();
        }
    })
}

/// Render Prometheus text exposition format for the tool metrics plus the
/// circuit-breaker series from §4.2. Hand-rolled: the format is simple line
/// text and does not warrant pulling in a Prometheus client crate for one
/// `/metrics` endpoint.
pub fn render_prometheus(
    tools: &[ToolMetricsSnapshot],
    breakers: &[(String, CircuitBreakerSnapshot)],
) -> String {
    let mut out = String::new();

    out.push_str("# HELP execution_total Tool executions by status.\n");
    out.push_str("# TYPE execution_total counter\n");
    for t in tools {
        for (status, count) in [
            ("success", t.success_count),
            ("failure", t.failure_count.saturating_sub(t.timeout_count)),
            ("timeout", t.timeout_count),
        ] {
            out.push_str(&format!(
                "execution_total{{tool=\"{}\",status=\"{}\"}} {}\n",
                t.tool, status, count
            ));
        }
        for (error_type, count) in &t.errors_by_kind {
            out.push_str(&format!(
                "errors_total{{tool=\"{}\",error_type=\"{}\"}} {}\n",
                t.tool, error_type, count
            ));
        }
    }

    out.push_str("# HELP execution_seconds Tool execution duration summary.\n");
    out.push_str("# TYPE execution_seconds summary\n");
    for t in tools {
        out.push_str(&format!(
            "execution_seconds{{tool=\"{}\",quantile=\"0.5\"}} {}\n",
            t.tool, t.p50
        ));
        out.push_str(&format!(
            "execution_seconds{{tool=\"{}\",quantile=\"0.95\"}} {}\n",
            t.tool, t.p95
        ));
        out.push_str(&format!(
            "execution_seconds{{tool=\"{}\",quantile=\"0.99\"}} {}\n",
            t.tool, t.p99
        ));
        out.push_str(&format!(
            "execution_seconds_sum{{tool=\"{}\"}} {}\n",
            t.tool, t.total_execution_time
        ));
        out.push_str(&format!(
            "execution_seconds_count{{tool=\"{}\"}} {}\n",
            t.tool, t.execution_count
        ));
    }

    out.push_str("# HELP active Executions currently in flight.\n");
    out.push_str("# TYPE active gauge\n");
    for t in tools {
        out.push_str(&format!("active{{tool=\"{}\"}} {}\n", t.tool, t.active));
    }

    out.push_str("# HELP circuit_breaker_state Breaker state (0=closed,1=open,2=half_open).\n");
    out.push_str("# TYPE circuit_breaker_state gauge\n");
    for (tool, snap) in breakers {
        out.push_str(&format!(
            "circuit_breaker_state{{tool=\"{}\"}} {}\n",
            tool,
            snap.state.gauge_value()
        ));
    }
    out.push_str("# HELP circuit_breaker_events_total Breaker call outcomes.\n");
    out.push_str("# TYPE circuit_breaker_events_total counter\n");
    for (tool, snap) in breakers {
        for (outcome, count) in [
            ("success", snap.stats.success),
            ("failure", snap.stats.failure),
            ("rejected", snap.stats.rejected),
            ("unexpected_failure", snap.stats.unexpected_failure),
        ] {
            out.push_str(&format!(
                "circuit_breaker_events_total{{tool=\"{}\",outcome=\"{}\"}} {}\n",
                tool, outcome, count
            ));
        }
    }
    out.push_str("# HELP circuit_breaker_transitions_total Breaker state transitions.\n");
    out.push_str("# TYPE circuit_breaker_transitions_total counter\n");
    for (tool, snap) in breakers {
        for (transition, count) in &snap.stats.transitions {
            out.push_str(&format!(
                "circuit_breaker_transitions_total{{tool=\"{}\",transition=\"{}\"}} {}\n",
                tool, transition, count
            ));
        }
    }

    out
}

/// Pluggable metrics export backend, mirroring the teacher's
/// `MetricsExporter` trait exactly (async `export`/`shutdown`, composable via
/// [`CompositeExporter`]).
#[async_trait]
pub trait MetricsExporter: Send + Sync {
    async fn export(&self, snapshot: &MetricsSnapshot) -> Result<(), MetricsError>;
    async fn shutdown(&self) -> Result<(), MetricsError>;
}

/// Runs every configured exporter, logging (not failing) on a single
/// exporter's error so one broken backend never blocks the others.
pub struct CompositeExporter {
    exporters: Vec<Arc<dyn MetricsExporter>>,
}

impl CompositeExporter {
    pub fn new(exporters: Vec<Arc<dyn MetricsExporter>>) -> Self {
        Self { exporters }
    }
}

#[async_trait]
impl MetricsExporter for CompositeExporter {
    async fn export(&self, snapshot: &MetricsSnapshot) -> Result<(), MetricsError> {
        for exporter in &self.exporters {
            if let Err(e) = exporter.export(snapshot).await {
                tracing::warn!(error = %e, "metrics exporter failed");
            }
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), MetricsError> {
        for exporter in &self.exporters {
            if let Err(e) = exporter.shutdown().await {
                tracing::warn!(error = %e, "metrics exporter shutdown failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_increments_and_drop_decrements_active() {
        let registry = MetricsRegistry::new(10);
        let guard = registry.begin("network_mapper");
        assert_eq!(registry.snapshot("network_mapper").unwrap().active, 1);
        drop(guard);
        assert_eq!(registry.snapshot("network_mapper").unwrap().active, 0);
    }

    #[test]
    fn record_updates_counters_and_percentiles() {
        let registry = MetricsRegistry::new(10);
        registry.record("network_mapper", 1.0, ExecutionStatus::Success, None);
        registry.record("network_mapper", 2.0, ExecutionStatus::Success, None);
        registry.record(
            "network_mapper",
            3.0,
            ExecutionStatus::Failure,
            Some(ErrorKind::ExecutionError),
        );
        let snap = registry.snapshot("network_mapper").unwrap();
        assert_eq!(snap.execution_count, 3);
        assert_eq!(snap.success_count, 2);
        assert_eq!(snap.failure_count, 1);
        assert_eq!(snap.min_execution_time, 1.0);
        assert_eq!(snap.max_execution_time, 3.0);
        assert!(snap.p99 >= snap.p50);
        assert_eq!(snap.errors_by_kind.get("execution_error"), Some(&1));
    }

    #[test]
    fn evicts_oldest_when_at_capacity() {
        let registry = MetricsRegistry::new(2);
        registry.record("a", 1.0, ExecutionStatus::Success, None);
        std::thread::sleep(Duration::from_millis(5));
        registry.record("b", 1.0, ExecutionStatus::Success, None);
        std::thread::sleep(Duration::from_millis(5));
        registry.record("c", 1.0, ExecutionStatus::Success, None);

        let names: Vec<String> = registry.snapshot_all().iter().map(|s| s.tool.clone()).collect();
        assert_eq!(names.len(), 2);
        assert!(!names.contains(&"a".to_string()));
        assert!(names.contains(&"c".to_string()));
    }

    #[test]
    fn duplicate_ensure_is_a_no_op() {
        let registry = MetricsRegistry::new(10);
        registry.record("network_mapper", 1.0, ExecutionStatus::Success, None);
        registry.record("network_mapper", 2.0, ExecutionStatus::Success, None);
        assert_eq!(registry.snapshot_all().len(), 1);
        assert_eq!(registry.snapshot("network_mapper").unwrap().execution_count, 2);
    }

    #[test]
    fn timeout_counts_as_both_timeout_and_failure() {
        let registry = MetricsRegistry::new(10);
        registry.record("network_mapper", 5.0, ExecutionStatus::Timeout, Some(ErrorKind::Timeout));
        let snap = registry.snapshot("network_mapper").unwrap();
        assert_eq!(snap.timeout_count, 1);
        assert_eq!(snap.failure_count, 1);
    }

    #[test]
    fn prometheus_rendering_includes_core_series() {
        let registry = MetricsRegistry::new(10);
        registry.record("network_mapper", 1.0, ExecutionStatus::Success, None);
        let tools = registry.snapshot_all();
        let text = render_prometheus(&tools, &[]);
        assert!(text.contains("execution_total{tool=\"network_mapper\",status=\"success\"} 1"));
        assert!(text.contains("active{tool=\"network_mapper\"} 0"));
    }
}
