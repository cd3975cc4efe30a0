//! Per-tool circuit breaker (spec.md §4.2)
//!
//! Three states — CLOSED, OPEN, HALF_OPEN — gating calls to a single tool.
//! Generalizes the teacher's `CircuitBreaker`/`CircuitBreakerRegistry` shape
//! with adaptive recovery timeout, jittered probing, a bounded recent-error
//! FIFO, and per-tool outcome/transition counters.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const RECENT_ERRORS_CAPACITY: usize = 10;
const HALF_OPEN_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Circuit state, gauge-encoded CLOSED=0, OPEN=1, HALF_OPEN=2 for metrics export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn gauge_value(self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

/// Per-tool breaker configuration (spec.md §3 `circuitBreakerConfig`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
    /// Consecutive HALF_OPEN successes required to close. Resolved Open
    /// Question (spec.md §9): defaults to 1.
    pub success_threshold: u32,
    pub timeout_multiplier: f64,
    #[serde(with = "humantime_serde")]
    pub max_timeout: Duration,
    pub jitter: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 1,
            timeout_multiplier: 1.5,
            max_timeout: Duration::from_secs(300),
            jitter: true,
        }
    }
}

/// Monotonically-increasing counters for one breaker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub rejected: u64,
    pub unexpected_failure: u64,
    pub transitions: HashMap<String, u64>,
    pub failure_reasons: HashMap<String, u64>,
}

impl CircuitBreakerStats {
    fn record_transition(&mut self, from: CircuitState, to: CircuitState) {
        *self
            .transitions
            .entry(format!("{from:?}->{to:?}"))
            .or_insert(0) += 1;
    }
}

/// Error returned when a call is rejected by the breaker.
#[derive(Debug, Clone, thiserror::Error)]
#[error("circuit open for '{tool_name}': retry after {retry_after:?}")]
pub struct CircuitOpenError {
    pub tool_name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub retry_after: Duration,
}

/// Read-only view of a breaker's current condition, for health/metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub consecutive_failures: u32,
    pub success_count: u32,
    pub current_recovery_timeout: Duration,
    pub recent_errors: Vec<String>,
    pub stats: CircuitBreakerStats,
}

#[derive(Debug)]
struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    consecutive_failures: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    current_recovery_timeout: Duration,
    half_open_in_flight: u32,
    recent_errors: VecDeque<String>,
    stats: CircuitBreakerStats,
}

impl CircuitBreaker {
    fn new(config: CircuitBreakerConfig) -> Self {
        let current_recovery_timeout = config.recovery_timeout;
        Self {
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            consecutive_failures: 0,
            success_count: 0,
            last_failure_time: None,
            current_recovery_timeout,
            half_open_in_flight: 0,
            recent_errors: VecDeque::with_capacity(RECENT_ERRORS_CAPACITY),
            stats: CircuitBreakerStats::default(),
        }
    }

    fn jittered_recovery_window(&self) -> Duration {
        if !self.config.jitter {
            return self.current_recovery_timeout;
        }
        let mut rng = rand::thread_rng();
        let factor: f64 = rng.gen_range(-0.10..=0.10);
        let secs = self.current_recovery_timeout.as_secs_f64() * (1.0 + factor);
        Duration::from_secs_f64(secs.max(0.0))
    }

    fn check(&mut self, tool_name: &str, now: Instant) -> Result<(), CircuitOpenError> {
        self.stats.total += 1;
        match self.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = self
                    .last_failure_time
                    .map(|t| now.saturating_duration_since(t))
                    .unwrap_or(Duration::MAX);
                let window = self.jittered_recovery_window();
                if elapsed >= window {
                    self.transition_to(CircuitState::HalfOpen, tool_name);
                    self.half_open_in_flight = 1;
                    self.success_count = 0;
                    Ok(())
                } else {
                    self.stats.rejected += 1;
                    let remaining = window.saturating_sub(elapsed);
                    Err(CircuitOpenError {
                        tool_name: tool_name.to_string(),
                        state: self.state,
                        consecutive_failures: self.consecutive_failures,
                        retry_after: remaining,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_in_flight >= 1 {
                    self.stats.rejected += 1;
                    Err(CircuitOpenError {
                        tool_name: tool_name.to_string(),
                        state: self.state,
                        consecutive_failures: self.consecutive_failures,
                        retry_after: HALF_OPEN_RETRY_AFTER,
                    })
                } else {
                    self.half_open_in_flight += 1;
                    Ok(())
                }
            }
        }
    }

    fn transition_to(&mut self, to: CircuitState, tool_name: &str) {
        if self.state == to {
            return;
        }
        tracing::info!(tool = tool_name, from = ?self.state, to = ?to, "circuit breaker transition");
        self.stats.record_transition(self.state, to);
        self.state = to;
    }

    fn record_success(&mut self, tool_name: &str) {
        self.stats.success += 1;
        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
                self.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    self.transition_to(CircuitState::Closed, tool_name);
                    self.failure_count = 0;
                    self.consecutive_failures = 0;
                    self.current_recovery_timeout = self.config.recovery_timeout;
                }
            }
            CircuitState::Open => {
                // Shouldn't happen (check() gates before this), but don't corrupt state.
            }
        }
    }

    fn record_failure(&mut self, tool_name: &str, reason: &str) {
        self.stats.failure += 1;
        *self
            .stats
            .failure_reasons
            .entry(reason.to_string())
            .or_insert(0) += 1;
        if self.recent_errors.len() >= RECENT_ERRORS_CAPACITY {
            self.recent_errors.pop_front();
        }
        self.recent_errors.push_back(reason.to_string());
        self.last_failure_time = Some(Instant::now());

        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                self.consecutive_failures += 1;
                if self.failure_count >= self.config.failure_threshold {
                    if self.consecutive_failures > self.config.failure_threshold {
                        self.bump_recovery_timeout();
                    }
                    self.transition_to(CircuitState::Open, tool_name);
                }
            }
            CircuitState::HalfOpen => {
                self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
                self.consecutive_failures += 1;
                self.bump_recovery_timeout();
                self.transition_to(CircuitState::Open, tool_name);
            }
            CircuitState::Open => {
                self.consecutive_failures += 1;
            }
        }
    }

    fn bump_recovery_timeout(&mut self) {
        let scaled = self.current_recovery_timeout.as_secs_f64() * self.config.timeout_multiplier;
        let clamped = scaled.min(self.config.max_timeout.as_secs_f64());
        self.current_recovery_timeout = Duration::from_secs_f64(clamped);
    }

    fn snapshot(&self) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            consecutive_failures: self.consecutive_failures,
            success_count: self.success_count,
            current_recovery_timeout: self.current_recovery_timeout,
            recent_errors: self.recent_errors.iter().cloned().collect(),
            stats: self.stats.clone(),
        }
    }
}

/// Error from a gated call: either the breaker rejected it, or the inner
/// callable itself failed.
#[derive(Debug)]
pub enum CircuitCallError<E> {
    Open(CircuitOpenError),
    Inner(E),
}

/// Registry of circuit breakers, one per tool, created at registration.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, std::sync::Arc<Mutex<CircuitBreaker>>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: DashMap::new(),
        }
    }

    /// Register a tool's breaker up front (called at startup for every
    /// enabled descriptor); idempotent.
    pub fn register(&self, tool_name: &str, config: CircuitBreakerConfig) {
        self.breakers
            .entry(tool_name.to_string())
            .or_insert_with(|| std::sync::Arc::new(Mutex::new(CircuitBreaker::new(config))));
    }

    fn entry(&self, tool_name: &str) -> std::sync::Arc<Mutex<CircuitBreaker>> {
        self.breakers
            .entry(tool_name.to_string())
            .or_insert_with(|| {
                std::sync::Arc::new(Mutex::new(CircuitBreaker::new(
                    CircuitBreakerConfig::default(),
                )))
            })
            .clone()
    }

    /// Gate and run `f`. The per-tool mutex is held only for the gate
    /// decision and for recording the outcome — never across the await on
    /// `f` itself, so other tools (and other in-flight calls once this one
    /// releases the lock) are never blocked by a slow callable.
    pub async fn call<F, Fut, T, E>(
        &self,
        tool_name: &str,
        f: F,
    ) -> Result<T, CircuitCallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let breaker = self.entry(tool_name);
        {
            let mut guard = breaker.lock().await;
            guard
                .check(tool_name, Instant::now())
                .map_err(CircuitCallError::Open)?;
        }

        match f().await {
            Ok(value) => {
                let mut guard = breaker.lock().await;
                guard.record_success(tool_name);
                Ok(value)
            }
            Err(err) => {
                let mut guard = breaker.lock().await;
                guard.record_failure(tool_name, "execution_failure");
                Err(CircuitCallError::Inner(err))
            }
        }
    }

    pub async fn snapshot(&self, tool_name: &str) -> Option<CircuitBreakerSnapshot> {
        let entry = self.breakers.get(tool_name)?;
        let guard = entry.lock().await;
        Some(guard.snapshot())
    }

    pub async fn state(&self, tool_name: &str) -> Option<CircuitState> {
        self.snapshot(tool_name).await.map(|s| s.state)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.breakers.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter_config(failure_threshold: u32, recovery_timeout: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout,
            success_threshold: 1,
            timeout_multiplier: 1.5,
            max_timeout: Duration::from_secs(300),
            jitter: false,
        }
    }

    #[test]
    fn starts_closed_and_allows() {
        let mut cb = CircuitBreaker::new(no_jitter_config(3, Duration::from_secs(1)));
        assert_eq!(cb.state, CircuitState::Closed);
        assert!(cb.check("t", Instant::now()).is_ok());
    }

    #[test]
    fn trips_open_after_threshold() {
        let mut cb = CircuitBreaker::new(no_jitter_config(3, Duration::from_secs(60)));
        cb.record_failure("t", "boom");
        cb.record_failure("t", "boom");
        assert_eq!(cb.state, CircuitState::Closed);
        cb.record_failure("t", "boom");
        assert_eq!(cb.state, CircuitState::Open);
        assert!(cb.check("t", Instant::now()).is_err());
    }

    #[test]
    fn recovery_timeout_is_monotonic_nondecreasing_while_failing() {
        let mut cb = CircuitBreaker::new(no_jitter_config(1, Duration::from_millis(10)));
        cb.record_failure("t", "a"); // opens, consecutive_failures == threshold, no bump yet
        let first = cb.current_recovery_timeout;
        // Force back into Open via a half-open probe failure to trigger a bump.
        std::thread::sleep(Duration::from_millis(15));
        assert!(cb.check("t", Instant::now()).is_ok()); // -> HalfOpen
        cb.record_failure("t", "b"); // HalfOpen -> Open, bumps timeout
        let second = cb.current_recovery_timeout;
        assert!(second >= first);
        assert!(second <= cb.config.max_timeout);
    }

    #[test]
    fn resets_to_initial_after_half_open_closes() {
        let mut cb = CircuitBreaker::new(no_jitter_config(1, Duration::from_millis(5)));
        cb.record_failure("t", "a");
        std::thread::sleep(Duration::from_millis(10));
        assert!(cb.check("t", Instant::now()).is_ok()); // -> HalfOpen
        cb.record_success("t"); // success_threshold=1 -> Closed
        assert_eq!(cb.state, CircuitState::Closed);
        assert_eq!(cb.current_recovery_timeout, cb.config.recovery_timeout);
    }

    #[test]
    fn half_open_limits_concurrent_probes() {
        let mut cb = CircuitBreaker::new(no_jitter_config(1, Duration::from_millis(5)));
        cb.record_failure("t", "a");
        std::thread::sleep(Duration::from_millis(10));
        assert!(cb.check("t", Instant::now()).is_ok());
        assert!(cb.check("t", Instant::now()).is_err());
    }

    #[tokio::test]
    async fn registry_call_gates_and_records() {
        let registry = CircuitBreakerRegistry::new();
        registry.register("nmap", no_jitter_config(2, Duration::from_secs(60)));

        let r: Result<(), CircuitCallError<&str>> =
            registry.call("nmap", || async { Ok::<_, &str>(()) }).await;
        assert!(r.is_ok());

        for _ in 0..2 {
            let _: Result<(), CircuitCallError<&str>> =
                registry.call("nmap", || async { Err::<(), _>("boom") }).await;
        }

        let r: Result<(), CircuitCallError<&str>> =
            registry.call("nmap", || async { Ok::<_, &str>(()) }).await;
        assert!(matches!(r, Err(CircuitCallError::Open(_))));
    }
}
