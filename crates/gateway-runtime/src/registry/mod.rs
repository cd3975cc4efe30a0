//! Tool Registry (spec.md §4.5): the fixed, static set of registered tools,
//! an enabled/disabled mask over that set, and introspection.
//!
//! Grounded on the teacher's `RwLock<HashMap<...>>` ownership shape
//! (the same pattern `resilience::circuit_breaker::CircuitBreakerRegistry`
//! uses for its per-tool map) plus the teacher's `#[cfg(feature = "...")]`
//! static-gating idiom, adapted here into a runtime include/exclude filter
//! read from configuration instead of a compile-time feature flag.

pub mod tools;

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, Semaphore};

use crate::types::{GatewayError, ToolDescriptor};

/// A registered tool's introspection shape, returned by `Describe` (spec.md
/// §4.5, §6 `GET /tools`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub command: String,
    pub enabled: bool,
    pub allowed_flags: Vec<String>,
    pub concurrency_limit: usize,
    pub default_timeout_seconds: f64,
    pub metrics_available: bool,
    pub circuit_breaker_available: bool,
}

/// The static tool catalog plus a runtime enabled/disabled mask.
///
/// The descriptor set itself never changes after construction — only which
/// of its members are enabled can be toggled at runtime via `enable`/
/// `disable`, matching spec.md §4.5's "registry is fixed; availability is
/// not" framing.
pub struct ToolRegistry {
    descriptors: std::collections::HashMap<String, ToolDescriptor>,
    enabled: RwLock<HashSet<String>>,
    /// Per-tool concurrency gate (spec.md §5: "total concurrent subprocesses
    /// per tool ≤ concurrencyLimit"). Built once from each descriptor's
    /// `concurrency_limit` and never resized.
    semaphores: std::collections::HashMap<String, Arc<Semaphore>>,
}

impl ToolRegistry {
    /// Build the registry from the full static catalog, then apply
    /// `include`/`exclude` filters (spec.md §6 `TOOL_INCLUDE`/`TOOL_EXCLUDE`)
    /// to decide the initial enabled set. An empty `include` means "all
    /// registered tools start enabled"; `exclude` always wins over `include`.
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        let catalog = tools::all();
        let semaphores = catalog
            .iter()
            .map(|d| (d.name.clone(), Arc::new(Semaphore::new(d.concurrency_limit))))
            .collect();
        let descriptors: std::collections::HashMap<String, ToolDescriptor> =
            catalog.into_iter().map(|d| (d.name.clone(), d)).collect();

        let exclude: HashSet<&str> = exclude.iter().map(String::as_str).collect();
        let include: HashSet<&str> = include.iter().map(String::as_str).collect();

        let enabled: HashSet<String> = descriptors
            .keys()
            .filter(|name| {
                if exclude.contains(name.as_str()) {
                    return false;
                }
                include.is_empty() || include.contains(name.as_str())
            })
            .cloned()
            .collect();

        Self {
            descriptors,
            enabled: RwLock::new(enabled),
            semaphores,
        }
    }

    /// Acquire a permit against the tool's concurrency semaphore. Returns
    /// `None` only for an unregistered name — callers are expected to have
    /// already resolved the tool via [`Self::resolve`].
    pub async fn acquire_permit(&self, name: &str) -> Option<tokio::sync::OwnedSemaphorePermit> {
        let sem = self.semaphores.get(name)?.clone();
        sem.acquire_owned().await.ok()
    }

    /// `Get(name)` (spec.md §4.5): the descriptor regardless of enabled state,
    /// so callers can distinguish "unknown" from "disabled".
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.descriptors.get(name)
    }

    pub async fn is_enabled(&self, name: &str) -> bool {
        self.enabled.read().await.contains(name)
    }

    /// Resolve a descriptor for execution, distinguishing unknown-tool from
    /// disabled-tool (spec.md §6 error taxonomy: both are validation errors
    /// but carry different messages).
    pub async fn resolve(&self, name: &str) -> Result<&ToolDescriptor, GatewayError> {
        let desc = self
            .get(name)
            .ok_or_else(|| GatewayError::UnknownTool(name.to_string()))?;
        if !self.is_enabled(name).await {
            return Err(GatewayError::ToolDisabled(name.to_string()));
        }
        Ok(desc)
    }

    /// `ListEnabled()` (spec.md §4.5, §6 `GET /tools`).
    pub async fn list_enabled(&self) -> Vec<String> {
        let enabled = self.enabled.read().await;
        let mut names: Vec<String> = enabled.iter().cloned().collect();
        names.sort();
        names
    }

    /// `Enable(name)`. Unknown names are a no-op error; already-enabled names
    /// are idempotent.
    pub async fn enable(&self, name: &str) -> Result<(), GatewayError> {
        if !self.descriptors.contains_key(name) {
            return Err(GatewayError::UnknownTool(name.to_string()));
        }
        self.enabled.write().await.insert(name.to_string());
        Ok(())
    }

    /// `Disable(name)`.
    pub async fn disable(&self, name: &str) -> Result<(), GatewayError> {
        if !self.descriptors.contains_key(name) {
            return Err(GatewayError::UnknownTool(name.to_string()));
        }
        self.enabled.write().await.remove(name);
        Ok(())
    }

    /// `Describe()` over every registered tool (spec.md §4.5), regardless of
    /// enabled state.
    pub async fn describe_all(&self) -> Vec<ToolInfo> {
        let enabled = self.enabled.read().await;
        let mut infos: Vec<ToolInfo> = self
            .descriptors
            .values()
            .map(|d| ToolInfo {
                name: d.name.clone(),
                command: d.command.clone(),
                enabled: enabled.contains(&d.name),
                allowed_flags: d.allowed_flags.clone(),
                concurrency_limit: d.concurrency_limit,
                default_timeout_seconds: d.default_timeout_seconds,
                metrics_available: true,
                circuit_breaker_available: true,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.descriptors.values()
    }
}

/// Register every descriptor's circuit breaker configuration into `breakers`.
/// Called once at startup (spec.md §4.2: breakers are provisioned per
/// registered tool, not lazily on first call).
pub fn register_breakers(registry: &ToolRegistry, breakers: &Arc<crate::resilience::circuit_breaker::CircuitBreakerRegistry>) {
    for desc in registry.descriptors() {
        breakers.register(&desc.name, desc.circuit_breaker_config.clone());
    }
}
