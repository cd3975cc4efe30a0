//! Resilience primitives that gate and protect subprocess execution.

pub mod circuit_breaker;

pub use circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerSnapshot, CircuitBreakerStats,
    CircuitCallError, CircuitOpenError, CircuitState,
};
