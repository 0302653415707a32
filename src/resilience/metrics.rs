//! # Circuit Breaker Metrics
//!
//! Point-in-time metrics for individual breakers and the aggregate view used
//! by the coordinator's status report and watchdog.

use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metrics for a single circuit breaker instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Total number of recorded outcomes (successes + failures)
    pub total_calls: u64,

    /// Number of successful calls
    pub success_count: u64,

    /// Number of failed calls
    pub failure_count: u64,

    /// Calls refused by the admission check
    pub rejected_count: u64,

    /// Current failure counter of the breaker (reset on close)
    pub consecutive_failures: u64,

    /// Current circuit breaker state
    pub current_state: CircuitState,

    /// Calculated failure rate (0.0 to 1.0)
    pub failure_rate: f64,

    /// Calculated success rate (0.0 to 1.0)
    pub success_rate: f64,
}

impl CircuitBreakerMetrics {
    /// Build a snapshot from raw counters, deriving the rates
    pub fn from_counts(
        current_state: CircuitState,
        success_count: u64,
        failure_count: u64,
        rejected_count: u64,
        consecutive_failures: u64,
    ) -> Self {
        let total_calls = success_count + failure_count;
        let (failure_rate, success_rate) = if total_calls > 0 {
            (
                failure_count as f64 / total_calls as f64,
                success_count as f64 / total_calls as f64,
            )
        } else {
            (0.0, 0.0)
        };

        Self {
            total_calls,
            success_count,
            failure_count,
            rejected_count,
            consecutive_failures,
            current_state,
            failure_rate,
            success_rate,
        }
    }

    /// Check if metrics indicate healthy operation
    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            // Closed is healthy if failure rate is reasonable
            CircuitState::Closed => self.failure_rate < 0.1,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true,
        }
    }
}

/// System-wide circuit breaker metrics aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCircuitBreakerMetrics {
    /// Metrics for individual circuit breakers by service name
    pub circuit_breakers: HashMap<String, CircuitBreakerMetrics>,

    /// Timestamp of last metrics collection
    pub collected_at: DateTime<Utc>,
}

impl SystemCircuitBreakerMetrics {
    pub fn new() -> Self {
        Self {
            circuit_breakers: HashMap::new(),
            collected_at: Utc::now(),
        }
    }

    /// Add metrics for a circuit breaker
    pub fn add_circuit_breaker(&mut self, name: String, metrics: CircuitBreakerMetrics) {
        self.circuit_breakers.insert(name, metrics);
        self.collected_at = Utc::now();
    }

    /// Calculate system-wide health score (0.0 to 1.0)
    pub fn health_score(&self) -> f64 {
        if self.circuit_breakers.is_empty() {
            return 1.0;
        }

        let healthy_count = self
            .circuit_breakers
            .values()
            .filter(|metrics| metrics.is_healthy())
            .count();

        healthy_count as f64 / self.circuit_breakers.len() as f64
    }

    pub fn total_calls(&self) -> u64 {
        self.circuit_breakers.values().map(|m| m.total_calls).sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.circuit_breakers.values().map(|m| m.failure_count).sum()
    }

    pub fn total_rejections(&self) -> u64 {
        self.circuit_breakers.values().map(|m| m.rejected_count).sum()
    }

    /// Get system-wide failure rate
    pub fn system_failure_rate(&self) -> f64 {
        let total_calls = self.total_calls();
        if total_calls == 0 {
            return 0.0;
        }

        self.total_failures() as f64 / total_calls as f64
    }
}

impl Default for SystemCircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
