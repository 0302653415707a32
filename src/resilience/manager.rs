//! # Circuit Breaker Manager
//!
//! Owns one circuit breaker per known service. Breakers are created eagerly
//! from the configuration table and live for the rest of the process.

use crate::config::CircuitBreakerConfig;
use crate::resilience::{CircuitBreaker, CircuitBreakerStatus, SystemCircuitBreakerMetrics};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Manager for the per-service circuit breakers
#[derive(Debug, Clone)]
pub struct CircuitBreakerManager {
    /// Collection of circuit breakers by service name
    circuit_breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
}

impl CircuitBreakerManager {
    /// Create the manager and one breaker per configured service.
    ///
    /// With `enabled = false` no breakers are created, so every service
    /// bypasses the breaker gate.
    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        let mut breakers = HashMap::new();

        if config.enabled {
            for (name, component) in &config.component_configs {
                let breaker = CircuitBreaker::new(
                    name.clone(),
                    component.to_resilience_config(config.half_open_admission),
                );
                breakers.insert(name.clone(), Arc::new(breaker));
            }
        } else {
            warn!("Circuit breakers disabled by configuration");
        }

        info!(
            enabled = config.enabled,
            total_circuit_breakers = breakers.len(),
            "Circuit breaker manager initialized"
        );

        Self {
            circuit_breakers: Arc::new(RwLock::new(breakers)),
        }
    }

    /// Breaker for a service, if one is configured
    pub fn get(&self, service_name: &str) -> Option<Arc<CircuitBreaker>> {
        self.circuit_breakers.read().get(service_name).cloned()
    }

    /// All service names with a breaker, sorted
    pub fn list_components(&self) -> Vec<String> {
        let mut names: Vec<String> = self.circuit_breakers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Status of every breaker, sorted by service name
    pub fn statuses(&self) -> Vec<CircuitBreakerStatus> {
        let mut statuses: Vec<CircuitBreakerStatus> = self
            .circuit_breakers
            .read()
            .values()
            .map(|breaker| breaker.status())
            .collect();
        statuses.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        statuses
    }

    /// Get system-wide circuit breaker metrics
    pub fn get_system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let mut system_metrics = SystemCircuitBreakerMetrics::new();

        for (name, breaker) in self.circuit_breakers.read().iter() {
            system_metrics.add_circuit_breaker(name.clone(), breaker.metrics());
        }

        system_metrics
    }

    /// Force close all circuit breakers, returning how many were reset
    pub fn force_close_all(&self) -> usize {
        warn!("Forcing all circuit breakers closed (emergency recovery)");

        let breakers = self.circuit_breakers.read();
        for breaker in breakers.values() {
            breaker.force_closed();
        }
        breakers.len()
    }
}
