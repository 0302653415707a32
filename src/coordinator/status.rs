//! Aggregated reliability status for operational consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::watchdog::WatchdogAlert;
use crate::resilience::{ActiveDegradation, CircuitBreakerStatus, CircuitState};

/// Point-in-time view of every reliability component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub generated_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: f64,

    /// Breaker status per service, sorted by service name
    pub circuit_breakers: Vec<CircuitBreakerStatus>,
    pub healthy_services: usize,
    pub open_services: usize,
    pub half_open_services: usize,

    /// Share of breakers that are healthy (0.0 to 1.0; 1.0 with no breakers)
    pub breaker_health_score: f64,
    /// Failed share of all outcomes recorded by the breakers
    pub breaker_failure_rate: f64,
    /// Calls refused by a breaker since process start
    pub rejected_calls: u64,

    pub active_degradations: Vec<ActiveDegradation>,

    /// Failures since each service's last success
    pub failure_counts: BTreeMap<String, u64>,

    /// Failures since process start
    pub total_failures: BTreeMap<String, u64>,

    pub total_retry_attempts: u64,

    /// Snapshot files on disk, when a backup manager is attached
    pub backup_count: Option<usize>,

    pub alerts: Vec<WatchdogAlert>,
}

impl SystemStatus {
    pub fn is_healthy(&self) -> bool {
        self.open_services == 0 && self.active_degradations.is_empty() && self.alerts.is_empty()
    }

    pub fn breaker(&self, service_name: &str) -> Option<&CircuitBreakerStatus> {
        self.circuit_breakers
            .iter()
            .find(|status| status.service_name == service_name)
    }

    /// Sum of the current per-service failure counters
    pub fn current_failure_total(&self) -> u64 {
        self.failure_counts.values().sum()
    }

    /// One-line summary for logs
    pub fn format_summary(&self) -> String {
        format!(
            "Breakers: {} closed | {} open | {} half-open | Health: {:.1}% | Rejected: {} | Degraded: {} | Retries: {} | Alerts: {}",
            self.healthy_services,
            self.open_services,
            self.half_open_services,
            self.breaker_health_score * 100.0,
            self.rejected_calls,
            self.active_degradations.len(),
            self.total_retry_attempts,
            self.alerts.len()
        )
    }
}

/// (closed, open, half-open) breaker counts
pub(crate) fn count_states(statuses: &[CircuitBreakerStatus]) -> (usize, usize, usize) {
    statuses
        .iter()
        .fold((0, 0, 0), |(closed, open, half_open), status| match status.state {
            CircuitState::Closed => (closed + 1, open, half_open),
            CircuitState::Open => (closed, open + 1, half_open),
            CircuitState::HalfOpen => (closed, open, half_open + 1),
        })
}
