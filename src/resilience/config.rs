//! # Circuit Breaker Configuration
//!
//! Per-breaker thresholds and the half-open admission policy. The file-level
//! table lives in `crate::config::CircuitBreakerConfig`, which converts into
//! this type through `to_resilience_config`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::defaults;

/// How a HALF_OPEN breaker admits probe calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HalfOpenAdmission {
    /// Only failures advance the probe counter, so concurrent successful
    /// probes may exceed `half_open_max_probes` before the breaker closes.
    #[default]
    Optimistic,

    /// Every admitted half-open call counts against `half_open_max_probes`.
    Strict,
}

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of recorded failures before opening circuit
    pub failure_threshold: u32,

    /// Time to wait in open state before attempting recovery
    pub timeout: Duration,

    /// Number of successful calls in half-open state to close circuit
    pub half_open_max_probes: u32,

    /// Probe admission policy while half-open
    pub half_open_admission: HalfOpenAdmission,
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, timeout: Duration, half_open_max_probes: u32) -> Self {
        Self {
            failure_threshold,
            timeout,
            half_open_max_probes,
            half_open_admission: HalfOpenAdmission::default(),
        }
    }

    pub fn with_admission(mut self, admission: HalfOpenAdmission) -> Self {
        self.half_open_admission = admission;
        self
    }

    /// Create configuration for chat-platform API calls
    pub fn for_platform_api() -> Self {
        Self::new(5, Duration::from_secs(120), defaults::HALF_OPEN_MAX_PROBES)
    }

    /// Create configuration for database operations
    pub fn for_database() -> Self {
        Self::new(3, Duration::from_secs(60), defaults::HALF_OPEN_MAX_PROBES)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.failure_threshold > 1000 {
            return Err("failure_threshold should not exceed 1000".to_string());
        }

        if self.timeout.is_zero() {
            return Err("timeout must be greater than 0".to_string());
        }

        if self.timeout > Duration::from_secs(24 * 60 * 60) {
            return Err("timeout should not exceed 24 hours".to_string());
        }

        if self.half_open_max_probes == 0 {
            return Err("half_open_max_probes must be greater than 0".to_string());
        }

        if self.half_open_max_probes > 100 {
            return Err("half_open_max_probes should not exceed 100".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new(
            defaults::FAILURE_THRESHOLD,
            Duration::from_secs(defaults::OPEN_TIMEOUT_SECONDS),
            defaults::HALF_OPEN_MAX_PROBES,
        )
    }
}
