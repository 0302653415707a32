//! # Circuit Breaker Implementation
//!
//! Per-service fault isolation with three states: Closed (normal operation),
//! Open (failing fast) and Half-Open (probing recovery).
//!
//! ```text
//! CLOSED --failures >= threshold--> OPEN
//! OPEN --admission check after timeout--> HALF_OPEN
//! HALF_OPEN --successes >= half_open_max_probes--> CLOSED
//! HALF_OPEN --any failure--> OPEN
//! ```
//!
//! There is no background timer: the OPEN to HALF_OPEN transition happens as a
//! side effect of [`CircuitBreaker::can_execute`]. All duration math uses the
//! monotonic clock; wall-clock timestamps are kept for reporting only.
//!
//! Callers that may abandon an admitted call without an outcome (a fallback
//! serves it, or the future is dropped) should admit through
//! [`CircuitBreaker::try_acquire`]. Under [`HalfOpenAdmission::Strict`] the
//! returned [`BreakerPermit`] gives its half-open slot back when dropped
//! unresolved, so HALF_OPEN keeps admitting calls that report an outcome.

use crate::resilience::config::{CircuitBreakerConfig, HalfOpenAdmission};
use crate::resilience::CircuitBreakerMetrics;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - probe calls are allowed to test service health
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Error surfaced by reliability-wrapped calls.
///
/// `CircuitOpen` is synthetic: the operation was never invoked. `Operation`
/// carries the wrapped operation's own error unchanged.
#[derive(Debug, thiserror::Error)]
pub enum ReliabilityError<E> {
    #[error("Service {service} circuit breaker is open")]
    CircuitOpen { service: String },

    #[error("{0}")]
    Operation(E),
}

impl<E> ReliabilityError<E> {
    pub fn circuit_open(service: impl Into<String>) -> Self {
        Self::CircuitOpen {
            service: service.into(),
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::CircuitOpen { .. } => None,
        }
    }

    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::CircuitOpen { .. } => None,
        }
    }
}

/// Read-only status snapshot used for health reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub service_name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
    /// Earliest wall-clock time a probe will be admitted (OPEN only)
    pub next_retry_estimate: Option<DateTime<Utc>>,
    /// How long the breaker has been OPEN (OPEN only)
    pub open_for_seconds: Option<f64>,
}

/// Mutable breaker state, serialized by the breaker's mutex
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    /// Gates HALF_OPEN admission; what advances it depends on the admission policy
    half_open_probes: u32,
    /// Bumped on every entry into HALF_OPEN so stale permits cannot release slots
    half_open_generation: u64,
    last_failure_at: Option<Instant>,
    last_failure_wall: Option<DateTime<Utc>>,
    opened_at: Option<Instant>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_probes: 0,
            half_open_generation: 0,
            last_failure_at: None,
            last_failure_wall: None,
            opened_at: None,
        }
    }
}

/// Lifetime counters, metrics only
#[derive(Debug, Default)]
struct BreakerCounters {
    success_total: AtomicU64,
    failure_total: AtomicU64,
    rejected_total: AtomicU64,
}

/// Core circuit breaker implementation
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Service name for logging and metrics
    name: String,

    /// Immutable configuration
    config: CircuitBreakerConfig,

    state: Mutex<BreakerState>,

    counters: BreakerCounters,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            service = %name,
            failure_threshold = config.failure_threshold,
            timeout_seconds = config.timeout.as_secs(),
            half_open_max_probes = config.half_open_max_probes,
            admission = ?config.half_open_admission,
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            state: Mutex::new(BreakerState::new()),
            counters: BreakerCounters::default(),
        }
    }

    /// Get service name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get current circuit state (no transition side effects)
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    pub fn success_count(&self) -> u32 {
        self.state.lock().success_count
    }

    /// Admission check.
    ///
    /// In OPEN, flips to HALF_OPEN once the timeout since the last failure has
    /// elapsed and then applies the half-open admission rule. Under strict
    /// admission an admitted caller must record an outcome; use
    /// [`try_acquire`](Self::try_acquire) when that is not guaranteed.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.state.lock();
        self.admit(&mut inner)
    }

    /// Admission check returning a permit that reports the call's outcome.
    ///
    /// `None` when the call is rejected.
    pub fn try_acquire(&self) -> Option<BreakerPermit<'_>> {
        let mut inner = self.state.lock();
        if !self.admit(&mut inner) {
            return None;
        }

        let holds_slot = inner.state == CircuitState::HalfOpen
            && self.config.half_open_admission == HalfOpenAdmission::Strict;

        Some(BreakerPermit {
            breaker: self,
            half_open_slot: holds_slot.then_some(inner.half_open_generation),
            resolved: AtomicBool::new(false),
        })
    }

    fn admit(&self, inner: &mut BreakerState) -> bool {
        let allowed = match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let timed_out = inner
                    .last_failure_at
                    .map(|at| at.elapsed() >= self.config.timeout)
                    .unwrap_or(true);

                if timed_out {
                    self.transition_to_half_open(inner);
                    self.admit_half_open(inner)
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => self.admit_half_open(inner),
        };

        if !allowed {
            self.counters.rejected_total.fetch_add(1, Ordering::Relaxed);
            debug!(service = %self.name, state = %inner.state, "Call rejected by circuit breaker");
        }

        allowed
    }

    fn admit_half_open(&self, inner: &mut BreakerState) -> bool {
        let below_limit = inner.half_open_probes < self.config.half_open_max_probes;
        if below_limit && self.config.half_open_admission == HalfOpenAdmission::Strict {
            inner.half_open_probes += 1;
        }
        below_limit
    }

    /// Return a strict half-open slot taken during `generation`
    fn release_half_open_slot(&self, generation: u64) {
        let mut inner = self.state.lock();
        if inner.state == CircuitState::HalfOpen && inner.half_open_generation == generation {
            inner.half_open_probes = inner.half_open_probes.saturating_sub(1);
            debug!(
                service = %self.name,
                in_flight = inner.half_open_probes,
                "Half-open slot released without an outcome"
            );
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        self.counters.success_total.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.state.lock();

        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                debug!(
                    service = %self.name,
                    successes = inner.success_count,
                    required = self.config.half_open_max_probes,
                    "Half-open probe succeeded"
                );
                if inner.success_count >= self.config.half_open_max_probes {
                    self.transition_to_closed(&mut inner);
                }
            }
            CircuitState::Closed | CircuitState::Open => {
                inner.failure_count = inner.failure_count.saturating_sub(1);
            }
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        self.counters.failure_total.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.state.lock();

        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(Instant::now());
        inner.last_failure_wall = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition_to_open(&mut inner, "failure threshold reached");
                }
            }
            CircuitState::HalfOpen => {
                self.transition_to_open(&mut inner, "half-open probe failed");
            }
            CircuitState::Open => {
                debug!(service = %self.name, "Failure recorded while circuit is open");
            }
        }
    }

    fn transition_to_closed(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.half_open_probes = 0;
        inner.opened_at = None;

        info!(service = %self.name, "Circuit breaker CLOSED - service recovered");
    }

    fn transition_to_open(&self, inner: &mut BreakerState, reason: &str) {
        inner.state = CircuitState::Open;
        inner.success_count = 0;
        inner.half_open_probes = 0;
        inner.opened_at = Some(Instant::now());

        error!(
            service = %self.name,
            failure_count = inner.failure_count,
            failure_threshold = self.config.failure_threshold,
            timeout_seconds = self.config.timeout.as_secs(),
            reason = reason,
            "Circuit breaker OPEN - failing fast"
        );
    }

    fn transition_to_half_open(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::HalfOpen;
        inner.success_count = 0;
        inner.half_open_probes = 0;
        inner.half_open_generation = inner.half_open_generation.wrapping_add(1);

        info!(
            service = %self.name,
            half_open_max_probes = self.config.half_open_max_probes,
            "Circuit breaker HALF_OPEN - testing recovery"
        );
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, ReliabilityError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(permit) = self.try_acquire() else {
            return Err(ReliabilityError::circuit_open(&self.name));
        };

        match operation().await {
            Ok(value) => {
                permit.record_success();
                Ok(value)
            }
            Err(e) => {
                permit.record_failure();
                Err(ReliabilityError::Operation(e))
            }
        }
    }

    /// Force circuit to open state (manual isolation)
    pub fn force_open(&self) {
        warn!(service = %self.name, "Circuit breaker forced open");
        let mut inner = self.state.lock();
        inner.last_failure_at = Some(Instant::now());
        inner.last_failure_wall = Some(Utc::now());
        self.transition_to_open(&mut inner, "forced open");
    }

    /// Force circuit to closed state with counters cleared (manual recovery)
    pub fn force_closed(&self) {
        warn!(service = %self.name, "Circuit breaker forced closed");
        let mut inner = self.state.lock();
        self.transition_to_closed(&mut inner);
    }

    /// How long the breaker has been OPEN, if it is
    pub fn open_duration(&self) -> Option<Duration> {
        let inner = self.state.lock();
        match inner.state {
            CircuitState::Open => inner.opened_at.map(|at| at.elapsed()),
            _ => None,
        }
    }

    /// Read-only status for external health reporting
    pub fn status(&self) -> CircuitBreakerStatus {
        let inner = self.state.lock();
        let is_open = inner.state == CircuitState::Open;

        let next_retry_estimate = if is_open {
            inner.last_failure_wall.and_then(|wall| {
                chrono::Duration::from_std(self.config.timeout)
                    .ok()
                    .map(|timeout| wall + timeout)
            })
        } else {
            None
        };

        CircuitBreakerStatus {
            service_name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure: inner.last_failure_wall,
            next_retry_estimate,
            open_for_seconds: if is_open {
                inner.opened_at.map(|at| at.elapsed().as_secs_f64())
            } else {
                None
            },
        }
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let (state, consecutive_failures) = {
            let inner = self.state.lock();
            (inner.state, inner.failure_count)
        };

        CircuitBreakerMetrics::from_counts(
            state,
            self.counters.success_total.load(Ordering::Relaxed),
            self.counters.failure_total.load(Ordering::Relaxed),
            self.counters.rejected_total.load(Ordering::Relaxed),
            u64::from(consecutive_failures),
        )
    }
}

/// Admission granted by [`CircuitBreaker::try_acquire`].
///
/// Outcomes recorded through the permit go to the breaker. A strict
/// half-open slot whose permit is dropped before any outcome was recorded
/// is returned to the breaker.
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    /// HALF_OPEN generation the slot was taken in (strict admission only)
    half_open_slot: Option<u64>,
    resolved: AtomicBool,
}

impl BreakerPermit<'_> {
    pub fn breaker(&self) -> &CircuitBreaker {
        self.breaker
    }

    /// Whether an outcome has been recorded through this permit
    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    pub fn record_success(&self) {
        self.resolved.store(true, Ordering::Release);
        self.breaker.record_success();
    }

    pub fn record_failure(&self) {
        self.resolved.store(true, Ordering::Release);
        self.breaker.record_failure();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.half_open_slot {
            if !*self.resolved.get_mut() {
                self.breaker.release_half_open_slot(generation);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn breaker(threshold: u32, timeout_secs: u64, probes: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::new(threshold, Duration::from_secs(timeout_secs), probes),
        )
    }

    #[test]
    fn test_threshold_minus_one_failures_stay_closed() {
        let circuit = breaker(3, 60, 2);
        circuit.record_failure();
        circuit.record_failure();
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert!(circuit.can_execute());

        circuit.record_failure();
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(!circuit.can_execute());
    }

    #[test]
    fn test_success_decrements_failure_count_with_floor() {
        let circuit = breaker(5, 60, 2);
        circuit.record_failure();
        circuit.record_failure();
        circuit.record_success();
        assert_eq!(circuit.failure_count(), 1);

        circuit.record_success();
        circuit.record_success();
        assert_eq!(circuit.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_times_out_into_half_open() {
        let circuit = breaker(1, 30, 2);
        circuit.record_failure();
        assert_eq!(circuit.state(), CircuitState::Open);

        advance(Duration::from_secs(29)).await;
        assert!(!circuit.can_execute());
        assert_eq!(circuit.state(), CircuitState::Open);

        advance(Duration::from_secs(1)).await;
        assert!(circuit.can_execute());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_recovery_resets_counters() {
        let circuit = breaker(2, 10, 3);
        circuit.record_failure();
        circuit.record_failure();
        advance(Duration::from_secs(10)).await;
        assert!(circuit.can_execute());

        circuit.record_success();
        circuit.record_success();
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
        circuit.record_success();

        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.failure_count(), 0);
        assert_eq!(circuit.success_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_and_resets_timer() {
        let circuit = breaker(1, 10, 3);
        circuit.record_failure();
        advance(Duration::from_secs(10)).await;
        assert!(circuit.can_execute());

        circuit.record_success();
        circuit.record_failure();
        assert_eq!(circuit.state(), CircuitState::Open);

        // Timer restarted at the half-open failure
        advance(Duration::from_secs(5)).await;
        assert!(!circuit.can_execute());
        advance(Duration::from_secs(5)).await;
        assert!(circuit.can_execute());
        // Earlier half-open success does not carry over
        assert_eq!(circuit.success_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_optimistic_admission_lets_concurrent_probes_through() {
        let circuit = breaker(1, 10, 2);
        circuit.record_failure();
        advance(Duration::from_secs(10)).await;

        for _ in 0..5 {
            assert!(circuit.can_execute());
        }
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_admission_bounds_probes() {
        let circuit = CircuitBreaker::new(
            "strict",
            CircuitBreakerConfig::new(1, Duration::from_secs(10), 2)
                .with_admission(HalfOpenAdmission::Strict),
        );
        circuit.record_failure();
        advance(Duration::from_secs(10)).await;

        assert!(circuit.can_execute());
        assert!(circuit.can_execute());
        assert!(!circuit.can_execute());

        circuit.record_success();
        circuit.record_success();
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert!(circuit.can_execute());
    }

    fn strict_breaker(probes: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "strict",
            CircuitBreakerConfig::new(1, Duration::from_secs(10), probes)
                .with_admission(HalfOpenAdmission::Strict),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_permit_returns_half_open_slot() {
        let circuit = strict_breaker(2);
        circuit.record_failure();
        advance(Duration::from_secs(10)).await;

        let first = circuit.try_acquire().unwrap();
        let second = circuit.try_acquire().unwrap();
        assert!(circuit.try_acquire().is_none());

        drop(first);
        drop(second);
        assert_eq!(circuit.state(), CircuitState::HalfOpen);

        // Both slots are back, and two real probes close the breaker
        let first = circuit.try_acquire().unwrap();
        let second = circuit.try_acquire().unwrap();
        first.record_success();
        second.record_success();
        assert!(first.is_resolved());
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolved_permit_keeps_its_slot() {
        let circuit = strict_breaker(2);
        circuit.record_failure();
        advance(Duration::from_secs(10)).await;

        let permit = circuit.try_acquire().unwrap();
        permit.record_success();
        drop(permit);

        let second = circuit.try_acquire();
        assert!(second.is_some());
        assert!(circuit.try_acquire().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_permit_does_not_release_into_new_half_open() {
        let circuit = strict_breaker(1);
        circuit.record_failure();
        advance(Duration::from_secs(10)).await;

        let stale = circuit.try_acquire().unwrap();
        // Reopen and time out again while the old permit is still alive
        circuit.record_failure();
        advance(Duration::from_secs(10)).await;
        let current = circuit.try_acquire().unwrap();

        drop(stale);
        assert!(circuit.try_acquire().is_none());
        drop(current);
        assert!(circuit.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_permit_holds_no_slot() {
        let circuit = strict_breaker(1);
        let permit = circuit.try_acquire().unwrap();
        assert!(permit.half_open_slot.is_none());
        drop(permit);
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_call_fails_fast_when_open() {
        let circuit = breaker(1, 60, 1);
        let result = circuit.call(|| async { Err::<(), _>("boom") }).await;
        assert!(matches!(result, Err(ReliabilityError::Operation("boom"))));

        let mut invoked = false;
        let result = circuit
            .call(|| {
                invoked = true;
                async { Ok::<_, &str>(()) }
            })
            .await;
        assert!(result.unwrap_err().is_circuit_open());
        assert!(!invoked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_next_retry_only_when_open() {
        let circuit = breaker(1, 45, 1);
        let status = circuit.status();
        assert_eq!(status.state, CircuitState::Closed);
        assert!(status.last_failure.is_none());
        assert!(status.next_retry_estimate.is_none());

        circuit.record_failure();
        advance(Duration::from_secs(3)).await;
        let status = circuit.status();
        assert_eq!(status.state, CircuitState::Open);
        let last = status.last_failure.unwrap();
        assert_eq!(
            status.next_retry_estimate.unwrap(),
            last + chrono::Duration::seconds(45)
        );
        assert_eq!(status.open_for_seconds, Some(3.0));
    }

    #[test]
    fn test_force_operations() {
        let circuit = breaker(5, 60, 1);

        circuit.force_open();
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(!circuit.can_execute());

        circuit.force_closed();
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.failure_count(), 0);
    }

    #[test]
    fn test_metrics_track_lifetime_counts() {
        let circuit = breaker(2, 60, 1);
        circuit.record_success();
        circuit.record_failure();
        circuit.record_failure();
        assert!(!circuit.can_execute());

        let metrics = circuit.metrics();
        assert_eq!(metrics.total_calls, 3);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 2);
        assert_eq!(metrics.rejected_count, 1);
        assert_eq!(metrics.current_state, CircuitState::Open);
    }

    #[test]
    fn test_state_display_matches_report_format() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
        assert_eq!(
            serde_json::to_string(&CircuitState::HalfOpen).unwrap(),
            "\"HALF_OPEN\""
        );
    }
}
