//! # Reliability Coordinator
//!
//! Composition root for the reliability layer. Owns one breaker per known
//! service, the retry executor, the degradation manager and (optionally) the
//! backup manager, and runs operations through all of them:
//!
//! ```text
//! breaker gate -> fallback selection -> retry loop -> monitored operation
//! ```
//!
//! The monitored operation reports every attempt's outcome to the service's
//! breaker and failure counters, so a retried call that eventually succeeds
//! still leaves its intermediate failures on the breaker.

pub mod status;
pub mod watchdog;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backup::BackupManager;
use crate::config::{ConfigManager, RateLimitConfig, ReliabilityConfig, RetryConfig, WatchdogConfig};
use crate::error::CoreError;
use crate::logging::log_reliability_operation;
use crate::resilience::{
    BreakerPermit, CircuitBreaker, CircuitBreakerManager, ClassifyError,
    GracefulDegradationManager, ReliabilityError, RetryExecutor, RetryOptions,
};

pub use status::SystemStatus;
pub use watchdog::{evaluate_alerts, WatchdogAlert, WatchdogMonitor};

pub struct ReliabilityCoordinator {
    breakers: CircuitBreakerManager,
    retry: RetryExecutor,
    degradation: GracefulDegradationManager,
    backup: Option<Arc<BackupManager>>,

    retry_config: RetryConfig,
    rate_limit: RateLimitConfig,
    watchdog_config: WatchdogConfig,

    /// Failures since each service's last success
    failure_counts: DashMap<String, u64>,
    /// Failures since process start
    lifetime_failures: DashMap<String, u64>,

    started_at: Instant,
    started_at_wall: DateTime<Utc>,
}

impl fmt::Debug for ReliabilityCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReliabilityCoordinator")
            .field("breakers", &self.breakers.list_components())
            .field("degradation", &self.degradation)
            .field("has_backup_manager", &self.backup.is_some())
            .field("started_at", &self.started_at_wall)
            .finish()
    }
}

impl ReliabilityCoordinator {
    pub fn new(config: &ReliabilityConfig) -> Self {
        let breakers = CircuitBreakerManager::from_config(&config.circuit_breakers);

        info!(
            breakers = breakers.list_components().len(),
            max_attempts = config.retry.max_attempts,
            degradation_seconds = config.degradation.default_duration_seconds,
            "Reliability coordinator initialized"
        );

        Self {
            breakers,
            retry: RetryExecutor::new(),
            degradation: GracefulDegradationManager::from_config(&config.degradation),
            backup: None,
            retry_config: config.retry.clone(),
            rate_limit: config.rate_limit.clone(),
            watchdog_config: config.watchdog.clone(),
            failure_counts: DashMap::new(),
            lifetime_failures: DashMap::new(),
            started_at: Instant::now(),
            started_at_wall: Utc::now(),
        }
    }

    pub fn from_config_manager(manager: &ConfigManager) -> Self {
        Self::new(manager.config())
    }

    /// Attach a backup manager so status reports include the snapshot count
    pub fn with_backup_manager(mut self, backup: Arc<BackupManager>) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn backup_manager(&self) -> Option<&Arc<BackupManager>> {
        self.backup.as_ref()
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakerManager {
        &self.breakers
    }

    pub fn circuit_breaker(&self, service_name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service_name)
    }

    pub fn retry_executor(&self) -> &RetryExecutor {
        &self.retry
    }

    pub fn degradation(&self) -> &GracefulDegradationManager {
        &self.degradation
    }

    pub fn watchdog_config(&self) -> &WatchdogConfig {
        &self.watchdog_config
    }

    /// Wait applied to rate-limit errors that carry no retry-after value
    pub fn rate_limit_retry_after(&self) -> Duration {
        self.rate_limit.default_retry_after()
    }

    /// Run `operation` with the configured attempt budget
    pub async fn execute<T, E, F, Fut>(
        &self,
        service_name: &str,
        operation: F,
    ) -> Result<T, ReliabilityError<E>>
    where
        T: 'static,
        E: ClassifyError + fmt::Display + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_reliability(service_name, self.retry_config.max_attempts, operation)
            .await
    }

    /// Run `operation` through the breaker, fallback and retry layers.
    ///
    /// A fallback registered for `service_name` must take `()` as input.
    pub async fn execute_with_reliability<T, E, F, Fut>(
        &self,
        service_name: &str,
        max_attempts: u32,
        mut operation: F,
    ) -> Result<T, ReliabilityError<E>>
    where
        T: 'static,
        E: ClassifyError + fmt::Display + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_reliability_with(service_name, (), max_attempts, move |()| operation())
            .await
    }

    /// Like [`execute_with_reliability`](Self::execute_with_reliability), for
    /// operations whose fallback needs the call's input. Every attempt and the
    /// fallback receive a clone of `input`.
    pub async fn execute_with_reliability_with<I, T, E, F, Fut>(
        &self,
        service_name: &str,
        input: I,
        max_attempts: u32,
        mut operation: F,
    ) -> Result<T, ReliabilityError<E>>
    where
        I: Clone + 'static,
        T: 'static,
        E: ClassifyError + fmt::Display + 'static,
        F: FnMut(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let breaker = self.breakers.get(service_name);

        // Dropped unresolved (fallback served, or the caller gave up) it hands
        // any strict half-open slot back to the breaker
        let permit = match &breaker {
            Some(breaker) => match breaker.try_acquire() {
                Some(permit) => Some(permit),
                None => {
                    log_reliability_operation(
                        "execute",
                        service_name,
                        "rejected",
                        Some("circuit breaker open"),
                    );
                    return Err(ReliabilityError::circuit_open(service_name));
                }
            },
            None => None,
        };

        let options: RetryOptions<E> = RetryOptions::from_config(&self.retry_config)
            .with_max_attempts(max_attempts)
            .abort_if(|error: &E| !error.category().is_retryable());
        let permit = permit.as_ref();
        let options = &options;

        let primary = move |input: I| async move {
            self.retry
                .retry_with_backoff(service_name, options, || {
                    let attempt = operation(input.clone());
                    self.monitor(service_name, permit, attempt)
                })
                .await
        };

        self.degradation
            .execute_with_fallback_when(service_name, input, primary, |error: &E| {
                error.category().triggers_degradation()
            })
            .await
            .map_err(|error| {
                debug!(
                    service = service_name,
                    category = %error.category(),
                    error = %error,
                    "Reliable execution failed"
                );
                ReliabilityError::Operation(error)
            })
    }

    /// Report one attempt's outcome to the breaker and failure counters
    async fn monitor<T, E, Fut>(
        &self,
        service_name: &str,
        permit: Option<&BreakerPermit<'_>>,
        attempt: Fut,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        match attempt.await {
            Ok(value) => {
                if let Some(permit) = permit {
                    permit.record_success();
                }
                if let Some(mut count) = self.failure_counts.get_mut(service_name) {
                    *count = 0;
                }
                Ok(value)
            }
            Err(error) => {
                if let Some(permit) = permit {
                    permit.record_failure();
                }
                *self
                    .failure_counts
                    .entry(service_name.to_string())
                    .or_insert(0) += 1;
                *self
                    .lifetime_failures
                    .entry(service_name.to_string())
                    .or_insert(0) += 1;
                Err(error)
            }
        }
    }

    /// Register the fallback used when `service_name` is degraded
    pub fn register_fallback<I, T, E, F, Fut>(
        &self,
        service_name: &str,
        fallback: F,
    ) -> Result<(), CoreError>
    where
        I: 'static,
        T: 'static,
        E: 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.degradation.register_fallback(service_name, fallback)
    }

    /// Degrade a service manually for the configured default duration
    pub fn degrade_service(&self, service_name: &str, reason: impl Into<String>) {
        self.degradation
            .degrade(service_name, reason, self.degradation.default_duration());
    }

    pub fn restore_service(&self, service_name: &str) -> bool {
        self.degradation.restore(service_name)
    }

    /// Clear every degradation, returning the restored service names
    pub fn restore_degraded_services(&self) -> Vec<String> {
        let restored = self.degradation.restore_all();
        log_reliability_operation(
            "restore_degraded_services",
            "all",
            "completed",
            Some(&format!("{} restored", restored.len())),
        );
        restored
    }

    /// Close one breaker and clear its counters. False if the service is unknown.
    pub fn reset_circuit_breaker(&self, service_name: &str) -> bool {
        match self.breakers.get(service_name) {
            Some(breaker) => {
                breaker.force_closed();
                if let Some(mut count) = self.failure_counts.get_mut(service_name) {
                    *count = 0;
                }
                true
            }
            None => {
                warn!(service = service_name, "No circuit breaker to reset");
                false
            }
        }
    }

    /// Open one breaker (manual isolation). False if the service is unknown.
    pub fn force_open_circuit_breaker(&self, service_name: &str) -> bool {
        match self.breakers.get(service_name) {
            Some(breaker) => {
                breaker.force_open();
                true
            }
            None => {
                warn!(service = service_name, "No circuit breaker to open");
                false
            }
        }
    }

    /// Emergency recovery: close every breaker and clear current failure counts
    pub fn reset_all_circuit_breakers(&self) -> usize {
        let reset = self.breakers.force_close_all();
        self.failure_counts.clear();
        log_reliability_operation(
            "reset_all_circuit_breakers",
            "all",
            "completed",
            Some(&format!("{reset} reset")),
        );
        reset
    }

    /// Failures since the service's last success
    pub fn failure_count(&self, service_name: &str) -> u64 {
        self.failure_counts
            .get(service_name)
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Failures since process start
    pub fn total_failure_count(&self, service_name: &str) -> u64 {
        self.lifetime_failures
            .get(service_name)
            .map(|count| *count)
            .unwrap_or(0)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Aggregate every component into one report, including derived alerts
    pub async fn system_status(&self) -> SystemStatus {
        let circuit_breakers = self.breakers.statuses();
        let (healthy_services, open_services, half_open_services) =
            status::count_states(&circuit_breakers);
        let breaker_metrics = self.breakers.get_system_metrics();
        let active_degradations = self.degradation.active_degradations();

        let failure_counts: BTreeMap<String, u64> = self
            .failure_counts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        let total_failures: BTreeMap<String, u64> = self
            .lifetime_failures
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        let backup_count = match &self.backup {
            Some(backup) => Some(backup.backup_count().await),
            None => None,
        };

        let alerts = evaluate_alerts(
            &self.watchdog_config,
            &circuit_breakers,
            &active_degradations,
            &failure_counts,
        );

        SystemStatus {
            generated_at: Utc::now(),
            started_at: self.started_at_wall,
            uptime_seconds: self.uptime().as_secs_f64(),
            circuit_breakers,
            healthy_services,
            open_services,
            half_open_services,
            breaker_health_score: breaker_metrics.health_score(),
            breaker_failure_rate: breaker_metrics.system_failure_rate(),
            rejected_calls: breaker_metrics.total_rejections(),
            active_degradations,
            failure_counts,
            total_failures,
            total_retry_attempts: self.retry.total_retry_attempts(),
            backup_count,
            alerts,
        }
    }
}
