//! # Watchdog Alerts
//!
//! Alerts are derived from the current reliability state on every status
//! request; nothing about them is stored. [`WatchdogMonitor`] evaluates them
//! periodically in the background and logs whatever is firing.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::ReliabilityCoordinator;
use crate::config::WatchdogConfig;
use crate::error::CoreError;
use crate::resilience::{ActiveDegradation, CircuitBreakerStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WatchdogAlert {
    /// A breaker has been OPEN longer than the alert threshold
    BreakerOpenTooLong {
        service_name: String,
        open_for_seconds: f64,
        threshold_seconds: u64,
    },

    /// Several services are running on fallbacks at the same time
    MultipleServicesDegraded {
        services: Vec<String>,
        threshold: usize,
    },

    /// Current failure counters summed across services exceed the ceiling
    FailureCeilingExceeded { total_failures: u64, ceiling: u64 },
}

impl WatchdogAlert {
    pub fn message(&self) -> String {
        match self {
            Self::BreakerOpenTooLong {
                service_name,
                open_for_seconds,
                threshold_seconds,
            } => format!(
                "Circuit breaker for {service_name} open for {open_for_seconds:.0}s (threshold {threshold_seconds}s)"
            ),
            Self::MultipleServicesDegraded { services, .. } => {
                format!("{} services degraded: {}", services.len(), services.join(", "))
            }
            Self::FailureCeilingExceeded {
                total_failures,
                ceiling,
            } => format!("{total_failures} failures across services (ceiling {ceiling})"),
        }
    }
}

/// Compute the alerts firing for the given state
pub fn evaluate_alerts(
    config: &WatchdogConfig,
    breakers: &[CircuitBreakerStatus],
    degradations: &[ActiveDegradation],
    failure_counts: &BTreeMap<String, u64>,
) -> Vec<WatchdogAlert> {
    let mut alerts = Vec::new();
    let threshold = config.open_alert_threshold().as_secs_f64();

    for status in breakers {
        if let Some(open_for) = status.open_for_seconds {
            if open_for > threshold {
                alerts.push(WatchdogAlert::BreakerOpenTooLong {
                    service_name: status.service_name.clone(),
                    open_for_seconds: open_for,
                    threshold_seconds: config.open_alert_threshold_seconds,
                });
            }
        }
    }

    if degradations.len() >= config.degraded_services_alert_count {
        alerts.push(WatchdogAlert::MultipleServicesDegraded {
            services: degradations.iter().map(|d| d.service_name.clone()).collect(),
            threshold: config.degraded_services_alert_count,
        });
    }

    let total_failures: u64 = failure_counts.values().sum();
    if total_failures > config.failure_ceiling {
        alerts.push(WatchdogAlert::FailureCeilingExceeded {
            total_failures,
            ceiling: config.failure_ceiling,
        });
    }

    alerts
}

/// Background loop logging watchdog alerts
pub struct WatchdogMonitor {
    coordinator: Arc<ReliabilityCoordinator>,
    config: WatchdogConfig,
    shutdown_notify: Arc<Notify>,
    running: Arc<AtomicBool>,
    last_alerts: Arc<Mutex<Vec<WatchdogAlert>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WatchdogMonitor {
    pub fn new(coordinator: Arc<ReliabilityCoordinator>, config: WatchdogConfig) -> Self {
        Self {
            coordinator,
            config,
            shutdown_notify: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
            last_alerts: Arc::new(Mutex::new(Vec::new())),
            handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Alerts seen by the most recent check
    pub fn last_alerts(&self) -> Vec<WatchdogAlert> {
        self.last_alerts.lock().clone()
    }

    /// Evaluate once and log firing alerts
    pub async fn check_once(&self) -> Vec<WatchdogAlert> {
        Self::check(&self.coordinator, &self.last_alerts).await
    }

    async fn check(
        coordinator: &ReliabilityCoordinator,
        last_alerts: &Mutex<Vec<WatchdogAlert>>,
    ) -> Vec<WatchdogAlert> {
        let status = coordinator.system_status().await;

        if status.alerts.is_empty() {
            debug!(summary = %status.format_summary(), "Watchdog check clear");
        }
        for alert in &status.alerts {
            warn!(alert = %alert.message(), "Watchdog alert");
        }

        *last_alerts.lock() = status.alerts.clone();
        status.alerts
    }

    pub fn start(&self) -> Result<(), CoreError> {
        if !self.config.enabled {
            info!("Watchdog disabled by configuration");
            return Ok(());
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CoreError::coordinator("Watchdog is already running"));
        }

        let coordinator = Arc::clone(&self.coordinator);
        let last_alerts = Arc::clone(&self.last_alerts);
        let shutdown_notify = Arc::clone(&self.shutdown_notify);
        let interval = self.config.check_interval();

        info!(check_interval_seconds = interval.as_secs(), "Starting watchdog loop");

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        Self::check(&coordinator, &last_alerts).await;
                    }
                    _ = shutdown_notify.notified() => {
                        info!("Watchdog loop shutting down");
                        break;
                    }
                }
            }
        });

        *self.handle.lock() = Some(handle);
        Ok(())
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown_notify.notify_one();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Watchdog loop ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitState;
    use chrono::Utc;

    fn open_status(name: &str, open_for: f64) -> CircuitBreakerStatus {
        CircuitBreakerStatus {
            service_name: name.to_string(),
            state: CircuitState::Open,
            failure_count: 5,
            success_count: 0,
            last_failure: Some(Utc::now()),
            next_retry_estimate: Some(Utc::now()),
            open_for_seconds: Some(open_for),
        }
    }

    fn degradation(name: &str) -> ActiveDegradation {
        ActiveDegradation {
            service_name: name.to_string(),
            reason: "down".to_string(),
            degraded_at: Utc::now(),
            remaining_seconds: 120.0,
        }
    }

    #[test]
    fn test_quiet_state_has_no_alerts() {
        let alerts = evaluate_alerts(&WatchdogConfig::default(), &[], &[], &BTreeMap::new());
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_breaker_open_past_threshold_alerts() {
        let config = WatchdogConfig::default();
        let statuses = [open_status("database", 299.0), open_status("discord_api", 301.0)];

        let alerts = evaluate_alerts(&config, &statuses, &[], &BTreeMap::new());
        assert_eq!(alerts.len(), 1);
        assert!(matches!(
            &alerts[0],
            WatchdogAlert::BreakerOpenTooLong { service_name, .. } if service_name == "discord_api"
        ));
    }

    #[test]
    fn test_two_degraded_services_alert() {
        let config = WatchdogConfig::default();

        let one = [degradation("cache")];
        assert!(evaluate_alerts(&config, &[], &one, &BTreeMap::new()).is_empty());

        let two = [degradation("cache"), degradation("database")];
        let alerts = evaluate_alerts(&config, &[], &two, &BTreeMap::new());
        assert_eq!(
            alerts,
            vec![WatchdogAlert::MultipleServicesDegraded {
                services: vec!["cache".to_string(), "database".to_string()],
                threshold: 2,
            }]
        );
    }

    #[test]
    fn test_failure_ceiling_is_exclusive() {
        let config = WatchdogConfig::default();
        let mut counts = BTreeMap::from([("database".to_string(), 30), ("cache".to_string(), 20)]);
        assert!(evaluate_alerts(&config, &[], &[], &counts).is_empty());

        counts.insert("scheduler".to_string(), 1);
        let alerts = evaluate_alerts(&config, &[], &[], &counts);
        assert_eq!(
            alerts,
            vec![WatchdogAlert::FailureCeilingExceeded {
                total_failures: 51,
                ceiling: 50
            }]
        );
    }

    #[test]
    fn test_alert_serializes_with_kind_tag() {
        let alert = WatchdogAlert::FailureCeilingExceeded {
            total_failures: 60,
            ceiling: 50,
        };
        let value = serde_json::to_value(&alert).unwrap();
        assert_eq!(value["kind"], "failure_ceiling_exceeded");
        assert!(alert.message().contains("60 failures"));
    }
}
