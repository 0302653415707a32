//! End-to-end behavior of the reliability coordinator: breaker lifecycle,
//! fallback selection, status reporting and watchdog alerts.

use futures::FutureExt;
use reliability_core::config::ReliabilityConfig;
use reliability_core::constants::services;
use reliability_core::resilience::HalfOpenAdmission;
use reliability_core::{
    CircuitState, PlatformError, ReliabilityCoordinator, WatchdogAlert, WatchdogMonitor,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::advance;

fn coordinator() -> ReliabilityCoordinator {
    ReliabilityCoordinator::new(&ReliabilityConfig::default())
}

fn strict_coordinator() -> ReliabilityCoordinator {
    let mut config = ReliabilityConfig::default();
    config.circuit_breakers.half_open_admission = HalfOpenAdmission::Strict;
    ReliabilityCoordinator::new(&config)
}

async fn fail_once(coordinator: &ReliabilityCoordinator, service: &str) {
    let _ = coordinator
        .execute_with_reliability(service, 1, || async {
            Err::<(), _>(PlatformError::Transport("connection reset".into()))
        })
        .await;
}

async fn succeed_once(coordinator: &ReliabilityCoordinator, service: &str) -> bool {
    coordinator
        .execute_with_reliability(service, 1, || async { Ok::<_, PlatformError>(()) })
        .await
        .is_ok()
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_times_out_and_recovers() {
    let coordinator = coordinator();
    let breaker = coordinator.circuit_breaker(services::DATABASE).unwrap();

    // database: 3 failures, 60s timeout, 3 probes
    fail_once(&coordinator, services::DATABASE).await;
    fail_once(&coordinator, services::DATABASE).await;
    assert_eq!(breaker.state(), CircuitState::Closed);
    fail_once(&coordinator, services::DATABASE).await;
    assert_eq!(breaker.state(), CircuitState::Open);

    advance(Duration::from_secs(59)).await;
    assert!(!succeed_once(&coordinator, services::DATABASE).await);

    advance(Duration::from_secs(1)).await;
    assert!(succeed_once(&coordinator, services::DATABASE).await);
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    assert!(succeed_once(&coordinator, services::DATABASE).await);
    assert!(succeed_once(&coordinator, services::DATABASE).await);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 0);
    assert_eq!(coordinator.failure_count(services::DATABASE), 0);
    assert_eq!(coordinator.total_failure_count(services::DATABASE), 3);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens() {
    let coordinator = coordinator();
    let breaker = coordinator.circuit_breaker(services::DATABASE).unwrap();

    for _ in 0..3 {
        fail_once(&coordinator, services::DATABASE).await;
    }
    advance(Duration::from_secs(60)).await;

    fail_once(&coordinator, services::DATABASE).await;
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!succeed_once(&coordinator, services::DATABASE).await);
}

#[tokio::test(start_paused = true)]
async fn test_strict_half_open_recovers_after_fallback_served_calls() {
    let coordinator = strict_coordinator();
    let breaker = coordinator.circuit_breaker(services::DATABASE).unwrap();

    for _ in 0..3 {
        fail_once(&coordinator, services::DATABASE).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    coordinator
        .register_fallback(services::DATABASE, |()| async {
            Ok::<_, PlatformError>("fallback")
        })
        .unwrap();
    coordinator.degrade_service(services::DATABASE, "primary unreachable");
    advance(Duration::from_secs(61)).await;

    // more fallback-served calls than the breaker has half-open slots
    for _ in 0..5 {
        let result = coordinator
            .execute_with_reliability(services::DATABASE, 1, || async {
                Ok::<_, PlatformError>("primary")
            })
            .await;
        assert_eq!(result.unwrap(), "fallback");
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    advance(Duration::from_secs(300)).await;
    assert!(!coordinator.degradation().is_degraded(services::DATABASE));

    for _ in 0..3 {
        let result = coordinator
            .execute_with_reliability(services::DATABASE, 1, || async {
                Ok::<_, PlatformError>("primary")
            })
            .await;
        assert_eq!(result.unwrap(), "primary");
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_strict_half_open_recovers_after_abandoned_calls() {
    let coordinator = strict_coordinator();
    let breaker = coordinator.circuit_breaker(services::DATABASE).unwrap();

    for _ in 0..3 {
        fail_once(&coordinator, services::DATABASE).await;
    }
    advance(Duration::from_secs(60)).await;

    for _ in 0..5 {
        let call = coordinator.execute_with_reliability(services::DATABASE, 1, || async {
            std::future::pending::<Result<(), PlatformError>>().await
        });
        // admitted, then dropped while the operation is still in flight
        assert!(call.now_or_never().is_none());
    }
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    for _ in 0..3 {
        assert!(succeed_once(&coordinator, services::DATABASE).await);
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_error_is_distinguishable() {
    let coordinator = coordinator();
    coordinator.force_open_circuit_breaker(services::SCHEDULER);

    let err = coordinator
        .execute(services::SCHEDULER, || async { Ok::<_, PlatformError>(()) })
        .await
        .unwrap_err();

    assert!(err.is_circuit_open());
    assert!(err.operation_error().is_none());
    assert!(err.to_string().contains(services::SCHEDULER));

    let status = coordinator.system_status().await;
    assert_eq!(status.rejected_calls, 1);
    assert_eq!(status.breaker_health_score, 0.75);
    assert!(status.format_summary().contains("Rejected: 1"));
}

#[tokio::test(start_paused = true)]
async fn test_degraded_service_uses_fallback_with_input() {
    let coordinator = coordinator();
    coordinator
        .register_fallback(services::DATABASE, |guild: String| async move {
            Ok::<_, PlatformError>(format!("cached settings for {guild}"))
        })
        .unwrap();

    coordinator.degrade_service(services::DATABASE, "maintenance window");

    let calls = AtomicU32::new(0);
    let result = coordinator
        .execute_with_reliability_with(services::DATABASE, "raiders".to_string(), 3, |guild| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, PlatformError>(format!("live settings for {guild}")) }
        })
        .await;

    assert_eq!(result.unwrap(), "cached settings for raiders");
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert!(coordinator.restore_service(services::DATABASE));
    let result = coordinator
        .execute_with_reliability_with(services::DATABASE, "raiders".to_string(), 3, |guild| {
            async move { Ok::<_, PlatformError>(format!("live settings for {guild}")) }
        })
        .await;
    assert_eq!(result.unwrap(), "live settings for raiders");
}

#[tokio::test(start_paused = true)]
async fn test_fast_fail_never_degrades() {
    let coordinator = coordinator();
    coordinator
        .register_fallback(services::DISCORD_API, |()| async {
            Ok::<_, PlatformError>("fallback")
        })
        .unwrap();

    let result = coordinator
        .execute_with_reliability(services::DISCORD_API, 3, || async {
            Err::<&str, _>(PlatformError::forbidden("send_messages"))
        })
        .await;

    assert!(result.is_err());
    assert!(!coordinator.degradation().is_degraded(services::DISCORD_API));
}

#[tokio::test(start_paused = true)]
async fn test_status_reports_alerts() {
    let coordinator = coordinator();

    let status = coordinator.system_status().await;
    assert!(status.is_healthy());
    assert_eq!(status.healthy_services, 4);
    assert_eq!(status.breaker_health_score, 1.0);
    assert_eq!(status.rejected_calls, 0);

    coordinator.force_open_circuit_breaker(services::DISCORD_API);
    advance(Duration::from_secs(301)).await;
    coordinator.degrade_service(services::CACHE, "redis down");
    coordinator.degrade_service(services::SCHEDULER, "queue stalled");

    let status = coordinator.system_status().await;
    assert!(!status.is_healthy());
    assert_eq!(status.open_services, 1);
    assert_eq!(status.active_degradations.len(), 2);
    assert!(status
        .breaker(services::DISCORD_API)
        .and_then(|b| b.next_retry_estimate)
        .is_some());

    assert!(status.alerts.iter().any(|alert| matches!(
        alert,
        WatchdogAlert::BreakerOpenTooLong { service_name, .. } if service_name == services::DISCORD_API
    )));
    assert!(status
        .alerts
        .iter()
        .any(|alert| matches!(alert, WatchdogAlert::MultipleServicesDegraded { .. })));
    assert!(status.uptime_seconds >= 301.0);

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["open_services"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_failure_ceiling_alert_clears_after_success() {
    let mut config = ReliabilityConfig::default();
    config.watchdog.failure_ceiling = 2;
    config.circuit_breakers.enabled = false;
    let coordinator = ReliabilityCoordinator::new(&config);

    for _ in 0..3 {
        fail_once(&coordinator, "reports").await;
    }
    let status = coordinator.system_status().await;
    assert_eq!(
        status.alerts,
        vec![WatchdogAlert::FailureCeilingExceeded {
            total_failures: 3,
            ceiling: 2
        }]
    );

    assert!(succeed_once(&coordinator, "reports").await);
    let status = coordinator.system_status().await;
    assert!(status.alerts.is_empty());
    assert_eq!(status.total_failures["reports"], 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_are_all_counted() {
    let coordinator = Arc::new(coordinator());

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { fail_once(&coordinator, services::CACHE).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let breaker = coordinator.circuit_breaker(services::CACHE).unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);
    // later calls were rejected by the open breaker without running
    let recorded = coordinator.total_failure_count(services::CACHE);
    assert!(recorded >= 10 && recorded <= 20);
    assert_eq!(u64::from(breaker.failure_count()), recorded);
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_monitor_records_alerts() {
    let coordinator = Arc::new(coordinator());
    coordinator.degrade_service(services::CACHE, "redis down");
    coordinator.degrade_service(services::DATABASE, "failover");

    let monitor = WatchdogMonitor::new(
        Arc::clone(&coordinator),
        coordinator.watchdog_config().clone(),
    );
    monitor.start().unwrap();
    assert!(monitor.is_running());
    assert!(monitor.start().is_err());

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(monitor.last_alerts().len(), 1);

    monitor.stop().await;
    assert!(!monitor.is_running());

    coordinator.restore_degraded_services();
    assert!(monitor.check_once().await.is_empty());
}
