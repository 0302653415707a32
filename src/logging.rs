//! # Structured Logging Module
//!
//! Environment-aware structured logging. Production emits JSON lines at
//! `info`; every other environment gets human-readable output at `debug`.
//! `RUST_LOG` overrides the derived level.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::ConfigManager;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));

        let layer = if is_json_environment(&environment) {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(filter)
                .boxed()
        };

        // Another subscriber may already be installed by the host application
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            "Structured logging initialized"
        );
    });
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

fn is_json_environment(environment: &str) -> bool {
    environment == "production"
}

/// Log structured data for reliability operations (breaker, retry, degradation)
pub fn log_reliability_operation(
    operation: &str,
    service: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        service = %service,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "RELIABILITY_OPERATION"
    );
}

/// Log structured data for backup and restore operations
pub fn log_backup_operation(
    operation: &str,
    service_id: i64,
    status: &str,
    record_count: Option<usize>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        service_id = service_id,
        status = %status,
        record_count = record_count,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "BACKUP_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}
