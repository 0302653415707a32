//! # Resilient Platform Calls
//!
//! Boundary adapter between chat-platform calls and the reliability
//! coordinator. Each attempt is classified before the coordinator sees it:
//!
//! - permission / not-found errors are logged and returned; the coordinator
//!   will not retry them
//! - rate-limit errors wait out the advertised retry-after (or the configured
//!   default) and are then returned, so the coordinator's retry loop
//!   re-attempts
//! - everything else is left to the coordinator's retry policy
//!
//! Reliability is additive: when no coordinator is reachable the operation
//! runs once, unmodified.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::errors::PlatformError;
use crate::constants::{defaults, services};
use crate::coordinator::ReliabilityCoordinator;
use crate::resilience::{ClassifyError, ErrorCategory, ReliabilityError};

/// Anything that may carry a reliability coordinator
pub trait ReliabilityHandle {
    fn reliability(&self) -> Option<&ReliabilityCoordinator>;
}

impl ReliabilityHandle for ReliabilityCoordinator {
    fn reliability(&self) -> Option<&ReliabilityCoordinator> {
        Some(self)
    }
}

impl ReliabilityHandle for Arc<ReliabilityCoordinator> {
    fn reliability(&self) -> Option<&ReliabilityCoordinator> {
        Some(self.as_ref())
    }
}

impl<H: ReliabilityHandle> ReliabilityHandle for Option<H> {
    fn reliability(&self) -> Option<&ReliabilityCoordinator> {
        self.as_ref().and_then(ReliabilityHandle::reliability)
    }
}

impl<H: ReliabilityHandle + ?Sized> ReliabilityHandle for &H {
    fn reliability(&self) -> Option<&ReliabilityCoordinator> {
        (**self).reliability()
    }
}

/// Run a platform call through whatever coordinator `handle` carries.
///
/// `max_retries` is the attempt budget handed to the coordinator.
pub async fn resilient<H, T, F, Fut>(
    handle: &H,
    service_name: &str,
    max_retries: u32,
    operation: F,
) -> Result<T, ReliabilityError<PlatformError>>
where
    H: ReliabilityHandle + ?Sized,
    T: 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PlatformError>>,
{
    run_resilient(handle.reliability(), service_name, max_retries, None, operation).await
}

async fn run_resilient<T, F, Fut>(
    coordinator: Option<&ReliabilityCoordinator>,
    service_name: &str,
    max_retries: u32,
    retry_after_override: Option<Duration>,
    mut operation: F,
) -> Result<T, ReliabilityError<PlatformError>>
where
    T: 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PlatformError>>,
{
    let Some(coordinator) = coordinator else {
        debug!(service = service_name, "No reliability coordinator, calling directly");
        return operation().await.map_err(ReliabilityError::Operation);
    };

    let default_retry_after =
        retry_after_override.unwrap_or_else(|| coordinator.rate_limit_retry_after());

    coordinator
        .execute_with_reliability(service_name, max_retries, || {
            classified_attempt(service_name, default_retry_after, operation())
        })
        .await
}

async fn classified_attempt<T, Fut>(
    service_name: &str,
    default_retry_after: Duration,
    attempt: Fut,
) -> Result<T, PlatformError>
where
    Fut: Future<Output = Result<T, PlatformError>>,
{
    let error = match attempt.await {
        Ok(value) => return Ok(value),
        Err(error) => error,
    };

    match error.category() {
        ErrorCategory::FastFail => {
            warn!(service = service_name, error = %error, "Platform call rejected, not retrying");
        }
        ErrorCategory::RateLimited => {
            let wait = error.retry_after().unwrap_or(default_retry_after);
            warn!(
                service = service_name,
                retry_after_ms = wait.as_millis() as u64,
                "Rate limited by platform, waiting before retry"
            );
            tokio::time::sleep(wait).await;
        }
        ErrorCategory::Transient => {
            debug!(service = service_name, error = %error, "Platform call failed");
        }
    }

    Err(error)
}

/// Reusable wrapper binding a coordinator handle to one service's retry budget
#[derive(Debug, Clone)]
pub struct ResilientCallWrapper {
    coordinator: Option<Arc<ReliabilityCoordinator>>,
    service_name: String,
    max_retries: u32,
    retry_after_override: Option<Duration>,
}

impl ResilientCallWrapper {
    /// Wrapper for the chat-platform API with the default attempt budget
    pub fn new(coordinator: Option<Arc<ReliabilityCoordinator>>) -> Self {
        Self {
            coordinator,
            service_name: services::DISCORD_API.to_string(),
            max_retries: defaults::MAX_ATTEMPTS,
            retry_after_override: None,
        }
    }

    pub fn for_service(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Wait used for rate limits without a retry-after value, instead of the
    /// coordinator's configured default
    pub fn with_default_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_override = Some(retry_after);
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether calls go through a coordinator or run directly
    pub fn is_protected(&self) -> bool {
        self.coordinator.is_some()
    }

    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, ReliabilityError<PlatformError>>
    where
        T: 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PlatformError>>,
    {
        run_resilient(
            self.coordinator.reliability(),
            &self.service_name,
            self.max_retries,
            self.retry_after_override,
            operation,
        )
        .await
    }
}
