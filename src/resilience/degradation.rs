//! # Graceful Degradation
//!
//! Keeps a registry of fallback handlers and the set of currently degraded
//! services. A degraded service with a fallback is served by the fallback
//! without touching the primary path until its degradation expires.
//!
//! Expiry is evaluated lazily: reading a record past its deadline removes it.

use crate::config::DegradationConfig;
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// A registered fallback: same input and output contract as the primary it replaces
pub type FallbackHandler<I, T, E> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

#[derive(Debug, Clone)]
struct DegradationRecord {
    reason: String,
    degraded_at: DateTime<Utc>,
    expires_at: Instant,
}

/// A live degradation as seen by status reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveDegradation {
    pub service_name: String,
    pub reason: String,
    pub degraded_at: DateTime<Utc>,
    pub remaining_seconds: f64,
}

pub struct GracefulDegradationManager {
    default_duration: Duration,
    degraded: Mutex<HashMap<String, DegradationRecord>>,
    fallbacks: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl fmt::Debug for GracefulDegradationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GracefulDegradationManager")
            .field("default_duration", &self.default_duration)
            .field("degraded", &self.degraded.lock().len())
            .field("fallbacks", &self.fallbacks.read().len())
            .finish()
    }
}

impl GracefulDegradationManager {
    pub fn new(default_duration: Duration) -> Self {
        Self {
            default_duration,
            degraded: Mutex::new(HashMap::new()),
            fallbacks: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &DegradationConfig) -> Self {
        Self::new(config.default_duration())
    }

    pub fn default_duration(&self) -> Duration {
        self.default_duration
    }

    /// Register the fallback for a service. A service has at most one fallback.
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
        let mut fallbacks = self.fallbacks.write();
        if fallbacks.contains_key(service_name) {
            return Err(CoreError::degradation(format!(
                "fallback already registered for service '{service_name}'"
            )));
        }

        let handler: FallbackHandler<I, T, E> =
            Arc::new(move |input: I| -> BoxFuture<'static, Result<T, E>> {
                Box::pin(fallback(input))
            });
        fallbacks.insert(service_name.to_string(), Arc::new(handler));

        info!(service = service_name, "Registered fallback handler");
        Ok(())
    }

    pub fn has_fallback(&self, service_name: &str) -> bool {
        self.fallbacks.read().contains_key(service_name)
    }

    /// Look up a fallback with the exact handler signature
    fn fallback_for<I, T, E>(&self, service_name: &str) -> Option<FallbackHandler<I, T, E>>
    where
        I: 'static,
        T: 'static,
        E: 'static,
    {
        let fallbacks = self.fallbacks.read();
        let entry = fallbacks.get(service_name)?;

        match entry.downcast_ref::<FallbackHandler<I, T, E>>() {
            Some(handler) => Some(Arc::clone(handler)),
            None => {
                error!(
                    service = service_name,
                    "Registered fallback does not match the operation's input/output types"
                );
                None
            }
        }
    }

    /// True iff a live degradation record exists. Expired records are removed.
    pub fn is_degraded(&self, service_name: &str) -> bool {
        let mut degraded = self.degraded.lock();
        match degraded.get(service_name) {
            Some(record) if Instant::now() < record.expires_at => true,
            Some(_) => {
                degraded.remove(service_name);
                info!(service = service_name, "Degradation expired, service restored");
                false
            }
            None => false,
        }
    }

    /// Upsert a degradation record expiring `duration` from now
    pub fn degrade(&self, service_name: &str, reason: impl Into<String>, duration: Duration) {
        let reason = reason.into();
        warn!(
            service = service_name,
            reason = %reason,
            duration_seconds = duration.as_secs(),
            "Service degraded"
        );

        self.degraded.lock().insert(
            service_name.to_string(),
            DegradationRecord {
                reason,
                degraded_at: Utc::now(),
                expires_at: Instant::now() + duration,
            },
        );
    }

    /// Remove a degradation early (manual recovery). Returns whether one existed.
    pub fn restore(&self, service_name: &str) -> bool {
        let removed = self.degraded.lock().remove(service_name).is_some();
        if removed {
            info!(service = service_name, "Service restored from degraded mode");
        }
        removed
    }

    /// Remove every degradation, returning the restored service names (sorted)
    pub fn restore_all(&self) -> Vec<String> {
        let mut restored: Vec<String> = self.degraded.lock().drain().map(|(name, _)| name).collect();
        restored.sort();
        if !restored.is_empty() {
            info!(count = restored.len(), "Restored all degraded services");
        }
        restored
    }

    /// Live degradations with remaining time, sorted by service name
    pub fn active_degradations(&self) -> Vec<ActiveDegradation> {
        let now = Instant::now();
        let mut degraded = self.degraded.lock();
        degraded.retain(|_, record| now < record.expires_at);

        let mut active: Vec<ActiveDegradation> = degraded
            .iter()
            .map(|(name, record)| ActiveDegradation {
                service_name: name.clone(),
                reason: record.reason.clone(),
                degraded_at: record.degraded_at,
                remaining_seconds: record.expires_at.duration_since(now).as_secs_f64(),
            })
            .collect();
        active.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        active
    }

    pub fn degraded_count(&self) -> usize {
        self.active_degradations().len()
    }

    /// Choose between the primary path and the fallback.
    ///
    /// Any primary error degrades the service when a fallback exists.
    pub async fn execute_with_fallback<I, T, E, F, Fut>(
        &self,
        service_name: &str,
        input: I,
        primary: F,
    ) -> Result<T, E>
    where
        I: Clone + 'static,
        T: 'static,
        E: fmt::Display + 'static,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_fallback_when(service_name, input, primary, |_| true)
            .await
    }

    /// Like [`execute_with_fallback`](Self::execute_with_fallback), but only
    /// primary errors accepted by `degrade_on` switch to the fallback. Other
    /// errors are returned unchanged and leave the service healthy.
    pub async fn execute_with_fallback_when<I, T, E, F, Fut, P>(
        &self,
        service_name: &str,
        input: I,
        primary: F,
        degrade_on: P,
    ) -> Result<T, E>
    where
        I: Clone + 'static,
        T: 'static,
        E: fmt::Display + 'static,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let fallback = self.fallback_for::<I, T, E>(service_name);

        if let Some(handler) = &fallback {
            if self.is_degraded(service_name) {
                info!(service = service_name, "Service degraded, using fallback");
                return handler(input).await;
            }
        }

        match primary(input.clone()).await {
            Ok(value) => Ok(value),
            Err(err) => match fallback {
                Some(handler) if degrade_on(&err) => {
                    self.degrade(service_name, err.to_string(), self.default_duration);
                    warn!(
                        service = service_name,
                        error = %err,
                        "Primary failed, serving fallback"
                    );
                    handler(input).await
                }
                _ => Err(err),
            },
        }
    }
}

impl Default for GracefulDegradationManager {
    fn default() -> Self {
        Self::from_config(&DegradationConfig::default())
    }
}
