//! # Retry with Exponential Backoff
//!
//! Runs one logical operation up to `max_attempts` times. Between attempts the
//! executor sleeps for `min(base_delay * exponential_base^attempt_index, max_delay)`,
//! optionally scaled by a uniform jitter factor in `[0.5, 1.0]`.
//!
//! The backoff sleep is a tokio sleep: it yields to other tasks and is
//! cancelled when the caller drops the returned future.
//!
//! Only `Err` results are retried. An `Ok` value is returned as-is no matter
//! what it contains.

use crate::config::RetryConfig;
use crate::constants::defaults;
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Predicate deciding whether an error belongs to a retry policy class
pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Invoked before each backoff sleep with (attempt number, error, delay)
pub type RetryCallback<E> = Arc<dyn Fn(u32, &E, Duration) + Send + Sync>;

/// Per-call retry policy
pub struct RetryOptions<E> {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
    retryable: Option<RetryPredicate<E>>,
    non_retryable: Option<RetryPredicate<E>>,
    on_retry: Option<RetryCallback<E>>,
}

impl<E> RetryOptions<E> {
    /// Options with the default backoff curve and the given attempt limit
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(defaults::BASE_DELAY_MS),
            max_delay: Duration::from_millis(defaults::MAX_DELAY_MS),
            exponential_base: defaults::EXPONENTIAL_BASE,
            jitter: true,
            retryable: None,
            non_retryable: None,
            on_retry: None,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            exponential_base: config.exponential_base,
            jitter: config.jitter,
            retryable: None,
            non_retryable: None,
            on_retry: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_exponential_base(mut self, exponential_base: f64) -> Self {
        self.exponential_base = exponential_base;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Only errors matching `predicate` are retried; anything else is
    /// returned immediately. Without this every error is retryable.
    pub fn retry_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.retryable = Some(Arc::new(predicate));
        self
    }

    /// Errors matching `predicate` are returned immediately. Checked before `retry_if`.
    pub fn abort_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.non_retryable = Some(Arc::new(predicate));
        self
    }

    pub fn on_retry(mut self, callback: impl Fn(u32, &E, Duration) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    fn should_retry(&self, error: &E) -> bool {
        if let Some(non_retryable) = &self.non_retryable {
            if non_retryable(error) {
                return false;
            }
        }
        match &self.retryable {
            Some(retryable) => retryable(error),
            None => true,
        }
    }
}

impl<E> Clone for RetryOptions<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            exponential_base: self.exponential_base,
            jitter: self.jitter,
            retryable: self.retryable.clone(),
            non_retryable: self.non_retryable.clone(),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("exponential_base", &self.exponential_base)
            .field("jitter", &self.jitter)
            .field("has_retry_if", &self.retryable.is_some())
            .field("has_abort_if", &self.non_retryable.is_some())
            .field("has_on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl<E> Default for RetryOptions<E> {
    fn default() -> Self {
        Self::new(defaults::MAX_ATTEMPTS)
    }
}

/// Pre-jitter delay for the retry scheduled after attempt `attempt_index` (0-based)
pub fn compute_delay(
    attempt_index: u32,
    base_delay: Duration,
    max_delay: Duration,
    exponential_base: f64,
) -> Duration {
    let exponent = i32::try_from(attempt_index).unwrap_or(i32::MAX);
    let seconds = base_delay.as_secs_f64() * exponential_base.powi(exponent);

    if !seconds.is_finite() || seconds >= max_delay.as_secs_f64() {
        max_delay
    } else {
        Duration::from_secs_f64(seconds.max(0.0))
    }
}

/// Scale a delay by a uniform factor in `[0.5, 1.0]`
pub fn apply_jitter(delay: Duration) -> Duration {
    let spread = defaults::JITTER_MAX_FACTOR - defaults::JITTER_MIN_FACTOR;
    delay.mul_f64(defaults::JITTER_MIN_FACTOR + fastrand::f64() * spread)
}

/// Retry executor with per-operation attempt counters (metrics only)
#[derive(Debug, Default)]
pub struct RetryExecutor {
    attempt_counters: DashMap<String, u64>,
}

impl RetryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` under the retry policy in `options`
    pub async fn retry_with_backoff<T, E, F, Fut>(
        &self,
        operation_name: &str,
        options: &RetryOptions<E>,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let max_attempts = options.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            operation = operation_name,
                            attempt = attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !options.should_retry(&error) {
                debug!(
                    operation = operation_name,
                    attempt = attempt,
                    error = %error,
                    "Non-retryable error, giving up"
                );
                return Err(error);
            }

            if attempt >= max_attempts {
                error!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %error,
                    "Operation failed after all retry attempts"
                );
                return Err(error);
            }

            let mut delay = compute_delay(
                attempt - 1,
                options.base_delay,
                options.max_delay,
                options.exponential_base,
            );
            if options.jitter {
                delay = apply_jitter(delay);
            }

            *self
                .attempt_counters
                .entry(operation_name.to_string())
                .or_insert(0) += 1;

            warn!(
                operation = operation_name,
                attempt = attempt,
                max_attempts = max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Operation failed, retrying after backoff"
            );

            if let Some(callback) = &options.on_retry {
                callback(attempt, &error, delay);
            }

            tokio::time::sleep(delay).await;
        }
    }

    /// Scheduled retries for one operation since process start
    pub fn retry_attempts(&self, operation_name: &str) -> u64 {
        self.attempt_counters
            .get(operation_name)
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Scheduled retries across all operations
    pub fn total_retry_attempts(&self) -> u64 {
        self.attempt_counters.iter().map(|entry| *entry.value()).sum()
    }

    pub fn attempt_counts(&self) -> HashMap<String, u64> {
        self.attempt_counters
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}
