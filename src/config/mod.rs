//! # Reliability Configuration System
//!
//! File- and environment-driven configuration for every component of the
//! reliability layer. All sections carry defaults that reproduce the
//! production table, so a missing file or a partial file is valid input.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use reliability_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let retry = &manager.config().retry;
//! println!("retrying up to {} times", retry.max_attempts);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::backup::RecordGroupSpec;
use crate::constants::{backup, defaults, services, watchdog};
use crate::resilience::config::HalfOpenAdmission;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/reliability.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    /// Per-service circuit breaker table
    pub circuit_breakers: CircuitBreakerConfig,

    /// Retry/backoff defaults for `execute_with_reliability`
    pub retry: RetryConfig,

    /// Graceful degradation settings
    pub degradation: DegradationConfig,

    /// Chat-platform rate limit handling
    pub rate_limit: RateLimitConfig,

    /// Snapshot backup settings
    pub backup: BackupConfig,

    /// Derived alert thresholds
    pub watchdog: WatchdogConfig,
}

/// Circuit breaker configuration for all services
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Whether circuit breakers gate calls at all
    pub enabled: bool,

    /// How HALF_OPEN admits probe calls
    pub half_open_admission: HalfOpenAdmission,

    /// Settings applied to services without an explicit entry
    pub default_config: CircuitBreakerComponentConfig,

    /// Per-service settings; every key gets a breaker at startup
    pub component_configs: HashMap<String, CircuitBreakerComponentConfig>,
}

/// Circuit breaker thresholds for a single service
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CircuitBreakerComponentConfig {
    /// Number of recorded failures before opening the circuit
    pub failure_threshold: u32,

    /// Time to wait in OPEN before admitting a probe (in seconds)
    pub timeout_seconds: u64,

    /// Successful probes required in HALF_OPEN to close the circuit
    #[serde(default = "default_half_open_max_probes")]
    pub half_open_max_probes: u32,
}

fn default_half_open_max_probes() -> u32 {
    defaults::HALF_OPEN_MAX_PROBES
}

impl CircuitBreakerComponentConfig {
    pub fn new(failure_threshold: u32, timeout_seconds: u64) -> Self {
        Self {
            failure_threshold,
            timeout_seconds,
            half_open_max_probes: defaults::HALF_OPEN_MAX_PROBES,
        }
    }

    /// Convert to the resilience module's format
    pub fn to_resilience_config(
        &self,
        admission: HalfOpenAdmission,
    ) -> crate::resilience::config::CircuitBreakerConfig {
        crate::resilience::config::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: Duration::from_secs(self.timeout_seconds),
            half_open_max_probes: self.half_open_max_probes,
            half_open_admission: admission,
        }
    }
}

impl Default for CircuitBreakerComponentConfig {
    fn default() -> Self {
        Self::new(defaults::FAILURE_THRESHOLD, defaults::OPEN_TIMEOUT_SECONDS)
    }
}

impl CircuitBreakerConfig {
    /// Get configuration for a specific service
    pub fn config_for_component(&self, component_name: &str) -> CircuitBreakerComponentConfig {
        self.component_configs
            .get(component_name)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        let component_configs = HashMap::from([
            (
                services::DISCORD_API.to_string(),
                CircuitBreakerComponentConfig::new(5, 120),
            ),
            (
                services::DATABASE.to_string(),
                CircuitBreakerComponentConfig::new(3, 60),
            ),
            (
                services::SCHEDULER.to_string(),
                CircuitBreakerComponentConfig::new(3, 180),
            ),
            (
                services::CACHE.to_string(),
                CircuitBreakerComponentConfig::new(10, 30),
            ),
        ]);

        Self {
            enabled: true,
            half_open_admission: HalfOpenAdmission::default(),
            default_config: CircuitBreakerComponentConfig::default(),
            component_configs,
        }
    }
}

/// Backoff and retry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            base_delay_ms: defaults::BASE_DELAY_MS,
            max_delay_ms: defaults::MAX_DELAY_MS,
            exponential_base: defaults::EXPONENTIAL_BASE,
            jitter: true,
        }
    }
}

/// Graceful degradation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DegradationConfig {
    /// How long a service stays degraded after its primary path fails
    pub default_duration_seconds: u64,
}

impl DegradationConfig {
    pub fn default_duration(&self) -> Duration {
        Duration::from_secs(self.default_duration_seconds)
    }
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            default_duration_seconds: defaults::DEGRADATION_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Wait applied when the platform reports a rate limit without a retry-after value
    pub default_retry_after_seconds: f64,
}

impl RateLimitConfig {
    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs_f64(self.default_retry_after_seconds.max(0.0))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_retry_after_seconds: defaults::RATE_LIMIT_RETRY_AFTER_SECONDS,
        }
    }
}

/// Snapshot backup configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackupConfig {
    pub directory: String,
    pub file_prefix: String,
    pub schema_version: String,

    /// Logical record groups exported per service, in snapshot order
    pub record_groups: Vec<RecordGroupSpec>,

    pub auto_backup: AutoBackupConfig,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            directory: backup::DIRECTORY.to_string(),
            file_prefix: backup::FILE_PREFIX.to_string(),
            schema_version: backup::SCHEMA_VERSION.to_string(),
            record_groups: RecordGroupSpec::guild_defaults(),
            auto_backup: AutoBackupConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AutoBackupConfig {
    pub enabled: bool,
    pub interval_seconds: u64,

    /// Pause between consecutive service backups within one cycle
    pub spacing_seconds: u64,
}

impl AutoBackupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn spacing(&self) -> Duration {
        Duration::from_secs(self.spacing_seconds)
    }
}

impl Default for AutoBackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: backup::AUTO_BACKUP_INTERVAL_SECONDS,
            spacing_seconds: backup::AUTO_BACKUP_SPACING_SECONDS,
        }
    }
}

/// Watchdog alert thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub enabled: bool,
    pub check_interval_seconds: u64,

    /// Alert when a breaker has been OPEN longer than this
    pub open_alert_threshold_seconds: u64,

    /// Alert when at least this many services are degraded at once
    pub degraded_services_alert_count: usize,

    /// Alert when the summed failure counters exceed this
    pub failure_ceiling: u64,
}

impl WatchdogConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn open_alert_threshold(&self) -> Duration {
        Duration::from_secs(self.open_alert_threshold_seconds)
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: watchdog::CHECK_INTERVAL_SECONDS,
            open_alert_threshold_seconds: watchdog::OPEN_ALERT_THRESHOLD_SECONDS,
            degraded_services_alert_count: watchdog::DEGRADED_SERVICES_ALERT_COUNT,
            failure_ceiling: watchdog::FAILURE_CEILING,
        }
    }
}

impl ReliabilityConfig {
    /// Validate configuration for consistency and value ranges
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let breakers = &self.circuit_breakers;
        Self::validate_breaker("circuit_breakers.default_config", &breakers.default_config)?;
        for (name, component) in &breakers.component_configs {
            if name.trim().is_empty() {
                return Err(ConfigurationError::invalid_value(
                    "circuit_breakers.component_configs",
                    name.clone(),
                    "service name must not be empty",
                ));
            }
            Self::validate_breaker(&format!("circuit_breakers.component_configs.{name}"), component)?;
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.max_attempts",
                "0",
                "at least one attempt is required",
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "retry.base_delay_ms",
                self.retry.base_delay_ms.to_string(),
                format!("must not exceed retry.max_delay_ms ({})", self.retry.max_delay_ms),
            ));
        }

        if !self.retry.exponential_base.is_finite() || self.retry.exponential_base < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "retry.exponential_base",
                self.retry.exponential_base.to_string(),
                "must be a finite number >= 1.0",
            ));
        }

        if !self.rate_limit.default_retry_after_seconds.is_finite()
            || self.rate_limit.default_retry_after_seconds < 0.0
        {
            return Err(ConfigurationError::invalid_value(
                "rate_limit.default_retry_after_seconds",
                self.rate_limit.default_retry_after_seconds.to_string(),
                "must be a finite, non-negative number of seconds",
            ));
        }

        self.validate_backup()?;

        if self.watchdog.enabled && self.watchdog.check_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "watchdog.check_interval_seconds",
                "0",
                "interval must be greater than 0",
            ));
        }

        // status reports evaluate alerts even when the watchdog loop is off
        if self.watchdog.degraded_services_alert_count == 0 {
            return Err(ConfigurationError::invalid_value(
                "watchdog.degraded_services_alert_count",
                "0",
                "alert count must be greater than 0",
            ));
        }

        Ok(())
    }

    fn validate_breaker(
        field: &str,
        component: &CircuitBreakerComponentConfig,
    ) -> Result<(), ConfigurationError> {
        component
            .to_resilience_config(HalfOpenAdmission::default())
            .validate()
            .map_err(|reason| {
                ConfigurationError::invalid_value(field, format!("{component:?}"), reason)
            })
    }

    fn validate_backup(&self) -> Result<(), ConfigurationError> {
        let backup = &self.backup;

        if backup.directory.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "backup.directory",
                "backup configuration",
            ));
        }

        if backup.file_prefix.is_empty()
            || !backup
                .file_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ConfigurationError::invalid_value(
                "backup.file_prefix",
                backup.file_prefix.clone(),
                "prefix must be non-empty ASCII alphanumerics or '-' (no '_')",
            ));
        }

        if backup.record_groups.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "backup.record_groups",
                "at least one record group must be configured",
            ));
        }

        for group in &backup.record_groups {
            group.validate().map_err(|reason| {
                ConfigurationError::invalid_value("backup.record_groups", group.name.clone(), reason)
            })?;
        }

        if backup.auto_backup.enabled && backup.auto_backup.interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "backup.auto_backup.interval_seconds",
                "0",
                "interval must be greater than 0",
            ));
        }

        Ok(())
    }
}
