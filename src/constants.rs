//! # System Constants
//!
//! Well-known service names and the operational defaults of the reliability
//! layer. Configuration files override every default listed here.

/// Service names that get a circuit breaker out of the box
pub mod services {
    pub const DISCORD_API: &str = "discord_api";
    pub const DATABASE: &str = "database";
    pub const SCHEDULER: &str = "scheduler";
    pub const CACHE: &str = "cache";

    /// Names protected by the built-in breaker table, in reporting order
    pub const BUILT_IN: [&str; 4] = [DISCORD_API, DATABASE, SCHEDULER, CACHE];
}

/// Retry and degradation defaults
pub mod defaults {
    pub const MAX_ATTEMPTS: u32 = 3;
    pub const BASE_DELAY_MS: u64 = 1_000;
    pub const MAX_DELAY_MS: u64 = 60_000;
    pub const EXPONENTIAL_BASE: f64 = 2.0;

    /// Jitter multiplies the pre-jitter delay by a factor in this range
    pub const JITTER_MIN_FACTOR: f64 = 0.5;
    pub const JITTER_MAX_FACTOR: f64 = 1.0;

    pub const DEGRADATION_SECONDS: u64 = 300;
    pub const RATE_LIMIT_RETRY_AFTER_SECONDS: f64 = 5.0;

    pub const FAILURE_THRESHOLD: u32 = 5;
    pub const OPEN_TIMEOUT_SECONDS: u64 = 60;
    pub const HALF_OPEN_MAX_PROBES: u32 = 3;
}

/// Backup file conventions
pub mod backup {
    pub const DIRECTORY: &str = "backups";
    pub const FILE_PREFIX: &str = "guild";
    pub const FILE_EXTENSION: &str = "json";
    pub const SCHEMA_VERSION: &str = "1.0";

    /// Sortable timestamp embedded in snapshot file names
    pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";

    pub const AUTO_BACKUP_INTERVAL_SECONDS: u64 = 6 * 60 * 60;
    pub const AUTO_BACKUP_SPACING_SECONDS: u64 = 10;
}

/// Watchdog defaults
pub mod watchdog {
    pub const CHECK_INTERVAL_SECONDS: u64 = 60;
    pub const OPEN_ALERT_THRESHOLD_SECONDS: u64 = 300;
    pub const DEGRADED_SERVICES_ALERT_COUNT: usize = 2;
    pub const FAILURE_CEILING: u64 = 50;
}

/// Environment variables consulted at startup
pub mod env {
    pub const ENVIRONMENT: &str = "RELIABILITY_ENV";
    pub const FALLBACK_ENVIRONMENT: &str = "APP_ENV";
    pub const CONFIG_DIR: &str = "RELIABILITY_CONFIG_DIR";
    pub const CONFIG_PREFIX: &str = "RELIABILITY";
    pub const CONFIG_SEPARATOR: &str = "__";
}
