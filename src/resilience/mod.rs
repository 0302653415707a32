//! # Resilience Module
//!
//! Fault-tolerance primitives used by the reliability coordinator.
//!
//! ## Architecture
//!
//! - **Circuit Breakers**: per-service CLOSED / OPEN / HALF_OPEN gates
//! - **Retry**: exponential backoff with jitter and include/exclude policies
//! - **Degradation**: fallback registry plus expiring degraded-service records
//! - **Classification**: maps operation errors onto retry/degradation handling
//!
//! ## Usage
//!
//! ```rust,no_run
//! use reliability_core::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig::new(3, Duration::from_secs(60), 3);
//! let circuit_breaker = CircuitBreaker::new("database", config);
//!
//! let rows = circuit_breaker
//!     .call(|| async { Ok::<u64, std::io::Error>(42) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod classification;
pub mod config;
pub mod degradation;
pub mod manager;
pub mod metrics;
pub mod retry;

pub use circuit_breaker::{
    BreakerPermit, CircuitBreaker, CircuitBreakerStatus, CircuitState, ReliabilityError,
};
pub use classification::{ClassifyError, ErrorCategory};
pub use config::{CircuitBreakerConfig, HalfOpenAdmission};
pub use degradation::{ActiveDegradation, FallbackHandler, GracefulDegradationManager};
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
pub use retry::{RetryExecutor, RetryOptions};
