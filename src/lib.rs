#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Reliability Core
//!
//! Reliability coordination layer for a chat-platform bot backend: circuit
//! breakers, retry with exponential backoff, graceful degradation to
//! fallbacks, and transactional backup/restore of per-service state.
//!
//! ## Module Organization
//!
//! - [`resilience`] - circuit breakers, retry executor, degradation manager
//! - [`coordinator`] - [`ReliabilityCoordinator`] composing the above, status and watchdog
//! - [`backup`] - JSON snapshots of record groups and transactional restore
//! - [`platform`] - chat-platform error surface and the resilient call wrapper
//! - [`config`] - file/environment configuration
//! - [`logging`] - structured logging bootstrap
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use reliability_core::config::ReliabilityConfig;
//! use reliability_core::platform::PlatformError;
//! use reliability_core::ReliabilityCoordinator;
//!
//! # async fn example() {
//! let coordinator = ReliabilityCoordinator::new(&ReliabilityConfig::default());
//!
//! let result = coordinator
//!     .execute_with_reliability("database", 3, || async {
//!         Ok::<_, PlatformError>("row")
//!     })
//!     .await;
//!
//! match result {
//!     Ok(row) => println!("fetched {row}"),
//!     Err(e) if e.is_circuit_open() => println!("database is known-bad"),
//!     Err(e) => println!("call failed: {e}"),
//! }
//! # }
//! ```

pub mod backup;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod platform;
pub mod resilience;

pub use backup::{BackupManager, InMemorySnapshotStore, SnapshotStore};
pub use config::{ConfigManager, ReliabilityConfig};
pub use coordinator::{ReliabilityCoordinator, SystemStatus, WatchdogAlert, WatchdogMonitor};
pub use error::{CoreError, Result};
pub use platform::{resilient, PlatformError, ReliabilityHandle, ResilientCallWrapper};
pub use resilience::{
    CircuitBreaker, CircuitState, ClassifyError, ErrorCategory, GracefulDegradationManager,
    ReliabilityError, RetryExecutor, RetryOptions,
};
