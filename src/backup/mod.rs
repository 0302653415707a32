//! # Backup and Restore
//!
//! Point-in-time snapshots of a service's durable state.
//!
//! - [`BackupManager`] assembles snapshots, writes them to disk, lists them and
//!   restores them
//! - [`SnapshotStore`] is the storage seam, implemented for PostgreSQL
//!   ([`PgSnapshotStore`]) and in memory ([`InMemorySnapshotStore`])
//! - [`AutoBackupScheduler`] snapshots a set of services periodically

pub mod error;
pub mod manager;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod scheduler;
pub mod snapshot;
pub mod store;

pub use error::{BackupError, StoreError};
pub use manager::{BackupInfo, BackupManager, RestoreSummary};
pub use memory::InMemorySnapshotStore;
#[cfg(feature = "postgres")]
pub use postgres::PgSnapshotStore;
pub use scheduler::{AutoBackupScheduler, BackupCycleReport, BackupTargets};
pub use snapshot::{BackupSnapshot, RecordGroup, SnapshotFileName};
pub use store::{Record, RecordGroupSpec, SnapshotStore, UpsertBatch};
