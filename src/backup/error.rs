//! Backup and snapshot store errors

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::resilience::{ClassifyError, ErrorCategory};

/// Errors raised by a [`SnapshotStore`](super::SnapshotStore)
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Query against '{table}' failed: {message}")]
    Query { table: String, message: String },

    #[error("Store connection error: {0}")]
    Connection(String),

    /// Commit failed or a statement inside the transaction failed; nothing was applied
    #[error("Transaction rolled back: {0}")]
    Transaction(String),

    /// A record cannot be written as given (missing key, bad shape)
    #[error("Invalid record for '{table}': {reason}")]
    InvalidRecord { table: String, reason: String },
}

impl StoreError {
    pub fn query(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Query {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn invalid_record(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            table: table.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Connection(err.to_string())
            }
            other => Self::Transaction(other.to_string()),
        }
    }
}

impl ClassifyError for StoreError {
    fn category(&self) -> ErrorCategory {
        match self {
            StoreError::InvalidRecord { .. } => ErrorCategory::FastFail,
            _ => ErrorCategory::Transient,
        }
    }
}

/// Errors raised while writing, reading or restoring a snapshot file
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Backup I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Backup file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid snapshot {path}: {reason}")]
    InvalidSnapshot { path: PathBuf, reason: String },

    #[error("Snapshot schema version '{found}' does not match expected '{expected}'")]
    SchemaMismatch { expected: String, found: String },

    #[error("Snapshot belongs to service {found}, not {expected}")]
    ServiceMismatch { expected: i64, found: i64 },

    #[error("Snapshot store error: {0}")]
    Store(#[from] StoreError),
}

impl BackupError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound { path }
        } else {
            Self::Io { path, source }
        }
    }

    pub fn invalid_snapshot(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidSnapshot {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl ClassifyError for BackupError {
    fn category(&self) -> ErrorCategory {
        match self {
            BackupError::Io { source, .. } => source.category(),
            BackupError::Store(store) => store.category(),
            BackupError::Serialization(_) => ErrorCategory::FastFail,
            BackupError::NotFound { .. }
            | BackupError::InvalidSnapshot { .. }
            | BackupError::SchemaMismatch { .. }
            | BackupError::ServiceMismatch { .. } => ErrorCategory::FastFail,
        }
    }
}
