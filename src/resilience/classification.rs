//! # Error Classification
//!
//! Maps operation errors onto the three handling strategies the coordinator
//! understands. Classification drives two decisions: whether the retry loop
//! may re-attempt, and whether a failure may put a service into degraded mode.

use serde::{Deserialize, Serialize};
use std::io;

use crate::backup::{BackupError, StoreError};
use crate::platform::PlatformError;
use crate::resilience::ReliabilityError;

/// Primary error categories for reliability handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// May succeed on retry (network failures, server errors, anything unrecognized)
    Transient,

    /// Will not succeed on retry (authorization, missing resource)
    FastFail,

    /// The remote side asked us to slow down; retried after the advertised wait
    RateLimited,
}

impl ErrorCategory {
    /// Whether the retry loop may re-attempt after this error
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorCategory::FastFail)
    }

    /// Whether this error may move a service into degraded mode
    pub fn triggers_degradation(self) -> bool {
        !matches!(self, ErrorCategory::FastFail)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "Transient"),
            ErrorCategory::FastFail => write!(f, "Fast Fail"),
            ErrorCategory::RateLimited => write!(f, "Rate Limited"),
        }
    }
}

/// Errors that know their own reliability category.
///
/// The default is [`ErrorCategory::Transient`]: unknown failures are retried.
pub trait ClassifyError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Transient
    }
}

impl ClassifyError for io::Error {
    fn category(&self) -> ErrorCategory {
        match self.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => ErrorCategory::FastFail,
            _ => ErrorCategory::Transient,
        }
    }
}

impl<E: ClassifyError> ClassifyError for ReliabilityError<E> {
    fn category(&self) -> ErrorCategory {
        match self {
            ReliabilityError::CircuitOpen { .. } => ErrorCategory::FastFail,
            ReliabilityError::Operation(e) => e.category(),
        }
    }
}

/// Classify by the concrete error inside, when it is one we know
impl ClassifyError for anyhow::Error {
    fn category(&self) -> ErrorCategory {
        if let Some(platform) = self.downcast_ref::<PlatformError>() {
            return platform.category();
        }
        if let Some(store) = self.downcast_ref::<StoreError>() {
            return store.category();
        }
        if let Some(backup) = self.downcast_ref::<BackupError>() {
            return backup.category();
        }
        if let Some(io) = self.downcast_ref::<io::Error>() {
            return io.category();
        }
        ErrorCategory::Transient
    }
}
