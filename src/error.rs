//! # Crate Error Types
//!
//! Top-level error type for composition-root code that wires the reliability
//! layer together. Component-level errors live next to their components
//! (`resilience`, `backup`, `platform`, `config`) and convert into [`CoreError`].

use thiserror::Error;

use crate::backup::{BackupError, StoreError};
use crate::config::ConfigurationError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Backup error: {0}")]
    Backup(#[from] BackupError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Degradation error: {0}")]
    Degradation(String),

    #[error("Coordinator error: {0}")]
    Coordinator(String),
}

impl CoreError {
    pub fn degradation(message: impl Into<String>) -> Self {
        Self::Degradation(message.into())
    }

    pub fn coordinator(message: impl Into<String>) -> Self {
        Self::Coordinator(message.into())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
