//! Errors reported by the chat-platform client and their reliability category.

use std::time::Duration;
use thiserror::Error;

use crate::resilience::{ClassifyError, ErrorCategory};

const HTTP_UNAUTHORIZED: u16 = 401;
const HTTP_FORBIDDEN: u16 = 403;
const HTTP_NOT_FOUND: u16 = 404;
const HTTP_TOO_MANY_REQUESTS: u16 = 429;

#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    /// Missing permission for the requested action
    #[error("Permission denied: {message}")]
    Forbidden { message: String },

    #[error("Resource not found: {message}")]
    NotFound { message: String },

    /// The platform asked us to back off, optionally saying for how long
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl PlatformError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.category() == ErrorCategory::RateLimited
    }

    /// Advertised wait before the next attempt, if the platform sent one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl ClassifyError for PlatformError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Forbidden { .. } | Self::NotFound { .. } => ErrorCategory::FastFail,
            Self::RateLimited { .. } => ErrorCategory::RateLimited,
            Self::Http { status, .. } => match *status {
                HTTP_TOO_MANY_REQUESTS => ErrorCategory::RateLimited,
                HTTP_UNAUTHORIZED | HTTP_FORBIDDEN | HTTP_NOT_FOUND => ErrorCategory::FastFail,
                _ => ErrorCategory::Transient,
            },
            Self::Transport(_) => ErrorCategory::Transient,
        }
    }
}
