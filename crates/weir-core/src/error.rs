//! Error types shared across the Weir workspace.
//!
//! One product-level enum, one variant per error kind from the delivery
//! and management taxonomy. Every rendered message starts with a stable
//! code from [`crate::error_codes`] so operators can grep logs and code
//! for the same token.

use crate::error_codes;

/// Classification of an [`Error`], used by callers that map errors onto
/// transport-specific surfaces (HTTP status codes, retry decisions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad spec or configuration; surfaced to the caller.
    Validation,
    /// No such resource; caller-visible.
    NotFound,
    /// State transition not allowed from the current state.
    Conflict,
    /// Persistence failure; retried only from background tasks.
    Storage,
    /// Transient sink failure; retried with backoff.
    TransportRetryable,
    /// Permanent sink failure; dropped or converted per stream policy.
    TransportFatal,
    /// Operation exceeded its deadline.
    Timeout,
    /// Operation was cancelled.
    Cancelled,
    /// Request was not authorized.
    Unauthorized,
    /// Precondition violation; indicates a bug.
    Internal,
}

/// Errors produced by the Weir event-stream manager and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Spec or configuration failed validation.
    #[error("{code}: {message}")]
    Validation {
        /// Stable error code.
        code: &'static str,
        /// Locale-independent description.
        message: String,
    },

    /// No resource with the supplied ID.
    #[error("{}: no resource found with ID '{id}'", error_codes::NOT_FOUND)]
    NotFound {
        /// The ID that was looked up.
        id: String,
    },

    /// The requested transition is not allowed from the current state.
    #[error("{}: {message}", error_codes::CONFLICT)]
    Conflict {
        /// Locale-independent description.
        message: String,
    },

    /// A persistence operation failed; carries the original cause.
    #[error("{}: {message}", error_codes::STORAGE)]
    Storage {
        /// Locale-independent description.
        message: String,
        /// The underlying driver error, when one exists.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transient sink failure.
    #[error("{}: {message}", error_codes::TRANSPORT_RETRYABLE)]
    TransportRetryable {
        /// Locale-independent description.
        message: String,
    },

    /// Permanent sink failure.
    #[error("{}: {message}", error_codes::TRANSPORT_FATAL)]
    TransportFatal {
        /// Locale-independent description.
        message: String,
    },

    /// Operation exceeded its deadline.
    #[error("{}: {message}", error_codes::TIMEOUT)]
    Timeout {
        /// What timed out.
        message: String,
    },

    /// Operation was cancelled before completion.
    #[error("{}: cancelled", error_codes::CANCELLED)]
    Cancelled,

    /// Request was not authorized.
    #[error("{}: Unauthorized", error_codes::UNAUTHORIZED)]
    Unauthorized,

    /// Internal precondition violation.
    #[error("{}: {message}", error_codes::INTERNAL)]
    Internal {
        /// Locale-independent description.
        message: String,
    },
}

impl Error {
    /// Builds a validation error with the given stable code.
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    /// Builds a not-found error for the given resource ID.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Builds a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Builds a storage error without an underlying cause.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Builds a storage error wrapping the original driver error.
    pub fn storage_caused_by(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Builds a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::TransportRetryable {
            message: message.into(),
        }
    }

    /// Builds a fatal transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::TransportFatal {
            message: message.into(),
        }
    }

    /// Builds a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Builds an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::TransportRetryable { .. } => ErrorKind::TransportRetryable,
            Self::TransportFatal { .. } => ErrorKind::TransportFatal,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns the stable code this error renders with.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { code, .. } => code,
            Self::NotFound { .. } => error_codes::NOT_FOUND,
            Self::Conflict { .. } => error_codes::CONFLICT,
            Self::Storage { .. } => error_codes::STORAGE,
            Self::TransportRetryable { .. } => error_codes::TRANSPORT_RETRYABLE,
            Self::TransportFatal { .. } => error_codes::TRANSPORT_FATAL,
            Self::Timeout { .. } => error_codes::TIMEOUT,
            Self::Cancelled => error_codes::CANCELLED,
            Self::Unauthorized => error_codes::UNAUTHORIZED,
            Self::Internal { .. } => error_codes::INTERNAL,
        }
    }
}
