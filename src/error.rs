//! Unified error handling for the nsrecruit crate
//!
//! This module provides a unified error type that consolidates the
//! domain-specific errors into a single `Error` enum, while keeping the
//! domain errors usable on their own.
//!
//! # Architecture
//!
//! - [`RecruitErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use nsrecruit::error::{Error, RecruitErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(error = %err, "Retrying later");
//!     } else {
//!         tracing::error!(error = %err, "Giving up");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::utils::error::{ApiError, DumpError};

/// Common trait for all nsrecruit error types
pub trait RecruitErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeout, malformed payload)
    Network,
    /// The remote API rejected a well-formed request
    Application,
    /// Dump parsing and data extraction errors
    Parsing,
    /// Storage and I/O errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Engine lifecycle errors
    Engine,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Get a short English description for the category
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "network error",
            Self::Application => "API rejection",
            Self::Parsing => "parse error",
            Self::Storage => "storage error",
            Self::Config => "configuration error",
            Self::Engine => "engine error",
            Self::Other => "other error",
        }
    }
}

impl RecruitErrorTrait for ApiError {
    fn is_recoverable(&self) -> bool {
        self.is_transport()
    }

    fn category(&self) -> ErrorCategory {
        if self.is_transport() {
            ErrorCategory::Network
        } else {
            ErrorCategory::Application
        }
    }
}

impl RecruitErrorTrait for DumpError {
    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Parse(_))
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Download(_) | Self::Status(_) | Self::Unavailable(_) => ErrorCategory::Network,
            Self::Parse(_) => ErrorCategory::Parsing,
            Self::Io(_) | Self::Worker(_) => ErrorCategory::Storage,
        }
    }
}

/// Unified error type for the nsrecruit crate
#[derive(Error, Debug)]
pub enum Error {
    /// NationStates API errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Daily dump errors
    #[error("Dump error: {0}")]
    Dump(#[from] DumpError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Engine lifecycle errors (already running, not running, startup failure)
    #[error("Engine error: {0}")]
    Engine(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl RecruitErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Api(e) => e.is_recoverable(),
            Self::Dump(e) => e.is_recoverable(),
            Self::Database(_) => false,
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Engine(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Api(e) => e.category(),
            Self::Dump(e) => e.category(),
            Self::Database(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Parsing,
            Self::Config(_) => ErrorCategory::Config,
            Self::Engine(_) => ErrorCategory::Engine,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an engine lifecycle error
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

// Repository methods report through anyhow
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: format!("{err:#}"),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let transport = Error::Api(ApiError::Timeout);
        assert_eq!(transport.category(), ErrorCategory::Network);

        let rejected = Error::Api(ApiError::Application("Unknown nation".into()));
        assert_eq!(rejected.category(), ErrorCategory::Application);

        let parse = Error::Dump(DumpError::Parse("unexpected eof".into()));
        assert_eq!(parse.category(), ErrorCategory::Parsing);
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::Api(ApiError::Status(502)).is_recoverable());
        assert!(!Error::Api(ApiError::Application("x".into())).is_recoverable());
        assert!(Error::Dump(DumpError::Unavailable(60)).is_recoverable());
    }

    #[test]
    fn test_error_conversion() {
        let unified: Error = ApiError::Timeout.into();
        assert!(matches!(unified, Error::Api(_)));

        let unified: Error = anyhow::anyhow!("lock poisoned").into();
        assert_eq!(unified.category(), ErrorCategory::Other);
        assert_eq!(unified.to_string(), "lock poisoned");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("missing contact");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
        assert_eq!(err.category().description(), "configuration error");
    }
}
