//! Error types for the NationStates gateway and dump cache
//!
//! Transport failures (network, timeout, non-2xx, malformed XML) and
//! application failures (the API answered, but with an error payload) are
//! kept apart so callers can decide between leaving a candidate untouched
//! and marking it `failed`.

use thiserror::Error;

/// Errors that can occur while talking to the NationStates API
#[derive(Error, Debug)]
pub enum ApiError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Non-success status code
    #[error("Server returned status {0}")]
    Status(u16),

    /// Response body could not be parsed as XML
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The API understood the request and rejected it
    #[error("API rejected request: {0}")]
    Application(String),

    /// Request could not be built from the given parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// True for failures that say nothing about the candidate itself
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Timeout | Self::Status(_) | Self::Malformed(_)
        )
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Timeout => "timeout",
            Self::Status(_) => "status",
            Self::Malformed(_) => "malformed",
            Self::Application(_) => "application",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// Errors that can occur while downloading or parsing the daily dumps
#[derive(Error, Debug)]
pub enum DumpError {
    /// Download failed after all retries
    #[error("Dump download failed: {0}")]
    Download(String),

    /// Non-success status code
    #[error("Dump server returned status {0}")]
    Status(u16),

    /// Gzip or file read failure
    #[error("Dump I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// XML structure could not be parsed
    #[error("Dump parse error: {0}")]
    Parse(String),

    /// No snapshot became available in time
    #[error("Dump data unavailable after {0} seconds")]
    Unavailable(u64),

    /// Blocking parse task panicked or was cancelled
    #[error("Dump worker failed: {0}")]
    Worker(String),
}

impl From<quick_xml::Error> for DumpError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(ApiError::Timeout.is_transport());
        assert!(ApiError::Status(503).is_transport());
        assert!(ApiError::Malformed("eof".into()).is_transport());
        assert!(!ApiError::Application("Unknown nation".into()).is_transport());
        assert!(!ApiError::InvalidRequest("missing key".into()).is_transport());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ApiError::Timeout.kind(), "timeout");
        assert_eq!(ApiError::Application(String::new()).kind(), "application");
    }
}
