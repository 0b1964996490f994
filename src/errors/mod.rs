//! Error types for the runtime.

use std::fmt;
use thiserror::Error;

/// Result type alias for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Error kinds for categorizing runtime errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    // Configuration errors
    /// No organisation installation id is configured.
    MissingInstallationId,
    /// Invalid configuration.
    InvalidConfiguration,
    /// Invalid base URL.
    InvalidBaseUrl,
    /// Invalid GitHub App credentials.
    InvalidAppCredentials,

    // Request errors
    /// Invalid request parameter (header, body, path).
    InvalidParameter,

    // Transport errors
    /// The server answered with a status worth retrying (401, 5xx).
    RetryableStatus,
    /// All retry attempts failed.
    RetriesExhausted,
    /// Connection failed.
    ConnectionFailed,
    /// Request timeout.
    Timeout,

    // Credential errors
    /// The installation token exchange failed.
    TokenIssuanceFailed,

    // Response errors
    /// Failed to deserialize or decode a response.
    DeserializationError,
    /// Response was well-formed but not what the caller expected.
    UnexpectedFormat,

    // Supervisor errors
    /// A worker process could not be launched.
    SpawnFailed,

    // Generic
    /// Unknown error.
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MissingInstallationId => "missing_installation_id",
            Self::InvalidConfiguration => "invalid_configuration",
            Self::InvalidBaseUrl => "invalid_base_url",
            Self::InvalidAppCredentials => "invalid_app_credentials",
            Self::InvalidParameter => "invalid_parameter",
            Self::RetryableStatus => "retryable_status",
            Self::RetriesExhausted => "retries_exhausted",
            Self::ConnectionFailed => "connection_failed",
            Self::Timeout => "timeout",
            Self::TokenIssuanceFailed => "token_issuance_failed",
            Self::DeserializationError => "deserialization_error",
            Self::UnexpectedFormat => "unexpected_format",
            Self::SpawnFailed => "spawn_failed",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Runtime error with detailed information.
#[derive(Error, Debug)]
pub struct RuntimeError {
    kind: ErrorKind,
    message: String,
    status_code: Option<u16>,
    url: Option<String>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(code) = self.status_code {
            write!(f, " (HTTP {})", code)?;
        }
        if let Some(ref url) = self.url {
            write!(f, " [url: {}]", url)?;
        }
        Ok(())
    }
}

impl RuntimeError {
    /// Creates a new runtime error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            url: None,
            cause: None,
        }
    }

    /// Sets the HTTP status code.
    pub fn with_status(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Sets the request URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Gets the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Gets the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Gets the HTTP status code.
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Gets the request URL.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Returns true if another attempt of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::RetryableStatus | ErrorKind::ConnectionFailed | ErrorKind::Timeout
        )
    }

    /// Returns true if this error stems from missing or invalid configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::MissingInstallationId
                | ErrorKind::InvalidConfiguration
                | ErrorKind::InvalidBaseUrl
                | ErrorKind::InvalidAppCredentials
        )
    }

    /// Converts a retryable failure into its terminal, exhausted form.
    pub(crate) fn into_exhausted(self, attempts: u32) -> Self {
        Self {
            kind: ErrorKind::RetriesExhausted,
            message: format!("{} (gave up after {} attempts)", self.message, attempts),
            ..self
        }
    }

    // Convenience constructors

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfiguration, message)
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Creates a deserialization error.
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeserializationError, message)
    }

    /// Creates an error for a response status that should be retried.
    pub fn retryable_status(status: u16, url: impl Into<String>) -> Self {
        let url = url.into();
        Self::new(
            ErrorKind::RetryableStatus,
            format!("Request failed (status: {} url: {}).", status, url),
        )
        .with_status(status)
        .with_url(url)
    }

    /// Maps a reqwest transport error onto a runtime error.
    pub fn from_transport(error: reqwest::Error, url: &str) -> Self {
        let kind = if error.is_timeout() {
            ErrorKind::Timeout
        } else if error.is_connect() || error.is_request() || error.is_body() {
            ErrorKind::ConnectionFailed
        } else {
            ErrorKind::Unknown
        };
        Self::new(kind, format!("Request to {} failed: {}", url, error))
            .with_url(url)
            .with_cause(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = RuntimeError::retryable_status(502, "https://api.github.com/repos/a/b");

        let display = format!("{}", error);
        assert!(display.contains("retryable_status"));
        assert!(display.contains("status: 502"));
        assert!(display.contains("HTTP 502"));
        assert!(display.contains("https://api.github.com/repos/a/b"));
    }

    #[test]
    fn test_is_retryable() {
        assert!(RuntimeError::timeout("slow").is_retryable());
        assert!(RuntimeError::retryable_status(401, "u").is_retryable());
        assert!(!RuntimeError::deserialization("bad json").is_retryable());
        assert!(!RuntimeError::new(ErrorKind::MissingInstallationId, "x").is_retryable());
    }

    #[test]
    fn test_into_exhausted_keeps_context() {
        let error = RuntimeError::retryable_status(503, "https://x/y").into_exhausted(4);

        assert_eq!(error.kind(), ErrorKind::RetriesExhausted);
        assert_eq!(error.status_code(), Some(503));
        assert_eq!(error.url(), Some("https://x/y"));
        assert!(error.message().contains("4 attempts"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_is_configuration() {
        assert!(RuntimeError::new(ErrorKind::MissingInstallationId, "x").is_configuration());
        assert!(RuntimeError::configuration("x").is_configuration());
        assert!(!RuntimeError::timeout("x").is_configuration());
    }
}
