//! Error types and retry classification for the history API client.
//!
//! This module provides:
//! - [`ApiError`]: the typed failure taxonomy for every remote call
//! - [`RetryClass`]: classification used by the retry executor

mod retry;

pub use retry::RetryClass;

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// Errors that can occur while talking to the brokerage API.
///
/// Each variant is classified into a [`RetryClass`] via the
/// [`retry_class`](Self::retry_class) method, which determines how the
/// retry executor handles it.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// Invalid API credentials (HTTP 401).
    #[error("Invalid API credentials")]
    Authentication,

    /// The API key lacks the permission required for the endpoint (HTTP 403).
    #[error("Missing required permission for {path}")]
    Authorization { path: String },

    /// The requested resource doesn't exist (HTTP 404).
    #[error("Resource not found: {path}")]
    NotFound { path: String },

    /// The request was malformed or disallowed (HTTP 400).
    #[error("Validation error: {}", validation_message(.clarification, .code))]
    Validation {
        status: u16,
        code: Option<String>,
        clarification: Option<String>,
    },

    /// The request timed out, either server-side (HTTP 408) or in the client.
    #[error("Request timed out: {path}")]
    RequestTimeout { path: String, status: Option<u16> },

    /// The rate-limit window for this endpoint is exhausted (HTTP 429).
    #[error("Rate limit exceeded for {path}")]
    RateLimited {
        path: String,
        /// When the server said the window resets, if it said so.
        retry_at: Option<Instant>,
    },

    /// The server failed to handle the request (HTTP 5xx).
    #[error("Server error: {status}")]
    ServerError { status: u16 },

    /// Any other non-success status.
    #[error("Unexpected HTTP status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// Connection-level failure before a response arrived.
    #[error("Network error: {0}")]
    Network(String),

    /// The response body did not match the expected shape.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Pagination did not terminate (page guard hit or the cursor stopped moving).
    #[error("Pagination failed: {0}")]
    Pagination(String),

    /// The total wait budget across retries was used up.
    #[error("Gave up after waiting {waited:?} across retries")]
    WaitTimeout { waited: Duration },

    /// The client could not be configured (missing credentials, bad header value).
    #[error("Invalid client configuration: {0}")]
    Config(String),
}

fn validation_message<'a>(clarification: &'a Option<String>, code: &'a Option<String>) -> &'a str {
    clarification
        .as_deref()
        .or(code.as_deref())
        .unwrap_or("request validation failed")
}

impl ApiError {
    /// Returns the retry classification for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use tradecache_api::errors::{ApiError, RetryClass};
    ///
    /// let error = ApiError::ServerError { status: 503 };
    /// assert_eq!(error.retry_class(), RetryClass::WithBackoff);
    ///
    /// let error = ApiError::NotFound { path: "/history/dividends".to_string() };
    /// assert_eq!(error.retry_class(), RetryClass::Never);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            ApiError::RateLimited { .. } => RetryClass::AfterReset,
            ApiError::RequestTimeout { .. } | ApiError::ServerError { .. } | ApiError::Network(_) => {
                RetryClass::WithBackoff
            }
            ApiError::Authentication
            | ApiError::Authorization { .. }
            | ApiError::NotFound { .. }
            | ApiError::Validation { .. }
            | ApiError::UnexpectedStatus { .. }
            | ApiError::Decode(_)
            | ApiError::Pagination(_)
            | ApiError::WaitTimeout { .. }
            | ApiError::Config(_) => RetryClass::Never,
        }
    }

    /// The originating HTTP status, when the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Authentication => Some(401),
            ApiError::Authorization { .. } => Some(403),
            ApiError::NotFound { .. } => Some(404),
            ApiError::Validation { status, .. } => Some(*status),
            ApiError::RequestTimeout { status, .. } => *status,
            ApiError::RateLimited { .. } => Some(429),
            ApiError::ServerError { status } | ApiError::UnexpectedStatus { status, .. } => {
                Some(*status)
            }
            ApiError::Network(_)
            | ApiError::Decode(_)
            | ApiError::Pagination(_)
            | ApiError::WaitTimeout { .. }
            | ApiError::Config(_) => None,
        }
    }

    /// Returns true if this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.retry_class().is_retryable()
    }
}
