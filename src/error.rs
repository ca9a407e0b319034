//! Error types for the JMAP client.

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
/// Error type for all JMAP client operations.
pub enum Error {
    /// Invalid or incomplete configuration, detected before any network call.
    #[error("configuration error: {0}")]
    Config(String),
    /// Session discovery failed or was rejected by the server.
    #[error("authentication error: {0}")]
    Auth(String),
    /// No mailbox on the account carries the requested role.
    #[error("mailbox not found: {0}")]
    NotFound(String),
    /// A response was missing expected fields or had an unexpected shape.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Underlying HTTP client error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// HTTP response returned a non-success status with body.
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Result type for JMAP client operations.
pub type Result<T> = std::result::Result<T, Error>;
