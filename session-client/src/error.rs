//! Error types for the session client

use thiserror::Error;

/// Errors that can occur while acquiring or releasing a session
#[derive(Debug, Error)]
pub enum SessionError {
    /// The service rejected the request with a business error
    #[error("OpenAccess error {code}: {message}")]
    Service {
        /// Error code reported by the service
        code: String,
        /// Human readable message reported by the service
        message: String,
    },

    /// Non-success HTTP status without a readable error body
    #[error("HTTP error: status {0}")]
    Http(u16),

    /// Network or transport level failure
    #[error("Network error: {0}")]
    Network(String),

    /// Response body could not be decoded
    #[error("Response parsing error: {0}")]
    Parse(String),

    /// Logout was requested without an active session
    #[error("No active session")]
    NotLoggedIn,
}

impl SessionError {
    /// Service error code, if the service reported one
    pub fn code(&self) -> Option<&str> {
        match self {
            SessionError::Service { code, .. } => Some(code),
            _ => None,
        }
    }
}
