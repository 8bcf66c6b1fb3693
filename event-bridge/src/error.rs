//! Error types for the event-bridge crate.

use std::time::Duration;

/// Errors raised while establishing the bridge connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// `connect` was called while a connection is already active or opening
    #[error("Bridge connection is already established")]
    AlreadyConnected,

    /// The bridge configuration is not usable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The bridge URL cannot be used to reach the bridge
    #[error("Invalid bridge URL: {0}")]
    InvalidUrl(String),

    /// The negotiate request failed or returned something unusable
    #[error("Negotiation failed: {0}")]
    Negotiate(String),

    /// The underlying transport could not be opened or failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The transport opened but the bridge did not complete the handshake
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The connect sequence did not finish in time
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// `close` was called while the connection was still opening
    #[error("Connection closed while connecting")]
    Closed,
}

/// Errors raised by a remote invocation on the bridge.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    /// No connection is established
    #[error("Bridge connection is not established")]
    NotConnected,

    /// The connection went away before the completion arrived
    #[error("Connection dropped before '{0}' completed")]
    ConnectionDropped(String),

    /// No completion arrived within the configured timeout
    #[error("Invocation of '{method}' timed out after {after:?}")]
    Timeout {
        /// Remote method name
        method: String,
        /// Configured invocation timeout
        after: Duration,
    },

    /// The bridge rejected the invocation
    #[error("Bridge rejected '{method}': {message}")]
    Remote {
        /// Remote method name
        method: String,
        /// Error message reported by the bridge
        message: String,
        /// Optional structured error data
        data: Option<serde_json::Value>,
    },

    /// The invocation arguments could not be encoded
    #[error("Failed to encode invocation: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors from subscription setup and teardown.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    /// `start_receiving` was called on a session that is already connected
    #[error("Subscription session is already connected")]
    AlreadyConnected,

    /// The bridge connection could not be established
    #[error("Failed to connect to the event bridge: {0}")]
    Connection(#[from] ConnectionError),

    /// The bridge did not create the subscription
    #[error("Failed to create subscription: {0}")]
    CreateFailed(#[source] InvocationError),

    /// The bridge did not acknowledge the stop request
    #[error("Failed to stop subscription: {0}")]
    StopFailed(#[source] InvocationError),
}

/// Convenience type alias for Results using SubscriptionError.
pub type Result<T> = std::result::Result<T, SubscriptionError>;
