//! Error types for the plugin bridge.
//!
//! One enum covers the whole request path: the connection bridge, the
//! forwarding client and server, and role transitions. Display strings are
//! what callers ultimately see, so peer-reported messages are kept verbatim.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    // Connection bridge
    #[error("plugin not connected")]
    NotConnected,

    #[error("bridge closed")]
    BridgeClosed,

    /// Error string reported by the plugin in a response envelope.
    #[error("{0}")]
    Peer(String),

    #[error("transport error: {message}")]
    Transport { message: String },

    // Election
    #[error("address {addr} already in use")]
    AddressInUse { addr: String },

    // Forwarding
    #[error("failed to call leader: {message}")]
    Http { message: String },

    #[error("leader returned status {status}")]
    UpstreamStatus { status: u16 },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    // Cancellation
    #[error("request cancelled")]
    Cancelled,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    // Serialization
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        // A client-side timeout is a transport failure, not caller cancellation.
        let message = if err.is_timeout() {
            format!("leader did not answer in time: {}", err)
        } else {
            err.to_string()
        };
        BridgeError::Http { message }
    }
}

impl BridgeError {
    /// True for the expected negative outcome of a leadership attempt.
    pub fn is_address_in_use(&self) -> bool {
        matches!(self, BridgeError::AddressInUse { .. })
    }

    /// True when the caller's token fired, either explicitly or by deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, BridgeError::Cancelled | BridgeError::Timeout(_))
    }
}
