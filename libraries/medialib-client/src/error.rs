//! Error types for the media library client.

use std::fmt;
use thiserror::Error;

/// Broad classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// The request (or the caller's wait on it) ran out of time
    Timeout,
    /// The server could not be reached
    Connect,
    /// Anything else below the HTTP layer (body read, protocol error, ...)
    Other,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Timeout => write!(f, "timeout"),
            TransportKind::Connect => write!(f, "connect"),
            TransportKind::Other => write!(f, "transport"),
        }
    }
}

/// Errors that can occur when talking to a media library server.
///
/// Errors are `Clone` because one failed execution is handed to every
/// caller that was coalesced onto it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Connectivity failure or timeout
    #[error("Transport error ({kind}): {message}")]
    Transport { kind: TransportKind, message: String },

    /// Server returned a non-2xx response
    #[error("Server error ({status}): {body}")]
    Http { status: u16, body: String },

    /// Response body did not match the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Authorization was rejected even after refreshing credentials
    #[error("Unauthorized")]
    Unauthorized,

    /// Missing or malformed base URL, or a request that cannot be built
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A shared execution ended without producing a result
    #[error("Request aborted: {0}")]
    Aborted(String),
}

impl ApiError {
    /// Create a transport error of the given kind
    pub fn transport(kind: TransportKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Create a timeout transport error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::transport(TransportKind::Timeout, message)
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Transport {
                kind: TransportKind::Timeout,
                ..
            }
        )
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Unauthorized => Some(401),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportKind::Timeout
        } else if err.is_connect() {
            TransportKind::Connect
        } else {
            TransportKind::Other
        };
        Self::transport(kind, err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<url::ParseError> for ApiError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidConfiguration(err.to_string())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ApiError>;
