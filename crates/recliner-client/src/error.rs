//! Client error types.

use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum Error {
    /// The server could not be reached, or answered with a status that is
    /// neither success nor a recognised application-level condition.
    #[error("communication error: {reason} ({request})")]
    Communication {
        /// Human-readable description reported by the transport.
        reason: String,
        /// Request line, e.g. `GET http://localhost:5984/db`.
        request: String,
        /// HTTP status code, if a response arrived at all.
        status: Option<u16>,
        /// Raw (possibly partial) response body.
        response: String,
    },

    /// 401 or 403.
    #[error("forbidden: {reason} ({request})")]
    Forbidden {
        reason: String,
        request: String,
        status: u16,
        response: String,
    },

    /// 409.
    #[error("conflict: {reason} ({request})")]
    Conflict {
        reason: String,
        request: String,
        status: u16,
        response: String,
    },

    /// 404 or 410.
    #[error("not found: {reason} ({request})")]
    NotFound {
        reason: String,
        request: String,
        status: u16,
        response: String,
    },

    /// A response body or change line was not valid JSON.
    #[error("JSON error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The API was misused.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to parse a TOML config file.
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The feed worker panicked inside a handler or adapter callback.
    #[error("feed worker panicked: {0}")]
    WorkerPanicked(String),
}

impl Error {
    /// Create a communication error that carries no response.
    pub fn communication(reason: impl Into<String>, request: impl Into<String>) -> Self {
        Self::Communication {
            reason: reason.into(),
            request: request.into(),
            status: None,
            response: String::new(),
        }
    }

    /// Create an invalid-argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// HTTP status attached to this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Communication { status, .. } => *status,
            Error::Forbidden { status, .. }
            | Error::Conflict { status, .. }
            | Error::NotFound { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Raw response body attached to this error, if any.
    pub fn response(&self) -> Option<&str> {
        match self {
            Error::Communication { response, .. }
            | Error::Forbidden { response, .. }
            | Error::Conflict { response, .. }
            | Error::NotFound { response, .. } => Some(response),
            _ => None,
        }
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Check if this is an authentication/authorization error.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Error::Forbidden { .. })
    }

    /// Check if this is a document conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Check if this is a transport-level failure.
    pub fn is_communication(&self) -> bool {
        matches!(self, Error::Communication { .. })
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
