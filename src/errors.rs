//! Error types for the event dispatcher

use std::fmt;

pub type Result<T> = std::result::Result<T, DispatchError>;

#[derive(Debug)]
pub enum DispatchError {
    /// IO operation failed
    Io(std::io::Error),

    /// HTTP request failed
    Http(reqwest::Error),

    /// JSON serialization/deserialization failed
    Json(serde_json::Error),

    /// Configuration error
    Config(String),

    /// Transport error (timeouts, malformed requests)
    Transport(String),

    /// Durable store error
    Store(String),

    /// Generic error with message
    Other(String),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Io(err) => write!(f, "IO error: {}", err),
            DispatchError::Http(err) => write!(f, "HTTP error: {}", err),
            DispatchError::Json(err) => write!(f, "JSON error: {}", err),
            DispatchError::Config(msg) => write!(f, "Configuration error: {}", msg),
            DispatchError::Transport(msg) => write!(f, "Transport error: {}", msg),
            DispatchError::Store(msg) => write!(f, "Store error: {}", msg),
            DispatchError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::Io(err) => Some(err),
            DispatchError::Http(err) => Some(err),
            DispatchError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DispatchError {
    fn from(err: std::io::Error) -> Self {
        DispatchError::Io(err)
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        DispatchError::Http(err)
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Json(err)
    }
}
