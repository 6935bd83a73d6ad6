// src/error.rs
//! Error types for the rover relay

use std::fmt;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug)]
pub enum RelayError {
    Io(std::io::Error),
    Serial(tokio_serial::Error),
    Json(serde_json::Error),
    Database(rusqlite::Error),
    Connection(String),
    Parse(String),
    /// Client payload that must not reach the motor controller
    InvalidCommand(String),
    Store(String),
    Other(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Io(e) => write!(f, "IO error: {}", e),
            RelayError::Serial(e) => write!(f, "Serial error: {}", e),
            RelayError::Json(e) => write!(f, "JSON error: {}", e),
            RelayError::Database(e) => write!(f, "Database error: {}", e),
            RelayError::Connection(msg) => write!(f, "Connection error: {}", msg),
            RelayError::Parse(msg) => write!(f, "Parse error: {}", msg),
            RelayError::InvalidCommand(msg) => write!(f, "Invalid command: {}", msg),
            RelayError::Store(msg) => write!(f, "Store error: {}", msg),
            RelayError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RelayError::Io(e) => Some(e),
            RelayError::Serial(e) => Some(e),
            RelayError::Json(e) => Some(e),
            RelayError::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(error: std::io::Error) -> Self {
        RelayError::Io(error)
    }
}

impl From<tokio_serial::Error> for RelayError {
    fn from(error: tokio_serial::Error) -> Self {
        RelayError::Serial(error)
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(error: serde_json::Error) -> Self {
        RelayError::Json(error)
    }
}

impl From<rusqlite::Error> for RelayError {
    fn from(error: rusqlite::Error) -> Self {
        RelayError::Database(error)
    }
}

impl From<anyhow::Error> for RelayError {
    fn from(error: anyhow::Error) -> Self {
        RelayError::Other(error.to_string())
    }
}
