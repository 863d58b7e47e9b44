// Error types for the connection and streaming layers
//
// Each concern gets its own enum so callers can match on what went wrong:
// - `TransportError`: opening, reading or closing a physical channel
// - `DecodeError`: a payload arrived but could not be turned into a Reading
// - `StateError`: an operation that is illegal for the current connection state
// - `LinkError`: what `ConnectionManager` operations return

use crate::types::ConnectionState;
use thiserror::Error;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for connection manager operations
pub type LinkResult<T> = Result<T, LinkError>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Device unreachable: {0}")]
    Unreachable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Transport unsupported: {0}")]
    Unsupported(String),

    #[error("Open failed: {0}")]
    Open(String),

    #[error("Read failed: {0}")]
    Read(String),

    #[error("Channel closed")]
    Closed,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Unexpected payload length: {0} bytes")]
    Length(usize),

    #[error("Expected 3 or 4 fields, found {0}")]
    FieldCount(usize),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid number for {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Non-finite value for {0}")]
    NonFinite(&'static str),

    #[error("Humidity out of range [0, 100]: {0}")]
    HumidityOutOfRange(f64),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateError {
    #[error("Illegal transition: {event} while {from}")]
    IllegalTransition {
        from: ConnectionState,
        event: &'static str,
    },

    #[error("Not connected")]
    NotConnected,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("A connection attempt to {0} is already in flight")]
    AlreadyConnecting(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    State(#[from] StateError),
}
