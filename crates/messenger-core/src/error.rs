//! Session-level errors.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::delivery::{DeliveryStatus, TrackerId};

/// Error kind codes reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotConnected,
    ConnectFailed,
    SendTimeout,
    InvalidMessage,
    InvalidAddress,
    UnknownTracker,
    InvalidTransition,
    CreditUnderflow,
    LogicError,
}

impl ErrorKind {
    /// Upper-case code, e.g. `NOT_CONNECTED`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotConnected => "NOT_CONNECTED",
            Self::ConnectFailed => "CONNECT_FAILED",
            Self::SendTimeout => "SEND_TIMEOUT",
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::InvalidAddress => "INVALID_ADDRESS",
            Self::UnknownTracker => "UNKNOWN_TRACKER",
            Self::InvalidTransition => "INVALID_TRANSITION",
            Self::CreditUnderflow => "CREDIT_UNDERFLOW",
            Self::LogicError => "LOGIC_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messenger error.
///
/// Operations fail fast; retry policy belongs to the caller.
#[derive(Debug, Error)]
pub enum MessengerError {
    #[error("Not connected")]
    NotConnected,
    #[error("Connect to {address} failed: {condition}")]
    ConnectFailed { address: String, condition: String },
    #[error("Send timed out: {flushed} flushed, {remaining} still buffered")]
    SendTimeout { flushed: usize, remaining: usize },
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Unknown tracker: {0}")]
    UnknownTracker(TrackerId),
    #[error("Invalid transition for tracker {tracker}: {from} -> {to}")]
    InvalidTransition {
        tracker: TrackerId,
        from: DeliveryStatus,
        to: DeliveryStatus,
    },
    #[error("Credit underflow on {source_address}: requested {requested}, outstanding {outstanding}")]
    CreditUnderflow {
        source_address: String,
        requested: u32,
        outstanding: u32,
    },
    #[error("Logic error: {0}")]
    LogicError(String),
}

impl MessengerError {
    /// The caller-facing error code.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotConnected => ErrorKind::NotConnected,
            Self::ConnectFailed { .. } => ErrorKind::ConnectFailed,
            Self::SendTimeout { .. } => ErrorKind::SendTimeout,
            Self::InvalidMessage(_) => ErrorKind::InvalidMessage,
            Self::InvalidAddress(_) => ErrorKind::InvalidAddress,
            Self::UnknownTracker(_) => ErrorKind::UnknownTracker,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::CreditUnderflow { .. } => ErrorKind::CreditUnderflow,
            Self::LogicError(_) => ErrorKind::LogicError,
        }
    }
}

/// Result alias for messenger operations.
pub type Result<T, E = MessengerError> = std::result::Result<T, E>;
