//! Binding errors.

use messenger_core::MessengerError;
use thiserror::Error;
use uuid::Uuid;

/// Binding error.
#[derive(Debug, Error)]
pub enum BindingError {
    #[error("Unknown session: {0}")]
    UnknownSession(Uuid),
    #[error(transparent)]
    Messenger(#[from] MessengerError),
    #[error("Malformed host call: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error("Invalid message body: {0}")]
    InvalidBody(String),
    #[error("Background task failed: {0}")]
    Task(String),
}

impl BindingError {
    /// Upper-case kind code reported to the host.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownSession(_) => "UNKNOWN_SESSION",
            Self::Messenger(e) => e.kind().as_str(),
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::InvalidBody(_) => "INVALID_MESSAGE",
            Self::Task(_) => "LOGIC_ERROR",
        }
    }
}
