//! Contract between the messenger session and a protocol engine.
//!
//! The session never builds frames itself. It drives a [`Connector`] to
//! obtain a [`Connection`], the exclusively-owned handle to one transport
//! connection, and interprets the [`EngineEvent`]s that handle reports from
//! [`Connection::work`].

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use thiserror::Error;

use crate::{
    address::ServiceAddress,
    delivery::{DeliveryStatus, Disposition, TrackerId},
};

/// Engine error.
///
/// Every variant carries the condition text reported by the engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("connection closed: {0}")]
    Closed(String),
    #[error("rejected by peer: {0}")]
    Rejected(String),
    #[error("engine failure: {0}")]
    Internal(String),
}

impl EngineError {
    /// The condition text without the variant prefix.
    #[must_use]
    pub fn condition(&self) -> &str {
        match self {
            Self::Refused(c)
            | Self::Authentication(c)
            | Self::Closed(c)
            | Self::Rejected(c)
            | Self::Internal(c) => c,
        }
    }
}

/// Push side channel for transport diagnostics.
pub trait Tracer: Send + Sync {
    /// A transport-level trace line.
    fn trace(&self, line: &str);

    /// A transport or connection condition.
    fn condition(&self, text: &str);
}

/// Options presented when opening a connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Requested container name; engines may canonicalize it.
    pub name: String,
    /// SASL user; a non-blank value requires authentication.
    pub username: Option<String>,
    /// SASL password.
    pub password: Option<String>,
    /// Fail unless the connection authenticates.
    pub require_auth: bool,
    /// Local idle timeout advertised to the peer.
    pub idle_timeout: Option<Duration>,
    /// Push trace lines to the tracer.
    pub trace: bool,
}

/// Something reported by [`Connection::work`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The peer decided the outcome of an outgoing delivery.
    Outcome {
        tracker: TrackerId,
        status: DeliveryStatus,
    },
    /// A message arrived on a receiving link.
    Delivery {
        tracker: TrackerId,
        source: String,
        payload: Bytes,
    },
    /// The connection closed. Fatal closes require a reconnect.
    Closed { condition: String, fatal: bool },
}

/// Factory for connections.
pub trait Connector: Send {
    /// Connection handle type.
    type Connection: Connection;

    /// Open a connection. The tracer is attached for the connection's life.
    ///
    /// # Errors
    /// Returns error if the peer cannot be reached or refuses the connection.
    fn connect(
        &self,
        address: &ServiceAddress,
        options: &ConnectOptions,
        tracer: Arc<dyn Tracer>,
    ) -> Result<Self::Connection, EngineError>;
}

/// An open connection. Dropping it releases the connection.
pub trait Connection: Send {
    /// Container name after canonicalization by the engine.
    fn name(&self) -> &str;

    /// Buffer an encoded message for `address` and return its tracker.
    ///
    /// # Errors
    /// Returns error if the connection can no longer accept messages.
    fn put(&mut self, address: &str, payload: Bytes) -> Result<TrackerId, EngineError>;

    /// Messages buffered locally and not yet written to the transport.
    fn outgoing(&self) -> usize;

    /// Process pending I/O for up to `timeout`.
    ///
    /// # Errors
    /// Returns error if the engine itself fails; peer closes are events.
    fn work(&mut self, timeout: Duration) -> Result<Vec<EngineEvent>, EngineError>;

    /// Open a receiving link for `source`.
    ///
    /// # Errors
    /// Returns error if the peer refuses the link.
    fn subscribe(&mut self, source: &str) -> Result<(), EngineError>;

    /// Close the receiving link for `source`.
    fn unsubscribe(&mut self, source: &str);

    /// Grant `credit` more messages on the link for `source`.
    ///
    /// # Errors
    /// Returns error if no such link exists.
    fn flow(&mut self, source: &str, credit: u32) -> Result<(), EngineError>;

    /// Communicate the local disposition of an incoming delivery.
    ///
    /// # Errors
    /// Returns error if the connection is closed.
    fn disposition(&mut self, tracker: TrackerId, disposition: Disposition)
    -> Result<(), EngineError>;

    /// Settle a delivery, releasing the engine's state for it.
    fn settle(&mut self, tracker: TrackerId);

    /// Idle timeout advertised by the peer at `endpoint` (`host:port`).
    fn remote_idle_timeout(&self, endpoint: &str) -> Option<Duration>;

    /// Current connection condition, if any.
    fn condition(&self) -> Option<String>;

    /// Close the connection.
    fn close(self)
    where
        Self: Sized;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_text() {
        let err = EngineError::Refused("no listener on localhost:5672".to_string());
        assert_eq!(err.condition(), "no listener on localhost:5672");
        assert_eq!(
            err.to_string(),
            "connection refused: no listener on localhost:5672"
        );
    }
}
