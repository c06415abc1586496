//! Messenger session for AMQP-style messaging.
//!
//! Provides:
//! - `MessengerSession` - connection lifecycle, put/send/receive, settlement
//! - Engine implementations (in-process memory broker)

pub mod engine;
pub mod session;

#[cfg(feature = "memory")]
pub use engine::{EndpointConfig, MemoryBroker, MemoryConnector};
pub use session::{Inbound, MessengerSession, Received, SessionState, Timeout};
