//! Core abstractions for an AMQP messenger session.
//!
//! This crate provides the building blocks the session orchestrates:
//! - `Connector` / `Connection` - the protocol engine contract
//! - `DeliveryTracker` - forward-only delivery status per tracker id
//! - `CreditController` - per-subscription link credit and replenishment
//! - `TransportDiagnostics` - bounded trace ring and condition text
//! - `MessengerConfig`, `Message`, `ServiceAddress`

pub mod address;
pub mod config;
pub mod credit;
pub mod delivery;
pub mod diagnostics;
pub mod error;
pub mod message;
pub mod tracker;
pub mod traits;

pub use address::{AddressError, ServiceAddress};
pub use config::MessengerConfig;
pub use credit::{CreditController, Flow};
pub use delivery::{DeliveryStatus, Direction, Disposition, TrackerId};
pub use diagnostics::TransportDiagnostics;
pub use error::{ErrorKind, MessengerError, Result};
pub use message::{Body, Message, MessageError};
pub use tracker::DeliveryTracker;
pub use traits::{ConnectOptions, Connection, Connector, EngineError, EngineEvent, Tracer};
