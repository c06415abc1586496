//! Host-runtime adapter for the messenger session.
//!
//! Provides:
//! - `protocol` - JSON call/reply shapes exchanged with a host runtime
//! - `Binding` - session registry that dispatches host calls
//! - `AsyncMessenger` - tokio wrapper with a background receive pump

pub mod error;
pub mod protocol;
pub mod pump;
pub mod registry;

pub use error::BindingError;
pub use protocol::{HostCall, HostInbound, HostMessage, HostReply};
pub use pump::{AcceptAll, AsyncMessenger, DeliveryHandler, PumpHandle};
pub use registry::Binding;
