//! # Slotbot
//!
//! The booking bot process: transport boundary, update dispatcher, the booking
//! conversation, and the health/metrics endpoint.

pub mod dispatcher;
pub mod handlers;
pub mod health;
pub mod transport;

pub use dispatcher::{Dispatcher, DispatcherSettings};
pub use handlers::{BookingHandler, UpdateHandler};
pub use transport::{InboundEvent, Reply, StdioTransport, Transport, TransportError};
