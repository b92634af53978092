//! Connection handling
//!
//! One [`Connection`] per connected peer, used by both the client and the
//! server. It owns the endpoint, runs the receive loop, and reports what
//! happens on it as [`ConnectionEvent`]s.

pub mod handler;
pub mod state;

pub use handler::{BoxedReader, BoxedWriter, Connection, EventSender, next_connection_id};
pub use state::{CloseReason, ConnectionEvent, ConnectionId, ConnectionState};
