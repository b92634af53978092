//! Chat client
//!
//! Drives one connection to the server and reports what the user should see
//! through a [`MessageSink`].

pub mod controller;
pub mod ui;

pub use controller::{ChatClient, ClientSettings};
pub use ui::{MessageSink, TerminalSink};
