//! simple-chat
//!
//! A small line-based TCP chat. Modules, leaves first:
//!
//! - [`protocol`]: `!CHATNAME`, `!EXIT`, and plain text lines.
//! - [`connection`]: one endpoint, its receive loop, and its lifecycle.
//! - [`client`]: the client-side controller and UI seam.
//! - [`server`]: accept loop, session registry, operator console.
//! - [`config`], [`cli`], [`error`]: configuration, flags, error types.

pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::ChatClient;
pub use server::Server;
