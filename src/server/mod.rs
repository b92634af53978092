//! Chat server
//!
//! Accept loop, session registry, and operator console.

pub mod config;
pub mod console;
pub mod core;
pub mod registry;
pub mod session;

pub use config::ServerSettings;
pub use self::core::Server;
pub use registry::{BroadcastReport, SessionRegistry};
pub use session::{Session, SessionId, SessionInfo};
