//! User-facing notices
//!
//! Connection state changes reach the UI through the same path as chat
//! messages, using these texts.

/// Shown after the local side closed the session
pub const CLOSED_BY_CLIENT: &str = "Closed connection to server!";

/// Shown after the server sent `!EXIT` or dropped the connection
pub const CLOSED_BY_SERVER: &str = "Server has closed the connection!";

/// Prefix for notices the server operator sends to every client
pub const SERVER_NOTICE_PREFIX: &str = "[server]";

/// Format a server notice line
pub fn format_notice(message: &str) -> String {
    format!("{} {}", SERVER_NOTICE_PREFIX, message)
}
