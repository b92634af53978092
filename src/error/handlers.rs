//! Error handlers
//!
//! Logs errors at a level that matches how serious they are for the session.

use crate::error::types::{ChatError, ConnectionError};
use log::{error, warn};

/// Handle a chat error by logging it
pub fn handle_error(err: &ChatError) {
    if is_recoverable(err) {
        warn!("Chat error: {}", err);
    } else {
        error!("Chat error: {}", err);
    }
}

/// Whether the affected endpoint can keep running after this error.
///
/// Decode problems and sends to an already closed endpoint leave nothing to
/// recover; everything else ends the connection or the process.
pub fn is_recoverable(err: &ChatError) -> bool {
    match err {
        ChatError::Protocol(_) => true,
        ChatError::Session(_) => true,
        ChatError::Connection(ConnectionError::NotConnected) => true,
        ChatError::Connection(ConnectionError::Protocol(_)) => true,
        ChatError::Connection(_) => false,
        ChatError::Config(_) => false,
        ChatError::Io(_) => false,
    }
}
