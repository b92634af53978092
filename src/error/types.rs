//! Error types
//!
//! Defines domain-specific error types for each module of the chat service.

use std::fmt;
use std::io;

use crate::connection::ConnectionId;

/// Protocol module errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Sentinel-prefixed token that isn't part of the command set
    UnknownCommand(String),
    /// Known command sent without its required argument
    MissingArgument(&'static str),
    /// Outgoing line would break newline framing
    EmbeddedNewline,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnknownCommand(token) => write!(f, "Unknown command: {}", token),
            ProtocolError::MissingArgument(cmd) => write!(f, "Missing argument for {}", cmd),
            ProtocolError::EmbeddedNewline => write!(f, "Line contains an embedded line break"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Connection handler errors
#[derive(Debug)]
pub enum ConnectionError {
    /// Refused, timed out, or name resolution failed
    ConnectFailed { addr: String, reason: String },
    /// Endpoint is not in the `Connected` state
    NotConnected,
    /// Peer stopped reading and its outgoing queue filled up
    QueueFull,
    Io(io::Error),
    Protocol(ProtocolError),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::ConnectFailed { addr, reason } => {
                write!(f, "Failed to connect to {}: {}", addr, reason)
            }
            ConnectionError::NotConnected => write!(f, "Connection is not open"),
            ConnectionError::QueueFull => write!(f, "Outgoing queue is full"),
            ConnectionError::Io(e) => write!(f, "I/O error: {}", e),
            ConnectionError::Protocol(e) => write!(f, "Protocol error: {}", e),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::Io(e) => Some(e),
            ConnectionError::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(error: io::Error) -> Self {
        ConnectionError::Io(error)
    }
}

impl From<ProtocolError> for ConnectionError {
    fn from(error: ProtocolError) -> Self {
        ConnectionError::Protocol(error)
    }
}

/// Session registry errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    DuplicateId(ConnectionId),
    NotFound(ConnectionId),
    InvalidName(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::DuplicateId(id) => write!(f, "Session {} is already registered", id),
            SessionError::NotFound(id) => write!(f, "Session not found: {}", id),
            SessionError::InvalidName(name) => write!(f, "Invalid chat name: {:?}", name),
        }
    }
}

impl std::error::Error for SessionError {}

/// General chat error that encompasses all error types
#[derive(Debug)]
pub enum ChatError {
    Protocol(ProtocolError),
    Connection(ConnectionError),
    Session(SessionError),
    Config(config::ConfigError),
    Io(io::Error),
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Protocol(e) => write!(f, "Protocol error: {}", e),
            ChatError::Connection(e) => write!(f, "Connection error: {}", e),
            ChatError::Session(e) => write!(f, "Session error: {}", e),
            ChatError::Config(e) => write!(f, "Configuration error: {}", e),
            ChatError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<ProtocolError> for ChatError {
    fn from(error: ProtocolError) -> Self {
        ChatError::Protocol(error)
    }
}

impl From<ConnectionError> for ChatError {
    fn from(error: ConnectionError) -> Self {
        ChatError::Connection(error)
    }
}

impl From<SessionError> for ChatError {
    fn from(error: SessionError) -> Self {
        ChatError::Session(error)
    }
}

impl From<config::ConfigError> for ChatError {
    fn from(error: config::ConfigError) -> Self {
        ChatError::Config(error)
    }
}

impl From<io::Error> for ChatError {
    fn from(error: io::Error) -> Self {
        ChatError::Io(error)
    }
}
