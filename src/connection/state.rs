//! Connection lifecycle types
//!
//! States, close reasons, and the events a connection reports to its owner.

use std::fmt;

use crate::protocol::ChatLine;

/// Stable identity of one endpoint for its whole lifetime.
pub type ConnectionId = u64;

/// Lifecycle of an endpoint. Ordering follows the only allowed direction of
/// travel, so `state >= Closing` means "no longer accepting sends".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why an endpoint left the `Connected` state. The first cause wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent `!EXIT`
    PeerExit,
    /// Peer closed its side of the stream
    EndOfStream,
    /// Owner asked for shutdown
    LocalShutdown,
    /// Read or write failed
    IoError(String),
}

impl CloseReason {
    /// Normal termination, nothing to report to the user as an error.
    pub fn is_graceful(&self) -> bool {
        !matches!(self, CloseReason::IoError(_))
    }

    /// Only an owner-initiated close still delivers what is queued, e.g. a
    /// parting `!EXIT`. A peer that left or failed gets nothing more.
    pub fn flushes_output(&self) -> bool {
        matches!(self, CloseReason::LocalShutdown)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerExit => write!(f, "peer sent EXIT"),
            CloseReason::EndOfStream => write!(f, "stream closed by peer"),
            CloseReason::LocalShutdown => write!(f, "local shutdown"),
            CloseReason::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

/// Everything a connection reports to whoever owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected { id: ConnectionId, peer: String },
    Line { id: ConnectionId, line: ChatLine },
    Closed { id: ConnectionId, reason: CloseReason },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_ordered_along_the_lifecycle() {
        assert!(ConnectionState::Idle < ConnectionState::Connecting);
        assert!(ConnectionState::Connected < ConnectionState::Closing);
        assert!(ConnectionState::Closing < ConnectionState::Closed);
    }

    #[test]
    fn only_io_errors_are_ungraceful() {
        assert!(CloseReason::PeerExit.is_graceful());
        assert!(CloseReason::EndOfStream.is_graceful());
        assert!(CloseReason::LocalShutdown.is_graceful());
        assert!(!CloseReason::IoError("reset".into()).is_graceful());
    }

    #[test]
    fn only_local_shutdown_flushes_queued_output() {
        assert!(CloseReason::LocalShutdown.flushes_output());
        assert!(!CloseReason::PeerExit.flushes_output());
        assert!(!CloseReason::EndOfStream.flushes_output());
        assert!(!CloseReason::IoError("reset".into()).flushes_output());
    }
}
