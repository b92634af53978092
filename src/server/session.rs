//! Client session
//!
//! Server-side binding of one connection to a display name.

use crate::connection::{Connection, ConnectionId};

/// Registry key. Equal to the connection id, so it never changes while the
/// endpoint lives, whatever the display name does.
pub type SessionId = ConnectionId;

pub struct Session {
    name: String,
    connection: Connection,
}

impl Session {
    pub fn new(connection: Connection, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection,
        }
    }

    pub fn id(&self) -> SessionId {
        self.connection.id()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Sets the display name, returning the previous one.
    pub fn set_name(&mut self, name: impl Into<String>) -> String {
        std::mem::replace(&mut self.name, name.into())
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id(),
            name: self.name.clone(),
            peer: self.connection.peer().to_string(),
        }
    }
}

/// Snapshot of a session for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub name: String,
    pub peer: String,
}
