//! Session registry
//!
//! Tracks every connected client and fans chat lines out to them. This is
//! the one piece of state touched from the accept loop, the event
//! dispatcher, and the operator console at the same time.

use log::{debug, info, warn};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::connection::{CloseReason, Connection};
use crate::error::{ConnectionError, SessionError};
use crate::protocol::responses::format_notice;
use crate::protocol::{ChatLine, Command};
use crate::server::session::{Session, SessionId, SessionInfo};

/// Who a broadcast reached.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients the line was queued for
    pub delivered: Vec<SessionId>,
    /// Recipients already closing, left alone
    pub skipped: Vec<SessionId>,
    /// Recipients that could not take the line (usually a full outgoing
    /// queue); they have been removed
    pub failed: Vec<SessionId>,
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Session>>,
    default_name: String,
}

impl SessionRegistry {
    pub fn new(default_name: impl Into<String>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            default_name: default_name.into(),
        }
    }

    /// Adds a freshly accepted connection under its connection id, with the
    /// default display name until `CHATNAME` arrives.
    ///
    /// Must be called before the connection's receive loop is started.
    pub async fn register(&self, connection: Connection) -> Result<SessionId, SessionError> {
        let id = connection.id();
        let mut sessions = self.sessions.lock().await;

        if sessions.contains_key(&id) {
            return Err(SessionError::DuplicateId(id));
        }

        info!(
            "Registered session {} from {} ({} sessions)",
            id,
            connection.peer(),
            sessions.len() + 1
        );
        sessions.insert(id, Session::new(connection, self.default_name.clone()));
        Ok(id)
    }

    /// Handles one line received from session `id`.
    ///
    /// Lines from sessions that are no longer registered are dropped.
    pub async fn on_line(&self, id: SessionId, line: ChatLine) {
        match line {
            ChatLine::Command(Command::CHATNAME(name)) => {
                if let Err(e) = self.rename(id, &name).await {
                    debug!("Ignoring CHATNAME: {}", e);
                }
            }
            ChatLine::Command(Command::EXIT) => {
                if self.remove(id, CloseReason::PeerExit).await.is_none() {
                    debug!("EXIT from session {} which was already removed", id);
                }
            }
            ChatLine::Plain(text) => {
                if !self.contains(id).await {
                    debug!("Dropping line from removed session {}", id);
                    return;
                }
                self.broadcast(Some(id), &text).await;
            }
        }
    }

    /// Changes the display name of `id`, returning the previous one.
    pub async fn rename(&self, id: SessionId, name: &str) -> Result<String, SessionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::InvalidName(name.to_string()));
        }

        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;

        let previous = session.set_name(name);
        info!("Session {} is now known as {} (was {})", id, session.name(), previous);
        Ok(previous)
    }

    /// Sends `text` to every live session except `from`.
    ///
    /// The recipient list is a snapshot taken under the lock. Sends only
    /// queue the line, so a recipient that stopped reading never holds up the
    /// others; once its queue is full it is removed and delivery goes on.
    pub async fn broadcast(&self, from: Option<SessionId>, text: &str) -> BroadcastReport {
        let recipients: Vec<(SessionId, Connection)> = {
            let sessions = self.sessions.lock().await;
            sessions
                .iter()
                .filter(|(id, _)| Some(**id) != from)
                .map(|(id, session)| (*id, session.connection().clone()))
                .collect()
        };

        let mut report = BroadcastReport::default();
        for (id, connection) in recipients {
            match connection.send(text) {
                Ok(()) => report.delivered.push(id),
                Err(ConnectionError::NotConnected) => report.skipped.push(id),
                Err(e) => {
                    warn!("Broadcast to session {} failed: {}", id, e);
                    self.remove(id, CloseReason::IoError(e.to_string())).await;
                    report.failed.push(id);
                }
            }
        }

        debug!(
            "Broadcast from {:?}: {} delivered, {} skipped, {} failed",
            from,
            report.delivered.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    /// Sends an operator notice to every session.
    pub async fn announce(&self, text: &str) -> BroadcastReport {
        self.broadcast(None, &format_notice(text)).await
    }

    /// Removes a session for any reason and closes its connection if it is
    /// still open. Returns `None` if `id` wasn't registered.
    pub async fn remove(&self, id: SessionId, reason: CloseReason) -> Option<SessionInfo> {
        let session = self.sessions.lock().await.remove(&id)?;
        let info = session.info();

        info!("Removing session {} ({}): {}", id, info.name, reason);
        session.connection().close(reason).await;
        Some(info)
    }

    /// Operator removal: tells the client with `!EXIT`, then removes it.
    pub async fn kick(&self, id: SessionId) -> Result<SessionInfo, SessionError> {
        let connection = self
            .sessions
            .lock()
            .await
            .get(&id)
            .map(|session| session.connection().clone())
            .ok_or(SessionError::NotFound(id))?;

        if let Err(e) = connection.send_line(&Command::EXIT.into()) {
            debug!("Could not send EXIT to session {}: {}", id, e);
        }

        self.remove(id, CloseReason::LocalShutdown)
            .await
            .ok_or(SessionError::NotFound(id))
    }

    /// Sends `!EXIT` to every session and removes them all. The connections
    /// are closed side by side, so slow peers cost one release timeout in
    /// total rather than one each.
    pub async fn close_all(&self) {
        let sessions: Vec<Session> = self.sessions.lock().await.drain().map(|(_, s)| s).collect();

        let mut closing = JoinSet::new();
        for session in sessions {
            let connection = session.connection().clone();
            if let Err(e) = connection.send_line(&Command::EXIT.into()) {
                debug!("Could not send EXIT to session {}: {}", session.id(), e);
            }
            info!("Removing session {} ({}): server shutdown", session.id(), session.name());
            closing.spawn(async move { connection.shutdown().await });
        }

        while closing.join_next().await.is_some() {}
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().await.contains_key(&id)
    }

    pub async fn name_of(&self, id: SessionId) -> Option<String> {
        self.sessions
            .lock()
            .await
            .get(&id)
            .map(|session| session.name().to_string())
    }

    /// Snapshot of all sessions, ordered by id.
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        let mut list: Vec<SessionInfo> = self
            .sessions
            .lock()
            .await
            .values()
            .map(Session::info)
            .collect();
        list.sort_by_key(|info| info.id);
        list
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::{failing_connection_with, memory_connection_with};
    use crate::connection::handler::{OUTBOX_CAPACITY, RELEASE_TIMEOUT};
    use crate::connection::{ConnectionEvent, ConnectionState};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, DuplexStream};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct Peer {
        id: SessionId,
        conn: Connection,
        pipe: BufReader<DuplexStream>,
    }

    fn events() -> mpsc::UnboundedSender<ConnectionEvent> {
        let (tx, _rx) = mpsc::unbounded_channel();
        tx
    }

    async fn join(registry: &SessionRegistry) -> Peer {
        let (conn, pipe) = memory_connection_with(events());
        let id = registry.register(conn.clone()).await.unwrap();
        Peer {
            id,
            conn,
            pipe: BufReader::new(pipe),
        }
    }

    async fn read_line(pipe: &mut BufReader<DuplexStream>) -> String {
        let mut line = String::new();
        timeout(Duration::from_secs(2), pipe.read_line(&mut line))
            .await
            .expect("timed out reading line")
            .unwrap();
        line
    }

    async fn nothing_pending(pipe: &mut BufReader<DuplexStream>) -> bool {
        let mut buf = [0u8; 1];
        timeout(Duration::from_millis(50), pipe.read(&mut buf))
            .await
            .is_err()
    }

    #[tokio::test]
    async fn new_sessions_get_the_default_name() {
        let registry = SessionRegistry::new("Client");
        let alice = join(&registry).await;
        assert_eq!(registry.name_of(alice.id).await.as_deref(), Some("Client"));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn register_rejects_the_same_connection_twice() {
        let registry = SessionRegistry::new("Client");
        let alice = join(&registry).await;
        let result = registry.register(alice.conn.clone()).await;
        assert_eq!(result, Err(SessionError::DuplicateId(alice.id)));
    }

    #[tokio::test]
    async fn concurrent_registrations_get_distinct_ids() {
        let registry = Arc::new(SessionRegistry::new("Client"));
        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let (conn, pipe) = memory_connection_with(events());
                let id = registry.register(conn).await.unwrap();
                (id, pipe)
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().0);
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 32);
        assert_eq!(registry.len().await, 32);
    }

    #[tokio::test]
    async fn chatname_renames_and_duplicates_are_allowed() {
        let registry = SessionRegistry::new("Client");
        let a = join(&registry).await;
        let b = join(&registry).await;

        registry
            .on_line(a.id, ChatLine::Command(Command::CHATNAME("Alice".into())))
            .await;
        registry
            .on_line(b.id, ChatLine::Command(Command::CHATNAME("Alice".into())))
            .await;

        assert_eq!(registry.name_of(a.id).await.as_deref(), Some("Alice"));
        assert_eq!(registry.name_of(b.id).await.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn blank_names_are_rejected() {
        let registry = SessionRegistry::new("Client");
        let a = join(&registry).await;
        assert!(matches!(
            registry.rename(a.id, "   ").await,
            Err(SessionError::InvalidName(_))
        ));
        assert_eq!(registry.name_of(a.id).await.as_deref(), Some("Client"));
    }

    #[tokio::test]
    async fn plain_text_skips_the_sender() {
        let registry = SessionRegistry::new("Client");
        let mut alice = join(&registry).await;
        let mut bob = join(&registry).await;

        registry.on_line(bob.id, ChatLine::plain("hi")).await;

        assert_eq!(read_line(&mut alice.pipe).await, "hi\n");
        assert!(nothing_pending(&mut bob.pipe).await);
    }

    #[tokio::test]
    async fn broken_recipient_does_not_stop_the_others() {
        let registry = SessionRegistry::new("Client");
        let sender = join(&registry).await;
        let mut first = join(&registry).await;
        let (broken, _broken_pipe) = failing_connection_with(events());
        let broken_id = registry.register(broken.clone()).await.unwrap();
        let mut last = join(&registry).await;

        let report = registry.broadcast(Some(sender.id), "still here").await;
        assert_eq!(report.delivered.len(), 3);
        assert_eq!(read_line(&mut first.pipe).await, "still here\n");
        assert_eq!(read_line(&mut last.pipe).await, "still here\n");

        // the write failure closes the endpoint, later lines skip it
        timeout(Duration::from_secs(2), async {
            while broken.is_live() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        let report = registry.broadcast(Some(sender.id), "again").await;
        assert_eq!(report.skipped, vec![broken_id]);
        assert_eq!(read_line(&mut first.pipe).await, "again\n");
    }

    #[tokio::test]
    async fn stalled_recipient_is_dropped_without_delaying_others() {
        let registry = Arc::new(SessionRegistry::new("Client"));
        let sender = join(&registry).await;
        let stalled = join(&registry).await;
        let healthy = join(&registry).await;

        // keep draining the healthy peer, remember whether the marker showed up
        let mut healthy_pipe = healthy.pipe;
        let drain = tokio::spawn(async move {
            let mut line = String::new();
            loop {
                line.clear();
                if healthy_pipe.read_line(&mut line).await.unwrap() == 0 {
                    return false;
                }
                if line == "marker\n" {
                    return true;
                }
            }
        });

        let filler = "f".repeat(1000);
        let mut failed = Vec::new();
        for _ in 0..(OUTBOX_CAPACITY * 2) {
            let report = registry.broadcast(Some(sender.id), &filler).await;
            failed.extend(report.failed);
            if !failed.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(failed, vec![stalled.id]);
        assert!(!registry.contains(stalled.id).await);

        registry.broadcast(Some(sender.id), "marker").await;
        let got_marker = timeout(Duration::from_secs(5), drain).await.unwrap().unwrap();
        assert!(got_marker);
        assert!(registry.contains(healthy.id).await);
    }

    #[tokio::test]
    async fn kick_of_a_peer_that_never_reads_finishes() {
        let registry = SessionRegistry::new("Client");
        let sender = join(&registry).await;
        let mut stuck = join(&registry).await;

        // more than the pipe holds, less than the queue
        let filler = "k".repeat(1000);
        for _ in 0..32 {
            registry.broadcast(Some(sender.id), &filler).await;
        }

        let kicked = timeout(RELEASE_TIMEOUT + Duration::from_secs(2), registry.kick(stuck.id))
            .await
            .expect("kick hung on a peer that never reads");
        assert!(kicked.is_ok());
        assert_eq!(stuck.conn.state(), ConnectionState::Closed);

        // the stream is released: the peer drains what was buffered, then sees EOF
        let mut rest = Vec::new();
        timeout(Duration::from_secs(1), stuck.pipe.read_to_end(&mut rest))
            .await
            .expect("stream was not released")
            .unwrap();
    }

    #[tokio::test]
    async fn exit_removes_and_closes_the_session() {
        let registry = SessionRegistry::new("Client");
        let mut alice = join(&registry).await;
        let mut bob = join(&registry).await;

        registry.on_line(alice.id, ChatLine::Command(Command::EXIT)).await;

        assert!(!registry.contains(alice.id).await);
        assert_eq!(alice.conn.state(), ConnectionState::Closed);
        let mut rest = Vec::new();
        alice.pipe.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        let report = registry.broadcast(Some(bob.id), "anyone?").await;
        assert!(report.delivered.is_empty());
        assert!(report.failed.is_empty());
        assert!(nothing_pending(&mut bob.pipe).await);
    }

    #[tokio::test]
    async fn lines_from_removed_sessions_are_dropped() {
        let registry = SessionRegistry::new("Client");
        let ghost = join(&registry).await;
        let mut alice = join(&registry).await;
        registry.remove(ghost.id, CloseReason::EndOfStream).await;

        registry.on_line(ghost.id, ChatLine::plain("boo")).await;
        assert!(nothing_pending(&mut alice.pipe).await);
    }

    #[tokio::test]
    async fn closing_recipients_are_skipped_without_error() {
        let registry = SessionRegistry::new("Client");
        let sender = join(&registry).await;
        let closing = join(&registry).await;

        // endpoint gone but the registry hasn't processed the close yet
        closing.conn.shutdown().await;

        let report = registry.broadcast(Some(sender.id), "hello").await;
        assert_eq!(report.skipped, vec![closing.id]);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = SessionRegistry::new("Client");
        let alice = join(&registry).await;

        assert!(registry.remove(alice.id, CloseReason::LocalShutdown).await.is_some());
        assert!(registry.remove(alice.id, CloseReason::LocalShutdown).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn remove_during_broadcast_is_safe() {
        let registry = Arc::new(SessionRegistry::new("Client"));
        let sender = join(&registry).await;
        let mut peers = Vec::new();
        for _ in 0..16 {
            peers.push(join(&registry).await);
        }
        let victim = peers[7].id;

        let broadcaster = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.broadcast(Some(sender.id), "race").await })
        };
        registry.remove(victim, CloseReason::LocalShutdown).await;
        let report = broadcaster.await.unwrap();

        assert!(report.failed.is_empty());
        assert_eq!(report.delivered.len() + report.skipped.len(), 16);
        assert!(!registry.contains(victim).await);
    }

    #[tokio::test]
    async fn kick_sends_exit_before_closing() {
        let registry = SessionRegistry::new("Client");
        let mut alice = join(&registry).await;
        registry.rename(alice.id, "Alice").await.unwrap();

        let info = registry.kick(alice.id).await.unwrap();
        assert_eq!(info.name, "Alice");
        assert_eq!(read_line(&mut alice.pipe).await, "!EXIT\n");
        assert!(registry.is_empty().await);
        assert_eq!(registry.kick(alice.id).await, Err(SessionError::NotFound(alice.id)));
    }

    #[tokio::test]
    async fn announce_reaches_everyone() {
        let registry = SessionRegistry::new("Client");
        let mut alice = join(&registry).await;
        let mut bob = join(&registry).await;

        let report = registry.announce("maintenance at noon").await;
        assert_eq!(report.delivered.len(), 2);
        assert_eq!(read_line(&mut alice.pipe).await, "[server] maintenance at noon\n");
        assert_eq!(read_line(&mut bob.pipe).await, "[server] maintenance at noon\n");
    }

    #[tokio::test]
    async fn close_all_empties_the_registry() {
        let registry = SessionRegistry::new("Client");
        let mut alice = join(&registry).await;
        let bob = join(&registry).await;

        registry.close_all().await;

        assert!(registry.is_empty().await);
        assert_eq!(read_line(&mut alice.pipe).await, "!EXIT\n");
        assert_eq!(bob.conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn sessions_are_listed_in_id_order() {
        let registry = SessionRegistry::new("Client");
        let a = join(&registry).await;
        let b = join(&registry).await;
        registry.rename(b.id, "  Bob ").await.unwrap();

        let list = registry.sessions().await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, a.id);
        assert_eq!(list[1].name, "Bob");
        assert_eq!(list[1].peer, "memory");
    }
}
