//! Module `controller`
//!
//! Client side of a chat session: performs the `CHATNAME` handshake, turns
//! received lines into UI messages, and shuts the session down exactly once.

use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::client::ui::MessageSink;
use crate::config::ChatConfig;
use crate::connection::{CloseReason, Connection, ConnectionEvent};
use crate::error::{ChatError, ProtocolError};
use crate::protocol::responses::{CLOSED_BY_CLIENT, CLOSED_BY_SERVER};
use crate::protocol::{ChatLine, Command};

/// Where to connect and which name to announce.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub keepalive: bool,
}

impl ClientSettings {
    pub fn from_config(config: &ChatConfig) -> Self {
        Self {
            name: config.default_name.clone(),
            host: config.host.clone(),
            port: config.port,
            connect_timeout: config.connect_timeout(),
            keepalive: config.keepalive,
        }
    }

    /// Replaces the chat name unless `name` is blank.
    pub fn with_name(mut self, name: Option<String>) -> Self {
        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            self.name = name.trim().to_string();
        }
        self
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from_config(&ChatConfig::default())
    }
}

struct ClientInner {
    connection: Connection,
    sink: Arc<dyn MessageSink>,
    listening: AtomicBool,
    /// Set once the event pump has handled the close
    ended: watch::Sender<bool>,
}

/// A connected chat client.
pub struct ChatClient {
    name: String,
    inner: Arc<ClientInner>,
    pump: JoinHandle<()>,
}

impl ChatClient {
    /// Connects, announces the chat name, and starts listening.
    ///
    /// Only a failed connect is reported here; everything that happens later
    /// reaches the user through `sink`.
    pub async fn connect(
        settings: ClientSettings,
        sink: Arc<dyn MessageSink>,
    ) -> Result<Self, ChatError> {
        info!(
            "Init: host={} port={} chatName={}",
            settings.host, settings.port, settings.name
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Connection::connect(
            &settings.host,
            settings.port,
            settings.connect_timeout,
            settings.keepalive,
            tx,
        )
        .await?;

        // the server expects the name as the very first line
        let handshake = ChatLine::from(Command::CHATNAME(settings.name.clone()));
        if let Err(e) = connection.send_line(&handshake) {
            connection.shutdown().await;
            return Err(e.into());
        }

        let inner = Arc::new(ClientInner {
            connection,
            sink,
            listening: AtomicBool::new(true),
            ended: watch::Sender::new(false),
        });

        inner.connection.start();
        let pump = tokio::spawn(pump_events(Arc::clone(&inner), rx));

        Ok(Self {
            name: settings.name,
            inner,
            pump,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True until either side ends the session.
    pub fn is_listening(&self) -> bool {
        self.inner.listening.load(Ordering::SeqCst)
    }

    /// Resolves once the session is over and the user has been told why.
    ///
    /// Wait on this rather than on the connection: the connection reports
    /// `Closed` before the server's `!EXIT` has been turned into a notice.
    pub async fn ended(&self) {
        let mut ended = self.inner.ended.subscribe();
        let _ = ended.wait_for(|done| *done).await;
    }

    /// Queues one line of chat text for the server.
    pub fn send(&self, text: &str) -> Result<(), ChatError> {
        let text = text.trim_end_matches(['\n', '\r']);
        if text.contains(['\n', '\r']) {
            return Err(ProtocolError::EmbeddedNewline.into());
        }
        self.inner.connection.send(text)?;
        Ok(())
    }

    /// Sends text addressed to a single chat name.
    pub fn send_private(&self, text: &str, target: &str) -> Result<(), ChatError> {
        // TODO: route through a `!PRIVATE <name>` command once the server registry resolves names
        debug!(
            "Private message to {} not sent, private messaging is not supported yet: {}",
            target, text
        );
        Ok(())
    }

    /// Ends the session. Idempotent.
    ///
    /// While still listening this tells the server with `!EXIT` and the user
    /// with a local notice; afterwards it only releases the connection.
    pub async fn shutdown(&self) {
        debug!("Shutting down client, listening={}", self.is_listening());

        if self.inner.listening.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.inner.connection.send_line(&Command::EXIT.into()) {
                warn!("Could not send EXIT to server: {}", e);
            }
            self.inner.sink.incoming_message(CLOSED_BY_CLIENT);
        }

        self.inner.connection.shutdown().await;
    }

    /// Resolves once the connection is closed and every event was handled.
    pub async fn closed(self) {
        self.inner.connection.closed().await;
        let _ = self.pump.await;
    }
}

async fn pump_events(inner: Arc<ClientInner>, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Connected { peer, .. } => debug!("Connected to server {}", peer),
            ConnectionEvent::Line { line, .. } => received(&inner, line).await,
            ConnectionEvent::Closed { reason, .. } => {
                closed_by_server(&inner, &reason);
                break;
            }
        }
    }
    inner.ended.send_replace(true);
}

async fn received(inner: &ClientInner, line: ChatLine) {
    match line {
        ChatLine::Command(Command::EXIT) => {
            if inner.listening.swap(false, Ordering::SeqCst) {
                inner.connection.close(CloseReason::PeerExit).await;
                inner.sink.incoming_message(CLOSED_BY_SERVER);
            }
        }
        ChatLine::Command(other) => debug!("Ignoring command from server: {:?}", other),
        ChatLine::Plain(text) => {
            debug!("Passing message to client UI ...");
            inner.sink.incoming_message(&text);
        }
    }
}

fn closed_by_server(inner: &ClientInner, reason: &CloseReason) {
    if inner.listening.swap(false, Ordering::SeqCst) {
        if reason.is_graceful() {
            info!("Server connection closed: {}", reason);
        } else {
            warn!("Server connection lost: {}", reason);
        }
        inner.sink.incoming_message(CLOSED_BY_SERVER);
    }
}
