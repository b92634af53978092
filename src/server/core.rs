use log::{debug, error, info, warn};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream, lookup_host};
use tokio::sync::mpsc;

use crate::connection::{Connection, ConnectionEvent, EventSender};
use crate::error::ChatError;
use crate::protocol::Command;
use crate::server::config::ServerSettings;
use crate::server::registry::SessionRegistry;

const LISTEN_BACKLOG: u32 = 1024;

pub struct Server {
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    settings: ServerSettings,
}

impl Server {
    /// Binds the listening socket. Accepted sockets inherit its keep-alive
    /// setting.
    pub async fn bind(settings: ServerSettings) -> Result<Self, ChatError> {
        let listen = settings.listen_socket();
        let addr = lookup_host(listen.as_str()).await?.next().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("{} did not resolve", listen),
            )
        })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.set_keepalive(settings.keepalive)?;
        socket.bind(addr)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;

        info!("Server bound to {}", listener.local_addr()?);

        Ok(Self {
            listener,
            registry: Arc::new(SessionRegistry::new(settings.default_name.clone())),
            settings,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accepts clients until `shutdown` resolves, then sends `!EXIT` to every
    /// remaining session.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ChatError>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            registry,
            settings,
        } = self;

        info!(
            "Starting chat server on {} (max {} clients)",
            settings.listen_socket(),
            settings.max_clients
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch_events(Arc::clone(&registry), events_rx));

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Server shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        accept_client(stream, addr, &registry, &settings, &events_tx).await;
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                    }
                },
            }
        }

        drop(listener);
        registry.close_all().await;
        dispatcher.abort();
        Ok(())
    }
}

/// Registers a new client before its receive loop starts, so no line can
/// arrive for a session the registry doesn't know yet.
async fn accept_client(
    mut stream: TcpStream,
    addr: SocketAddr,
    registry: &SessionRegistry,
    settings: &ServerSettings,
    events: &EventSender,
) {
    if registry.len().await >= settings.max_clients {
        warn!(
            "Refusing {}: {} clients already connected",
            addr, settings.max_clients
        );
        let refusal = format!("{}\n", Command::EXIT.encode());
        if let Err(e) = stream.write_all(refusal.as_bytes()).await {
            debug!("Could not tell {} it was refused: {}", addr, e);
        }
        let _ = stream.shutdown().await;
        return;
    }

    let connection = Connection::from_stream(stream, events.clone());
    match registry.register(connection.clone()).await {
        Ok(id) => {
            connection.start();
            info!("New connection: {} (session {})", addr, id);
        }
        Err(e) => {
            warn!("Failed to register {}: {}", addr, e);
            connection.shutdown().await;
        }
    }
}

/// Feeds connection events into the registry, one at a time so lines from
/// one client are relayed in the order they were received.
async fn dispatch_events(
    registry: Arc<SessionRegistry>,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Connected { id, peer } => {
                debug!("Connection {} established with {}", id, peer);
            }
            ConnectionEvent::Line { id, line } => registry.on_line(id, line).await,
            ConnectionEvent::Closed { id, reason } => {
                if registry.remove(id, reason).await.is_some() {
                    info!("Client {} disconnected", id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::sync::oneshot;
    use tokio::time::{sleep, timeout};

    fn local_settings(max_clients: usize) -> ServerSettings {
        ServerSettings {
            bind_address: "127.0.0.1".into(),
            port: 0,
            max_clients,
            ..ServerSettings::default()
        }
    }

    async fn wait_for_sessions(registry: &SessionRegistry, count: usize) {
        timeout(Duration::from_secs(2), async {
            while registry.len().await != count {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("registry never reached the expected size");
    }

    #[tokio::test]
    async fn clients_over_the_limit_are_sent_exit() {
        let server = Server::bind(local_settings(1)).await.unwrap();
        let addr = server.local_addr().unwrap();
        let registry = server.registry();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async move {
            let _ = stop_rx.await;
        }));

        let _first = TcpStream::connect(addr).await.unwrap();
        wait_for_sessions(&registry, 1).await;

        let second = TcpStream::connect(addr).await.unwrap();
        let mut reader = BufReader::new(second);
        let mut line = String::new();
        timeout(Duration::from_secs(2), reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, "!EXIT\n");
        assert_eq!(registry.len().await, 1);

        let _ = stop_tx.send(());
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_sends_exit_to_connected_clients() {
        let server = Server::bind(local_settings(8)).await.unwrap();
        let addr = server.local_addr().unwrap();
        let registry = server.registry();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async move {
            let _ = stop_rx.await;
        }));

        let mut client = BufReader::new(TcpStream::connect(addr).await.unwrap());
        client.get_mut().write_all(b"!CHATNAME Alice\n").await.unwrap();
        wait_for_sessions(&registry, 1).await;

        let _ = stop_tx.send(());
        handle.await.unwrap().unwrap();

        let mut line = String::new();
        client.read_line(&mut line).await.unwrap();
        assert_eq!(line, "!EXIT\n");
        assert!(registry.is_empty().await);
    }
}
