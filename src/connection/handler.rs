use log::{debug, error, info, warn};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::{TcpSocket, TcpStream, lookup_host};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::connection::state::{CloseReason, ConnectionEvent, ConnectionId, ConnectionState};
use crate::error::{ConnectionError, ProtocolError};
use crate::protocol::{ChatLine, Command, parse_line};

/// Longest accepted line, not counting the `\n` or `\r\n` terminator.
pub const MAX_LINE_LENGTH: usize = 4096;

/// Lines that may wait for a slow peer before the connection is dropped
pub const OUTBOX_CAPACITY: usize = 256;

/// Upper bound for flushing queued lines while releasing the output stream
pub const RELEASE_TIMEOUT: Duration = Duration::from_secs(2);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type EventSender = mpsc::UnboundedSender<ConnectionEvent>;

/// Hands out process-wide unique connection ids, never reused.
pub fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

struct Shared {
    id: ConnectionId,
    peer: String,
    state: watch::Sender<ConnectionState>,
    close_reason: StdMutex<Option<CloseReason>>,
    reader: StdMutex<Option<BoxedReader>>,
    /// Taken when closing begins, which ends the writer task once it drains
    outbox: StdMutex<Option<mpsc::Sender<Vec<u8>>>>,
    writer_task: StdMutex<Option<JoinHandle<()>>>,
    events: EventSender,
}

/// Handle to one endpoint.
///
/// Cloning is cheap and every clone talks to the same endpoint. The receive
/// loop runs on its own task once [`Connection::start`] is called; lines and
/// lifecycle changes are reported as [`ConnectionEvent`]s on the channel
/// given at construction. Outgoing lines go through a bounded queue drained
/// by a writer task, so a peer that stops reading never blocks the sender.
///
/// `send` on an endpoint that is not `Connected` returns
/// [`ConnectionError::NotConnected`] and never touches the stream.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Opens a client connection with a bounded timeout covering name
    /// resolution and the TCP handshake.
    ///
    /// No retry is attempted. On failure nothing is left open.
    pub async fn connect(
        host: &str,
        port: u16,
        timeout: Duration,
        keepalive: bool,
        events: EventSender,
    ) -> Result<Self, ConnectionError> {
        let addr = format!("{}:{}", host, port);
        debug!("Connecting to {} (timeout {:?})", addr, timeout);

        let stream = match tokio::time::timeout(timeout, open_stream(host, port, keepalive)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ConnectionError::ConnectFailed {
                    addr,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(ConnectionError::ConnectFailed {
                    addr,
                    reason: format!("timed out after {} ms", timeout.as_millis()),
                });
            }
        };

        info!("Connected to {}", addr);
        Ok(Self::from_stream(stream, events))
    }

    /// Wraps an already established socket, e.g. one returned by `accept`.
    pub fn from_stream(stream: TcpStream, events: EventSender) -> Self {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (read_half, write_half) = stream.into_split();
        Self::from_parts(peer, Box::new(read_half), Box::new(write_half), events)
    }

    /// Builds a connection over arbitrary byte streams in the `Connected`
    /// state and starts its writer task. Must be called inside a runtime.
    pub fn from_parts(
        peer: impl Into<String>,
        reader: BoxedReader,
        writer: BoxedWriter,
        events: EventSender,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connected);
        let (outbox, queued) = mpsc::channel(OUTBOX_CAPACITY);
        let shared = Arc::new(Shared {
            id: next_connection_id(),
            peer: peer.into(),
            state,
            close_reason: StdMutex::new(None),
            reader: StdMutex::new(Some(reader)),
            outbox: StdMutex::new(Some(outbox)),
            writer_task: StdMutex::new(None),
            events,
        });

        let task = tokio::spawn(write_loop(Arc::clone(&shared), writer, queued));
        *lock(&shared.writer_task) = Some(task);

        let _ = shared.events.send(ConnectionEvent::Connected {
            id: shared.id,
            peer: shared.peer.clone(),
        });

        Self { shared }
    }

    /// Spawns the receive loop. Later calls do nothing and return `None`.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        let reader = lock(&self.shared.reader).take()?;
        let shared = Arc::clone(&self.shared);
        Some(tokio::spawn(receive_loop(shared, reader)))
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn peer(&self) -> &str {
        &self.shared.peer
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_live(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Cause of the close, once the endpoint has left `Connected`.
    pub fn close_reason(&self) -> Option<CloseReason> {
        lock(&self.shared.close_reason).clone()
    }

    /// Queues one line for the writer task, which appends the `\n`.
    ///
    /// Never waits on the peer. When the queue is full the peer is too slow
    /// to keep up and the endpoint starts closing.
    pub fn send(&self, line: &str) -> Result<(), ConnectionError> {
        if line.contains(['\n', '\r']) {
            return Err(ProtocolError::EmbeddedNewline.into());
        }

        let mut frame = Vec::with_capacity(line.len() + 1);
        frame.extend_from_slice(line.as_bytes());
        frame.push(b'\n');

        let outbox = lock(&self.shared.outbox);
        // begin_close takes the sender under this lock
        let Some(sender) = outbox.as_ref() else {
            return Err(ConnectionError::NotConnected);
        };

        match sender.try_send(frame) {
            Ok(()) => {
                debug!("Queued for {}: {}", self.shared.peer, line);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                drop(outbox);
                warn!(
                    "{} lines already waiting for {}, dropping the connection",
                    OUTBOX_CAPACITY, self.shared.peer
                );
                self.shared
                    .begin_close(CloseReason::IoError("outgoing queue full".into()));
                Err(ConnectionError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                drop(outbox);
                self.shared
                    .begin_close(CloseReason::IoError("writer stopped".into()));
                Err(ConnectionError::NotConnected)
            }
        }
    }

    pub fn send_line(&self, line: &ChatLine) -> Result<(), ConnectionError> {
        self.send(&line.to_string())
    }

    /// Closes the endpoint on behalf of the owner and waits until it is
    /// `Closed`. Idempotent.
    pub async fn shutdown(&self) {
        self.close(CloseReason::LocalShutdown).await;
    }

    /// Like [`Connection::shutdown`] but records a specific cause.
    ///
    /// Lines queued before the call are still flushed for up to
    /// [`RELEASE_TIMEOUT`]; after that the output stream is dropped anyway.
    pub async fn close(&self, reason: CloseReason) {
        self.shared.begin_close(reason);

        // receive loop never started, so nobody else will release the streams
        let unstarted = lock(&self.shared.reader).take();
        if let Some(reader) = unstarted {
            drop(reader);
            self.shared.finish_close().await;
        }

        self.closed().await;
    }

    /// Resolves once the endpoint reaches `Closed`.
    pub async fn closed(&self) {
        let mut state = self.shared.state.subscribe();
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    /// Moves `Connected -> Closing`. Returns false if closing had already begun.
    ///
    /// The reason is recorded before `Closing` becomes visible, and the
    /// outbox is taken under its own lock so no `send` can slip in between.
    fn begin_close(&self, reason: CloseReason) -> bool {
        let mut outbox = lock(&self.outbox);
        let description = reason.to_string();

        let started = self.state.send_if_modified(|state| {
            if *state != ConnectionState::Connected {
                return false;
            }
            *lock(&self.close_reason) = Some(reason);
            *state = ConnectionState::Closing;
            true
        });

        if started {
            outbox.take();
            debug!("Connection {} ({}) closing: {}", self.id, self.peer, description);
        }
        started
    }

    /// Releases the output stream (the input stream is already gone), which
    /// drops the socket, then reports `Closed` exactly once.
    async fn finish_close(&self) {
        let reason = lock(&self.close_reason)
            .clone()
            .unwrap_or(CloseReason::LocalShutdown);

        let task = lock(&self.writer_task).take();
        if let Some(task) = task {
            self.release_writer(task, reason.flushes_output()).await;
        }

        let already_closed = !self.state.send_if_modified(|state| {
            if *state != ConnectionState::Closed {
                *state = ConnectionState::Closed;
                true
            } else {
                false
            }
        });
        if already_closed {
            return;
        }

        info!("Connection {} ({}) closed: {}", self.id, self.peer, reason);

        let _ = self.events.send(ConnectionEvent::Closed {
            id: self.id,
            reason,
        });
    }

    /// Waits for the writer task to flush what is queued, or aborts it right
    /// away when nothing more should be written. The writer is dropped
    /// either way before this returns.
    async fn release_writer(&self, mut task: JoinHandle<()>, flush: bool) {
        if flush {
            if tokio::time::timeout(RELEASE_TIMEOUT, &mut task).await.is_ok() {
                return;
            }
            warn!(
                "Output stream for {} still busy after {:?}, discarding queued lines",
                self.peer, RELEASE_TIMEOUT
            );
        }

        task.abort();
        let _ = task.await;
    }

    /// Classifies one raw line and reports it. Returns a close reason when
    /// the line ends the session.
    fn handle_raw_line(&self, raw: &[u8]) -> Option<CloseReason> {
        let text = String::from_utf8_lossy(raw);
        let line = match parse_line(&text) {
            Ok(line) => line,
            Err(e) => {
                warn!("Ignoring line from {}: {}", self.peer, e);
                return None;
            }
        };

        debug!("Received from {}: {:?}", self.peer, line);
        let is_exit = line.as_command() == Some(&Command::EXIT);

        if self
            .events
            .send(ConnectionEvent::Line { id: self.id, line })
            .is_err()
        {
            debug!("Owner of connection {} is gone", self.id);
            return Some(CloseReason::LocalShutdown);
        }

        is_exit.then_some(CloseReason::PeerExit)
    }
}

/// Drains the outbox into the output stream until the outbox is closed or a
/// write fails.
async fn write_loop(shared: Arc<Shared>, mut writer: BoxedWriter, mut queued: mpsc::Receiver<Vec<u8>>) {
    while let Some(frame) = queued.recv().await {
        let written = match writer.write_all(&frame).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            error!("Failed to send to {}: {}", shared.peer, e);
            shared.begin_close(CloseReason::IoError(e.to_string()));
            return;
        }
    }

    if let Err(e) = writer.shutdown().await {
        warn!("Failed to close output stream for {}: {}", shared.peer, e);
    }
}

/// Outcome of reading one line off the wire.
#[derive(Debug, PartialEq, Eq)]
enum RawLine {
    /// `buf` holds one line, terminator included if there was one
    Complete,
    /// The line went past [`MAX_LINE_LENGTH`] and was discarded
    TooLong(usize),
    EndOfStream,
}

/// Reads one `\n`-terminated line into `buf` without ever buffering more
/// than [`MAX_LINE_LENGTH`] plus a `\r\n` terminator. Anything longer is
/// skipped up to and including the next `\n`.
async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<RawLine>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = MAX_LINE_LENGTH + 2;
    let read = (&mut *reader).take(limit as u64).read_until(b'\n', buf).await?;

    if read == 0 {
        return Ok(RawLine::EndOfStream);
    }
    if buf.ends_with(b"\n") || read < limit {
        let payload = strip_terminator(buf).len();
        if payload > MAX_LINE_LENGTH {
            return Ok(RawLine::TooLong(payload));
        }
        return Ok(RawLine::Complete);
    }

    let mut skipped = read;
    loop {
        let (found, used) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                break;
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(at) => (true, at + 1),
                None => (false, available.len()),
            }
        };
        reader.consume(used);
        skipped += used;
        if found {
            break;
        }
    }

    Ok(RawLine::TooLong(skipped))
}

fn strip_terminator(raw: &[u8]) -> &[u8] {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    raw.strip_suffix(b"\r").unwrap_or(raw)
}

/// Reads lines until the peer exits, the stream ends, an I/O error occurs,
/// or someone else starts closing the endpoint.
async fn receive_loop(shared: Arc<Shared>, reader: BoxedReader) {
    let mut reader = BufReader::new(reader);
    let mut state = shared.state.subscribe();
    let mut buf = Vec::new();

    let reason = loop {
        let read = tokio::select! {
            _ = closing_started(&mut state) => break None,
            read = read_line(&mut reader, &mut buf) => read,
        };

        match read {
            Ok(RawLine::EndOfStream) => break Some(CloseReason::EndOfStream),
            Ok(RawLine::TooLong(len)) => warn!(
                "Dropping {} byte line from {} (limit {})",
                len, shared.peer, MAX_LINE_LENGTH
            ),
            Ok(RawLine::Complete) => {
                if let Some(reason) = shared.handle_raw_line(&buf) {
                    break Some(reason);
                }
            }
            Err(e) => {
                error!("Failed to read from {}: {}", shared.peer, e);
                break Some(CloseReason::IoError(e.to_string()));
            }
        }
    };

    if let Some(reason) = reason {
        shared.begin_close(reason);
    }

    drop(reader);
    shared.finish_close().await;
}

async fn closing_started(state: &mut watch::Receiver<ConnectionState>) {
    let _ = state.wait_for(|s| *s >= ConnectionState::Closing).await;
}

async fn open_stream(host: &str, port: u16, keepalive: bool) -> io::Result<TcpStream> {
    let mut last_error = None;

    for addr in lookup_host((host, port)).await? {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_keepalive(keepalive)?;

        match socket.connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Connect attempt to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("{} did not resolve", host))
    }))
}
