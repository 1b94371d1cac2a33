//! The TCP connection and its three I/O workers.
//!
//! ```text
//!                 ┌──────────── outbound queue ────────────┐
//!  caller ──add──►│ Registry                     writer ───┼──► socket
//!                 │    ▲                       heartbeat ──┘
//!                 │    │ process()
//!                 │    └──────── inbound queue ◄── reader ◄──── socket
//! ```
//!
//! The reader, writer, and heartbeat run as tokio tasks. They never touch
//! the registry; dispatch happens only when the caller calls
//! [`Connection::process`], on the caller's task. A `watch` channel
//! carries the "link is up" flag: shutdown, a reader EOF, and a failed
//! write all clear it, and every worker exits when it drops.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use oxygen_protocol::wire::HEARTBEAT_NODE;
use oxygen_protocol::{HEADER_LEN, Message, parse_header};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::registry::FrameSender;
use crate::{
    ConnectionConfig, ConnectionId, ConnectionStats, Registry, Subscriber,
    SubscriberId, TransportError,
};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a connection.
///
/// ```text
/// Disconnected → Connecting → Connected → Disconnected
/// ```
///
/// There is no way back from the final `Disconnected`: reconnecting means
/// building a new [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A live connection to an Oxygen server.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    registry: Registry,
    inbound: mpsc::UnboundedReceiver<Message>,
    link: watch::Sender<bool>,
    stats: Arc<ConnectionStats>,
    workers: Vec<JoinHandle<()>>,
}

impl Connection {
    /// Connects to the server and starts the reader, writer, and
    /// heartbeat workers.
    ///
    /// # Errors
    ///
    /// `ConnectFailed` if the address does not resolve or the server
    /// refuses the connection.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, TransportError> {
        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        let addr = config.addr();
        tracing::debug!(%id, %addr, state = ?ConnectionState::Connecting, "connecting");

        let stream = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .map_err(|source| TransportError::ConnectFailed {
                addr: addr.clone(),
                source,
            })?;
        let peer = stream
            .set_nodelay(config.nodelay)
            .and_then(|()| stream.peer_addr())
            .map_err(|source| TransportError::ConnectFailed { addr, source })?;

        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (link, _) = watch::channel(true);
        let stats = Arc::new(ConnectionStats::default());

        let sender = FrameSender::new(outbound_tx, inbound_tx.clone());
        let workers = vec![
            tokio::spawn(read_loop(
                id,
                read_half,
                inbound_tx,
                link.clone(),
                Arc::clone(&stats),
                config.max_frame_size,
            )),
            tokio::spawn(write_loop(id, write_half, outbound_rx, link.clone(), Arc::clone(&stats))),
            tokio::spawn(heartbeat_loop(id, sender.clone(), link.subscribe(), config.heartbeat_interval)),
        ];

        tracing::info!(%id, %peer, "connected");
        Ok(Self {
            id,
            peer,
            registry: Registry::new(sender, Arc::clone(&stats)),
            inbound: inbound_rx,
            link,
            stats,
            workers,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// True while the link is up.
    ///
    /// Cleared when the peer closes the socket, when a read or write
    /// fails, and on shutdown.
    pub fn is_connected(&self) -> bool {
        *self.link.borrow()
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn registry(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Sends `subscriber`'s request and registers it for replies.
    pub fn add(&mut self, subscriber: Subscriber) -> Result<SubscriberId, TransportError> {
        self.registry.add(subscriber)
    }

    pub fn remove(&mut self, id: SubscriberId) -> bool {
        self.registry.remove(id)
    }

    /// Sends a frame that expects no reply.
    pub fn send(&self, msg: Message) -> Result<(), TransportError> {
        self.registry.send(msg)
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.stats.bytes_sent()
    }

    pub fn bytes_received(&self) -> u64 {
        self.stats.bytes_received()
    }

    /// Dispatches queued inbound frames on the calling task.
    ///
    /// With `wait == false` this drains whatever is queued and returns at
    /// once (the per-frame tick of a game loop). With `wait == true` it
    /// first waits until at least one frame is queued or the link drops.
    ///
    /// Returns the number of frames dispatched.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` once the link is down and the queue is empty.
    /// Frames that arrived before the link dropped are still delivered.
    pub async fn process(&mut self, wait: bool) -> Result<usize, TransportError> {
        let mut processed = 0;

        if wait {
            let mut link = self.link.subscribe();
            tokio::select! {
                biased;
                msg = self.inbound.recv() => {
                    if let Some(msg) = msg {
                        self.registry.dispatch(&msg);
                        processed += 1;
                    }
                }
                _ = link.wait_for(|up| !*up) => {}
            }
        }

        while let Ok(msg) = self.inbound.try_recv() {
            self.registry.dispatch(&msg);
            processed += 1;
        }

        if processed == 0 && !self.is_connected() {
            return Err(TransportError::ConnectionClosed(format!("{} link down", self.id)));
        }
        Ok(processed)
    }

    /// Stops all three workers and waits for them to exit.
    pub async fn shutdown(mut self) {
        self.link.send_replace(false);
        for worker in std::mem::take(&mut self.workers) {
            if let Err(e) = worker.await {
                tracing::debug!(id = %self.id, error = %e, "worker ended abnormally");
            }
        }
        tracing::info!(id = %self.id, "connection shut down");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.link.send_replace(false);
        for worker in &self.workers {
            worker.abort();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .field("registry", &self.registry)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

/// Reads frames until EOF, a read error, or shutdown.
async fn read_loop(
    id: ConnectionId,
    mut socket: OwnedReadHalf,
    inbound: mpsc::UnboundedSender<Message>,
    link: watch::Sender<bool>,
    stats: Arc<ConnectionStats>,
    max_frame_size: usize,
) {
    tracing::debug!(%id, "reader started");
    let mut running = link.subscribe();

    loop {
        let frame = tokio::select! {
            frame = read_frame(&mut socket, max_frame_size) => frame,
            _ = running.wait_for(|up| !*up) => break,
        };

        match frame {
            Ok((frame_id, body)) => {
                stats.record_received(HEADER_LEN + body.len());
                tracing::trace!(%id, frame_id, bytes = body.len(), "frame received");
                match Message::from_body(frame_id, &body) {
                    Ok(msg) => {
                        if inbound.send(msg).is_err() {
                            break;
                        }
                    }
                    // The size field was fine, so the next frame still
                    // starts at a known boundary.
                    Err(error) => tracing::warn!(%id, %error, "malformed frame dropped"),
                }
            }
            Err(TransportError::ReceiveFailed(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                tracing::info!(%id, "peer closed connection");
                break;
            }
            Err(error) => {
                tracing::error!(%id, %error, "read failed");
                break;
            }
        }
    }

    link.send_replace(false);
    tracing::debug!(%id, "reader stopped");
}

/// Reads one `[size][id][body]` frame.
async fn read_frame(
    socket: &mut OwnedReadHalf,
    max_frame_size: usize,
) -> Result<(i32, Vec<u8>), TransportError> {
    let mut header = [0u8; HEADER_LEN];
    socket
        .read_exact(&mut header)
        .await
        .map_err(TransportError::ReceiveFailed)?;

    let (size, frame_id) = parse_header(&header);
    let size = usize::try_from(size).map_err(|_| {
        TransportError::ReceiveFailed(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("negative frame size {size}"),
        ))
    })?;
    if size > max_frame_size {
        return Err(TransportError::FrameTooLarge {
            size,
            limit: max_frame_size,
        });
    }

    let mut body = vec![0u8; size];
    socket
        .read_exact(&mut body)
        .await
        .map_err(TransportError::ReceiveFailed)?;
    Ok((frame_id, body))
}

/// Writes queued frames in order until a write fails or shutdown.
async fn write_loop(
    id: ConnectionId,
    mut socket: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    link: watch::Sender<bool>,
    stats: Arc<ConnectionStats>,
) {
    tracing::debug!(%id, "writer started");
    let mut running = link.subscribe();

    loop {
        let frame = tokio::select! {
            biased;
            _ = running.wait_for(|up| !*up) => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if let Err(e) = socket.write_all(&frame).await {
            let error = TransportError::SendFailed(e);
            tracing::error!(%id, %error, "write failed, closing connection");
            link.send_replace(false);
            break;
        }
        stats.record_sent(frame.len());
        tracing::trace!(%id, bytes = frame.len(), "frame sent");
    }

    let _ = socket.shutdown().await;
    tracing::debug!(%id, "writer stopped");
}

/// Queues a keep-alive frame every `interval` until shutdown.
async fn heartbeat_loop(
    id: ConnectionId,
    sender: FrameSender,
    mut running: watch::Receiver<bool>,
    interval: std::time::Duration,
) {
    tracing::debug!(%id, ?interval, "heartbeat started");
    // `interval_at` panics on a zero period.
    let interval = interval.max(std::time::Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = running.wait_for(|up| !*up) => break,
            _ = ticker.tick() => {
                if sender.send(Message::new(HEARTBEAT_NODE, "")).is_err() {
                    break;
                }
                tracing::trace!(%id, "heartbeat queued");
            }
        }
    }
    tracing::debug!(%id, "heartbeat stopped");
}
