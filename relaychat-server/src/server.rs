//! The connection reactor.
//!
//! One task owns the [`Hub`] and waits on both listeners, the event channel
//! fed by per-connection tasks, and a 1s tick that drives the outbound peer
//! dial. Each accepted or dialed socket is split into a reader task (framing
//! bytes into packets) and a writer task (draining the connection's
//! outbound queue). Only the reactor mutates chat state.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::ServerConfig;
use crate::dial::{DialState, PeerDialer};
use crate::error::FrameError;
use crate::framer::LineFramer;
use crate::hub::{Hub, LinkKind, CLIENT_QUEUE, PEER_QUEUE};
use crate::registry::ConnId;

const TICK: Duration = Duration::from_secs(1);
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const READ_CHUNK: usize = 2048;
const EVENT_QUEUE: usize = 1024;
/// Lines coalesced into one write before flushing.
const WRITE_BATCH: usize = 64;
/// A write (or the closing half-close) that makes no progress for this long
/// ends the connection.
const WRITE_STALL: Duration = Duration::from_secs(5);

/// What connection tasks report back to the reactor.
#[derive(Debug)]
enum Event {
    Packets { conn: ConnId, packets: Vec<String> },
    FrameError { conn: ConnId, err: FrameError },
    Closed { conn: ConnId, reason: String },
    Dialed { target: String, result: io::Result<TcpStream> },
}

pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    async fn bind(&self) -> Result<(TcpListener, TcpListener)> {
        let client_addr = self.config.client_addr();
        let client = TcpListener::bind(&client_addr)
            .await
            .with_context(|| format!("binding client listener on {client_addr}"))?;
        let peer_addr = self.config.peer_addr();
        let peer = TcpListener::bind(&peer_addr)
            .await
            .with_context(|| format!("binding peer listener on {peer_addr}"))?;
        Ok((client, peer))
    }

    /// Run the server until a listener fails.
    pub async fn run(self) -> Result<()> {
        let (client, peer) = self.bind().await?;
        tracing::info!("Client listener on {}", client.local_addr()?);
        tracing::info!("Peer listener on {}", peer.local_addr()?);
        if let Some(target) = &self.config.peer {
            tracing::info!(peer = %target, "will keep a link to peer");
        }
        Reactor::new(&self.config).run(client, peer).await
    }

    /// Start the server and return the bound client and peer addresses plus
    /// the reactor task (for testing).
    pub async fn start(self) -> Result<(SocketAddr, SocketAddr, JoinHandle<Result<()>>)> {
        let (client, peer) = self.bind().await?;
        let client_addr = client.local_addr()?;
        let peer_addr = peer.local_addr()?;
        tracing::info!("Listening on {client_addr} (clients), {peer_addr} (peers)");
        let reactor = Reactor::new(&self.config);
        let handle = tokio::spawn(reactor.run(client, peer));
        Ok((client_addr, peer_addr, handle))
    }
}

struct Reactor {
    hub: Hub,
    dialer: PeerDialer,
    events_tx: mpsc::Sender<Event>,
    events: mpsc::Receiver<Event>,
}

impl Reactor {
    fn new(config: &ServerConfig) -> Self {
        let (events_tx, events) = mpsc::channel(EVENT_QUEUE);
        Self {
            hub: Hub::new(config.motd.clone()),
            dialer: PeerDialer::new(config.peer.clone(), config.peer_retry_max()),
            events_tx,
            events,
        }
    }

    async fn run(mut self, client: TcpListener, peer: TcpListener) -> Result<()> {
        let mut tick = tokio::time::interval(TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                accepted = client.accept() => {
                    let (stream, addr) = accepted.context("accepting client connection")?;
                    let conn = self.attach(stream, LinkKind::Client);
                    tracing::debug!(%conn, %addr, "accepted client");
                }
                accepted = peer.accept() => {
                    let (stream, addr) = accepted.context("accepting peer connection")?;
                    let conn = self.attach(stream, LinkKind::Peer);
                    tracing::info!(%conn, peer = %addr, "accepted peer link");
                }
                Some(event) = self.events.recv() => self.handle_event(event),
                _ = tick.tick() => self.drive_dialer(),
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Packets { conn, packets } => self.hub.dispatch(conn, packets),
            Event::FrameError { conn, err } => self.hub.frame_error(conn, err),
            Event::Closed { conn, reason } => self.hub.transport_closed(conn, &reason),
            Event::Dialed { target, result } => match result {
                Ok(stream) => {
                    let conn = self.attach(stream, LinkKind::Peer);
                    if self.hub.is_attached(conn) {
                        tracing::info!(%conn, peer = %target, "peer link established");
                        self.dialer.connected(conn);
                    } else {
                        self.dialer.failed(Instant::now());
                    }
                }
                Err(e) => {
                    tracing::warn!(peer = %target, "Failed to connect to peer: {e}");
                    self.dialer.failed(Instant::now());
                }
            },
        }
    }

    fn drive_dialer(&mut self) {
        let now = Instant::now();
        if let DialState::Connected(conn) = self.dialer.state() {
            if !self.hub.is_attached(conn) {
                self.dialer.link_lost(conn, now);
            }
        }
        let Some(target) = self.dialer.poll(now) else {
            return;
        };
        tracing::debug!(peer = %target, "dialing peer");
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&target)).await
            {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
            };
            let _ = events.send(Event::Dialed { target, result }).await;
        });
    }

    /// Register a socket with the hub and spawn its reader and writer.
    fn attach(&mut self, stream: TcpStream, kind: LinkKind) -> ConnId {
        let conn = self.hub.next_conn_id();
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%conn, "set_nodelay failed: {e}");
        }
        let (read_half, write_half) = stream.into_split();
        let depth = match kind {
            LinkKind::Client => CLIENT_QUEUE,
            LinkKind::Peer => PEER_QUEUE,
        };
        let (tx, rx) = mpsc::channel(depth);
        let writer = tokio::spawn(write_loop(conn, write_half, rx, self.events_tx.clone()));
        let writer = Some(writer.abort_handle());
        match kind {
            LinkKind::Client => self.hub.attach_client(conn, tx, writer),
            LinkKind::Peer => self.hub.attach_peer(conn, tx, writer),
        }
        let reader = tokio::spawn(read_loop(conn, read_half, self.events_tx.clone()));
        self.hub.set_reader(conn, reader.abort_handle());
        conn
    }
}

async fn read_loop(conn: ConnId, mut reader: OwnedReadHalf, events: mpsc::Sender<Event>) {
    let mut framer = LineFramer::new();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                let _ = events
                    .send(Event::Closed {
                        conn,
                        reason: "end of stream".to_string(),
                    })
                    .await;
                return;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(%conn, "Read error: {e}");
                let _ = events
                    .send(Event::Closed {
                        conn,
                        reason: format!("read error: {e}"),
                    })
                    .await;
                return;
            }
        };
        framer.extend(&buf[..n]);
        let (packets, err) = framer.drain_packets();
        if !packets.is_empty() && events.send(Event::Packets { conn, packets }).await.is_err() {
            return;
        }
        if let Some(err) = err {
            let _ = events.send(Event::FrameError { conn, err }).await;
            return;
        }
    }
}

/// Drain the outbound queue until the hub drops its sender, then half-close.
///
/// Every batch and the final shutdown must complete within [`WRITE_STALL`];
/// a peer that stops reading cannot pin the task and its socket.
async fn write_loop(
    conn: ConnId,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<String>,
    events: mpsc::Sender<Event>,
) {
    let mut batch = String::new();
    while let Some(line) = rx.recv().await {
        batch.clear();
        batch.push_str(&line);
        batch.push('\n');
        for _ in 0..WRITE_BATCH {
            let Ok(queued) = rx.try_recv() else {
                break;
            };
            batch.push_str(&queued);
            batch.push('\n');
        }
        let written = tokio::time::timeout(WRITE_STALL, async {
            writer.write_all(batch.as_bytes()).await?;
            writer.flush().await
        })
        .await
        .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "write stalled")));
        if let Err(e) = written {
            tracing::warn!(%conn, "Write error: {e}");
            let _ = events
                .send(Event::Closed {
                    conn,
                    reason: format!("write error: {e}"),
                })
                .await;
            return;
        }
    }
    if tokio::time::timeout(WRITE_STALL, writer.shutdown()).await.is_err() {
        tracing::debug!(%conn, "half-close timed out");
    }
}
