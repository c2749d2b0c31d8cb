//! The single owner of all chat state.
//!
//! The reactor task holds one [`Hub`]. Reader tasks hand it framed packets,
//! writer tasks drain the per-connection queues it fills. Nothing else
//! touches the [`Registry`], so no locking is involved.
//!
//! Protocol handling lives in [`crate::connection`] (clients) and
//! [`crate::s2s`] (peers) as further `impl Hub` blocks.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::AbortHandle;

use crate::error::FrameError;
use crate::registry::{ConnId, Nickname, Registry};
use crate::wire::{PeerCommand, Reply};

/// Outbound queue depth for a client connection.
pub const CLIENT_QUEUE: usize = 4096;
/// Peers get a deeper queue: the link handshake replays the whole roster.
pub const PEER_QUEUE: usize = 65_536;

/// Which listener a connection came from (or, for peers, that we dialed it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Client,
    Peer,
}

/// What the reactor should do with the remaining packets of a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The connection is gone; drop the rest of the batch.
    Stop,
}

#[derive(Debug)]
struct Link {
    kind: LinkKind,
    tx: mpsc::Sender<String>,
    reader: Option<AbortHandle>,
    writer: Option<AbortHandle>,
}

pub struct Hub {
    pub(crate) registry: Registry,
    links: HashMap<ConnId, Link>,
    /// Connections whose queue rejected a line; closed once the current
    /// handler returns so member sets are never mutated mid-iteration.
    doomed: Vec<(ConnId, String)>,
    pub(crate) motd: String,
    next_id: u64,
}

impl Hub {
    pub fn new(motd: impl Into<String>) -> Self {
        Self {
            registry: Registry::new(),
            links: HashMap::new(),
            doomed: Vec::new(),
            motd: motd.into(),
            next_id: 0,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn next_conn_id(&mut self) -> ConnId {
        self.next_id += 1;
        ConnId(self.next_id)
    }

    pub fn is_attached(&self, conn: ConnId) -> bool {
        self.links.contains_key(&conn)
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    // ── Connection lifecycle ───────────────────────────────────────

    /// Start tracking an accepted client connection. `writer` is the task
    /// draining `tx`, stopped outright if the queue overflows.
    pub fn attach_client(
        &mut self,
        conn: ConnId,
        tx: mpsc::Sender<String>,
        writer: Option<AbortHandle>,
    ) {
        self.links.insert(
            conn,
            Link {
                kind: LinkKind::Client,
                tx,
                reader: None,
                writer,
            },
        );
        self.registry.add_session(conn);
        tracing::info!(%conn, "client connected");
    }

    /// Start tracking a peer link (accepted or dialed) and run the
    /// federation handshake on it.
    pub fn attach_peer(
        &mut self,
        conn: ConnId,
        tx: mpsc::Sender<String>,
        writer: Option<AbortHandle>,
    ) {
        self.links.insert(
            conn,
            Link {
                kind: LinkKind::Peer,
                tx,
                reader: None,
                writer,
            },
        );
        tracing::info!(%conn, "peer linked");
        self.on_peer_connect(conn);
        self.settle();
    }

    /// Remember the reader task so closing the connection can stop it.
    pub fn set_reader(&mut self, conn: ConnId, reader: AbortHandle) {
        match self.links.get_mut(&conn) {
            Some(link) => link.reader = Some(reader),
            // Closed while the reader was being spawned.
            None => reader.abort(),
        }
    }

    /// Destroy a connection. Idempotent: later calls for the same id are
    /// ignored.
    ///
    /// The link is forgotten first, then the disconnect hook reconciles
    /// the registry. Dropping the queue sender lets the writer task flush
    /// whatever is already queued (a final `KILL` or `CLOSE`), half-close
    /// the socket and exit; the writer bounds that drain itself.
    pub fn close(&mut self, conn: ConnId, reason: &str) {
        let Some(link) = self.links.remove(&conn) else {
            return;
        };
        if let Some(reader) = link.reader {
            reader.abort();
        }
        drop(link.tx);
        match link.kind {
            LinkKind::Client => {
                tracing::info!(%conn, %reason, "client connection closed");
                self.on_client_disconnect(conn);
            }
            LinkKind::Peer => {
                tracing::warn!(%conn, %reason, "peer link closed");
                self.on_peer_disconnect(conn);
            }
        }
    }

    // ── Reactor entry points ───────────────────────────────────────

    /// Dispatch the packets framed from one read, in order.
    pub fn dispatch(&mut self, conn: ConnId, packets: Vec<String>) {
        for packet in packets {
            let Some(kind) = self.links.get(&conn).map(|l| l.kind) else {
                break;
            };
            tracing::debug!(%conn, "<- {packet}");
            let flow = match kind {
                LinkKind::Client => self.handle_client_packet(conn, &packet),
                LinkKind::Peer => self.handle_peer_packet(conn, &packet),
            };
            self.reap();
            if flow == Flow::Stop {
                break;
            }
        }
        self.settle();
    }

    /// The reader hit an oversize packet.
    pub fn frame_error(&mut self, conn: ConnId, err: FrameError) {
        match self.links.get(&conn).map(|l| l.kind) {
            Some(LinkKind::Client) => {
                tracing::info!(%conn, %err, "client sent an oversize packet");
                self.send(conn, Reply::Close(&err.to_string()).to_string());
            }
            Some(LinkKind::Peer) => {
                tracing::warn!(%conn, %err, "peer sent an oversize packet");
            }
            None => return,
        }
        self.close(conn, &err.to_string());
        self.settle();
    }

    /// The socket reached EOF or failed on read or write.
    pub fn transport_closed(&mut self, conn: ConnId, reason: &str) {
        self.close(conn, reason);
        self.settle();
    }

    // ── Sending ────────────────────────────────────────────────────

    /// Queue one line (without `\n`) for a connection.
    ///
    /// Never blocks. A full or closed queue marks the connection for
    /// destruction at the end of the current operation.
    pub fn send(&mut self, conn: ConnId, line: String) {
        let Some(link) = self.links.get(&conn) else {
            tracing::debug!(%conn, "dropping line for closed connection");
            return;
        };
        tracing::debug!(%conn, "-> {line}");
        match link.tx.try_send(line) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(%conn, "outbound queue full");
                self.doomed.push((conn, "outbound queue full".to_string()));
            }
            Err(TrySendError::Closed(_)) => {
                self.doomed.push((conn, "writer stopped".to_string()));
            }
        }
    }

    /// Send to every linked peer, optionally skipping the one a relayed
    /// command arrived from.
    pub fn send_to_peers(&mut self, line: &str, except: Option<ConnId>) {
        let peers: Vec<ConnId> = self
            .registry
            .peers()
            .filter(|p| Some(*p) != except)
            .collect();
        for peer in peers {
            self.send(peer, line.to_string());
        }
    }

    /// Send to the members of `channel` that are connected to this server.
    pub fn send_to_local_members(&mut self, channel: &str, line: &str) {
        for conn in self.registry.local_members(channel) {
            self.send(conn, line.to_string());
        }
    }

    // ── Shared state transitions ───────────────────────────────────

    /// Remove a nickname everywhere on this server.
    ///
    /// Local co-members get one `KILL` each. A local victim also gets the
    /// `KILL` and is then disconnected. Peers are not told here; callers
    /// decide who needs to hear about it.
    pub fn kill_nickname(&mut self, nick: &str, reason: &str) -> Option<Nickname> {
        let killed = self.registry.kill(nick)?;
        let line = PeerCommand::Kill {
            nick: killed.nick.name().to_string(),
            reason: reason.to_string(),
        }
        .to_string();
        tracing::info!(nick = %killed.nick.name(), %reason, notified = killed.notify.len(), "nickname killed");
        for channel in &killed.destroyed {
            tracing::debug!(%channel, "channel emptied by kill");
        }
        for conn in &killed.notify {
            self.send(*conn, line.clone());
        }
        if let Nickname::Local { session, .. } = &killed.nick {
            self.send(*session, line);
            self.close(*session, "killed");
        }
        Some(killed.nick)
    }

    fn on_client_disconnect(&mut self, conn: ConnId) {
        let nick = self
            .registry
            .session(conn)
            .and_then(|s| s.nickname())
            .map(str::to_string);
        if let Some(nick) = nick {
            const REASON: &str = "Connection closed";
            self.kill_nickname(&nick, REASON);
            let line = PeerCommand::Kill {
                nick,
                reason: REASON.to_string(),
            }
            .to_string();
            self.send_to_peers(&line, None);
        }
        self.registry.remove_session(conn);
    }

    // ── Housekeeping ───────────────────────────────────────────────

    /// Close every connection whose queue rejected a line. Its writer is
    /// stopped without draining: the far end is not keeping up, and a
    /// blocked write would otherwise hold the socket forever.
    fn reap(&mut self) {
        while let Some((conn, reason)) = self.doomed.pop() {
            if let Some(writer) = self.links.get_mut(&conn).and_then(|l| l.writer.take()) {
                writer.abort();
            }
            self.close(conn, &reason);
        }
    }

    /// Close anything doomed, then verify the registry in debug builds.
    fn settle(&mut self) {
        self.reap();
        if cfg!(debug_assertions) {
            if let Err(violation) = self.registry.check_invariants() {
                tracing::error!(%violation, "registry invariant violated");
                debug_assert!(false, "registry invariant violated: {violation}");
            }
        }
    }
}

/// In-memory connections for handler tests.
#[cfg(test)]
pub(crate) mod testing {
    use tokio::sync::mpsc;
    use tokio::sync::mpsc::error::TryRecvError;

    use super::{Hub, CLIENT_QUEUE};
    use crate::registry::ConnId;

    /// The far end of a fake connection's outbound queue.
    pub(crate) struct Probe {
        pub(crate) conn: ConnId,
        rx: mpsc::Receiver<String>,
    }

    impl Probe {
        /// Everything queued so far.
        pub(crate) fn drain(&mut self) -> Vec<String> {
            let mut lines = Vec::new();
            while let Ok(line) = self.rx.try_recv() {
                lines.push(line);
            }
            lines
        }

        /// True once the hub dropped this connection. Discards anything
        /// still queued.
        pub(crate) fn is_closed(&mut self) -> bool {
            self.drain();
            matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
        }
    }

    pub(crate) fn hub() -> Hub {
        Hub::new("Welcome to relaychat")
    }

    pub(crate) fn client(hub: &mut Hub) -> Probe {
        let conn = hub.next_conn_id();
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE);
        hub.attach_client(conn, tx, None);
        Probe { conn, rx }
    }

    /// A client that has already sent `NICK` and had its MOTD drained.
    pub(crate) fn registered(hub: &mut Hub, nick: &str) -> Probe {
        let mut probe = client(hub);
        hub.dispatch(probe.conn, vec![format!("NICK {nick}")]);
        let lines = probe.drain();
        assert!(
            lines.iter().any(|l| l.starts_with("MOTD ")),
            "{nick} did not register: {lines:?}"
        );
        probe
    }

    pub(crate) fn peer(hub: &mut Hub) -> Probe {
        peer_with_queue(hub, super::PEER_QUEUE)
    }

    pub(crate) fn peer_with_queue(hub: &mut Hub, depth: usize) -> Probe {
        let conn = hub.next_conn_id();
        let (tx, rx) = mpsc::channel(depth);
        hub.attach_peer(conn, tx, None);
        Probe { conn, rx }
    }

    pub(crate) fn send(hub: &mut Hub, probe: &Probe, line: &str) {
        hub.dispatch(probe.conn, vec![line.to_string()]);
    }
}
