//! Server-to-server federation.
//!
//! Peers speak the same line protocol as clients, with the sender's
//! nickname spelled out (`JOIN <nick> <#channel>`, `MSG <from> <dest> <text>`).
//! Every command a peer sends is applied locally and, once accepted,
//! relayed verbatim to every *other* linked peer. This is a flood fill over
//! whatever mesh the operators configured: the only loop protection is not
//! echoing a command back to the link it came in on, so a cyclic mesh can
//! deliver the same event more than once.
//!
//! # Handshake
//!
//! When a link comes up, either side replays its whole view of the
//! network: a `NICK` for every known nickname, then a `JOIN` for every
//! channel membership. Both sides do this, so the two registries converge.
//!
//! # Collisions and netsplits
//!
//! A `NICK` for a name that already exists here kills the name on both
//! sides: `KILL <nick> nickname collision` goes to every peer and the local
//! holder is removed. When a link drops, every nickname announced over it
//! is killed with reason `netsplit` and the kill is forwarded to the
//! remaining peers.

use crate::hub::{Flow, Hub};
use crate::registry::{self, ConnId};
use crate::wire::PeerCommand;

const COLLISION: &str = "nickname collision";
const NETSPLIT: &str = "netsplit";

impl Hub {
    /// Replay the roster to a freshly linked peer, then start routing to it.
    pub(crate) fn on_peer_connect(&mut self, peer: ConnId) {
        let mut burst: Vec<String> = self
            .registry
            .nicknames()
            .map(|n| {
                PeerCommand::Nick {
                    name: n.name().to_string(),
                }
                .to_string()
            })
            .collect();
        for ch in self.registry.channels() {
            for member in ch.member_names() {
                burst.push(
                    PeerCommand::Join {
                        nick: member.to_string(),
                        channel: ch.name().to_string(),
                    }
                    .to_string(),
                );
            }
        }
        tracing::info!(%peer, lines = burst.len(), "sending link burst");
        for line in burst {
            self.send(peer, line);
        }
        self.registry.add_peer(peer);
    }

    /// Netsplit: everyone reachable only through `peer` is gone.
    pub(crate) fn on_peer_disconnect(&mut self, peer: ConnId) {
        self.registry.remove_peer(peer);
        let lost = self.registry.remote_nicks_of(peer);
        tracing::warn!(%peer, nicknames = lost.len(), "netsplit");
        for nick in lost {
            let kill = PeerCommand::Kill {
                nick: nick.clone(),
                reason: NETSPLIT.to_string(),
            };
            self.send_to_peers(&kill.to_string(), None);
            self.kill_nickname(&nick, NETSPLIT);
        }
    }

    /// Handle one packet from a peer link.
    pub(crate) fn handle_peer_packet(&mut self, peer: ConnId, packet: &str) -> Flow {
        let cmd = match PeerCommand::parse(packet) {
            Ok(cmd) => cmd,
            Err(e) => {
                tracing::warn!(%peer, %e, %packet, "ignoring malformed peer command");
                return Flow::Continue;
            }
        };
        let accepted = match &cmd {
            PeerCommand::Nick { name } => self.peer_nick(peer, name),
            PeerCommand::Join { nick, channel } => self.peer_join(peer, nick, channel),
            PeerCommand::Leave { nick, channel } => self.peer_leave(peer, nick, channel),
            PeerCommand::Msg { dest, .. } => self.peer_msg(dest, packet),
            PeerCommand::Kill { nick, reason } => self.peer_kill(peer, nick, reason),
        };
        if accepted {
            self.send_to_peers(packet, Some(peer));
        }
        Flow::Continue
    }

    fn peer_nick(&mut self, peer: ConnId, name: &str) -> bool {
        if !registry::valid_nickname(name) {
            tracing::warn!(%peer, nick = %name, "peer announced an illegal nickname");
            return false;
        }
        if self.registry.lookup(name).is_some() {
            tracing::warn!(%peer, nick = %name, "nickname collision");
            let kill = PeerCommand::Kill {
                nick: name.to_string(),
                reason: COLLISION.to_string(),
            };
            self.send_to_peers(&kill.to_string(), None);
            self.kill_nickname(name, COLLISION);
            return false;
        }
        match self.registry.add_remote(peer, name) {
            Ok(()) => {
                tracing::debug!(%peer, nick = %name, "remote nickname added");
                true
            }
            Err(e) => {
                tracing::warn!(%peer, nick = %name, %e, "remote nickname refused");
                false
            }
        }
    }

    fn peer_join(&mut self, peer: ConnId, nick: &str, channel: &str) -> bool {
        match self.registry.join_remote(peer, nick, channel) {
            Ok(Some(name)) => {
                let line = PeerCommand::Join {
                    nick: nick.to_string(),
                    channel: name.clone(),
                }
                .to_string();
                self.send_to_local_members(&name, &line);
                true
            }
            Ok(None) => {
                tracing::debug!(%peer, %nick, %channel, "duplicate remote join");
                false
            }
            Err(e) => {
                tracing::warn!(%peer, %nick, %channel, %e, "ignoring peer JOIN");
                false
            }
        }
    }

    fn peer_leave(&mut self, peer: ConnId, nick: &str, channel: &str) -> bool {
        match self.registry.leave_remote(peer, nick, channel) {
            Ok(departure) => {
                if !departure.destroyed {
                    let line = PeerCommand::Leave {
                        nick: nick.to_string(),
                        channel: departure.channel.clone(),
                    }
                    .to_string();
                    self.send_to_local_members(&departure.channel, &line);
                }
                true
            }
            Err(e) => {
                tracing::warn!(%peer, %nick, %channel, %e, "ignoring peer LEAVE");
                false
            }
        }
    }

    /// Deliver to local recipients only; other servers get the relay.
    fn peer_msg(&mut self, dest: &str, packet: &str) -> bool {
        if dest.starts_with('#') {
            if self.registry.channel(dest).is_some() {
                self.send_to_local_members(dest, packet);
            } else {
                tracing::debug!(%dest, "peer message for unknown channel");
            }
            return true;
        }
        match self.registry.lookup(dest) {
            Some(registry::Nickname::Local { session, .. }) => {
                let session = *session;
                self.send(session, packet.to_string());
            }
            Some(registry::Nickname::Remote { .. }) => {}
            None => tracing::debug!(%dest, "peer message for unknown nickname"),
        }
        true
    }

    fn peer_kill(&mut self, peer: ConnId, nick: &str, reason: &str) -> bool {
        if self.registry.lookup(nick).is_none() {
            tracing::debug!(%peer, %nick, "KILL for unknown nickname");
            return false;
        }
        self.kill_nickname(nick, reason);
        true
    }
}
