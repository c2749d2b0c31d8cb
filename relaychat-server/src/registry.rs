//! Nickname, channel, session and peer tables.
//!
//! The [`Registry`] is plain data: it never performs I/O. Operations return
//! what changed (who has to be told, whether a channel disappeared) and the
//! caller, the [`Hub`](crate::hub::Hub), turns that into outbound lines.
//!
//! Invariants kept here:
//! - a nickname is unique case-insensitively across local and remote users;
//! - a channel is in the table if and only if it has at least one member;
//! - a local member of a channel holds exactly one session slot for it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::error::{ChannelError, FederationError, InvariantViolation, NickError};

/// Longest nickname, in characters.
pub const NICK_MAX_LEN: usize = 9;
/// Channel names are `#` plus 1 to 8 characters.
pub const CHANNEL_MIN_LEN: usize = 2;
pub const CHANNEL_MAX_LEN: usize = 9;
/// Channels a single local session may be in at once.
pub const MAX_CHANNELS: usize = 10;

/// Identifies one connection for its whole life. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Case-folded table key for nicknames and channel names.
pub fn fold(name: &str) -> String {
    name.to_lowercase()
}

pub fn valid_nickname(name: &str) -> bool {
    let len = name.chars().count();
    (1..=NICK_MAX_LEN).contains(&len) && !name.starts_with('#')
}

pub fn valid_channel_name(name: &str) -> bool {
    let len = name.chars().count();
    name.starts_with('#') && (CHANNEL_MIN_LEN..=CHANNEL_MAX_LEN).contains(&len)
}

/// Who a nickname belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nickname {
    /// A client session on this server.
    Local { name: String, session: ConnId },
    /// Announced by a peer; traffic for it is routed through `peer`.
    Remote { name: String, peer: ConnId },
}

impl Nickname {
    pub fn name(&self) -> &str {
        match self {
            Self::Local { name, .. } | Self::Remote { name, .. } => name,
        }
    }

    /// The connection traffic for this nickname should be written to.
    pub fn route(&self) -> ConnId {
        match self {
            Self::Local { session, .. } => *session,
            Self::Remote { peer, .. } => *peer,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Channel {
    name: String,
    /// folded nickname -> nickname as announced
    members: BTreeMap<String, String>,
}

impl Channel {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: BTreeMap::new(),
        }
    }

    /// The name as spelled by whoever created the channel.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, nick: &str) -> bool {
        self.members.contains_key(&fold(nick))
    }

    /// Member nicknames in case-insensitive order.
    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.values().map(String::as_str)
    }

    fn insert(&mut self, nick: &str) -> bool {
        self.members.insert(fold(nick), nick.to_string()).is_none()
    }

    fn remove(&mut self, nick: &str) -> bool {
        self.members.remove(&fold(nick)).is_some()
    }
}

/// Per-client state. Unregistered until a nickname is bound.
#[derive(Debug, Clone, Default)]
pub struct ClientSession {
    nickname: Option<String>,
    /// Folded names of joined channels; `None` is a free slot.
    slots: [Option<String>; MAX_CHANNELS],
}

impl ClientSession {
    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    pub fn is_registered(&self) -> bool {
        self.nickname.is_some()
    }

    pub fn channel_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    fn slot_of(&self, key: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.as_deref() == Some(key))
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }
}

/// Result of leaving a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub channel: String,
    /// The last member left and the channel was removed.
    pub destroyed: bool,
}

/// Everything a kill touched, for the caller to announce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Killed {
    /// The entry removed from the nickname table.
    pub nick: Nickname,
    /// Local sessions that shared at least one channel with the victim,
    /// each listed once, never including the victim itself.
    pub notify: BTreeSet<ConnId>,
    /// Channels removed because the victim was their last member.
    pub destroyed: Vec<String>,
}

#[derive(Debug, Default)]
pub struct Registry {
    /// folded nickname -> owner
    nicks: HashMap<String, Nickname>,
    /// folded channel name -> channel
    channels: HashMap<String, Channel>,
    sessions: HashMap<ConnId, ClientSession>,
    peers: BTreeSet<ConnId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Sessions and peers ─────────────────────────────────────────

    pub fn add_session(&mut self, conn: ConnId) {
        self.sessions.entry(conn).or_default();
    }

    /// Forget a session. Its nickname, if any, must already be killed.
    pub fn remove_session(&mut self, conn: ConnId) -> Option<ClientSession> {
        self.sessions.remove(&conn)
    }

    pub fn session(&self, conn: ConnId) -> Option<&ClientSession> {
        self.sessions.get(&conn)
    }

    pub fn add_peer(&mut self, conn: ConnId) {
        self.peers.insert(conn);
    }

    pub fn remove_peer(&mut self, conn: ConnId) -> bool {
        self.peers.remove(&conn)
    }

    pub fn is_peer(&self, conn: ConnId) -> bool {
        self.peers.contains(&conn)
    }

    pub fn peers(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.peers.iter().copied()
    }

    // ── Lookups ────────────────────────────────────────────────────

    pub fn lookup(&self, nick: &str) -> Option<&Nickname> {
        self.nicks.get(&fold(nick))
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&fold(name))
    }

    pub fn nicknames(&self) -> impl Iterator<Item = &Nickname> {
        self.nicks.values()
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Remote nicknames announced through `peer`.
    pub fn remote_nicks_of(&self, peer: ConnId) -> Vec<String> {
        let mut names: Vec<String> = self
            .nicks
            .values()
            .filter(|n| matches!(n, Nickname::Remote { peer: p, .. } if *p == peer))
            .map(|n| n.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Sessions on this server that are members of `channel`.
    pub fn local_members(&self, channel: &str) -> Vec<ConnId> {
        let Some(ch) = self.channels.get(&fold(channel)) else {
            return Vec::new();
        };
        ch.members
            .keys()
            .filter_map(|key| match self.nicks.get(key) {
                Some(Nickname::Local { session, .. }) => Some(*session),
                _ => None,
            })
            .collect()
    }

    // ── Nicknames ──────────────────────────────────────────────────

    /// Bind `name` to the session on `conn` and make it a local nickname.
    pub fn register_local(&mut self, conn: ConnId, name: &str) -> Result<(), NickError> {
        if !valid_nickname(name) {
            return Err(NickError::Illegal);
        }
        let key = fold(name);
        if self.nicks.contains_key(&key) {
            return Err(NickError::Taken);
        }
        let session = self.sessions.entry(conn).or_default();
        if session.is_registered() {
            return Err(NickError::Illegal);
        }
        session.nickname = Some(name.to_string());
        self.nicks.insert(
            key,
            Nickname::Local {
                name: name.to_string(),
                session: conn,
            },
        );
        Ok(())
    }

    /// Record a nickname announced by `peer`.
    pub fn add_remote(&mut self, peer: ConnId, name: &str) -> Result<(), NickError> {
        if !valid_nickname(name) {
            return Err(NickError::Illegal);
        }
        let key = fold(name);
        if self.nicks.contains_key(&key) {
            return Err(NickError::Taken);
        }
        self.nicks.insert(
            key,
            Nickname::Remote {
                name: name.to_string(),
                peer,
            },
        );
        Ok(())
    }

    /// Remove a nickname and all of its channel memberships.
    ///
    /// A local victim's session stays in the table, unregistered and with
    /// no slots, so that closing its connection afterwards is a no-op for
    /// the registry. Returns `None` if the nickname is unknown.
    pub fn kill(&mut self, nick: &str) -> Option<Killed> {
        let key = fold(nick);
        let entry = self.nicks.remove(&key)?;

        let joined: Vec<String> = match &entry {
            Nickname::Local { session, .. } => match self.sessions.get_mut(session) {
                Some(s) => {
                    s.nickname = None;
                    s.slots.iter_mut().filter_map(Option::take).collect()
                }
                None => {
                    tracing::error!(%nick, conn = %session, "killed local nickname has no session");
                    Vec::new()
                }
            },
            Nickname::Remote { .. } => self
                .channels
                .iter()
                .filter(|(_, ch)| ch.members.contains_key(&key))
                .map(|(k, _)| k.clone())
                .collect(),
        };

        let victim = entry.route();
        let mut notify = BTreeSet::new();
        let mut destroyed = Vec::new();
        for ch_key in joined {
            let Some(ch) = self.channels.get_mut(&ch_key) else {
                tracing::error!(%nick, channel = %ch_key, "slot refers to a missing channel");
                debug_assert!(false, "slot refers to missing channel {ch_key}");
                continue;
            };
            if !ch.remove(&key) {
                tracing::error!(%nick, channel = %ch_key, "slot without channel membership");
                debug_assert!(false, "{nick} held a slot for {ch_key} without membership");
            }
            if ch.is_empty() {
                destroyed.push(ch.name.clone());
                self.channels.remove(&ch_key);
                continue;
            }
            for member in ch.members.keys() {
                if let Some(Nickname::Local { session, .. }) = self.nicks.get(member) {
                    if *session != victim {
                        notify.insert(*session);
                    }
                }
            }
        }

        Some(Killed {
            nick: entry,
            notify,
            destroyed,
        })
    }

    // ── Channels ───────────────────────────────────────────────────

    /// Fetch a channel, creating it if needed.
    ///
    /// A freshly created channel is empty; the caller must add a member
    /// before control returns to the event loop.
    pub fn get_or_create_channel(&mut self, name: &str) -> Result<&mut Channel, ChannelError> {
        if !valid_channel_name(name) {
            return Err(ChannelError::IllegalName);
        }
        Ok(self
            .channels
            .entry(fold(name))
            .or_insert_with(|| Channel::new(name)))
    }

    /// Drop `name` from the table if nobody is left in it.
    pub fn destroy_channel_if_empty(&mut self, name: &str) -> bool {
        let key = fold(name);
        if self.channels.get(&key).is_some_and(Channel::is_empty) {
            self.channels.remove(&key);
            true
        } else {
            false
        }
    }

    /// Join a registered local session to a channel.
    ///
    /// Returns the channel's canonical name.
    pub fn join_local(&mut self, conn: ConnId, channel: &str) -> Result<String, ChannelError> {
        if !valid_channel_name(channel) {
            return Err(ChannelError::IllegalName);
        }
        let key = fold(channel);
        let session = self.sessions.get(&conn).ok_or(ChannelError::NotMember)?;
        let nick = session.nickname.clone().ok_or(ChannelError::NotMember)?;
        if session.slot_of(&key).is_some() {
            return Err(ChannelError::AlreadyMember);
        }
        let slot = session.free_slot().ok_or(ChannelError::NoFreeSlot)?;

        let ch = self.get_or_create_channel(channel)?;
        if !ch.insert(&nick) {
            tracing::error!(%nick, channel = %key, "member without a slot");
            debug_assert!(false, "{nick} was in {key} without holding a slot");
        }
        let name = ch.name.clone();
        if let Some(session) = self.sessions.get_mut(&conn) {
            session.slots[slot] = Some(key);
        }
        Ok(name)
    }

    /// Remove a local session from a channel it holds a slot for.
    pub fn leave_local(&mut self, conn: ConnId, channel: &str) -> Result<Departure, ChannelError> {
        let key = fold(channel);
        let session = self.sessions.get_mut(&conn).ok_or(ChannelError::NotMember)?;
        let nick = session.nickname.clone().ok_or(ChannelError::NotMember)?;
        let slot = session.slot_of(&key).ok_or(ChannelError::NotMember)?;
        session.slots[slot] = None;
        self.remove_member(&key, &nick).ok_or_else(|| {
            tracing::error!(%nick, channel = %key, "slot refers to a missing channel");
            debug_assert!(false, "slot for missing channel {key}");
            ChannelError::NoSuchChannel
        })
    }

    /// Add a remote nickname owned by `peer` to a channel.
    ///
    /// Returns `Ok(None)` if it was already a member.
    pub fn join_remote(
        &mut self,
        peer: ConnId,
        nick: &str,
        channel: &str,
    ) -> Result<Option<String>, FederationError> {
        let name = self.owned_remote(peer, nick)?;
        let ch = self.get_or_create_channel(channel)?;
        Ok(ch.insert(&name).then(|| ch.name.clone()))
    }

    /// Remove a remote nickname owned by `peer` from a channel.
    pub fn leave_remote(
        &mut self,
        peer: ConnId,
        nick: &str,
        channel: &str,
    ) -> Result<Departure, FederationError> {
        let name = self.owned_remote(peer, nick)?;
        let key = fold(channel);
        if !self.channels.get(&key).is_some_and(|ch| ch.contains(&name)) {
            return Err(ChannelError::NotMember.into());
        }
        self.remove_member(&key, &name)
            .ok_or_else(|| ChannelError::NoSuchChannel.into())
    }

    fn owned_remote(&self, peer: ConnId, nick: &str) -> Result<String, FederationError> {
        match self.nicks.get(&fold(nick)) {
            Some(Nickname::Remote { name, peer: owner }) if *owner == peer => Ok(name.clone()),
            Some(_) => Err(FederationError::NotOwned(nick.to_string())),
            None => Err(FederationError::UnknownNick(nick.to_string())),
        }
    }

    fn remove_member(&mut self, key: &str, nick: &str) -> Option<Departure> {
        let ch = self.channels.get_mut(key)?;
        if !ch.remove(nick) {
            tracing::error!(%nick, channel = %key, "slot without channel membership");
            debug_assert!(false, "{nick} held a slot for {key} without membership");
        }
        let channel = ch.name.clone();
        let destroyed = self.destroy_channel_if_empty(key);
        Some(Departure { channel, destroyed })
    }

    // ── Consistency ────────────────────────────────────────────────

    /// Cross-check every table against the others.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for (ch_key, ch) in &self.channels {
            if ch.is_empty() {
                return Err(InvariantViolation::EmptyChannel(ch.name.clone()));
            }
            for (member, display) in &ch.members {
                match self.nicks.get(member) {
                    None => {
                        return Err(InvariantViolation::DanglingMember {
                            channel: ch.name.clone(),
                            nick: display.clone(),
                        });
                    }
                    Some(Nickname::Local { session, name }) => {
                        let holds = self
                            .sessions
                            .get(session)
                            .is_some_and(|s| s.slot_of(ch_key).is_some());
                        if !holds {
                            return Err(InvariantViolation::MembershipWithoutSlot {
                                nick: name.clone(),
                                channel: ch.name.clone(),
                            });
                        }
                    }
                    Some(Nickname::Remote { .. }) => {}
                }
            }
        }

        for (key, entry) in &self.nicks {
            match entry {
                Nickname::Local { name, session } => {
                    let bound = self
                        .sessions
                        .get(session)
                        .and_then(ClientSession::nickname)
                        .is_some_and(|n| fold(n) == *key);
                    if !bound {
                        return Err(InvariantViolation::OrphanNick {
                            nick: name.clone(),
                            conn: session.0,
                        });
                    }
                }
                Nickname::Remote { name, peer } => {
                    if !self.peers.contains(peer) {
                        return Err(InvariantViolation::OrphanRemote {
                            nick: name.clone(),
                            peer: peer.0,
                        });
                    }
                }
            }
        }

        for session in self.sessions.values() {
            for slot in session.slots.iter().flatten() {
                let nick = session.nickname.as_deref().unwrap_or("*");
                let member = self
                    .channels
                    .get(slot)
                    .is_some_and(|ch| ch.members.contains_key(&fold(nick)));
                if !member {
                    return Err(InvariantViolation::SlotWithoutMembership {
                        nick: nick.to_string(),
                        channel: slot.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
