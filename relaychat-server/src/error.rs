//! Error types for the chat core.
//!
//! The `Display` text of the client-facing variants is sent verbatim as the
//! reason of a `CLOSE` or `CMDREPLY` line, so keep them short and human.

use thiserror::Error;

/// A packet could not be framed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The peer sent more than the maximum packet length without a newline.
    #[error("Packet too long")]
    Oversize {
        /// Bytes accumulated for the offending packet when it was rejected.
        len: usize,
    },
}

/// A packet was framed but is not a well-formed command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty command")]
    Empty,
    #[error("Unknown command {0}")]
    UnknownVerb(String),
    #[error("Usage: {usage}")]
    MissingArgument { usage: &'static str },
}

/// Nickname registration failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NickError {
    #[error("Illegal nickname")]
    Illegal,
    #[error("Nickname already in use")]
    Taken,
}

/// Channel membership failures reported to clients via `CMDREPLY`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Illegal channel name")]
    IllegalName,
    #[error("You have joined too many channels")]
    NoFreeSlot,
    #[error("You are already on that channel")]
    AlreadyMember,
    #[error("You are not on that channel")]
    NotMember,
    #[error("No such channel")]
    NoSuchChannel,
}

/// A peer announced something it has no authority over.
///
/// These are logged and ignored; the link stays up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FederationError {
    #[error("unknown nickname {0}")]
    UnknownNick(String),
    #[error("nickname {0} is not owned by the sending peer")]
    NotOwned(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// The registry's internal bookkeeping disagrees with itself.
///
/// Never expected; surfaced loudly (debug assertion, `error!` log) rather
/// than silently repaired.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("channel {0} is present with no members")]
    EmptyChannel(String),
    #[error("channel {channel} lists {nick} but no such nickname is registered")]
    DanglingMember { channel: String, nick: String },
    #[error("session {nick} holds a slot for {channel} but is not a member")]
    SlotWithoutMembership { nick: String, channel: String },
    #[error("{nick} is a member of {channel} but holds no slot for it")]
    MembershipWithoutSlot { nick: String, channel: String },
    #[error("nickname {nick} points at connection {conn} which has no session")]
    OrphanNick { nick: String, conn: u64 },
    #[error("remote nickname {nick} is owned by {peer} which is not a linked peer")]
    OrphanRemote { nick: String, peer: u64 },
}
