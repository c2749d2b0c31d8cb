//! Client protocol handler.
//!
//! A client session is unregistered until its first packet, which must be a
//! valid `NICK`. After that it may use `MSG`, `JOIN`, `LEAVE` and `NAMES`
//! until the connection goes away.
//!
//! - [`registration`]: the one-shot `NICK` gate
//! - [`channel`]: JOIN, LEAVE, NAMES
//! - [`messaging`]: MSG to nicknames and channels

mod channel;
mod messaging;
mod registration;

use crate::error::ParseError;
use crate::hub::{Flow, Hub};
use crate::registry::ConnId;
use crate::wire::{ClientCommand, Reply};

impl Hub {
    /// Handle one packet from a client connection.
    pub(crate) fn handle_client_packet(&mut self, conn: ConnId, packet: &str) -> Flow {
        let nick = self
            .registry
            .session(conn)
            .and_then(|s| s.nickname())
            .map(str::to_string);
        let Some(nick) = nick else {
            return self.handle_unregistered(conn, packet);
        };

        let cmd = match ClientCommand::parse(packet) {
            Ok(cmd) => cmd,
            Err(ParseError::Empty) => return Flow::Continue,
            Err(e) => {
                self.cmd_reply(conn, &e.to_string());
                return Flow::Continue;
            }
        };

        match cmd {
            ClientCommand::Nick(_) => self.cmd_reply(conn, "You are already registered"),
            ClientCommand::Msg { dest, text } => self.handle_msg(conn, &nick, dest, text),
            ClientCommand::Join(channel) => self.handle_join(conn, &nick, channel),
            ClientCommand::Leave(channel) => self.handle_leave(conn, &nick, channel),
            ClientCommand::Names(channel) => self.handle_names(conn, channel),
            ClientCommand::Unknown(verb) => {
                tracing::debug!(%conn, %nick, %verb, "unknown client command");
            }
        }
        Flow::Continue
    }

    pub(crate) fn cmd_reply(&mut self, conn: ConnId, text: &str) {
        self.send(conn, Reply::CmdReply(text).to_string());
    }
}

#[cfg(test)]
mod tests {
    use crate::hub::testing::*;

    #[test]
    fn unknown_command_keeps_the_connection() {
        let mut hub = hub();
        let mut alice = registered(&mut hub, "alice");
        send(&mut hub, &alice, "WHOIS bob");
        assert!(alice.drain().is_empty());
        assert!(hub.is_attached(alice.conn));
    }

    #[test]
    fn malformed_command_gets_usage() {
        let mut hub = hub();
        let mut alice = registered(&mut hub, "alice");
        send(&mut hub, &alice, "JOIN");
        assert_eq!(alice.drain(), vec!["CMDREPLY Usage: JOIN <#channel>"]);
        send(&mut hub, &alice, "NICK other");
        assert_eq!(alice.drain(), vec!["CMDREPLY You are already registered"]);
        send(&mut hub, &alice, "");
        assert!(alice.drain().is_empty());
    }
}
