//! JOIN, LEAVE and NAMES from registered clients.

use crate::error::ChannelError;
use crate::hub::Hub;
use crate::registry::ConnId;
use crate::wire::{self, PeerCommand};

impl Hub {
    pub(super) fn handle_join(&mut self, conn: ConnId, nick: &str, channel: &str) {
        let name = match self.registry.join_local(conn, channel) {
            Ok(name) => name,
            Err(e) => {
                tracing::debug!(%conn, %nick, %channel, %e, "join refused");
                self.cmd_reply(conn, &e.to_string());
                return;
            }
        };
        tracing::info!(%conn, %nick, channel = %name, "joined");
        let line = PeerCommand::Join {
            nick: nick.to_string(),
            channel: name.clone(),
        }
        .to_string();
        self.send_to_local_members(&name, &line);
        self.send_to_peers(&line, None);
        self.send_names(conn, &name);
    }

    pub(super) fn handle_leave(&mut self, conn: ConnId, nick: &str, channel: &str) {
        let departure = match self.registry.leave_local(conn, channel) {
            Ok(d) => d,
            Err(e) => {
                self.cmd_reply(conn, &e.to_string());
                return;
            }
        };
        tracing::info!(%conn, %nick, channel = %departure.channel, destroyed = departure.destroyed, "left");
        let line = PeerCommand::Leave {
            nick: nick.to_string(),
            channel: departure.channel.clone(),
        }
        .to_string();
        // An emptied channel has no local members left to tell.
        if !departure.destroyed {
            self.send_to_local_members(&departure.channel, &line);
        }
        self.send_to_peers(&line, None);
    }

    pub(super) fn handle_names(&mut self, conn: ConnId, channel: &str) {
        if self.registry.channel(channel).is_some() {
            self.send_names(conn, channel);
        } else {
            self.cmd_reply(conn, &ChannelError::NoSuchChannel.to_string());
        }
    }

    /// Send the full member list as one or more `NAMES` lines.
    fn send_names(&mut self, conn: ConnId, channel: &str) {
        let Some(ch) = self.registry.channel(channel) else {
            return;
        };
        let lines = wire::names_lines(ch.name(), ch.member_names());
        for line in lines {
            self.send(conn, line);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::hub::testing::*;
    use crate::registry::MAX_CHANNELS;

    #[test]
    fn join_echoes_and_lists_members() {
        let mut hub = hub();
        let mut link = peer(&mut hub);
        let mut alice = registered(&mut hub, "alice");
        link.drain();

        send(&mut hub, &alice, "JOIN #x");
        assert_eq!(alice.drain(), vec!["JOIN alice #x", "NAMES #x alice"]);
        assert_eq!(link.drain(), vec!["JOIN alice #x"]);

        let mut bob = registered(&mut hub, "bob");
        send(&mut hub, &bob, "JOIN #X");
        assert_eq!(alice.drain(), vec!["JOIN bob #x"]);
        assert_eq!(bob.drain(), vec!["JOIN bob #x", "NAMES #x alice bob"]);
    }

    #[test]
    fn join_errors_are_cmdreplies() {
        let mut hub = hub();
        let mut alice = registered(&mut hub, "alice");
        send(&mut hub, &alice, "JOIN x");
        assert_eq!(alice.drain(), vec!["CMDREPLY Illegal channel name"]);
        send(&mut hub, &alice, "JOIN #x");
        alice.drain();
        send(&mut hub, &alice, "JOIN #x");
        assert_eq!(alice.drain(), vec!["CMDREPLY You are already on that channel"]);
        for i in 1..MAX_CHANNELS {
            send(&mut hub, &alice, &format!("JOIN #c{i}"));
        }
        alice.drain();
        send(&mut hub, &alice, "JOIN #extra");
        assert_eq!(alice.drain(), vec!["CMDREPLY You have joined too many channels"]);
        assert!(hub.registry().channel("#extra").is_none());
    }

    #[test]
    fn leave_notifies_remaining_members_and_peers() {
        let mut hub = hub();
        let mut link = peer(&mut hub);
        let mut alice = registered(&mut hub, "alice");
        let mut bob = registered(&mut hub, "bob");
        send(&mut hub, &alice, "JOIN #x");
        send(&mut hub, &bob, "JOIN #x");
        alice.drain();
        bob.drain();
        link.drain();

        send(&mut hub, &alice, "LEAVE #X");
        assert!(alice.drain().is_empty());
        assert_eq!(bob.drain(), vec!["LEAVE alice #x"]);
        assert_eq!(link.drain(), vec!["LEAVE alice #x"]);

        send(&mut hub, &bob, "LEAVE #x");
        assert!(bob.drain().is_empty());
        assert_eq!(link.drain(), vec!["LEAVE bob #x"]);
        assert!(hub.registry().channel("#x").is_none());

        send(&mut hub, &bob, "LEAVE #x");
        assert_eq!(bob.drain(), vec!["CMDREPLY You are not on that channel"]);
    }

    #[test]
    fn names_for_unknown_channel() {
        let mut hub = hub();
        let mut alice = registered(&mut hub, "alice");
        send(&mut hub, &alice, "NAMES #nope");
        assert_eq!(alice.drain(), vec!["CMDREPLY No such channel"]);
        send(&mut hub, &alice, "JOIN #x");
        alice.drain();
        send(&mut hub, &alice, "NAMES #X");
        assert_eq!(alice.drain(), vec!["NAMES #x alice"]);
    }
}
