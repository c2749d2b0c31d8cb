//! MSG from registered clients.

use crate::error::ChannelError;
use crate::hub::Hub;
use crate::registry::ConnId;
use crate::wire::PeerCommand;

const NOT_FOUND: &str = "Nickname or channel not found";

impl Hub {
    pub(super) fn handle_msg(&mut self, conn: ConnId, nick: &str, dest: &str, text: &str) {
        // Nicknames cannot start with '#', so the two lookups never overlap.
        if let Some(target) = self.registry.lookup(dest) {
            let route = target.route();
            let line = PeerCommand::Msg {
                from: nick.to_string(),
                dest: target.name().to_string(),
                text: text.to_string(),
            };
            self.send(route, line.to_string());
            return;
        }

        let Some(ch) = self.registry.channel(dest) else {
            self.cmd_reply(conn, NOT_FOUND);
            return;
        };
        if !ch.contains(nick) {
            self.cmd_reply(conn, &ChannelError::NotMember.to_string());
            return;
        }
        let line = PeerCommand::Msg {
            from: nick.to_string(),
            dest: ch.name().to_string(),
            text: text.to_string(),
        }
        .to_string();
        // The sender is a member too and gets its own copy.
        self.send_to_local_members(dest, &line);
        self.send_to_peers(&line, None);
    }
}

#[cfg(test)]
mod tests {
    use crate::hub::testing::*;

    #[test]
    fn channel_message_reaches_all_members_including_sender() {
        let mut hub = hub();
        let mut link = peer(&mut hub);
        let mut alice = registered(&mut hub, "alice");
        let mut bob = registered(&mut hub, "bob");
        send(&mut hub, &alice, "JOIN #x");
        send(&mut hub, &bob, "JOIN #x");
        alice.drain();
        bob.drain();
        link.drain();

        send(&mut hub, &alice, "MSG #x hello");
        assert_eq!(alice.drain(), vec!["MSG alice #x hello"]);
        assert_eq!(bob.drain(), vec!["MSG alice #x hello"]);
        assert_eq!(link.drain(), vec!["MSG alice #x hello"]);
    }

    #[test]
    fn private_message_goes_only_to_the_target() {
        let mut hub = hub();
        let mut link = peer(&mut hub);
        let mut alice = registered(&mut hub, "alice");
        let mut bob = registered(&mut hub, "bob");
        link.drain();

        send(&mut hub, &alice, "MSG BOB hi bob, how are you");
        assert!(alice.drain().is_empty());
        assert_eq!(bob.drain(), vec!["MSG alice bob hi bob, how are you"]);
        assert!(link.drain().is_empty());
    }

    #[test]
    fn private_message_to_remote_goes_to_owning_peer_only() {
        let mut hub = hub();
        let mut far = peer(&mut hub);
        let mut other = peer(&mut hub);
        send(&mut hub, &far, "NICK carol");
        let mut alice = registered(&mut hub, "alice");
        far.drain();
        other.drain();

        send(&mut hub, &alice, "MSG carol psst");
        assert_eq!(far.drain(), vec!["MSG alice carol psst"]);
        assert!(other.drain().is_empty());
        assert!(alice.drain().is_empty());
    }

    #[test]
    fn message_errors() {
        let mut hub = hub();
        let mut alice = registered(&mut hub, "alice");
        let mut bob = registered(&mut hub, "bob");
        send(&mut hub, &alice, "MSG nobody hi");
        assert_eq!(alice.drain(), vec!["CMDREPLY Nickname or channel not found"]);

        send(&mut hub, &bob, "JOIN #x");
        bob.drain();
        send(&mut hub, &alice, "MSG #x let me in");
        assert_eq!(alice.drain(), vec!["CMDREPLY You are not on that channel"]);
        assert!(bob.drain().is_empty());

        send(&mut hub, &alice, "MSG bob");
        assert_eq!(
            alice.drain(),
            vec!["CMDREPLY Usage: MSG <nickname|#channel> <text>"]
        );
    }
}
