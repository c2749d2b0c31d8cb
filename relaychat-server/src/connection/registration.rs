//! The unregistered state: exactly one chance to send a valid `NICK`.

use crate::error::{NickError, ParseError};
use crate::hub::{Flow, Hub};
use crate::registry::ConnId;
use crate::wire::{self, ClientCommand, PeerCommand, Reply};

const EXPECTED_NICK: &str = "Expected NICK as first command";

impl Hub {
    pub(super) fn handle_unregistered(&mut self, conn: ConnId, packet: &str) -> Flow {
        let reason = match ClientCommand::parse(packet) {
            Ok(ClientCommand::Nick(name)) => match self.registry.register_local(conn, name) {
                Ok(()) => {
                    self.complete_registration(conn, name);
                    return Flow::Continue;
                }
                Err(e) => e.to_string(),
            },
            Err(ParseError::MissingArgument { .. }) if wire::verb_of(packet) == "NICK" => {
                NickError::Illegal.to_string()
            }
            _ => EXPECTED_NICK.to_string(),
        };
        tracing::info!(%conn, %reason, "rejecting unregistered client");
        self.send(conn, Reply::Close(&reason).to_string());
        self.close(conn, &reason);
        Flow::Stop
    }

    fn complete_registration(&mut self, conn: ConnId, nick: &str) {
        tracing::info!(%conn, %nick, "client registered");
        let motd = Reply::Motd(&self.motd).to_string();
        self.send(conn, motd);
        let announce = PeerCommand::Nick {
            name: nick.to_string(),
        };
        self.send_to_peers(&announce.to_string(), None);
    }
}

#[cfg(test)]
mod tests {
    use crate::hub::testing::*;

    #[test]
    fn nick_registers_and_announces() {
        let mut hub = hub();
        let mut link = peer(&mut hub);
        let mut alice = client(&mut hub);
        send(&mut hub, &alice, "NICK alice");
        assert_eq!(alice.drain(), vec!["MOTD Welcome to relaychat"]);
        assert_eq!(link.drain(), vec!["NICK alice"]);
        assert!(hub.registry().lookup("ALICE").is_some());
    }

    #[test]
    fn first_command_must_be_nick() {
        let mut hub = hub();
        let mut c = client(&mut hub);
        hub.dispatch(c.conn, vec!["JOIN #x".into(), "NICK alice".into()]);
        assert_eq!(c.drain(), vec!["CLOSE Expected NICK as first command"]);
        assert!(c.is_closed());
        // The packet after the rejected one was never handled.
        assert!(hub.registry().lookup("alice").is_none());
    }

    #[test]
    fn bad_nicknames_close_the_connection() {
        for (line, reason) in [
            ("NICK", "CLOSE Illegal nickname"),
            ("NICK #chan", "CLOSE Illegal nickname"),
            ("NICK waytoolongnick", "CLOSE Illegal nickname"),
            ("", "CLOSE Expected NICK as first command"),
        ] {
            let mut hub = hub();
            let mut c = client(&mut hub);
            send(&mut hub, &c, line);
            assert_eq!(c.drain(), vec![reason], "for {line:?}");
            assert!(c.is_closed());
            assert_eq!(hub.link_count(), 0);
        }
    }

    #[test]
    fn duplicate_nickname_is_refused_case_insensitively() {
        let mut hub = hub();
        let _alice = registered(&mut hub, "alice");
        let mut imposter = client(&mut hub);
        send(&mut hub, &imposter, "NICK ALICE");
        assert_eq!(imposter.drain(), vec!["CLOSE Nickname already in use"]);
        assert!(imposter.is_closed());
        assert!(hub.registry().lookup("alice").is_some());
    }
}
