//! Line protocol: parsing inbound commands and formatting outbound lines.
//!
//! Every line is verb-first with space separated arguments; the last
//! argument of `MSG` and `KILL` runs to the end of the line and may contain
//! spaces. Lines produced here never carry the trailing `\n`; the writer
//! task appends it.

use std::fmt;

use crate::error::ParseError;
use crate::framer::MAX_PACKET;

/// Split off the next space-delimited token, skipping leading spaces.
fn next_token(s: &str) -> (&str, &str) {
    let s = s.trim_start_matches(' ');
    match s.split_once(' ') {
        Some((token, rest)) => (token, rest),
        None => (s, ""),
    }
}

/// The command verb of a line, or `""` for a blank line.
pub fn verb_of(line: &str) -> &str {
    next_token(line).0
}

fn required<'a>(token: &'a str, usage: &'static str) -> Result<&'a str, ParseError> {
    if token.is_empty() {
        Err(ParseError::MissingArgument { usage })
    } else {
        Ok(token)
    }
}

/// A command sent by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand<'a> {
    Nick(&'a str),
    Msg { dest: &'a str, text: &'a str },
    Join(&'a str),
    Leave(&'a str),
    Names(&'a str),
    /// A verb this server does not implement.
    Unknown(&'a str),
}

impl<'a> ClientCommand<'a> {
    pub fn parse(line: &'a str) -> Result<Self, ParseError> {
        let (verb, rest) = next_token(line);
        match verb {
            "" => Err(ParseError::Empty),
            "NICK" => Ok(Self::Nick(required(next_token(rest).0, "NICK <name>")?)),
            "MSG" => {
                let (dest, text) = next_token(rest);
                let dest = required(dest, "MSG <nickname|#channel> <text>")?;
                let text = required(text, "MSG <nickname|#channel> <text>")?;
                Ok(Self::Msg { dest, text })
            }
            "JOIN" => Ok(Self::Join(required(next_token(rest).0, "JOIN <#channel>")?)),
            "LEAVE" => Ok(Self::Leave(required(next_token(rest).0, "LEAVE <#channel>")?)),
            "NAMES" => Ok(Self::Names(required(next_token(rest).0, "NAMES <#channel>")?)),
            other => Ok(Self::Unknown(other)),
        }
    }
}

/// A server-to-server command.
///
/// `JOIN`, `LEAVE`, `MSG` and `KILL` share their wire format with the
/// server-to-client event lines, so the same type formats both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCommand {
    Nick { name: String },
    Join { nick: String, channel: String },
    Leave { nick: String, channel: String },
    Msg { from: String, dest: String, text: String },
    Kill { nick: String, reason: String },
}

impl PeerCommand {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let (verb, rest) = next_token(line);
        match verb {
            "" => Err(ParseError::Empty),
            "NICK" => {
                let name = required(next_token(rest).0, "NICK <name>")?;
                Ok(Self::Nick { name: name.to_string() })
            }
            "JOIN" | "LEAVE" => {
                let usage = if verb == "JOIN" {
                    "JOIN <nick> <#channel>"
                } else {
                    "LEAVE <nick> <#channel>"
                };
                let (nick, rest) = next_token(rest);
                let nick = required(nick, usage)?.to_string();
                let channel = required(next_token(rest).0, usage)?.to_string();
                Ok(if verb == "JOIN" {
                    Self::Join { nick, channel }
                } else {
                    Self::Leave { nick, channel }
                })
            }
            "MSG" => {
                const USAGE: &str = "MSG <from> <dest> <text>";
                let (from, rest) = next_token(rest);
                let (dest, text) = next_token(rest);
                Ok(Self::Msg {
                    from: required(from, USAGE)?.to_string(),
                    dest: required(dest, USAGE)?.to_string(),
                    text: required(text, USAGE)?.to_string(),
                })
            }
            "KILL" => {
                const USAGE: &str = "KILL <nick> <reason>";
                let (nick, reason) = next_token(rest);
                Ok(Self::Kill {
                    nick: required(nick, USAGE)?.to_string(),
                    reason: required(reason.trim_start_matches(' '), USAGE)?.to_string(),
                })
            }
            other => Err(ParseError::UnknownVerb(other.to_string())),
        }
    }
}

impl fmt::Display for PeerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nick { name } => write!(f, "NICK {name}"),
            Self::Join { nick, channel } => write!(f, "JOIN {nick} {channel}"),
            Self::Leave { nick, channel } => write!(f, "LEAVE {nick} {channel}"),
            Self::Msg { from, dest, text } => write!(f, "MSG {from} {dest} {text}"),
            Self::Kill { nick, reason } => write!(f, "KILL {nick} {reason}"),
        }
    }
}

/// Server-to-client lines that have no peer counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply<'a> {
    Motd(&'a str),
    Close(&'a str),
    CmdReply(&'a str),
}

impl fmt::Display for Reply<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Motd(text) => write!(f, "MOTD {text}"),
            Self::Close(reason) => write!(f, "CLOSE {reason}"),
            Self::CmdReply(text) => write!(f, "CMDREPLY {text}"),
        }
    }
}

/// Build the `NAMES <channel> name...` lines for a member list.
///
/// The list is split so that every line, plus its `\n`, fits in
/// [`MAX_PACKET`]. At least one line is always produced.
pub fn names_lines<'a, I>(channel: &str, members: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let prefix = format!("NAMES {channel}");
    let mut lines = Vec::new();
    let mut current = prefix.clone();
    let mut count = 0;
    for name in members {
        // existing + space + name + newline
        if count > 0 && current.len() + 1 + name.len() + 1 > MAX_PACKET {
            lines.push(std::mem::replace(&mut current, prefix.clone()));
            count = 0;
        }
        current.push(' ');
        current.push_str(name);
        count += 1;
    }
    lines.push(current);
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_msg_keeps_spaces_in_text() {
        let cmd = ClientCommand::parse("MSG #rust hello there  world").unwrap();
        assert_eq!(
            cmd,
            ClientCommand::Msg {
                dest: "#rust",
                text: "hello there  world"
            }
        );
    }

    #[test]
    fn client_missing_arguments() {
        assert_eq!(
            ClientCommand::parse("NICK").unwrap_err(),
            ParseError::MissingArgument { usage: "NICK <name>" }
        );
        assert!(matches!(
            ClientCommand::parse("MSG bob"),
            Err(ParseError::MissingArgument { .. })
        ));
        assert_eq!(ClientCommand::parse("").unwrap_err(), ParseError::Empty);
    }

    #[test]
    fn client_unknown_verb_is_not_an_error() {
        assert_eq!(
            ClientCommand::parse("WHOIS bob").unwrap(),
            ClientCommand::Unknown("WHOIS")
        );
    }

    #[test]
    fn peer_commands_parse() {
        assert_eq!(
            PeerCommand::parse("JOIN carol #x").unwrap(),
            PeerCommand::Join {
                nick: "carol".into(),
                channel: "#x".into()
            }
        );
        assert_eq!(
            PeerCommand::parse("KILL alice nickname collision").unwrap(),
            PeerCommand::Kill {
                nick: "alice".into(),
                reason: "nickname collision".into()
            }
        );
        assert_eq!(
            PeerCommand::parse("MSG alice #x hi all").unwrap().to_string(),
            "MSG alice #x hi all"
        );
        assert!(matches!(
            PeerCommand::parse("PING"),
            Err(ParseError::UnknownVerb(v)) if v == "PING"
        ));
        assert!(PeerCommand::parse("LEAVE carol").is_err());
    }

    #[test]
    fn peer_kill_needs_a_reason() {
        for line in ["KILL alice", "KILL alice   "] {
            assert_eq!(
                PeerCommand::parse(line).unwrap_err(),
                ParseError::MissingArgument {
                    usage: "KILL <nick> <reason>"
                }
            );
        }
    }

    #[test]
    fn names_single_line() {
        assert_eq!(names_lines("#x", ["alice", "bob"]), vec!["NAMES #x alice bob"]);
    }

    #[test]
    fn names_split_at_packet_limit() {
        let members: Vec<String> = (0..60).map(|i| format!("user{i:05}")).collect();
        let lines = names_lines("#big", members.iter().map(String::as_str));
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(line.len() < MAX_PACKET, "line too long: {}", line.len());
            assert!(line.starts_with("NAMES #big "));
        }
        let listed: Vec<&str> = lines
            .iter()
            .flat_map(|l| l.split(' ').skip(2))
            .collect();
        assert_eq!(listed.len(), 60);
        assert_eq!(listed[0], "user00000");
        assert_eq!(listed[59], "user00059");
    }
}
