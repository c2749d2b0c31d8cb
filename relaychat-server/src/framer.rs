//! Newline-delimited packet framing.
//!
//! Each connection owns a [`LineFramer`]. Bytes from a read are appended
//! with [`LineFramer::extend`], then complete packets are pulled out one at
//! a time with [`LineFramer::next_packet`] until it returns `Ok(None)`.
//!
//! # Compaction contract
//!
//! Consumed packets are not removed byte-by-byte. The framer keeps a
//! `start` cursor into its buffer and only moves the unterminated remainder
//! to the front once every complete packet has been taken (i.e. when
//! `next_packet` reports `Ok(None)`). After that call the buffer holds
//! exactly the bytes of the next, still incomplete, packet.

use crate::error::FrameError;

/// Maximum packet length in bytes, including the terminating `\n`.
pub const MAX_PACKET: usize = 256;

/// Initial buffer capacity; enough for several full packets per read.
const INITIAL_CAPACITY: usize = 2048;

#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    /// Offset of the first byte not yet handed out as part of a packet.
    start: usize,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(INITIAL_CAPACITY),
            start: 0,
        }
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet returned as packets.
    pub fn pending(&self) -> usize {
        self.buf.len() - self.start
    }

    /// Take the next complete packet, without its delimiter.
    ///
    /// Returns `Ok(None)` when no complete packet remains (the remainder is
    /// compacted at that point). Returns an error as soon as a packet is
    /// known to exceed [`MAX_PACKET`]; the connection must be dropped, and
    /// the framer must not be used again.
    pub fn next_packet(&mut self) -> Result<Option<String>, FrameError> {
        let rest = &self.buf[self.start..];
        match rest.iter().position(|&b| b == b'\n') {
            Some(idx) => {
                // idx bytes of payload plus the delimiter
                if idx + 1 > MAX_PACKET {
                    return Err(FrameError::Oversize { len: idx + 1 });
                }
                let mut line = &rest[..idx];
                if let [head @ .., b'\r'] = line {
                    line = head;
                }
                let packet = String::from_utf8_lossy(line).into_owned();
                self.start += idx + 1;
                Ok(Some(packet))
            }
            None => {
                // Any completion of this remainder would be too long.
                if rest.len() >= MAX_PACKET {
                    return Err(FrameError::Oversize { len: rest.len() });
                }
                self.compact();
                Ok(None)
            }
        }
    }

    /// Move the unterminated remainder to the start of the buffer.
    fn compact(&mut self) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
    }

    /// Drain every complete packet currently buffered.
    ///
    /// Packets framed before an oversize violation are still returned
    /// alongside the error so they can be dispatched in order first.
    pub fn drain_packets(&mut self) -> (Vec<String>, Option<FrameError>) {
        let mut packets = Vec::new();
        loop {
            match self.next_packet() {
                Ok(Some(packet)) => packets.push(packet),
                Ok(None) => return (packets, None),
                Err(e) => return (packets, Some(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_packets_in_one_read() {
        let mut framer = LineFramer::new();
        framer.extend(b"NICK a\nJOIN #b\n");
        assert_eq!(framer.next_packet().unwrap().as_deref(), Some("NICK a"));
        assert_eq!(framer.next_packet().unwrap().as_deref(), Some("JOIN #b"));
        assert_eq!(framer.next_packet().unwrap(), None);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn partial_packet_is_kept_across_reads() {
        let mut framer = LineFramer::new();
        framer.extend(b"MSG bob hel");
        assert_eq!(framer.next_packet().unwrap(), None);
        assert_eq!(framer.pending(), 11);
        framer.extend(b"lo\nNAM");
        assert_eq!(framer.next_packet().unwrap().as_deref(), Some("MSG bob hello"));
        assert_eq!(framer.next_packet().unwrap(), None);
        assert_eq!(framer.pending(), 3);
        framer.extend(b"ES #x\n");
        assert_eq!(framer.next_packet().unwrap().as_deref(), Some("NAMES #x"));
    }

    #[test]
    fn oversize_line_without_newline_is_rejected() {
        let mut framer = LineFramer::new();
        framer.extend(&[b'a'; 300]);
        let (packets, err) = framer.drain_packets();
        assert!(packets.is_empty());
        assert_eq!(err, Some(FrameError::Oversize { len: 300 }));
    }

    #[test]
    fn longest_legal_packet_passes() {
        let mut framer = LineFramer::new();
        let mut line = vec![b'x'; MAX_PACKET - 1];
        line.push(b'\n');
        framer.extend(&line);
        let packet = framer.next_packet().unwrap().unwrap();
        assert_eq!(packet.len(), MAX_PACKET - 1);
    }

    #[test]
    fn one_byte_over_the_limit_fails() {
        let mut framer = LineFramer::new();
        let mut line = vec![b'x'; MAX_PACKET];
        line.push(b'\n');
        framer.extend(&line);
        assert!(matches!(
            framer.next_packet(),
            Err(FrameError::Oversize { len }) if len == MAX_PACKET + 1
        ));
    }

    #[test]
    fn packets_before_violation_are_still_delivered() {
        let mut framer = LineFramer::new();
        framer.extend(b"NICK a\n");
        framer.extend(&[b'z'; 400]);
        let (packets, err) = framer.drain_packets();
        assert_eq!(packets, vec!["NICK a".to_string()]);
        assert!(err.is_some());
    }

    #[test]
    fn carriage_return_is_stripped() {
        let mut framer = LineFramer::new();
        framer.extend(b"NICK alice\r\n\n");
        assert_eq!(framer.next_packet().unwrap().as_deref(), Some("NICK alice"));
        assert_eq!(framer.next_packet().unwrap().as_deref(), Some(""));
    }
}
