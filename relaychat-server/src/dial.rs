//! Outbound peer link state machine.
//!
//! The reactor owns one [`PeerDialer`] and drives it from its 1s tick: the
//! dialer only decides *when* to dial, the reactor performs the connect and
//! reports back with [`PeerDialer::connected`] or [`PeerDialer::failed`].
//!
//! Retries back off exponentially (1s, 2s, 4s, ... up to the configured
//! cap) and reset after a successful connect. A cap of one second gives a
//! fixed retry on every tick.

use std::time::Duration;

use tokio::time::Instant;

use crate::registry::ConnId;

const BASE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialState {
    /// No peer address configured.
    Disabled,
    /// Waiting for the next attempt.
    Idle,
    /// A non-blocking connect is in flight.
    Connecting,
    /// The link is up and registered with the reactor.
    Connected(ConnId),
}

#[derive(Debug)]
pub struct PeerDialer {
    target: Option<String>,
    state: DialState,
    backoff: Duration,
    max_backoff: Duration,
    next_attempt: Option<Instant>,
}

impl PeerDialer {
    pub fn new(target: Option<String>, max_backoff: Duration) -> Self {
        let state = if target.is_some() {
            DialState::Idle
        } else {
            DialState::Disabled
        };
        Self {
            target,
            state,
            backoff: BASE_BACKOFF,
            max_backoff: max_backoff.max(BASE_BACKOFF),
            next_attempt: None,
        }
    }

    pub fn state(&self) -> DialState {
        self.state
    }

    /// Called on every tick. Returns the address to dial if an attempt
    /// should start now, moving to `Connecting`.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        if self.state != DialState::Idle {
            return None;
        }
        if self.next_attempt.is_some_and(|at| now < at) {
            return None;
        }
        self.state = DialState::Connecting;
        self.target.clone()
    }

    pub fn connected(&mut self, conn: ConnId) {
        self.state = DialState::Connected(conn);
        self.backoff = BASE_BACKOFF;
        self.next_attempt = None;
    }

    /// The in-flight connect failed; schedule the next attempt.
    pub fn failed(&mut self, now: Instant) {
        if self.state == DialState::Connecting {
            self.retry_later(now);
        }
    }

    /// The link we dialed went away.
    pub fn link_lost(&mut self, conn: ConnId, now: Instant) {
        if self.state == DialState::Connected(conn) {
            self.retry_later(now);
        }
    }

    fn retry_later(&mut self, now: Instant) {
        self.state = DialState::Idle;
        self.next_attempt = Some(now + self.backoff);
        self.backoff = (self.backoff * 2).min(self.max_backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_target() {
        let mut dialer = PeerDialer::new(None, Duration::from_secs(60));
        assert_eq!(dialer.state(), DialState::Disabled);
        assert_eq!(dialer.poll(Instant::now()), None);
    }

    #[test]
    fn first_tick_dials_immediately() {
        let mut dialer = PeerDialer::new(Some("10.0.0.1:13338".into()), Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(dialer.poll(now).as_deref(), Some("10.0.0.1:13338"));
        assert_eq!(dialer.state(), DialState::Connecting);
        // Only one attempt in flight.
        assert_eq!(dialer.poll(now), None);
    }

    #[test]
    fn failures_back_off_up_to_the_cap() {
        let mut dialer = PeerDialer::new(Some("peer:1".into()), Duration::from_secs(4));
        let t0 = Instant::now();
        assert!(dialer.poll(t0).is_some());
        dialer.failed(t0);
        assert_eq!(dialer.state(), DialState::Idle);
        assert!(dialer.poll(t0 + Duration::from_millis(500)).is_none());
        let t1 = t0 + Duration::from_secs(1);
        assert!(dialer.poll(t1).is_some());
        dialer.failed(t1);
        assert!(dialer.poll(t1 + Duration::from_secs(1)).is_none());
        let t2 = t1 + Duration::from_secs(2);
        assert!(dialer.poll(t2).is_some());
        dialer.failed(t2);
        let t3 = t2 + Duration::from_secs(4);
        assert!(dialer.poll(t3).is_some());
        dialer.failed(t3);
        // capped at 4s
        assert!(dialer.poll(t3 + Duration::from_secs(4)).is_some());
    }

    #[test]
    fn fixed_retry_with_one_second_cap() {
        let mut dialer = PeerDialer::new(Some("peer:1".into()), Duration::from_secs(1));
        let mut now = Instant::now();
        for _ in 0..5 {
            assert!(dialer.poll(now).is_some());
            dialer.failed(now);
            now += Duration::from_secs(1);
        }
    }

    #[test]
    fn link_loss_returns_to_idle_and_resets_after_success() {
        let mut dialer = PeerDialer::new(Some("peer:1".into()), Duration::from_secs(60));
        let t0 = Instant::now();
        dialer.poll(t0);
        dialer.connected(ConnId(7));
        assert_eq!(dialer.state(), DialState::Connected(ConnId(7)));

        // Losing some other connection is irrelevant.
        dialer.link_lost(ConnId(8), t0);
        assert_eq!(dialer.state(), DialState::Connected(ConnId(7)));

        dialer.link_lost(ConnId(7), t0);
        assert_eq!(dialer.state(), DialState::Idle);
        assert!(dialer.poll(t0 + Duration::from_secs(1)).is_some());
    }
}
