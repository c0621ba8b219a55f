//! Relay between the broker and remote signing peers.
//!
//! A peer dials the broker's `/ws` endpoint and keeps the socket open. The
//! broker ([`WalletServer`]) asks the peer which addresses it custodies once,
//! then forwards signing requests for those addresses over the socket. The
//! peer side ([`serve_wallet`]) answers them from a local [`WalletApi`].
//!
//! [`WalletApi`]: crate::wallet::WalletApi

mod client;
pub mod protocol;
mod server;

pub use client::{connect, serve_wallet};
pub use server::{DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL, WalletServer};

/// Lifecycle of one relay connection as seen by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Handshaking,
    Active,
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Handshaking)
                | (Connecting, Closed)
                | (Handshaking, Active)
                | (Handshaking, Closed)
                | (Active, Closed)
        )
    }

    /// Moves to `next`, refusing transitions the lifecycle does not allow.
    pub fn advance(&mut self, next: ConnectionState) -> bool {
        if !self.can_transition_to(next) {
            return false;
        }
        *self = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::{self, *};

    #[test]
    fn happy_path() {
        let mut state = Connecting;
        assert!(state.advance(Handshaking));
        assert!(state.advance(Active));
        assert!(state.advance(Closed));
        assert_eq!(state, Closed);
    }

    #[test]
    fn handshake_failure_closes() {
        let mut state = Handshaking;
        assert!(state.advance(Closed));
    }

    #[test]
    fn closed_is_terminal() {
        for next in [Connecting, Handshaking, Active, Closed] {
            assert!(!ConnectionState::can_transition_to(Closed, next));
        }
    }

    #[test]
    fn cannot_skip_handshake() {
        let mut state = Connecting;
        assert!(!state.advance(Active));
        assert_eq!(state, Connecting);
    }
}
