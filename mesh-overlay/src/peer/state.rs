//! Peer state machine.

use std::fmt;

/// Lifecycle state of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Dial issued, link not yet established.
    Connecting,
    /// Link established and pipeline wired.
    Connected,
    /// Terminal. A new connection object is required to reconnect.
    Closed,
}

impl PeerState {
    /// Check if the link is up.
    pub fn is_connected(&self) -> bool {
        matches!(self, PeerState::Connected)
    }

    /// Check if a dial is still in flight.
    pub fn is_connecting(&self) -> bool {
        matches!(self, PeerState::Connecting)
    }

    /// Check if the connection has ended.
    pub fn is_closed(&self) -> bool {
        matches!(self, PeerState::Closed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: PeerState) -> bool {
        matches!(
            (self, next),
            (PeerState::Connecting, PeerState::Connected)
                | (PeerState::Connecting, PeerState::Closed)
                | (PeerState::Connected, PeerState::Closed)
        )
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::Connecting => write!(f, "connecting"),
            PeerState::Connected => write!(f, "connected"),
            PeerState::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_state_checks() {
        assert!(PeerState::Connecting.is_connecting());
        assert!(!PeerState::Connecting.is_connected());
        assert!(PeerState::Connected.is_connected());
        assert!(PeerState::Closed.is_closed());
    }

    #[test]
    fn test_transitions() {
        assert!(PeerState::Connecting.can_transition_to(PeerState::Connected));
        assert!(PeerState::Connecting.can_transition_to(PeerState::Closed));
        assert!(PeerState::Connected.can_transition_to(PeerState::Closed));

        assert!(!PeerState::Connected.can_transition_to(PeerState::Connecting));
        assert!(!PeerState::Closed.can_transition_to(PeerState::Connected));
        assert!(!PeerState::Closed.can_transition_to(PeerState::Closed));
    }
}
