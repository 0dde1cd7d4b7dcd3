//! Peer identification and addressing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::error::OverlayError;

/// Unique identifier for a peer connection within one overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Create a new peer ID from a counter value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Opaque identifier of the transport handle backing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

/// Direction of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionDirection {
    /// We initiated the connection.
    Outbound,
    /// Peer connected to us.
    Inbound,
}

impl fmt::Display for ConnectionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionDirection::Outbound => write!(f, "outbound"),
            ConnectionDirection::Inbound => write!(f, "inbound"),
        }
    }
}

/// Remote `host:port` pair of a peer.
///
/// The host is kept as a name or literal IP, lowercased, so that a seed and
/// the connection dialed from it compare equal without name resolution.
/// Equality and hashing agree with [`PeerAddr::matches`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerAddr {
    /// Host name or IP literal (IPv6 without brackets).
    pub host: String,
    /// Port number.
    pub port: u16,
}

impl PeerAddr {
    /// Create an address from its parts. The host is lowercased.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let mut host = host.into();
        host.make_ascii_lowercase();
        Self { host, port }
    }

    /// Whether the host names the local machine.
    pub fn is_loopback(&self) -> bool {
        if self.host.eq_ignore_ascii_case("localhost") {
            return true;
        }
        self.host
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
    }

    /// Whether host and port both match.
    pub fn matches(&self, other: &PeerAddr) -> bool {
        self == other
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for PeerAddr {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || OverlayError::Configuration(format!("Invalid peer address: {s:?}"));

        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for PeerAddr {
    type Error = OverlayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeerAddr> for String {
    fn from(addr: PeerAddr) -> Self {
        addr.to_string()
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_display() {
        let id = PeerId::new(42);
        assert_eq!(format!("{}", id), "peer-42");
    }

    #[test]
    fn test_parse_addr() {
        let addr: PeerAddr = "example.org:9000".parse().unwrap();
        assert_eq!(addr, PeerAddr::new("example.org", 9000));

        let v6: PeerAddr = "[::1]:9001".parse().unwrap();
        assert_eq!(v6.host, "::1");
        assert_eq!(v6.to_string(), "[::1]:9001");

        assert!("example.org".parse::<PeerAddr>().is_err());
        assert!(":9000".parse::<PeerAddr>().is_err());
        assert!("host:99999".parse::<PeerAddr>().is_err());
    }

    #[test]
    fn test_host_case_normalized() {
        let upper: PeerAddr = "Seed.Example.ORG:9000".parse().unwrap();
        let lower = PeerAddr::new("seed.example.org", 9000);
        assert_eq!(upper.host, "seed.example.org");
        assert_eq!(upper, lower);
        assert!(upper.matches(&lower));

        let mut seen = std::collections::HashSet::new();
        seen.insert(upper);
        assert!(!seen.insert(lower));
    }

    #[test]
    fn test_loopback() {
        assert!(PeerAddr::new("localhost", 1).is_loopback());
        assert!(PeerAddr::new("127.0.0.1", 1).is_loopback());
        assert!(PeerAddr::new("::1", 1).is_loopback());
        assert!(!PeerAddr::new("10.0.0.1", 1).is_loopback());
        assert!(!PeerAddr::new("h1", 1).is_loopback());
    }

    #[test]
    fn test_from_socket_addr() {
        let sock: SocketAddr = "127.0.0.1:8333".parse().unwrap();
        let addr = PeerAddr::from(sock);
        assert!(addr.matches(&PeerAddr::new("127.0.0.1", 8333)));
    }
}
