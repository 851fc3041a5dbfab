//! Peer identity records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque unique identifier for a remote node.
///
/// By convention this is the node's `"host:port"` string, which makes the
/// id double as the address to dial, but nothing in the membership layer
/// depends on that shape — peers are compared and keyed by id alone.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A peer's network address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddress {
    pub ip: String,
    pub port: u16,
}

impl PeerAddress {
    /// The canonical `"ip:port"` form, also used as the default peer id.
    pub fn to_host_port(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// A remote node's identity record as exchanged over the wire.
///
/// Immutable once received; two records describe the same node iff their
/// ids are equal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub addr: PeerAddress,
    /// Capability metadata: the protocol version the node speaks.
    #[serde(default)]
    pub protocol_version: u16,
}

impl Peer {
    /// Build a peer record whose id is the canonical `"ip:port"` key.
    pub fn from_address(addr: PeerAddress) -> Self {
        Self {
            id: PeerId::new(addr.to_host_port()),
            addr,
            protocol_version: crate::PROTOCOL_VERSION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_display_and_eq() {
        let a = PeerId::new("10.0.0.1:7171");
        let b = PeerId::from("10.0.0.1:7171");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "10.0.0.1:7171");
    }

    #[test]
    fn from_address_uses_host_port_key() {
        let peer = Peer::from_address(PeerAddress {
            ip: "192.168.1.5".into(),
            port: 7171,
        });
        assert_eq!(peer.id.as_str(), "192.168.1.5:7171");
        assert_eq!(peer.protocol_version, crate::PROTOCOL_VERSION);
    }

    #[test]
    fn peer_round_trips_through_bincode() {
        let peer = Peer::from_address(PeerAddress {
            ip: "1.2.3.4".into(),
            port: 9000,
        });
        let bytes = bincode::serialize(&peer).unwrap();
        let decoded: Peer = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, peer);
    }
}
