//! Wire message schema for strata node-to-node communication.
//!
//! Every message sent between nodes is one [`Message`] envelope variant.
//! The membership layer only ever sees decoded envelopes; framing and
//! byte-level encoding belong to the transport.

use serde::{Deserialize, Serialize};
use strata_types::Peer;

/// Top-level message envelope. Exactly one variant per message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Identity exchange on connect.
    Handshake(Handshake),
    /// Ask a peer for other peers it knows.
    PeerRequest(PeerRequest),
    /// Answer to a PeerRequest, or a proactive push of known peers.
    PeerNotify(PeerNotify),
}

/// Which half of the identity exchange a handshake is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeKind {
    /// Sent by the dialing side as its first message.
    Initial,
    /// Sent back by the accepting side, completing the exchange.
    Response,
}

/// One-time identity exchange establishing an authenticated connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub kind: HandshakeKind,
    pub sender: Peer,
}

/// Request for known peers. `limit == 0` means unbounded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRequest {
    pub limit: u32,
}

/// Known-peer advertisement, in the sender's registry order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerNotify {
    pub peers: Vec<Peer>,
}
