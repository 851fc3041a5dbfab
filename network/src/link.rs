//! Transport collaborator seams.
//!
//! The membership layer never touches sockets or framing directly: it sends
//! decoded [`Message`]s over a [`MessageLink`] and asks a [`Dialer`] for new
//! outbound connections. The TCP implementations live in `strata-node`;
//! tests substitute recording doubles.

use async_trait::async_trait;

use strata_messages::Message;
use strata_types::Peer;

use crate::NetworkError;

/// One duplex link to a remote node, as seen by the membership layer.
#[async_trait]
pub trait MessageLink: Send + Sync {
    /// Send one message. May block on transport backpressure.
    async fn send(&self, message: &Message) -> Result<(), NetworkError>;

    /// Close the link. Idempotent; returns [`NetworkError::StreamEnded`]
    /// when the remote already ended the stream cleanly.
    async fn close(&self) -> Result<(), NetworkError>;
}

/// Opportunistic outbound dialing, used by gossip to reach advertised peers.
///
/// A successful `connect` is expected to establish a link to the peer and
/// initiate the handshake; registration happens when the remote's handshake
/// arrives back through normal dispatch.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn connect(&self, peer: &Peer) -> Result<(), NetworkError>;
}
