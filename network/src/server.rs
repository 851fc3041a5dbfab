//! The membership server: owns the registry and dispatches inbound traffic.

use std::sync::Arc;
use std::time::Duration;

use strata_messages::{Handshake, HandshakeKind, Message};
use strata_types::Peer;

use crate::connection::Connection;
use crate::link::Dialer;
use crate::registry::PeerRegistry;
use crate::NetworkError;

/// Tunables for the membership protocol. Defaults match the production
/// cadence; tests inject millisecond values.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// How often each connection's heartbeat monitor runs a liveness check.
    pub heartbeat_interval: Duration,
    /// How long one liveness attempt waits for a `PeerNotify` before it
    /// counts as a timeout.
    pub liveness_timeout: Duration,
    /// Consecutive timeouts after which a connection is evicted.
    pub liveness_retry_limit: u32,
    /// The `limit` we put in outgoing peer requests. 0 = unbounded.
    pub gossip_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(60),
            liveness_timeout: Duration::from_secs(10),
            liveness_retry_limit: 3,
            gossip_limit: 0,
        }
    }
}

/// Coordinates the membership protocol for one local node.
///
/// One inbound-dispatch task per connection feeds [`Server::dispatch`];
/// handlers for different connections run fully concurrently and share
/// state only through the registry and per-connection signals.
pub struct Server {
    local_peer: Peer,
    registry: PeerRegistry,
    dialer: Arc<dyn Dialer>,
    pub(crate) config: ServerConfig,
}

impl Server {
    pub fn new(local_peer: Peer, dialer: Arc<dyn Dialer>) -> Arc<Self> {
        Self::with_config(local_peer, dialer, ServerConfig::default())
    }

    pub fn with_config(
        local_peer: Peer,
        dialer: Arc<dyn Dialer>,
        config: ServerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            local_peer,
            registry: PeerRegistry::new(),
            dialer,
            config,
        })
    }

    pub fn local_peer(&self) -> &Peer {
        &self.local_peer
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub(crate) fn dialer(&self) -> &dyn Dialer {
        self.dialer.as_ref()
    }

    /// Route one inbound message to its handler. Called from the
    /// connection's dispatch task in arrival order.
    pub async fn dispatch(self: Arc<Self>, conn: &Arc<Connection>, message: Message) {
        match message {
            Message::Handshake(handshake) => self.handle_handshake(conn, handshake).await,
            Message::PeerRequest(request) => self.handle_peer_request(conn, request).await,
            Message::PeerNotify(notify) => self.handle_peer_notify(conn, notify).await,
        }
    }

    /// Send our identity over a connection.
    pub async fn send_handshake(
        &self,
        conn: &Connection,
        kind: HandshakeKind,
    ) -> Result<(), NetworkError> {
        conn.send(&Message::Handshake(Handshake {
            kind,
            sender: self.local_peer.clone(),
        }))
        .await
    }
}
