//! Node lifecycle: listener, bootstrap dialing, graceful stop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use strata_network::{Connection, Dialer, MessageLink, Server};
use strata_types::{Peer, PeerAddress};

use crate::config::NodeConfig;
use crate::shutdown::ShutdownController;
use crate::transport::{self, TcpConnector, TcpLink, CONNECT_TIMEOUT};
use crate::NodeError;

/// How long `stop` waits for background tasks before aborting them.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// A running strata membership node.
///
/// Owns the listener, the membership [`Server`], and the background tasks
/// wiring them together. Connection-level tasks (read loops, heartbeat
/// monitors) are detached and wind down through connection closure.
pub struct Node {
    config: NodeConfig,
    server: Arc<Server>,
    connector: Arc<TcpConnector>,
    shutdown: ShutdownController,
    listener: Option<TcpListener>,
    listen_addr: SocketAddr,
    task_handles: Vec<JoinHandle<()>>,
}

impl Node {
    /// Bind the P2P listener and assemble the membership server. The local
    /// peer identity advertises the actually-bound port, so ephemeral ports
    /// (port 0) work.
    pub async fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let listener =
            TcpListener::bind(format!("{}:{}", config.listen_ip, config.port)).await?;
        let listen_addr = listener.local_addr()?;

        let local_peer = Peer::from_address(PeerAddress {
            ip: config.advertise_ip.clone(),
            port: listen_addr.port(),
        });

        let connector = Arc::new(TcpConnector::new(CONNECT_TIMEOUT));
        let server = Server::with_config(
            local_peer,
            Arc::clone(&connector) as Arc<dyn Dialer>,
            config.server_config(),
        );
        connector.attach(&server);

        Ok(Self {
            config,
            server,
            connector,
            shutdown: ShutdownController::new(),
            listener: Some(listener),
            listen_addr,
            task_handles: Vec::new(),
        })
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub fn shutdown(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// The address the listener is bound to.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Spawn the accept loop and bootstrap dialing.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| NodeError::Config("node already started".to_string()))?;
        tracing::info!(addr = %self.listen_addr, id = %self.server.local_peer().id, "P2P listener started");

        // ── Accept loop ───────────────────────────────────────────────────
        let server = Arc::clone(&self.server);
        let mut shutdown_rx = self.shutdown.subscribe();
        let accept_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.triggered() => {
                        tracing::info!("P2P listener shutting down");
                        break;
                    }
                    result = listener.accept() => {
                        match result {
                            Ok((stream, remote)) => {
                                let label = remote.to_string();
                                let (read_half, write_half) = stream.into_split();
                                let link = Arc::new(TcpLink::new(write_half, label.clone()));
                                let conn = Arc::new(Connection::new(link as Arc<dyn MessageLink>));
                                transport::spawn_read_loop(
                                    Arc::clone(&server),
                                    conn,
                                    read_half,
                                    label.clone(),
                                );
                                tracing::info!(peer = %label, "inbound peer connected");
                            }
                            Err(e) => {
                                tracing::warn!("P2P accept error: {e}");
                            }
                        }
                    }
                }
            }
        });
        self.task_handles.push(accept_handle);

        // ── Bootstrap dialing ─────────────────────────────────────────────
        let bootstrap: Vec<Peer> = self
            .config
            .bootstrap_peers
            .iter()
            .filter_map(|s| match parse_peer_address(s) {
                Some(addr) => Some(Peer::from_address(addr)),
                None => {
                    tracing::warn!(peer = %s, "invalid bootstrap peer address, skipping");
                    None
                }
            })
            .collect();

        if !bootstrap.is_empty() {
            let server = Arc::clone(&self.server);
            let connector = Arc::clone(&self.connector);
            let bootstrap_handle = tokio::spawn(async move {
                for peer in bootstrap {
                    if !server.registry().reserve(peer.id.clone()) {
                        continue;
                    }
                    tracing::info!(peer = %peer.id, "connecting to bootstrap peer");
                    if let Err(e) = connector.connect(&peer).await {
                        tracing::warn!(peer = %peer.id, error = %e, "bootstrap connect failed");
                    }
                }
            });
            self.task_handles.push(bootstrap_handle);
        }

        Ok(())
    }

    /// Trigger shutdown, close live connections so their monitors wind
    /// down, and wait briefly for the node's own tasks.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        self.shutdown.trigger();

        let local_id = self.server.local_peer().id.clone();
        for peer in self.server.registry().snapshot_excluding(&local_id, 0) {
            if let Some(conn) = self.server.registry().lookup(&peer.id) {
                if let Err(e) = conn.close().await {
                    if !e.is_stream_ended() {
                        tracing::warn!(peer = %peer.id, error = %e, "closing connection failed");
                    }
                }
            }
            self.server.registry().remove(&peer.id);
        }

        let mut timed_out = false;
        for handle in self.task_handles.drain(..) {
            let abort = handle.abort_handle();
            if tokio::time::timeout(STOP_TIMEOUT, handle).await.is_err() {
                abort.abort();
                timed_out = true;
            }
        }
        if timed_out {
            return Err(NodeError::ShutdownTimeout);
        }
        Ok(())
    }
}

/// Parse a `"host:port"` string into a peer address.
fn parse_peer_address(s: &str) -> Option<PeerAddress> {
    let (ip, port) = s.rsplit_once(':')?;
    let port = port.parse().ok()?;
    if ip.is_empty() {
        return None;
    }
    Some(PeerAddress {
        ip: ip.to_string(),
        port,
    })
}
