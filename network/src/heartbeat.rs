//! Heartbeat monitoring: periodic liveness checks, bounded retries, eviction.

use std::sync::Arc;

use strata_messages::{Message, PeerRequest};

use crate::connection::Connection;
use crate::server::Server;
use crate::NetworkError;

impl Server {
    /// Start the long-lived heartbeat monitor for an established
    /// connection. Exactly one monitor runs per connection; it stops
    /// permanently once the connection closes or its stream ends.
    ///
    /// Closure is observed by polling once per tick, so the monitor may
    /// run one extra tick after the connection closes before it exits.
    pub(crate) fn spawn_heartbeat(
        self: Arc<Self>,
        conn: &Arc<Connection>,
    ) -> tokio::task::JoinHandle<()> {
        let server = self;
        let conn = Arc::clone(conn);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(server.config.heartbeat_interval);
            interval.tick().await; // consume the immediate first tick
            loop {
                interval.tick().await;
                if conn.is_closed() {
                    tracing::debug!(peer = %peer_label(&conn), "heartbeat monitor stopping");
                    break;
                }
                // Every tick starts with a clean retry budget.
                conn.reset_retries();
                match server.send_peer_request(&conn).await {
                    Ok(()) => {}
                    Err(e) if e.is_stream_ended() => {
                        tracing::debug!(peer = %peer_label(&conn), "stream ended, heartbeat monitor stopping");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(peer = %peer_label(&conn), error = %e, "liveness check failed");
                    }
                }
            }
        })
    }

    /// One liveness check: a timed peer request, retried up to the budget.
    ///
    /// Also used by the handshake to kick off the very first request after
    /// an outbound dial completes. Any `PeerNotify` arriving on the
    /// connection counts as the reply — the protocol carries no correlation
    /// id, and a proactive push is just as good a proof of life.
    ///
    /// Send failures propagate to the caller. Timeouts are counted; a
    /// success clears the count, and exhausting the budget evicts the
    /// connection (registry removal plus close) — terminal for the
    /// connection, `Ok` to the caller.
    pub async fn send_peer_request(&self, conn: &Arc<Connection>) -> Result<(), NetworkError> {
        let request = Message::PeerRequest(PeerRequest {
            limit: self.config.gossip_limit,
        });
        loop {
            let signal = conn.arm_liveness();
            conn.send(&request).await?;

            match tokio::time::timeout(self.config.liveness_timeout, signal).await {
                Ok(Ok(())) => {
                    conn.reset_retries();
                    return Ok(());
                }
                // Timed out, or the slot was replaced out from under us —
                // either way this attempt saw no reply.
                Ok(Err(_)) | Err(_) => {}
            }

            let retries = conn.record_timeout();
            if retries >= self.config.liveness_retry_limit {
                tracing::warn!(peer = %peer_label(conn), retries, "peer timed out, evicting");
                if let Some(id) = conn.peer_id() {
                    self.registry().remove(id);
                }
                if let Err(e) = conn.close().await {
                    if !e.is_stream_ended() {
                        tracing::warn!(peer = %peer_label(conn), error = %e, "closing evicted connection failed");
                    }
                }
                return Ok(());
            }
            tracing::warn!(peer = %peer_label(conn), retries, "liveness check timed out, retrying");
        }
    }
}

fn peer_label(conn: &Connection) -> &str {
    conn.peer_id().map(|id| id.as_str()).unwrap_or("<unauthenticated>")
}
