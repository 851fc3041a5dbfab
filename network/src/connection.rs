//! Per-connection state: identity, liveness signal, retry budget.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::{oneshot, Notify};

use strata_messages::Message;
use strata_types::{Peer, PeerId};

use crate::link::MessageLink;
use crate::NetworkError;

/// One live link to a remote node.
///
/// Created unauthenticated on dial or accept; the peer identity is filled
/// in exactly once when the handshake completes. Once `closed` flips, the
/// connection must not be used for sends and every loop holding a reference
/// to it exits on its next check.
pub struct Connection {
    link: Arc<dyn MessageLink>,
    peer: OnceLock<Peer>,
    closed: AtomicBool,
    closed_notify: Notify,
    /// Consecutive liveness-check timeouts since the last success.
    retries: AtomicU32,
    /// Single-slot liveness signal. Arming replaces any previous slot, so
    /// only the most recent waiter can be woken; signalling with no waiter
    /// armed is dropped without blocking the sender.
    liveness: Mutex<Option<oneshot::Sender<()>>>,
}

impl Connection {
    pub fn new(link: Arc<dyn MessageLink>) -> Self {
        Self {
            link,
            peer: OnceLock::new(),
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
            retries: AtomicU32::new(0),
            liveness: Mutex::new(None),
        }
    }

    /// The remote peer this connection authenticated as, if the handshake
    /// has completed.
    pub fn peer(&self) -> Option<&Peer> {
        self.peer.get()
    }

    pub fn peer_id(&self) -> Option<&PeerId> {
        self.peer.get().map(|p| &p.id)
    }

    /// Record the handshake identity. Set-once; a repeated handshake on the
    /// same connection keeps the first identity.
    pub fn set_peer(&self, peer: Peer) {
        let _ = self.peer.set(peer);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves once the connection is closed (possibly already).
    pub async fn closed(&self) {
        let notified = self.closed_notify.notified();
        tokio::pin!(notified);
        // Register interest before checking the flag, so a close landing
        // in between still wakes us.
        notified.as_mut().enable();
        if self.is_closed() {
            return;
        }
        notified.await;
    }

    /// Send one message over the link. Fails fast once closed.
    pub async fn send(&self, message: &Message) -> Result<(), NetworkError> {
        if self.is_closed() {
            return Err(NetworkError::ConnectionClosed);
        }
        self.link.send(message).await
    }

    /// Close the connection. Idempotent: only the first call reaches the
    /// link; later calls succeed without effect.
    pub async fn close(&self) -> Result<(), NetworkError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.closed_notify.notify_waiters();
        self.link.close().await
    }

    /// Arm a fresh liveness slot, replacing any previous one. The returned
    /// receiver resolves when any `PeerNotify` arrives on this connection.
    pub fn arm_liveness(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let mut slot = self.liveness.lock().expect("liveness slot poisoned");
        *slot = Some(tx);
        rx
    }

    /// Wake the armed liveness waiter, if any. A signal with no waiter is
    /// dropped; this never blocks.
    pub fn signal_liveness(&self) {
        let sender = self
            .liveness
            .lock()
            .expect("liveness slot poisoned")
            .take();
        if let Some(tx) = sender {
            let _ = tx.send(());
        }
    }

    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::SeqCst)
    }

    /// Count one liveness timeout; returns the new total.
    pub fn record_timeout(&self) -> u32 {
        self.retries.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn reset_retries(&self) {
        self.retries.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingLink;
    use strata_messages::{Message, PeerRequest};
    use strata_types::{Peer, PeerAddress};

    fn test_conn() -> (Arc<RecordingLink>, Connection) {
        let link = Arc::new(RecordingLink::new());
        let conn = Connection::new(link.clone() as Arc<dyn MessageLink>);
        (link, conn)
    }

    fn peer(ip: &str) -> Peer {
        Peer::from_address(PeerAddress {
            ip: ip.to_string(),
            port: 7171,
        })
    }

    #[tokio::test]
    async fn signal_wakes_armed_waiter() {
        let (_link, conn) = test_conn();
        let rx = conn.arm_liveness();
        conn.signal_liveness();
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn signal_without_waiter_is_dropped() {
        let (_link, conn) = test_conn();
        // Must not block or panic.
        conn.signal_liveness();
        conn.signal_liveness();
    }

    #[tokio::test]
    async fn rearming_replaces_previous_waiter() {
        let (_link, conn) = test_conn();
        let stale = conn.arm_liveness();
        let fresh = conn.arm_liveness();
        conn.signal_liveness();
        // The stale waiter's sender was dropped by the replacement.
        assert!(stale.await.is_err());
        assert!(fresh.await.is_ok());
    }

    #[tokio::test]
    async fn send_fails_once_closed() {
        let (link, conn) = test_conn();
        conn.close().await.unwrap();
        let result = conn.send(&Message::PeerRequest(PeerRequest { limit: 0 })).await;
        assert!(matches!(result, Err(NetworkError::ConnectionClosed)));
        assert!(link.sent().is_empty());
    }

    #[tokio::test]
    async fn close_wakes_closed_waiters() {
        let (_link, conn) = test_conn();
        let conn = Arc::new(conn);
        let waiter = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.closed().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        conn.close().await.unwrap();
        tokio::time::timeout(std::time::Duration::from_millis(200), waiter)
            .await
            .expect("waiter not woken by close")
            .unwrap();
        // Already-closed connections resolve immediately.
        conn.closed().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (link, conn) = test_conn();
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert_eq!(link.close_count(), 1);
        assert!(conn.is_closed());
    }

    #[test]
    fn peer_is_set_once() {
        let (_link, conn) = test_conn();
        assert!(conn.peer().is_none());
        conn.set_peer(peer("10.0.0.1"));
        conn.set_peer(peer("10.0.0.2"));
        assert_eq!(conn.peer_id().unwrap().as_str(), "10.0.0.1:7171");
    }

    #[test]
    fn timeout_accounting() {
        let (_link, conn) = test_conn();
        assert_eq!(conn.record_timeout(), 1);
        assert_eq!(conn.record_timeout(), 2);
        assert_eq!(conn.retries(), 2);
        conn.reset_retries();
        assert_eq!(conn.retries(), 0);
    }
}
