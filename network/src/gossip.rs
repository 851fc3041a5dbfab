//! Gossip exchange: answering peer requests and chasing advertised peers.

use std::sync::Arc;

use strata_messages::{Message, PeerNotify, PeerRequest};

use crate::connection::Connection;
use crate::server::Server;

impl Server {
    /// Answer a peer request with the live peers we know, excluding the
    /// requester itself and any in-flight reservations.
    pub(crate) async fn handle_peer_request(&self, conn: &Arc<Connection>, request: PeerRequest) {
        let requester = match conn.peer_id() {
            Some(id) => id.clone(),
            None => {
                tracing::warn!("peer request on unauthenticated connection, ignoring");
                return;
            }
        };

        let peers = self.registry().snapshot_excluding(&requester, request.limit);
        tracing::debug!(peer = %requester, count = peers.len(), "answering peer request");
        if let Err(e) = conn.send(&Message::PeerNotify(PeerNotify { peers })).await {
            tracing::warn!(peer = %requester, error = %e, "sending peer notify failed");
        }
    }

    /// Absorb a peer advertisement.
    ///
    /// Any notify doubles as the liveness reply for this connection, so the
    /// signal fires before anything else. Each unknown advertised peer is
    /// reserved and dialed; once its handshake lands, that peer's own
    /// request continues the spread. A failed dial leaves the reservation
    /// in place, so the same id is not re-attempted unless evicted.
    pub(crate) async fn handle_peer_notify(&self, conn: &Arc<Connection>, notify: PeerNotify) {
        conn.signal_liveness();

        for peer in notify.peers {
            if !self.registry().reserve(peer.id.clone()) {
                continue;
            }
            tracing::debug!(peer = %peer.id, "discovered peer via gossip, dialing");
            if let Err(e) = self.dialer().connect(&peer).await {
                tracing::warn!(peer = %peer.id, error = %e, "connecting to advertised peer failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{Dialer, MessageLink};
    use crate::test_support::{authenticated_conn, peer, NullDialer, RecordingLink};
    use strata_types::PeerId;

    fn server_with_dialer() -> (Arc<NullDialer>, Arc<Server>) {
        let dialer = Arc::new(NullDialer::new());
        let server = Server::new(peer("local", 7171), dialer.clone() as Arc<dyn Dialer>);
        (dialer, server)
    }

    fn authenticated(link: &Arc<RecordingLink>, ip: &str) -> Arc<Connection> {
        let conn = Arc::new(Connection::new(link.clone() as Arc<dyn MessageLink>));
        conn.set_peer(peer(ip, 7171));
        conn
    }

    #[tokio::test]
    async fn peer_request_answered_with_exclusions() {
        let (_dialer, server) = server_with_dialer();
        let a = peer("a", 1);
        let b = peer("b", 2);
        let x = peer("x", 3);
        server.registry().set(a.id.clone(), authenticated_conn(&a));
        server.registry().set(b.id.clone(), authenticated_conn(&b));
        server.registry().set(x.id.clone(), authenticated_conn(&x));
        server.registry().reserve(PeerId::from("c:4"));

        let link = Arc::new(RecordingLink::new());
        let conn = authenticated(&link, "x");
        // The requester is itself a registered live peer; it must not be
        // advertised back to itself.
        server
            .registry()
            .set(conn.peer_id().unwrap().clone(), Arc::clone(&conn));

        server
            .handle_peer_request(&conn, PeerRequest { limit: 0 })
            .await;

        let sent = link.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Message::PeerNotify(n) => {
                let mut ids: Vec<_> = n.peers.iter().map(|p| p.id.as_str().to_string()).collect();
                ids.sort();
                // x:3 is a different id than the requester x:7171, so it stays.
                assert_eq!(ids, vec!["a:1", "b:2", "x:3"]);
            }
            other => panic!("expected PeerNotify, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn peer_request_honors_limit() {
        let (_dialer, server) = server_with_dialer();
        for i in 0..5u16 {
            let p = peer("n", i);
            server.registry().set(p.id.clone(), authenticated_conn(&p));
        }

        let link = Arc::new(RecordingLink::new());
        let conn = authenticated(&link, "requester");
        server
            .handle_peer_request(&conn, PeerRequest { limit: 2 })
            .await;

        match &link.sent()[0] {
            Message::PeerNotify(n) => assert_eq!(n.peers.len(), 2),
            other => panic!("expected PeerNotify, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn peer_request_from_unauthenticated_connection_is_dropped() {
        let (_dialer, server) = server_with_dialer();
        let link = Arc::new(RecordingLink::new());
        let conn = Arc::new(Connection::new(link.clone() as Arc<dyn MessageLink>));

        server
            .handle_peer_request(&conn, PeerRequest { limit: 0 })
            .await;

        assert!(link.sent().is_empty());
    }

    #[tokio::test]
    async fn notify_signals_liveness_before_dialing() {
        let (_dialer, server) = server_with_dialer();
        let link = Arc::new(RecordingLink::new());
        let conn = authenticated(&link, "remote");
        let armed = conn.arm_liveness();

        server
            .handle_peer_notify(&conn, PeerNotify { peers: vec![] })
            .await;

        assert!(armed.await.is_ok());
    }

    #[tokio::test]
    async fn notify_reserves_and_dials_unknown_peers() {
        let (dialer, server) = server_with_dialer();
        let link = Arc::new(RecordingLink::new());
        let conn = authenticated(&link, "remote");

        let known = peer("known", 1);
        server
            .registry()
            .set(known.id.clone(), authenticated_conn(&known));
        let fresh = peer("fresh", 2);

        server
            .handle_peer_notify(
                &conn,
                PeerNotify {
                    peers: vec![known.clone(), fresh.clone()],
                },
            )
            .await;

        assert_eq!(dialer.dialed(), vec![fresh.id.clone()]);
        // The new peer is reserved (in flight), not live.
        assert!(server.registry().contains(&fresh.id));
        assert!(server.registry().lookup(&fresh.id).is_none());
    }

    #[tokio::test]
    async fn failed_dial_leaves_reservation_in_place() {
        let (dialer, server) = server_with_dialer();
        dialer.fail_next_dials(1);
        let link = Arc::new(RecordingLink::new());
        let conn = authenticated(&link, "remote");
        let unreachable = peer("unreachable", 9);

        server
            .handle_peer_notify(
                &conn,
                PeerNotify {
                    peers: vec![unreachable.clone()],
                },
            )
            .await;

        assert!(server.registry().contains(&unreachable.id));

        // A second advertisement of the same id is skipped outright.
        server
            .handle_peer_notify(
                &conn,
                PeerNotify {
                    peers: vec![unreachable.clone()],
                },
            )
            .await;
        assert_eq!(dialer.dialed().len(), 1);
    }
}
