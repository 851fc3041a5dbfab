//! Handshake handling: identity exchange and duplicate resolution.

use std::sync::Arc;

use strata_messages::{Handshake, HandshakeKind};

use crate::connection::Connection;
use crate::server::Server;

impl Server {
    /// Complete the identity exchange for a connection.
    ///
    /// The existing registry entry always wins a duplicate: the newer
    /// connection is closed and the established one is left untouched.
    pub(crate) async fn handle_handshake(
        self: Arc<Self>,
        conn: &Arc<Connection>,
        handshake: Handshake,
    ) {
        let sender = handshake.sender;
        conn.set_peer(sender.clone());

        if self.registry().lookup(&sender.id).is_some() {
            tracing::info!(peer = %sender.id, "ignoring duplicate peer");
            if let Err(e) = conn.close().await {
                if !e.is_stream_ended() {
                    tracing::warn!(peer = %sender.id, error = %e, "closing duplicate connection failed");
                }
            }
            return;
        }

        self.registry().set(sender.id.clone(), Arc::clone(conn));
        tracing::info!(peer = %sender.id, addr = %sender.addr, "new peer");

        match handshake.kind {
            // The remote dialed us; answer with our identity so it can
            // register this link without another round trip.
            HandshakeKind::Initial => {
                if let Err(e) = self.send_handshake(conn, HandshakeKind::Response).await {
                    tracing::warn!(peer = %sender.id, error = %e, "handshake response failed");
                }
            }
            // We dialed and this is the reply; start discovery right away.
            // Spawned off the dispatch path: the liveness reply arrives
            // through this same connection's dispatch, which must stay free
            // to deliver it.
            HandshakeKind::Response => {
                let server = Arc::clone(&self);
                let conn = Arc::clone(conn);
                let peer_id = sender.id.clone();
                tokio::spawn(async move {
                    if let Err(e) = server.send_peer_request(&conn).await {
                        tracing::warn!(peer = %peer_id, error = %e, "initial peer request failed");
                    }
                });
            }
        }

        self.spawn_heartbeat(conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{Dialer, MessageLink};
    use crate::test_support::{peer, NullDialer, RecordingLink};
    use strata_messages::Message;

    fn server() -> Arc<Server> {
        Server::new(peer("local", 7171), Arc::new(NullDialer::new()) as Arc<dyn Dialer>)
    }

    fn connection() -> (Arc<RecordingLink>, Arc<Connection>) {
        let link = Arc::new(RecordingLink::new());
        let conn = Arc::new(Connection::new(link.clone() as Arc<dyn MessageLink>));
        (link, conn)
    }

    #[tokio::test]
    async fn initial_handshake_registers_and_replies() {
        let server = server();
        let (link, conn) = connection();
        let remote = peer("remote", 7171);

        Arc::clone(&server)
            .handle_handshake(
                &conn,
                Handshake {
                    kind: HandshakeKind::Initial,
                    sender: remote.clone(),
                },
            )
            .await;

        assert!(server.registry().lookup(&remote.id).is_some());
        let sent = link.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Message::Handshake(h) => {
                assert_eq!(h.kind, HandshakeKind::Response);
                assert_eq!(h.sender.id, server.local_peer().id);
            }
            other => panic!("expected Handshake, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn response_handshake_registers_and_requests_peers() {
        let server = server();
        let (link, conn) = connection();
        let remote = peer("remote", 7171);

        // The remote replies instantly so the liveness wait resolves.
        link.reply_on_send(&conn, 1);

        Arc::clone(&server)
            .handle_handshake(
                &conn,
                Handshake {
                    kind: HandshakeKind::Response,
                    sender: remote.clone(),
                },
            )
            .await;

        assert!(server.registry().lookup(&remote.id).is_some());

        // The first peer request is issued from a spawned task.
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        while link.sent().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "no peer request sent");
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let sent = link.sent();
        assert!(matches!(sent[0], Message::PeerRequest(_)));
        assert_eq!(conn.retries(), 0);
    }

    #[tokio::test]
    async fn duplicate_handshake_closes_newcomer_only() {
        let server = server();
        let remote = peer("remote", 7171);

        let (_first_link, first) = connection();
        Arc::clone(&server)
            .handle_handshake(
                &first,
                Handshake {
                    kind: HandshakeKind::Initial,
                    sender: remote.clone(),
                },
            )
            .await;
        let registered_before = server.registry().len();

        let (second_link, second) = connection();
        Arc::clone(&server)
            .handle_handshake(
                &second,
                Handshake {
                    kind: HandshakeKind::Initial,
                    sender: remote.clone(),
                },
            )
            .await;

        assert_eq!(server.registry().len(), registered_before);
        assert!(second.is_closed());
        assert_eq!(second_link.close_count(), 1);
        assert!(!first.is_closed());
        // The surviving registry entry is still the first connection.
        let live = server.registry().lookup(&remote.id).unwrap();
        assert!(Arc::ptr_eq(&live, &first));
    }
}
