//! TCP transport: framing, links, dialing, and per-connection read loops.
//!
//! Frames are a 4-byte big-endian length prefix followed by a bincode
//! [`Message`] body. One read-loop task per connection decodes frames and
//! feeds [`Server::dispatch`] in arrival order; the write half lives inside
//! a [`TcpLink`] behind the [`MessageLink`] seam.

use std::io::ErrorKind;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use strata_messages::{HandshakeKind, Message};
use strata_network::{Connection, Dialer, MessageLink, NetworkError, Server};
use strata_types::Peer;

/// Maximum message body size. Peer lists are small; anything bigger is a
/// protocol violation.
pub(crate) const MAX_MESSAGE_SIZE: usize = 1024 * 1024; // 1 MiB

/// Timeout for the initial TCP connection attempt.
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// [`MessageLink`] over the write half of a TCP stream.
///
/// `close` takes the writer out of its slot and shuts it down; a link whose
/// writer is already gone reports the distinguished stream-ended condition.
pub struct TcpLink {
    remote: String,
    writer: Mutex<Option<OwnedWriteHalf>>,
}

impl TcpLink {
    pub(crate) fn new(writer: OwnedWriteHalf, remote: String) -> Self {
        Self {
            remote,
            writer: Mutex::new(Some(writer)),
        }
    }
}

#[async_trait]
impl MessageLink for TcpLink {
    async fn send(&self, message: &Message) -> Result<(), NetworkError> {
        let payload =
            bincode::serialize(message).map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(NetworkError::SendFailed(format!(
                "message too large: {} bytes",
                payload.len()
            )));
        }

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(NetworkError::StreamEnded)?;
        let len_bytes = (payload.len() as u32).to_be_bytes();
        writer.write_all(&len_bytes).await.map_err(map_send_error)?;
        writer.write_all(&payload).await.map_err(map_send_error)?;
        writer.flush().await.map_err(map_send_error)?;
        tracing::trace!(peer = %self.remote, bytes = payload.len(), "frame sent");
        Ok(())
    }

    async fn close(&self) -> Result<(), NetworkError> {
        let mut guard = self.writer.lock().await;
        match guard.take() {
            Some(mut writer) => match writer.shutdown().await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotConnected => Err(NetworkError::StreamEnded),
                Err(e) => Err(NetworkError::Io(e.to_string())),
            },
            None => Err(NetworkError::StreamEnded),
        }
    }
}

fn map_send_error(e: std::io::Error) -> NetworkError {
    match e.kind() {
        ErrorKind::UnexpectedEof | ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => {
            NetworkError::StreamEnded
        }
        _ => NetworkError::SendFailed(e.to_string()),
    }
}

/// Read one frame. `Ok(None)` means the remote ended the stream cleanly.
async fn read_frame(reader: &mut OwnedReadHalf) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let body_len = u32::from_be_bytes(len_buf) as usize;
    if body_len > MAX_MESSAGE_SIZE {
        return Err(std::io::Error::new(
            ErrorKind::InvalidData,
            format!("message too large: {body_len} > {MAX_MESSAGE_SIZE}"),
        ));
    }

    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Spawn the dispatch task for one connection: read frames, decode, hand to
/// the server in arrival order. On exit (clean end or error) the peer is
/// removed from the registry — but only if this connection still owns the
/// slot, so a closing duplicate never evicts the established entry — and
/// the connection is closed.
pub(crate) fn spawn_read_loop(
    server: Arc<Server>,
    conn: Arc<Connection>,
    mut reader: OwnedReadHalf,
    remote: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let result = read_loop(&server, &conn, &mut reader).await;
        let label = conn
            .peer_id()
            .map(|id| id.to_string())
            .unwrap_or_else(|| remote.clone());
        match &result {
            Ok(()) => tracing::info!(peer = %label, "peer disconnected (clean close)"),
            Err(e) => tracing::warn!(peer = %label, error = %e, "peer disconnected with error"),
        }

        if let Some(id) = conn.peer_id() {
            let registered = server.registry().lookup(id);
            if registered.is_some_and(|live| Arc::ptr_eq(&live, &conn)) {
                server.registry().remove(id);
            }
        }
        if let Err(e) = conn.close().await {
            if !e.is_stream_ended() {
                tracing::warn!(peer = %label, error = %e, "closing connection failed");
            }
        }
    })
}

async fn read_loop(
    server: &Arc<Server>,
    conn: &Arc<Connection>,
    reader: &mut OwnedReadHalf,
) -> std::io::Result<()> {
    loop {
        // Closure (duplicate resolution, eviction) ends the loop even while
        // blocked on a read; abandoning a partial frame is fine then.
        let frame = tokio::select! {
            biased;
            _ = conn.closed() => return Ok(()),
            frame = read_frame(reader) => frame?,
        };
        let Some(frame) = frame else {
            return Ok(());
        };
        match bincode::deserialize::<Message>(&frame) {
            Ok(message) => Arc::clone(server).dispatch(conn, message).await,
            Err(_) => {
                tracing::trace!(bytes = frame.len(), "failed to decode frame, dropping");
            }
        }
    }
}

/// Outbound dialing: TCP connect, read-loop spawn, initial handshake.
///
/// The connector and the server reference each other (gossip asks the
/// connector to dial; the read loops feed the server), so the server side
/// is attached after construction and held weakly.
pub struct TcpConnector {
    connect_timeout: Duration,
    server: OnceLock<Weak<Server>>,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            server: OnceLock::new(),
        }
    }

    /// Wire the connector to the server it dials for. Called once during
    /// node construction.
    pub fn attach(&self, server: &Arc<Server>) {
        let _ = self.server.set(Arc::downgrade(server));
    }

    fn server(&self) -> Option<Arc<Server>> {
        self.server.get().and_then(Weak::upgrade)
    }
}

#[async_trait]
impl Dialer for TcpConnector {
    async fn connect(&self, peer: &Peer) -> Result<(), NetworkError> {
        let server = self
            .server()
            .ok_or_else(|| NetworkError::DialFailed("connector not attached".into()))?;

        let addr = peer.addr.to_host_port();
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| NetworkError::DialFailed(format!("connection timed out to {addr}")))?
            .map_err(|e| NetworkError::DialFailed(format!("TCP connect to {addr} failed: {e}")))?;

        let (read_half, write_half) = stream.into_split();
        let link = Arc::new(TcpLink::new(write_half, addr.clone()));
        let conn = Arc::new(Connection::new(link as Arc<dyn MessageLink>));
        spawn_read_loop(Arc::clone(&server), Arc::clone(&conn), read_half, addr.clone());

        server.send_handshake(&conn, HandshakeKind::Initial).await?;
        tracing::debug!(peer = %peer.id, addr = %addr, "dialed peer, handshake sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_messages::PeerRequest;
    use tokio::net::TcpListener;

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn frames_round_trip_over_a_socket() {
        let (client, server) = tcp_pair().await;
        let (_client_read, client_write) = client.into_split();
        let (mut server_read, _server_write) = server.into_split();

        let link = TcpLink::new(client_write, "test".into());
        let message = Message::PeerRequest(PeerRequest { limit: 7 });
        link.send(&message).await.unwrap();

        let frame = read_frame(&mut server_read).await.unwrap().unwrap();
        let decoded: Message = bincode::deserialize(&frame).unwrap();
        assert_eq!(decoded, message);
    }

    #[tokio::test]
    async fn closing_the_link_ends_the_remote_stream() {
        let (client, server) = tcp_pair().await;
        let (_client_read, client_write) = client.into_split();
        let (mut server_read, _server_write) = server.into_split();

        let link = TcpLink::new(client_write, "test".into());
        link.close().await.unwrap();

        assert!(read_frame(&mut server_read).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn send_after_close_reports_stream_ended() {
        let (client, _server) = tcp_pair().await;
        let (_client_read, client_write) = client.into_split();

        let link = TcpLink::new(client_write, "test".into());
        link.close().await.unwrap();

        let result = link.send(&Message::PeerRequest(PeerRequest { limit: 0 })).await;
        assert!(matches!(result, Err(NetworkError::StreamEnded)));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (client, server) = tcp_pair().await;
        let (_client_read, mut client_write) = client.into_split();
        let (mut server_read, _server_write) = server.into_split();

        // A length prefix far beyond the cap, no body needed.
        let bogus_len = ((MAX_MESSAGE_SIZE + 1) as u32).to_be_bytes();
        client_write.write_all(&bogus_len).await.unwrap();
        client_write.flush().await.unwrap();

        let err = read_frame(&mut server_read).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
