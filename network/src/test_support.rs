//! Test doubles: links and dialers that record instead of touching a network.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;

use strata_messages::Message;
use strata_types::{Peer, PeerAddress, PeerId};

use crate::connection::Connection;
use crate::link::{Dialer, MessageLink};
use crate::NetworkError;

pub(crate) fn peer(ip: &str, port: u16) -> Peer {
    Peer::from_address(PeerAddress {
        ip: ip.to_string(),
        port,
    })
}

/// An authenticated connection backed by a fresh recording link.
pub(crate) fn authenticated_conn(p: &Peer) -> Arc<Connection> {
    let link = Arc::new(RecordingLink::new());
    let conn = Arc::new(Connection::new(link as Arc<dyn MessageLink>));
    conn.set_peer(p.clone());
    conn
}

type FailFn = Box<dyn Fn() -> NetworkError + Send + Sync>;

enum ReplyMode {
    Silent,
    OnNthSend(u32),
    EverySend,
}

/// A link that records sent messages and can script the remote side:
/// failing sends, or answering the n-th send by firing the connection's
/// liveness signal (standing in for an arriving `PeerNotify`).
pub(crate) struct RecordingLink {
    sent: Mutex<Vec<Message>>,
    send_count: AtomicU32,
    close_count: AtomicU32,
    reply_to: Mutex<Option<Weak<Connection>>>,
    reply_mode: Mutex<ReplyMode>,
    fail: Mutex<Option<FailFn>>,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            send_count: AtomicU32::new(0),
            close_count: AtomicU32::new(0),
            reply_to: Mutex::new(None),
            reply_mode: Mutex::new(ReplyMode::Silent),
            fail: Mutex::new(None),
        }
    }

    /// Everything sent through this link, in order.
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> u32 {
        self.close_count.load(Ordering::SeqCst)
    }

    /// Fire `conn`'s liveness signal when the `nth` send (1-based) happens.
    pub fn reply_on_send(&self, conn: &Arc<Connection>, nth: u32) {
        *self.reply_to.lock().unwrap() = Some(Arc::downgrade(conn));
        *self.reply_mode.lock().unwrap() = ReplyMode::OnNthSend(nth);
    }

    /// Fire `conn`'s liveness signal on every send.
    pub fn reply_on_every_send(&self, conn: &Arc<Connection>) {
        *self.reply_to.lock().unwrap() = Some(Arc::downgrade(conn));
        *self.reply_mode.lock().unwrap() = ReplyMode::EverySend;
    }

    /// Make every subsequent send fail with the produced error.
    pub fn fail_sends_with(
        &self,
        make_error: impl Fn() -> NetworkError + Send + Sync + 'static,
    ) {
        *self.fail.lock().unwrap() = Some(Box::new(make_error));
    }

    fn maybe_reply(&self, send_number: u32) {
        let should_reply = match *self.reply_mode.lock().unwrap() {
            ReplyMode::Silent => false,
            ReplyMode::OnNthSend(nth) => send_number == nth,
            ReplyMode::EverySend => true,
        };
        if !should_reply {
            return;
        }
        let target = self.reply_to.lock().unwrap().clone();
        if let Some(conn) = target.and_then(|weak| weak.upgrade()) {
            conn.signal_liveness();
        }
    }
}

#[async_trait]
impl MessageLink for RecordingLink {
    async fn send(&self, message: &Message) -> Result<(), NetworkError> {
        if let Some(make_error) = &*self.fail.lock().unwrap() {
            return Err(make_error());
        }
        self.sent.lock().unwrap().push(message.clone());
        let send_number = self.send_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.maybe_reply(send_number);
        Ok(())
    }

    async fn close(&self) -> Result<(), NetworkError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A dialer that records dial targets; a configurable number of upcoming
/// dials can be made to fail.
pub(crate) struct NullDialer {
    dialed: Mutex<Vec<PeerId>>,
    failures_remaining: AtomicU32,
}

impl NullDialer {
    pub fn new() -> Self {
        Self {
            dialed: Mutex::new(Vec::new()),
            failures_remaining: AtomicU32::new(0),
        }
    }

    pub fn dialed(&self) -> Vec<PeerId> {
        self.dialed.lock().unwrap().clone()
    }

    pub fn fail_next_dials(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl Dialer for NullDialer {
    async fn connect(&self, peer: &Peer) -> Result<(), NetworkError> {
        self.dialed.lock().unwrap().push(peer.id.clone());
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(NetworkError::DialFailed(format!("unreachable: {}", peer.id)));
        }
        Ok(())
    }
}
