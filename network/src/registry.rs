//! The shared peer table.
//!
//! Single authoritative mapping from peer id to connection state, accessed
//! concurrently by every handler and monitor task. All operations are
//! internally synchronized; the lock is never held across a send, sleep, or
//! any other suspension point — callers get owned snapshots back.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use strata_types::{Peer, PeerId};

use crate::connection::Connection;

/// State of one registry slot.
///
/// `Reserved` marks a connection attempt in flight for an id — it prevents
/// duplicate concurrent dials without pretending a live connection exists.
pub enum RegistrySlot {
    Reserved,
    Live(Arc<Connection>),
}

/// Concurrency-safe registry of known peers.
///
/// Invariant: at most one `Live` entry per id; every write happens under
/// the exclusive lock, so readers never observe a partially-written slot.
pub struct PeerRegistry {
    slots: RwLock<HashMap<PeerId, RegistrySlot>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Look up the live connection for an id. Reserved slots are invisible
    /// to callers asking for live peers.
    pub fn lookup(&self, id: &PeerId) -> Option<Arc<Connection>> {
        let slots = self.slots.read().expect("registry lock poisoned");
        match slots.get(id) {
            Some(RegistrySlot::Live(conn)) => Some(Arc::clone(conn)),
            _ => None,
        }
    }

    /// Reserve an id for an in-flight connection attempt. Returns `true`
    /// iff the id was absent and is now reserved — the presence check and
    /// the insert are one atomic step under the write lock, so two
    /// concurrent callers cannot both win.
    pub fn reserve(&self, id: PeerId) -> bool {
        let mut slots = self.slots.write().expect("registry lock poisoned");
        if slots.contains_key(&id) {
            return false;
        }
        slots.insert(id, RegistrySlot::Reserved);
        true
    }

    /// Install the live connection for an id, replacing any reservation.
    pub fn set(&self, id: PeerId, conn: Arc<Connection>) {
        let mut slots = self.slots.write().expect("registry lock poisoned");
        slots.insert(id, RegistrySlot::Live(conn));
    }

    /// Remove an id entirely. Returns whether a slot was present.
    pub fn remove(&self, id: &PeerId) -> bool {
        let mut slots = self.slots.write().expect("registry lock poisoned");
        slots.remove(id).is_some()
    }

    /// Whether any slot (reserved or live) exists for this id.
    pub fn contains(&self, id: &PeerId) -> bool {
        let slots = self.slots.read().expect("registry lock poisoned");
        slots.contains_key(id)
    }

    /// Collect the peers of live connections, skipping the given id and all
    /// reserved slots, stopping once `limit` peers are collected when
    /// `limit > 0`. Order is the registry's own iteration order.
    pub fn snapshot_excluding(&self, exclude: &PeerId, limit: u32) -> Vec<Peer> {
        let slots = self.slots.read().expect("registry lock poisoned");
        let mut peers = Vec::new();
        for (id, slot) in slots.iter() {
            if id == exclude {
                continue;
            }
            let conn = match slot {
                RegistrySlot::Live(conn) => conn,
                RegistrySlot::Reserved => continue,
            };
            if let Some(peer) = conn.peer() {
                peers.push(peer.clone());
                if limit > 0 && peers.len() >= limit as usize {
                    break;
                }
            }
        }
        peers
    }

    /// Total number of slots, reservations included.
    pub fn len(&self) -> usize {
        self.slots.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live (authenticated) connections.
    pub fn live_count(&self) -> usize {
        let slots = self.slots.read().expect("registry lock poisoned");
        slots
            .values()
            .filter(|slot| matches!(slot, RegistrySlot::Live(_)))
            .count()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
