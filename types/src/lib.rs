//! Fundamental types for the strata store.
//!
//! This crate defines the core identity types shared across every other
//! crate in the workspace: peer records and network identifiers.

pub mod network;
pub mod peer;

pub use network::NetworkId;
pub use peer::{Peer, PeerAddress, PeerId};

/// The membership protocol version this build speaks.
pub const PROTOCOL_VERSION: u16 = 1;
