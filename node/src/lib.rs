//! strata membership node — wires the membership layer to real TCP.
//!
//! The node owns the listener and lifecycle; the protocol itself lives in
//! `strata-network` and only sees the transport through its link seams.

pub mod config;
pub mod error;
pub mod logging;
pub mod node;
pub mod shutdown;
pub mod transport;

pub use config::NodeConfig;
pub use error::NodeError;
pub use logging::{init_logging, LogFormat};
pub use node::Node;
pub use shutdown::{ShutdownController, ShutdownSignal};
pub use transport::{TcpConnector, TcpLink};
