use thiserror::Error;

use strata_types::PeerId;

#[derive(Debug, Error)]
pub enum NetworkError {
    /// The remote side ended the stream cleanly. Distinguished from real
    /// failures: loops that see this stop quietly instead of logging errors.
    #[error("stream ended")]
    StreamEnded,

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("dial failed: {0}")]
    DialFailed(String),

    #[error("peer {0} not found")]
    PeerNotFound(PeerId),

    #[error("IO error: {0}")]
    Io(String),
}

impl NetworkError {
    /// Whether this is the clean end-of-stream indication.
    pub fn is_stream_ended(&self) -> bool {
        matches!(self, Self::StreamEnded)
    }
}
