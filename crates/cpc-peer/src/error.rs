use std::time::Duration;

/// Errors that can occur in connection operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] cpc_transport::TransportError),

    /// Frame-level error. Only unrecoverable framing errors surface here.
    #[error("frame error: {0}")]
    Frame(#[from] cpc_frame::FrameError),

    /// A message body could not be encoded or decoded.
    #[error("message error: {0}")]
    Message(#[from] cpc_message::MessageError),

    /// The capability handshake did not complete.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The connection is closed; pending and new requests fail with this.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// No reply arrived before the request deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The peer reported failure for a file-system operation.
    #[error("{operation} failed: {message}")]
    OperationFailed {
        operation: &'static str,
        message: String,
    },

    /// The reply does not fit the operation it answers.
    #[error("unexpected reply to {operation}: {found}")]
    UnexpectedReply {
        operation: &'static str,
        found: String,
    },

    /// All 256 request ids are in flight.
    #[error("all request ids are in use")]
    RequestSlotsExhausted,

    /// The peer has not negotiated file-system support.
    #[error("peer does not support file-system requests")]
    FilesystemUnsupported,
}

impl PeerError {
    /// Whether the error ends the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PeerError::Transport(_) | PeerError::Frame(_) | PeerError::Disconnected(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
