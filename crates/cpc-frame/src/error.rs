/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The stream does not start with a known frame header.
    #[error("invalid frame header {found:?} (expected \"!CPC\" or \"!CPD\")")]
    InvalidHeader { found: String },

    /// An extended (`!CPD`) frame arrived before extended framing was negotiated.
    #[error("extended frame header received before extended framing was negotiated")]
    ExtendedNotNegotiated,

    /// The header length field is not hexadecimal.
    #[error("invalid frame length field {0:?}")]
    InvalidLength(String),

    /// The payload exceeds the configured or encodable maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The frame checksum does not match its payload.
    #[error("bad checksum: expected {expected:08x}, got {computed:08x}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    /// The checksum field is not hexadecimal.
    #[error("invalid checksum field {0:?}")]
    InvalidChecksum(String),

    /// The payload is not valid base64.
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether the stream can continue after this error.
    ///
    /// Recoverable errors describe a single corrupted frame whose bytes have
    /// already been skipped. Everything else leaves no anchor to resync on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FrameError::ChecksumMismatch { .. }
                | FrameError::InvalidChecksum(_)
                | FrameError::InvalidBase64(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
