/// Errors that can occur while decoding or encoding message bodies.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The payload ended before a field could be read.
    #[error("message truncated (needed {needed} bytes, {remaining} remaining)")]
    Truncated { needed: usize, remaining: usize },

    /// A null-terminated string ran past the allowed length.
    #[error("string exceeds {max} bytes without terminator")]
    StringTooLong { max: usize },

    /// A run-length pair declared a zero-length run.
    #[error("zero-length run in terminal plane")]
    ZeroRunLength,

    /// Unknown terminal mode byte.
    #[error("invalid terminal mode {0}")]
    InvalidTerminalMode(u8),

    /// Unknown window event subtype.
    #[error("invalid window event subtype {0}")]
    InvalidWindowEvent(u8),

    /// Unknown file-system operation class.
    #[error("invalid file-system operation class {0:#04x}")]
    InvalidOperation(u8),

    /// A string cannot be sent as a null-terminated Latin-1 field.
    #[error("string {0:?} contains NUL or characters outside Latin-1")]
    InvalidString(String),

    /// A file-system request has the wrong number of paths for its class.
    #[error("{operation} takes {expected} path(s)")]
    PathCount {
        operation: &'static str,
        expected: usize,
    },

    /// A payload is too large for its 32-bit length field.
    #[error("payload too large for length field ({0} bytes)")]
    PayloadTooLarge(usize),
}

pub type Result<T> = std::result::Result<T, MessageError>;
