use std::fmt;
use std::io;

use cpc_frame::FrameError;
use cpc_message::MessageError;
use cpc_peer::PeerError;
use cpc_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound
        | io::ErrorKind::PermissionDenied
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe => TRANSPORT_ERROR,
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => DATA_INVALID,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Connect { .. } | TransportError::Spawn { .. } => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        FrameError::InvalidHeader { .. }
        | FrameError::ExtendedNotNegotiated
        | FrameError::InvalidLength(_)
        | FrameError::PayloadTooLarge { .. }
        | FrameError::ChecksumMismatch { .. }
        | FrameError::InvalidChecksum(_)
        | FrameError::InvalidBase64(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
    }
}

pub fn message_error(context: &str, err: MessageError) -> CliError {
    match err {
        // Both come from caller-supplied paths, not from the wire.
        MessageError::PathCount { .. } | MessageError::InvalidString(_) => {
            CliError::usage(format!("{context}: {err}"))
        }
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn peer_error(context: &str, err: PeerError) -> CliError {
    match err {
        PeerError::Transport(err) => transport_error(context, err),
        PeerError::Frame(err) => frame_error(context, err),
        PeerError::Message(err) => message_error(context, err),
        PeerError::HandshakeFailed(_) | PeerError::Timeout(_) => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        PeerError::OperationFailed { .. }
        | PeerError::Disconnected(_)
        | PeerError::FilesystemUnsupported => CliError::new(FAILURE, format!("{context}: {err}")),
        PeerError::UnexpectedReply { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        PeerError::RequestSlotsExhausted => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}
