use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use tracing::debug;

use crate::error::{MessageError, Result};
use crate::fs::{FsData, FsReply};
use crate::kind;
use crate::terminal::TerminalState;
use crate::wire::{put_cstring, WireReader, DEFAULT_MAX_STRING_LEN};

const EVENT_OPENED: u8 = 0;
const EVENT_CLOSED: u8 = 1;
const EVENT_SHUTDOWN_ALL: u8 = 2;

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Terminal {
        window_id: u8,
        state: TerminalState,
    },
    Window {
        window_id: u8,
        event: WindowEvent,
    },
    Notification {
        window_id: u8,
        notification: Notification,
    },
    Capabilities {
        window_id: u8,
        capabilities: Capabilities,
    },
    FsReply(FsReply),
    FsData(FsData),
    /// A type byte this client does not understand; the body is skipped.
    Unknown {
        kind: u8,
        window_id: u8,
    },
}

impl Message {
    pub fn window_id(&self) -> u8 {
        match self {
            Message::Terminal { window_id, .. }
            | Message::Window { window_id, .. }
            | Message::Notification { window_id, .. }
            | Message::Capabilities { window_id, .. }
            | Message::Unknown { window_id, .. } => *window_id,
            Message::FsReply(reply) => reply.window_id,
            Message::FsData(data) => data.window_id,
        }
    }

    /// Type byte of this message.
    pub fn kind(&self) -> u8 {
        match self {
            Message::Terminal { .. } => kind::TERMINAL,
            Message::Window { .. } => kind::WINDOW_EVENT,
            Message::Notification { .. } => kind::NOTIFICATION,
            Message::Capabilities { .. } => kind::CAPABILITIES,
            Message::FsReply(_) => kind::FS_REPLY,
            Message::FsData(_) => kind::FS_DATA,
            Message::Unknown { kind, .. } => *kind,
        }
    }
}

/// Window lifecycle event (type 4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum WindowEvent {
    Opened {
        /// Nonzero when the window is a monitor attached to computer
        /// `parent_computer - 1`.
        parent_computer: u8,
        width: u16,
        height: u16,
        title: String,
    },
    Closed,
    /// The peer is shutting down every window; the session is ending.
    ShutdownAll,
}

impl WindowEvent {
    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        match r.u8()? {
            EVENT_OPENED => Ok(WindowEvent::Opened {
                parent_computer: r.u8()?,
                width: r.u16()?,
                height: r.u16()?,
                title: r.cstring()?,
            }),
            EVENT_CLOSED => Ok(WindowEvent::Closed),
            EVENT_SHUTDOWN_ALL => Ok(WindowEvent::ShutdownAll),
            other => Err(MessageError::InvalidWindowEvent(other)),
        }
    }

    fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        match self {
            WindowEvent::Opened {
                parent_computer,
                width,
                height,
                title,
            } => {
                dst.put_u8(EVENT_OPENED);
                dst.put_u8(*parent_computer);
                dst.put_u16_le(*width);
                dst.put_u16_le(*height);
                put_cstring(dst, title)?;
            }
            WindowEvent::Closed => dst.put_u8(EVENT_CLOSED),
            WindowEvent::ShutdownAll => dst.put_u8(EVENT_SHUTDOWN_ALL),
        }
        Ok(())
    }
}

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Error,
    Warning,
    Info,
}

impl NotificationKind {
    pub fn flags(self) -> u32 {
        match self {
            NotificationKind::Error => 0x10,
            NotificationKind::Warning => 0x20,
            NotificationKind::Info => 0x40,
        }
    }
}

/// Host notification (type 5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub flags: u32,
    pub title: String,
    pub message: String,
}

impl Notification {
    /// Severity, or `None` for flag values outside the known set.
    pub fn kind(&self) -> Option<NotificationKind> {
        match self.flags {
            0x10 => Some(NotificationKind::Error),
            0x20 => Some(NotificationKind::Warning),
            0x40 => Some(NotificationKind::Info),
            _ => None,
        }
    }
}

/// Capability bitfield (type 6), sent as a request and echoed as a reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub binary_checksum: bool,
    pub filesystem: bool,
    pub extended_framing: bool,
}

impl Capabilities {
    pub const BINARY_CHECKSUM: u16 = 0x0001;
    pub const FILESYSTEM: u16 = 0x0002;
    pub const EXTENDED_FRAMING: u16 = 0x0004;

    pub fn from_bits(bits: u16) -> Self {
        Self {
            binary_checksum: bits & Self::BINARY_CHECKSUM != 0,
            filesystem: bits & Self::FILESYSTEM != 0,
            extended_framing: bits & Self::EXTENDED_FRAMING != 0,
        }
    }

    pub fn to_bits(self) -> u16 {
        let mut bits = 0;
        if self.binary_checksum {
            bits |= Self::BINARY_CHECKSUM;
        }
        if self.filesystem {
            bits |= Self::FILESYSTEM;
        }
        if self.extended_framing {
            bits |= Self::EXTENDED_FRAMING;
        }
        bits
    }

    /// Whether `!CPD` headers may be used on this connection.
    ///
    /// Peers with file-system support accept extended headers for large
    /// write payloads even without the explicit bit.
    pub fn allows_extended_frames(self) -> bool {
        self.extended_framing || self.filesystem
    }
}

/// Decode a validated frame payload with the default string limit.
pub fn decode_message(payload: &[u8]) -> Result<Message> {
    decode_message_with_limit(payload, DEFAULT_MAX_STRING_LEN)
}

/// Decode a validated frame payload, bounding every null-terminated string
/// to `max_string` bytes.
pub fn decode_message_with_limit(payload: &[u8], max_string: usize) -> Result<Message> {
    let mut r = WireReader::with_max_string(payload, max_string);
    let kind = r.u8()?;
    let window_id = r.u8()?;

    Ok(match kind {
        kind::TERMINAL => Message::Terminal {
            window_id,
            state: TerminalState::decode(&mut r)?,
        },
        kind::WINDOW_EVENT => Message::Window {
            window_id,
            event: WindowEvent::decode(&mut r)?,
        },
        kind::NOTIFICATION => Message::Notification {
            window_id,
            notification: Notification {
                flags: r.u32()?,
                title: r.cstring()?,
                message: r.cstring()?,
            },
        },
        kind::CAPABILITIES => Message::Capabilities {
            window_id,
            capabilities: Capabilities::from_bits(r.u16()?),
        },
        kind::FS_REPLY => Message::FsReply(FsReply::decode(window_id, &mut r)?),
        kind::FS_DATA => Message::FsData(FsData::decode(window_id, &mut r)?),
        _ => {
            debug!(kind, window_id, "skipping message of unknown type");
            Message::Unknown { kind, window_id }
        }
    })
}

/// Request id carried by a file-system reply or data payload.
///
/// Both type 8 and type 9 put the id at byte 3, ahead of the body, so it
/// can be read even when the body itself is malformed.
pub fn reply_request_id(payload: &[u8]) -> Option<u8> {
    match payload {
        [kind::FS_REPLY | kind::FS_DATA, _, _, request_id, ..] => Some(*request_id),
        _ => None,
    }
}

/// Encode a message as the peer would send it.
pub fn encode_message(message: &Message) -> Result<Bytes> {
    let mut dst = BytesMut::new();
    dst.put_u8(message.kind());
    dst.put_u8(message.window_id());

    match message {
        Message::Terminal { state, .. } => state.encode(&mut dst),
        Message::Window { event, .. } => event.encode(&mut dst)?,
        Message::Notification { notification, .. } => {
            dst.put_u32_le(notification.flags);
            put_cstring(&mut dst, &notification.title)?;
            put_cstring(&mut dst, &notification.message)?;
        }
        Message::Capabilities { capabilities, .. } => dst.put_u16_le(capabilities.to_bits()),
        Message::FsReply(reply) => reply.encode(&mut dst)?,
        Message::FsData(data) => data.encode(&mut dst)?,
        Message::Unknown { .. } => {}
    }

    Ok(dst.freeze())
}
