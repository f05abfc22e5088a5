//! Message codec for the CraftOS-PC raw protocol.
//!
//! A frame payload starts with a type byte and a window (or computer) id
//! byte, followed by a type-specific body. Inbound types:
//!
//! | type | message                     |
//! |------|-----------------------------|
//! | 0    | terminal snapshot           |
//! | 4    | window lifecycle event      |
//! | 5    | notification                |
//! | 6    | capability reply            |
//! | 8    | file-system reply           |
//! | 9    | file-system data            |
//!
//! Unknown types decode to [`Message::Unknown`] so newer peers stay readable.
//! Outbound requests (input events, capability request, file-system
//! requests and payloads) are built with [`Request`].

pub mod error;
pub mod fs;
pub mod message;
pub mod request;
pub mod terminal;
pub mod wire;

pub use error::{MessageError, Result};
pub use fs::{FileStat, FsData, FsOperation, FsReply, FsReplyBody, OpenMode, ReplyShape};
pub use message::{
    decode_message, decode_message_with_limit, encode_message, reply_request_id, Capabilities,
    Message, Notification, NotificationKind, WindowEvent,
};
pub use request::{FsRequest, InputEvent, Request};
pub use terminal::{decode_plane, encode_plane, Rgb, TerminalMode, TerminalState};
pub use wire::{WireReader, DEFAULT_MAX_STRING_LEN};

/// Message type bytes.
pub mod kind {
    pub const TERMINAL: u8 = 0;
    pub const KEY: u8 = 1;
    pub const CHAR: u8 = 2;
    pub const MOUSE: u8 = 3;
    pub const WINDOW_EVENT: u8 = 4;
    pub const NOTIFICATION: u8 = 5;
    pub const CAPABILITIES: u8 = 6;
    pub const FS_REQUEST: u8 = 7;
    pub const FS_REPLY: u8 = 8;
    pub const FS_DATA: u8 = 9;

    /// Human-readable name for a type byte.
    pub fn name(kind: u8) -> &'static str {
        match kind {
            TERMINAL => "terminal",
            KEY => "key",
            CHAR => "char",
            MOUSE => "mouse",
            WINDOW_EVENT => "window-event",
            NOTIFICATION => "notification",
            CAPABILITIES => "capabilities",
            FS_REQUEST => "fs-request",
            FS_REPLY => "fs-reply",
            FS_DATA => "fs-data",
            _ => "unknown",
        }
    }
}
