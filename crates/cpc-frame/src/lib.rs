//! Checksummed, base64-encoded framing for the CraftOS-PC raw protocol.
//!
//! Every message travels as one self-delimited ASCII frame:
//! - a 4-byte header, `!CPC` (or `!CPD` once extended framing is negotiated)
//! - the base64 payload length in hex (4 digits, or 12 for `!CPD`)
//! - the base64 payload
//! - a CRC-32 in 8 hex digits, over either the base64 text or the raw bytes
//! - a trailing newline
//!
//! The decoder buffers partial frames across chunk boundaries and
//! resynchronizes past corrupted frames without losing the rest of the stream.

pub mod checksum;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

#[cfg(feature = "async")]
pub use async_codec::CpcCodec;
pub use checksum::crc32;
pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, FrameDecoder, FrameHeader, FrameMode,
    CHECKSUM_LEN, DEFAULT_MAX_PAYLOAD, MAX_STANDARD_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
