use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::checksum::crc32;
use crate::error::{FrameError, Result};

/// Standard frame magic.
pub const CPC_MAGIC: &[u8; 4] = b"!CPC";

/// Extended frame magic (12-digit length field).
pub const CPD_MAGIC: &[u8; 4] = b"!CPD";

/// Width of the trailing CRC-32 field, in hex digits.
pub const CHECKSUM_LEN: usize = 8;

/// Largest base64 length a `!CPC` header can declare.
pub const MAX_STANDARD_PAYLOAD: usize = 0xFFFF;

/// Largest base64 length a `!CPD` header can declare.
pub const MAX_EXTENDED_PAYLOAD: usize = 0xFFFF_FFFF_FFFF;

/// Default maximum base64 payload accepted from the peer: 64 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Which header a frame was (or will be) sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameHeader {
    /// `!CPC` + 4 hex digits.
    Standard,
    /// `!CPD` + 12 hex digits.
    Extended,
}

impl FrameHeader {
    /// Digits in the length field.
    pub fn length_digits(self) -> usize {
        match self {
            FrameHeader::Standard => 4,
            FrameHeader::Extended => 12,
        }
    }

    /// Offset of the base64 payload from the start of the frame.
    pub fn payload_offset(self) -> usize {
        CPC_MAGIC.len() + self.length_digits()
    }

    fn magic(self) -> &'static [u8; 4] {
        match self {
            FrameHeader::Standard => CPC_MAGIC,
            FrameHeader::Extended => CPD_MAGIC,
        }
    }
}

/// Negotiated framing options. Both default to off until the peer's
/// capability reply says otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameMode {
    /// CRC over the decoded bytes instead of the base64 text.
    pub binary_checksum: bool,
    /// Accept and emit `!CPD` frames.
    pub extended_framing: bool,
}

/// A validated frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Header the frame arrived with.
    pub header: FrameHeader,
    /// Decoded (raw) payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a standard-header frame.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            header: FrameHeader::Standard,
            payload: payload.into(),
        }
    }
}

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────┬──────────────┬──────────────────┬────────────┬──────┐
/// │ "!CPC" │ length (hex) │ base64 payload   │ CRC-32     │ "\n" │
/// │ "!CPD" │ 4 / 12 digits│ (length chars)   │ (8 hex)    │      │
/// └────────┴──────────────┴──────────────────┴────────────┴──────┘
/// ```
///
/// The extended header is chosen only when the base64 text does not fit the
/// standard length field, and only if `mode.extended_framing` is set.
pub fn encode_frame(payload: &[u8], mode: FrameMode, dst: &mut BytesMut) -> Result<FrameHeader> {
    let text = STANDARD.encode(payload);
    let header = if text.len() <= MAX_STANDARD_PAYLOAD {
        FrameHeader::Standard
    } else if mode.extended_framing && text.len() <= MAX_EXTENDED_PAYLOAD {
        FrameHeader::Extended
    } else {
        let max = if mode.extended_framing {
            MAX_EXTENDED_PAYLOAD
        } else {
            MAX_STANDARD_PAYLOAD
        };
        return Err(FrameError::PayloadTooLarge {
            size: text.len(),
            max,
        });
    };

    let checksum = if mode.binary_checksum {
        crc32(payload)
    } else {
        crc32(text.as_bytes())
    };

    let length = match header {
        FrameHeader::Standard => format!("{:04x}", text.len()),
        FrameHeader::Extended => format!("{:012x}", text.len()),
    };

    dst.reserve(header.payload_offset() + text.len() + CHECKSUM_LEN + 1);
    dst.put_slice(header.magic());
    dst.put_slice(length.as_bytes());
    dst.put_slice(text.as_bytes());
    dst.put_slice(format!("{checksum:08x}").as_bytes());
    dst.put_u8(b'\n');
    Ok(header)
}

/// Decode one frame from the front of a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet; the
/// buffer is left untouched apart from leading whitespace. A complete frame is
/// always consumed, even when it fails validation: checksum and base64 errors
/// are returned after the corrupted frame has been skipped, so the caller can
/// log them and call again to continue with the next frame.
pub fn decode_frame(src: &mut BytesMut, mode: FrameMode, max_payload: usize) -> Result<Option<Frame>> {
    skip_whitespace(src);
    if src.len() < CPC_MAGIC.len() {
        return Ok(None); // Need more data
    }

    let header = match &src[..CPC_MAGIC.len()] {
        magic if magic == CPC_MAGIC => FrameHeader::Standard,
        magic if magic == CPD_MAGIC && mode.extended_framing => FrameHeader::Extended,
        magic if magic == CPD_MAGIC => return Err(FrameError::ExtendedNotNegotiated),
        other => {
            return Err(FrameError::InvalidHeader {
                found: String::from_utf8_lossy(other).into_owned(),
            })
        }
    };

    let offset = header.payload_offset();
    if src.len() < offset {
        return Ok(None); // Need more data
    }

    let length_field = &src[CPC_MAGIC.len()..offset];
    let declared = parse_hex(length_field)
        .ok_or_else(|| FrameError::InvalidLength(String::from_utf8_lossy(length_field).into_owned()))?
        as usize;
    if declared > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: declared,
            max: max_payload,
        });
    }

    let total = offset + declared + CHECKSUM_LEN;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    let frame = src.split_to(total).freeze();
    skip_whitespace(src);

    let text = &frame[offset..offset + declared];
    let checksum_field = &frame[offset + declared..];
    let expected = parse_hex(checksum_field).ok_or_else(|| {
        FrameError::InvalidChecksum(String::from_utf8_lossy(checksum_field).into_owned())
    })? as u32;

    if !mode.binary_checksum {
        let computed = crc32(text);
        if computed != expected {
            return Err(FrameError::ChecksumMismatch { expected, computed });
        }
    }

    let payload = STANDARD.decode(text)?;

    if mode.binary_checksum {
        let computed = crc32(&payload);
        if computed != expected {
            return Err(FrameError::ChecksumMismatch { expected, computed });
        }
    }

    Ok(Some(Frame {
        header,
        payload: Bytes::from(payload),
    }))
}

fn skip_whitespace(src: &mut BytesMut) {
    let n = src.iter().take_while(|b| b.is_ascii_whitespace()).count();
    src.advance(n);
}

fn parse_hex(digits: &[u8]) -> Option<u64> {
    if digits.is_empty() {
        return None;
    }
    digits.iter().try_fold(0u64, |acc, &d| {
        let v = (d as char).to_digit(16)?;
        Some((acc << 4) | u64::from(v))
    })
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum declared base64 length accepted from the peer. Default: 64 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// Incremental decoder over a chunked inbound stream.
///
/// Holds the incomplete trailing frame between calls. Corrupted frames are
/// skipped and counted; only unrecoverable framing errors are returned.
/// Mode changes made with [`FrameDecoder::set_mode`] apply from the next
/// frame on, including frames already buffered.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    mode: FrameMode,
    max_payload: usize,
    resyncs: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder in default (text checksum, standard header) mode.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    /// Create a decoder with an explicit payload cap.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            mode: FrameMode::default(),
            max_payload,
            resyncs: 0,
        }
    }

    /// Append an inbound chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next validated frame, or `None` once only a partial frame remains.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            match decode_frame(&mut self.buf, self.mode, self.max_payload) {
                Err(err) if err.is_recoverable() => {
                    self.resyncs += 1;
                    warn!(%err, "dropping corrupted frame");
                }
                other => return other,
            }
        }
    }

    /// Push a chunk and drain every complete frame, without mode changes
    /// between them.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Frame>> {
        self.push(chunk);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Current negotiated mode.
    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    /// Switch mode for all subsequent frames.
    pub fn set_mode(&mut self, mode: FrameMode) {
        self.mode = mode;
    }

    /// Bytes held back as an incomplete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Number of corrupted frames skipped so far.
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    /// Discard any buffered partial frame.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
