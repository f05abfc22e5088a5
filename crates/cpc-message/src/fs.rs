//! File-system operation classes and reply bodies (types 7, 8 and 9).

use bytes::{BufMut, Bytes};
use serde::Serialize;

use crate::error::{MessageError, Result};
use crate::wire::{put_cstring, WireReader};

const OPEN_BASE: u8 = 0x10;
const OPEN_WRITE: u8 = 0x01;
const OPEN_APPEND: u8 = 0x02;
const OPEN_BINARY: u8 = 0x04;

const SIZE_ERROR: u32 = u32::MAX;

/// How a file is opened by an `Open` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    Append,
}

/// File-system operation class, the first byte of request and reply bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsOperation {
    Exists,
    IsDir,
    IsReadOnly,
    GetSize,
    GetDrive,
    GetCapacity,
    GetFreeSpace,
    List,
    Attributes,
    Find,
    MakeDir,
    Delete,
    Copy,
    Move,
    Open { mode: OpenMode, binary: bool },
}

/// Shape of a type-8 reply body for an operation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    /// u8: 0 false, 1 true, anything else an error.
    Bool,
    /// u32, `0xFFFFFFFF` is an error.
    Size,
    /// Null-terminated string, empty is an error.
    Text,
    /// u32 count (`0xFFFFFFFF` error) then that many strings.
    TextList,
    /// Attribute record with its own result byte.
    Stat,
    /// Null-terminated error message, empty is success.
    Status,
}

impl FsOperation {
    pub fn code(self) -> u8 {
        match self {
            FsOperation::Exists => 0,
            FsOperation::IsDir => 1,
            FsOperation::IsReadOnly => 2,
            FsOperation::GetSize => 3,
            FsOperation::GetDrive => 4,
            FsOperation::GetCapacity => 5,
            FsOperation::GetFreeSpace => 6,
            FsOperation::List => 7,
            FsOperation::Attributes => 8,
            FsOperation::Find => 9,
            FsOperation::MakeDir => 10,
            FsOperation::Delete => 11,
            FsOperation::Copy => 12,
            FsOperation::Move => 13,
            FsOperation::Open { mode, binary } => {
                let mode_bits = match mode {
                    OpenMode::Read => 0,
                    OpenMode::Write => OPEN_WRITE,
                    OpenMode::Append => OPEN_APPEND,
                };
                OPEN_BASE | mode_bits | if binary { OPEN_BINARY } else { 0 }
            }
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => FsOperation::Exists,
            1 => FsOperation::IsDir,
            2 => FsOperation::IsReadOnly,
            3 => FsOperation::GetSize,
            4 => FsOperation::GetDrive,
            5 => FsOperation::GetCapacity,
            6 => FsOperation::GetFreeSpace,
            7 => FsOperation::List,
            8 => FsOperation::Attributes,
            9 => FsOperation::Find,
            10 => FsOperation::MakeDir,
            11 => FsOperation::Delete,
            12 => FsOperation::Copy,
            13 => FsOperation::Move,
            c if c & 0xF8 == OPEN_BASE && c & (OPEN_WRITE | OPEN_APPEND) != OPEN_WRITE | OPEN_APPEND => {
                let mode = if c & OPEN_APPEND != 0 {
                    OpenMode::Append
                } else if c & OPEN_WRITE != 0 {
                    OpenMode::Write
                } else {
                    OpenMode::Read
                };
                FsOperation::Open {
                    mode,
                    binary: c & OPEN_BINARY != 0,
                }
            }
            other => return Err(MessageError::InvalidOperation(other)),
        })
    }

    /// Whether the request is followed by a type-9 payload frame.
    pub fn needs_payload(self) -> bool {
        matches!(
            self,
            FsOperation::Open {
                mode: OpenMode::Write | OpenMode::Append,
                ..
            }
        )
    }

    /// Whether the request carries a second path (source, destination).
    pub fn takes_second_path(self) -> bool {
        matches!(self, FsOperation::Copy | FsOperation::Move)
    }

    /// Body layout of the type-8 reply to this operation.
    ///
    /// Reads normally answer with a type-9 data frame; a type-8 reply to a
    /// read carries an error message.
    pub fn reply_shape(self) -> ReplyShape {
        match self {
            FsOperation::Exists | FsOperation::IsDir | FsOperation::IsReadOnly => ReplyShape::Bool,
            FsOperation::GetSize | FsOperation::GetCapacity | FsOperation::GetFreeSpace => {
                ReplyShape::Size
            }
            FsOperation::GetDrive => ReplyShape::Text,
            FsOperation::List | FsOperation::Find => ReplyShape::TextList,
            FsOperation::Attributes => ReplyShape::Stat,
            FsOperation::MakeDir
            | FsOperation::Delete
            | FsOperation::Copy
            | FsOperation::Move
            | FsOperation::Open { .. } => ReplyShape::Status,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FsOperation::Exists => "exists",
            FsOperation::IsDir => "isDir",
            FsOperation::IsReadOnly => "isReadOnly",
            FsOperation::GetSize => "getSize",
            FsOperation::GetDrive => "getDrive",
            FsOperation::GetCapacity => "getCapacity",
            FsOperation::GetFreeSpace => "getFreeSpace",
            FsOperation::List => "list",
            FsOperation::Attributes => "attributes",
            FsOperation::Find => "find",
            FsOperation::MakeDir => "makeDir",
            FsOperation::Delete => "delete",
            FsOperation::Copy => "copy",
            FsOperation::Move => "move",
            FsOperation::Open {
                mode: OpenMode::Read,
                ..
            } => "read",
            FsOperation::Open {
                mode: OpenMode::Write,
                ..
            } => "write",
            FsOperation::Open {
                mode: OpenMode::Append,
                ..
            } => "append",
        }
    }
}

/// File attributes returned by an `Attributes` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileStat {
    pub size: u32,
    /// Creation time, milliseconds since the Unix epoch.
    pub created: u64,
    /// Modification time, milliseconds since the Unix epoch.
    pub modified: u64,
    pub is_dir: bool,
    pub is_read_only: bool,
}

/// Decoded type-8 reply body. Peer-side failures are folded into `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsReplyBody {
    Bool(bool),
    Size(u32),
    Text(String),
    TextList(Vec<String>),
    /// `None` when the path does not exist.
    Stat(Option<FileStat>),
    /// A mutating operation succeeded.
    Done,
    /// The peer reported failure; the message may be empty.
    Failed(String),
}

impl FsReplyBody {
    pub fn decode(shape: ReplyShape, r: &mut WireReader<'_>) -> Result<Self> {
        Ok(match shape {
            ReplyShape::Bool => match r.u8()? {
                0 => FsReplyBody::Bool(false),
                1 => FsReplyBody::Bool(true),
                _ => FsReplyBody::Failed(String::new()),
            },
            ReplyShape::Size => match r.u32()? {
                SIZE_ERROR => FsReplyBody::Failed(String::new()),
                size => FsReplyBody::Size(size),
            },
            ReplyShape::Text => match r.cstring()? {
                text if text.is_empty() => FsReplyBody::Failed(String::new()),
                text => FsReplyBody::Text(text),
            },
            ReplyShape::TextList => match r.u32()? {
                SIZE_ERROR => FsReplyBody::Failed(String::new()),
                count => {
                    let count = count as usize;
                    // Each entry is at least its terminator.
                    if count > r.remaining() {
                        return Err(MessageError::Truncated {
                            needed: count,
                            remaining: r.remaining(),
                        });
                    }
                    let entries = (0..count).map(|_| r.cstring()).collect::<Result<_>>()?;
                    FsReplyBody::TextList(entries)
                }
            },
            ReplyShape::Stat => {
                let stat = FileStat {
                    size: r.u32()?,
                    created: r.u64()?,
                    modified: r.u64()?,
                    is_dir: r.u8()? != 0,
                    is_read_only: r.u8()? != 0,
                };
                match r.u8()? {
                    0 => FsReplyBody::Stat(Some(stat)),
                    1 => FsReplyBody::Stat(None),
                    _ => FsReplyBody::Failed(String::new()),
                }
            }
            ReplyShape::Status => match r.cstring()? {
                text if text.is_empty() => FsReplyBody::Done,
                text => FsReplyBody::Failed(text),
            },
        })
    }

    /// Encode for `shape`. `Failed` maps to the shape's error sentinel.
    pub fn encode(&self, shape: ReplyShape, dst: &mut impl BufMut) -> Result<()> {
        match (shape, self) {
            (ReplyShape::Bool, FsReplyBody::Bool(v)) => dst.put_u8(u8::from(*v)),
            (ReplyShape::Bool, _) => dst.put_u8(2),
            (ReplyShape::Size, FsReplyBody::Size(v)) => dst.put_u32_le(*v),
            (ReplyShape::Size, _) => dst.put_u32_le(SIZE_ERROR),
            (ReplyShape::Text, FsReplyBody::Text(text)) => put_cstring(dst, text)?,
            (ReplyShape::Text, _) => dst.put_u8(0),
            (ReplyShape::TextList, FsReplyBody::TextList(entries)) => {
                dst.put_u32_le(entries.len() as u32);
                for entry in entries {
                    put_cstring(dst, entry)?;
                }
            }
            (ReplyShape::TextList, _) => dst.put_u32_le(SIZE_ERROR),
            (ReplyShape::Stat, FsReplyBody::Stat(stat)) => {
                let result = if stat.is_some() { 0 } else { 1 };
                let stat = stat.unwrap_or(FileStat {
                    size: 0,
                    created: 0,
                    modified: 0,
                    is_dir: false,
                    is_read_only: false,
                });
                dst.put_u32_le(stat.size);
                dst.put_u64_le(stat.created);
                dst.put_u64_le(stat.modified);
                dst.put_u8(u8::from(stat.is_dir));
                dst.put_u8(u8::from(stat.is_read_only));
                dst.put_u8(result);
            }
            (ReplyShape::Stat, _) => {
                dst.put_slice(&[0u8; 22]);
                dst.put_u8(2);
            }
            (ReplyShape::Status, FsReplyBody::Failed(text)) if !text.is_empty() => {
                put_cstring(dst, text)?;
            }
            (ReplyShape::Status, FsReplyBody::Failed(_)) => put_cstring(dst, "failed")?,
            (ReplyShape::Status, _) => dst.put_u8(0),
        }
        Ok(())
    }
}

/// Type-8 file-system reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsReply {
    pub window_id: u8,
    pub request_id: u8,
    pub operation: FsOperation,
    pub body: FsReplyBody,
}

impl FsReply {
    pub(crate) fn decode(window_id: u8, r: &mut WireReader<'_>) -> Result<Self> {
        let operation = FsOperation::from_code(r.u8()?)?;
        let request_id = r.u8()?;
        let body = FsReplyBody::decode(operation.reply_shape(), r)?;
        Ok(Self {
            window_id,
            request_id,
            operation,
            body,
        })
    }

    pub(crate) fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        dst.put_u8(self.operation.code());
        dst.put_u8(self.request_id);
        self.body.encode(self.operation.reply_shape(), dst)
    }
}

/// Type-9 raw file data, sent by the peer for reads and by the client for
/// writes. A failed read carries the error message as its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsData {
    pub window_id: u8,
    pub request_id: u8,
    pub failed: bool,
    pub data: Bytes,
}

impl FsData {
    pub(crate) fn decode(window_id: u8, r: &mut WireReader<'_>) -> Result<Self> {
        let failed = r.u8()? != 0;
        let request_id = r.u8()?;
        let len = r.u32()? as usize;
        let data = Bytes::copy_from_slice(r.bytes(len)?);
        Ok(Self {
            window_id,
            request_id,
            failed,
            data,
        })
    }

    pub(crate) fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let len = u32::try_from(self.data.len())
            .map_err(|_| MessageError::PayloadTooLarge(self.data.len()))?;
        dst.put_u8(u8::from(self.failed));
        dst.put_u8(self.request_id);
        dst.put_u32_le(len);
        dst.put_slice(&self.data);
        Ok(())
    }

    /// Data interpreted as an error message (Latin-1).
    pub fn error_message(&self) -> String {
        self.data.iter().map(|&b| char::from(b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(shape: ReplyShape, body: &[u8]) -> FsReplyBody {
        FsReplyBody::decode(shape, &mut WireReader::new(body)).unwrap()
    }

    #[test]
    fn operation_codes_roundtrip() {
        for code in (0u8..=13).chain([0x10, 0x11, 0x12, 0x14, 0x15, 0x16]) {
            let op = FsOperation::from_code(code).unwrap();
            assert_eq!(op.code(), code, "{}", op.name());
        }
        assert!(FsOperation::from_code(14).is_err());
        assert!(FsOperation::from_code(0x13).is_err());
        assert!(FsOperation::from_code(0x20).is_err());
    }

    #[test]
    fn only_write_and_append_need_payload() {
        assert!(FsOperation::from_code(0x11).unwrap().needs_payload());
        assert!(FsOperation::from_code(0x16).unwrap().needs_payload());
        assert!(!FsOperation::from_code(0x10).unwrap().needs_payload());
        assert!(!FsOperation::Delete.needs_payload());
    }

    #[test]
    fn bool_reply_sentinels() {
        assert_eq!(decode(ReplyShape::Bool, &[0]), FsReplyBody::Bool(false));
        assert_eq!(decode(ReplyShape::Bool, &[1]), FsReplyBody::Bool(true));
        assert_eq!(
            decode(ReplyShape::Bool, &[2]),
            FsReplyBody::Failed(String::new())
        );
    }

    #[test]
    fn size_reply_sentinel() {
        assert_eq!(
            decode(ReplyShape::Size, &1024u32.to_le_bytes()),
            FsReplyBody::Size(1024)
        );
        assert_eq!(
            decode(ReplyShape::Size, &u32::MAX.to_le_bytes()),
            FsReplyBody::Failed(String::new())
        );
    }

    #[test]
    fn text_and_list_replies() {
        assert_eq!(
            decode(ReplyShape::Text, b"hdd\0"),
            FsReplyBody::Text("hdd".to_string())
        );
        assert_eq!(
            decode(ReplyShape::Text, b"\0"),
            FsReplyBody::Failed(String::new())
        );

        let mut body = 2u32.to_le_bytes().to_vec();
        body.extend_from_slice(b"rom\0startup.lua\0");
        assert_eq!(
            decode(ReplyShape::TextList, &body),
            FsReplyBody::TextList(vec!["rom".to_string(), "startup.lua".to_string()])
        );
    }

    #[test]
    fn list_count_larger_than_payload_is_truncated() {
        let mut body = 1000u32.to_le_bytes().to_vec();
        body.extend_from_slice(b"a\0");
        let err = FsReplyBody::decode(ReplyShape::TextList, &mut WireReader::new(&body));
        assert!(matches!(err, Err(MessageError::Truncated { .. })));
    }

    #[test]
    fn stat_reply_result_byte() {
        let mut body = Vec::new();
        body.extend_from_slice(&42u32.to_le_bytes());
        body.extend_from_slice(&1_000u64.to_le_bytes());
        body.extend_from_slice(&2_000u64.to_le_bytes());
        body.extend_from_slice(&[1, 0, 0]);
        assert_eq!(
            decode(ReplyShape::Stat, &body),
            FsReplyBody::Stat(Some(FileStat {
                size: 42,
                created: 1_000,
                modified: 2_000,
                is_dir: true,
                is_read_only: false,
            }))
        );

        *body.last_mut().unwrap() = 1;
        assert_eq!(decode(ReplyShape::Stat, &body), FsReplyBody::Stat(None));

        *body.last_mut().unwrap() = 2;
        assert_eq!(
            decode(ReplyShape::Stat, &body),
            FsReplyBody::Failed(String::new())
        );
    }

    #[test]
    fn status_reply_empty_means_success() {
        assert_eq!(decode(ReplyShape::Status, b"\0"), FsReplyBody::Done);
        assert_eq!(
            decode(ReplyShape::Status, b"/rom: Access denied\0"),
            FsReplyBody::Failed("/rom: Access denied".to_string())
        );
    }

    #[test]
    fn body_encode_decode_agree() {
        let cases = [
            (ReplyShape::Bool, FsReplyBody::Bool(true)),
            (ReplyShape::Size, FsReplyBody::Size(7)),
            (ReplyShape::TextList, FsReplyBody::TextList(vec!["a".into()])),
            (ReplyShape::Stat, FsReplyBody::Stat(None)),
            (ReplyShape::Status, FsReplyBody::Failed("No such file".into())),
        ];
        for (shape, body) in cases {
            let mut out = Vec::new();
            body.encode(shape, &mut out).unwrap();
            assert_eq!(decode(shape, &out), body);
        }
    }
}
