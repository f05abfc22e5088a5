//! Outbound payloads: input events, the capability request and file-system
//! requests.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{MessageError, Result};
use crate::fs::{FsData, FsOperation};
use crate::kind;
use crate::message::Capabilities;
use crate::wire::{put_cstring, WireReader};

/// Input forwarded to a window. The body is opaque to the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: u8,
    pub window_id: u8,
    pub data: Bytes,
}

impl InputEvent {
    pub fn new(kind: u8, window_id: u8, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            window_id,
            data: data.into(),
        }
    }

    pub fn key(window_id: u8, data: impl Into<Bytes>) -> Self {
        Self::new(kind::KEY, window_id, data)
    }

    pub fn char(window_id: u8, data: impl Into<Bytes>) -> Self {
        Self::new(kind::CHAR, window_id, data)
    }

    pub fn mouse(window_id: u8, data: impl Into<Bytes>) -> Self {
        Self::new(kind::MOUSE, window_id, data)
    }

    /// Window resize/close notification from the host.
    pub fn window(window_id: u8, data: impl Into<Bytes>) -> Self {
        Self::new(kind::WINDOW_EVENT, window_id, data)
    }
}

/// Type-7 file-system request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsRequest {
    pub computer_id: u8,
    pub request_id: u8,
    pub operation: FsOperation,
    pub path: String,
    /// Destination for copy and move.
    pub target: Option<String>,
}

/// Any payload the client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Input(InputEvent),
    Capabilities(Capabilities),
    Fs(FsRequest),
    /// Data following a write or append request.
    FsData(FsData),
}

impl Request {
    pub fn kind(&self) -> u8 {
        match self {
            Request::Input(event) => event.kind,
            Request::Capabilities(_) => kind::CAPABILITIES,
            Request::Fs(_) => kind::FS_REQUEST,
            Request::FsData(_) => kind::FS_DATA,
        }
    }

    /// Encode as a frame payload.
    pub fn encode(&self) -> Result<Bytes> {
        let mut dst = BytesMut::new();
        dst.put_u8(self.kind());

        match self {
            Request::Input(event) => {
                dst.put_u8(event.window_id);
                dst.put_slice(&event.data);
            }
            Request::Capabilities(capabilities) => {
                dst.put_u8(0);
                dst.put_u16_le(capabilities.to_bits());
            }
            Request::Fs(request) => {
                let expects_target = request.operation.takes_second_path();
                if expects_target != request.target.is_some() {
                    return Err(MessageError::PathCount {
                        operation: request.operation.name(),
                        expected: if expects_target { 2 } else { 1 },
                    });
                }
                dst.put_u8(request.computer_id);
                dst.put_u8(request.operation.code());
                dst.put_u8(request.request_id);
                put_cstring(&mut dst, &request.path)?;
                if let Some(target) = &request.target {
                    put_cstring(&mut dst, target)?;
                }
            }
            Request::FsData(data) => {
                dst.put_u8(data.window_id);
                data.encode(&mut dst)?;
            }
        }

        Ok(dst.freeze())
    }

    /// Decode a client payload, as a peer or a capture reader would.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload);
        let kind = r.u8()?;
        let window_id = r.u8()?;

        Ok(match kind {
            kind::CAPABILITIES => Request::Capabilities(Capabilities::from_bits(r.u16()?)),
            kind::FS_REQUEST => {
                let operation = FsOperation::from_code(r.u8()?)?;
                let request_id = r.u8()?;
                let path = r.cstring()?;
                let target = if operation.takes_second_path() {
                    Some(r.cstring()?)
                } else {
                    None
                };
                Request::Fs(FsRequest {
                    computer_id: window_id,
                    request_id,
                    operation,
                    path,
                    target,
                })
            }
            kind::FS_DATA => Request::FsData(FsData::decode(window_id, &mut r)?),
            _ => Request::Input(InputEvent::new(
                kind,
                window_id,
                Bytes::copy_from_slice(r.bytes(r.remaining())?),
            )),
        })
    }
}
