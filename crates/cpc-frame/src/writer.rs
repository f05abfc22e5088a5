use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use cpc_transport::CpcWriter;

use crate::codec::{encode_frame, FrameConfig, FrameHeader, FrameMode};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
    mode: FrameMode,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            mode: FrameMode::default(),
        }
    }

    /// Encode and send one payload (blocking). Returns the header used.
    pub fn send(&mut self, payload: &[u8]) -> Result<FrameHeader> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        let header = encode_frame(payload, self.mode, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                // An expired socket write timeout; the peer is not draining.
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()?;
        Ok(header)
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Negotiated mode used for subsequent frames.
    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    /// Switch checksum/header mode for subsequent frames.
    pub fn set_mode(&mut self, mode: FrameMode) {
        self.mode = mode;
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl FrameWriter<CpcWriter> {
    /// Create a frame writer for a transport and apply write timeout from config.
    pub fn with_config_transport(inner: CpcWriter, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: cpc_transport::TransportError) -> FrameError {
    match err {
        cpc_transport::TransportError::Io(io) => FrameError::Io(io),
        cpc_transport::TransportError::Spawn { source, .. }
        | cpc_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
