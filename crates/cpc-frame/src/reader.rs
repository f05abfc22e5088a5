use std::io::{ErrorKind, Read};

use cpc_transport::CpcReader;

use crate::codec::{Frame, FrameConfig, FrameDecoder, FrameMode};
use crate::error::{FrameError, Result};
use crate::writer::transport_to_frame_error;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete, validated frames from any `Read` stream.
///
/// Handles partial reads and corrupted frames internally; callers always get
/// complete frames in arrival order.
pub struct FrameReader<T> {
    inner: T,
    decoder: FrameDecoder,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::with_max_payload(config.max_payload_size),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.decoder.push(&chunk[..read]);
        }
    }

    /// Negotiated mode used to validate subsequent frames.
    pub fn mode(&self) -> FrameMode {
        self.decoder.mode()
    }

    /// Switch checksum/header mode for subsequent frames.
    pub fn set_mode(&mut self, mode: FrameMode) {
        self.decoder.set_mode(mode);
    }

    /// Number of corrupted frames skipped so far.
    pub fn resyncs(&self) -> u64 {
        self.decoder.resyncs()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<CpcReader> {
    /// Create a frame reader for a transport and apply read timeout from config.
    pub fn with_config_transport(inner: CpcReader, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}
