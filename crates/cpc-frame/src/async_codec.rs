//! `tokio_util::codec` adapter over the frame encode/decode functions.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::codec::{decode_frame, encode_frame, Frame, FrameMode, DEFAULT_MAX_PAYLOAD};
use crate::error::FrameError;

/// Frame codec for `FramedRead` / `FramedWrite`.
///
/// Reach the codec through `decoder_mut()` / `encoder_mut()` to switch mode
/// once the capability reply arrives.
#[derive(Debug, Clone)]
pub struct CpcCodec {
    mode: FrameMode,
    max_payload: usize,
    resyncs: u64,
}

impl Default for CpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl CpcCodec {
    pub fn new() -> Self {
        Self {
            mode: FrameMode::default(),
            max_payload: DEFAULT_MAX_PAYLOAD,
            resyncs: 0,
        }
    }

    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: FrameMode) {
        self.mode = mode;
    }

    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }
}

impl Decoder for CpcCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        loop {
            match decode_frame(src, self.mode, self.max_payload) {
                Err(err) if err.is_recoverable() => {
                    self.resyncs += 1;
                    warn!(%err, "dropping corrupted frame");
                }
                other => return other,
            }
        }
    }
}

impl Encoder<Bytes> for CpcCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_frame(&item, self.mode, dst).map(|_| ())
    }
}

impl Encoder<&[u8]> for CpcCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_frame(item, self.mode, dst).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    #[tokio::test]
    async fn framed_roundtrip_skips_corruption() {
        let mut wire = Vec::new();
        {
            let mut sink = FramedWrite::new(&mut wire, CpcCodec::new());
            sink.send(Bytes::from_static(b"first")).await.unwrap();
            sink.send(Bytes::from_static(b"second")).await.unwrap();
        }
        // Corrupt the first frame's payload.
        wire[8] ^= 0x01;

        let mut stream = FramedRead::new(&wire[..], CpcCodec::new());
        let frame = stream.next().await.unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"second");
        assert!(stream.next().await.is_none());
        assert_eq!(stream.decoder().resyncs(), 1);
    }
}
