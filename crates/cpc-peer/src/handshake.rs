//! Capability negotiation.
//!
//! The client sends a type-6 request right after connecting. The peer's
//! type-6 reply fixes the checksum mode and header form for every later
//! frame in both directions, and says whether file-system requests are
//! allowed. Until it arrives both sides use text checksums and `!CPC`.

use std::time::Duration;

use cpc_frame::FrameMode;
use cpc_message::{Capabilities, Request};

/// Configuration for capability negotiation.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Capabilities requested from the peer.
    pub capabilities: Capabilities,
    /// How long callers that need the reply wait for it.
    pub timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            capabilities: Capabilities {
                binary_checksum: true,
                filesystem: true,
                extended_framing: false,
            },
            timeout: Duration::from_secs(5),
        }
    }
}

/// The capability request sent on connect.
pub fn handshake_request(config: &HandshakeConfig) -> Request {
    Request::Capabilities(config.capabilities)
}

/// Frame mode implied by a capability reply.
pub fn negotiated_mode(capabilities: Capabilities) -> FrameMode {
    FrameMode {
        binary_checksum: capabilities.binary_checksum,
        extended_framing: capabilities.allows_extended_frames(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_request_asks_for_binary_checksum_and_filesystem() {
        let payload = handshake_request(&HandshakeConfig::default())
            .encode()
            .unwrap();
        assert_eq!(payload.as_ref(), &[6, 0, 0x03, 0x00]);
    }

    #[test]
    fn mode_follows_reply() {
        assert_eq!(
            negotiated_mode(Capabilities::default()),
            FrameMode::default()
        );

        let mode = negotiated_mode(Capabilities::from_bits(Capabilities::BINARY_CHECKSUM));
        assert!(mode.binary_checksum);
        assert!(!mode.extended_framing);

        let mode = negotiated_mode(Capabilities::from_bits(Capabilities::FILESYSTEM));
        assert!(!mode.binary_checksum);
        assert!(mode.extended_framing);
    }
}
