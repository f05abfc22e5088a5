//! Client for the CraftOS-PC raw terminal protocol.
//!
//! A raw-mode emulator multiplexes every terminal, monitor and file-system
//! exchange over one byte stream of checksummed frames. This crate ties the
//! layers together.
//!
//! # Crate Structure
//!
//! - [`transport`]: emulator process, TCP and Unix socket streams
//! - [`frame`]: `!CPC`/`!CPD` framing and CRC-32 checks
//! - [`message`]: typed message bodies and terminal snapshots
//! - [`peer`]: connections, window registry and request correlation (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use cpc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use cpc_frame::*;
}

/// Re-export message types.
pub mod message {
    pub use cpc_message::*;
}

/// Re-export connection types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use cpc_peer::*;
}
