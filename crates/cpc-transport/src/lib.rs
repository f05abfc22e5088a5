//! Byte transports for the CraftOS-PC raw terminal protocol.
//!
//! The protocol layers above only need "bytes arrived" and "bytes to send".
//! This crate provides both halves over the mechanisms a raw-mode peer is
//! reachable through:
//! - the standard streams of a spawned emulator process (`--raw`)
//! - a TCP socket
//! - a Unix domain socket (Linux/macOS)
//!
//! Every connector yields a [`CpcStream`], which splits into a [`CpcReader`]
//! and a [`CpcWriter`] so inbound decoding can run on its own thread.

pub mod error;
pub mod process;
pub mod stream;
pub mod tcp;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use process::{spawn_process, CpcProcess, ProcessSpec, DEFAULT_CLOSE_GRACE};
pub use stream::{CpcReader, CpcStream, CpcWriter};
pub use tcp::connect_tcp;

#[cfg(unix)]
pub use uds::connect_unix;
