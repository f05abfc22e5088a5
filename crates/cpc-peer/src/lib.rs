//! Connection management for the CraftOS-PC raw protocol.
//!
//! A [`Connection`] owns everything one peer needs: the incremental frame
//! decoder, the frame writer, the window table and the pending file-system
//! requests. Nothing is shared between connections. A [`Session`] drives a
//! connection from a transport on a background reader thread.

pub mod connection;
pub mod connector;
pub mod correlator;
pub mod error;
pub mod handshake;
pub mod observer;
pub mod registry;
pub mod session;

pub use connection::{Connection, ConnectionConfig};
pub use connector::connect_process;
pub use connector::connect_tcp;
#[cfg(unix)]
pub use connector::connect_unix;
pub use correlator::{Correlator, FsResponse, PendingReply, DEFAULT_REQUEST_TIMEOUT};
pub use error::{PeerError, Result};
pub use handshake::{handshake_request, negotiated_mode, HandshakeConfig};
pub use observer::ConnectionObserver;
pub use registry::{Window, WindowRegistry, WindowUpdate};
pub use session::{Session, SessionExit};
