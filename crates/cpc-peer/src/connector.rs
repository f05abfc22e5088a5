use std::fmt::Debug;
use std::net::ToSocketAddrs;
#[cfg(unix)]
use std::path::Path;

use cpc_transport::{spawn_process, ProcessSpec};

use crate::connection::ConnectionConfig;
use crate::error::Result;
use crate::session::Session;

/// Launch an emulator in raw mode and start a session over its stdio.
pub fn connect_process(spec: &ProcessSpec, config: ConnectionConfig) -> Result<Session> {
    let stream = spawn_process(spec)?;
    Session::start(stream, config)
}

/// Connect to a raw-mode peer over TCP.
pub fn connect_tcp(addr: impl ToSocketAddrs + Debug, config: ConnectionConfig) -> Result<Session> {
    let stream = cpc_transport::connect_tcp(addr)?;
    Session::start(stream, config)
}

/// Connect to a raw-mode peer over a Unix domain socket.
#[cfg(unix)]
pub fn connect_unix(path: impl AsRef<Path>, config: ConnectionConfig) -> Result<Session> {
    let stream = cpc_transport::connect_unix(path)?;
    Session::start(stream, config)
}
