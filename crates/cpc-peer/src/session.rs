use std::io::{ErrorKind, Read, Write};
use std::process::ExitStatus;
use std::sync::Arc;
use std::thread::JoinHandle;

use cpc_message::Capabilities;
use cpc_transport::{CpcProcess, CpcReader, CpcStream, CpcWriter, TransportError, DEFAULT_CLOSE_GRACE};
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionConfig};
use crate::error::Result;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionExit {
    /// Exit status of the emulator process, for process transports.
    pub status: Option<ExitStatus>,
    /// Whether the process had to be killed after the grace period.
    pub killed: bool,
}

/// A live connection driven by a background reader thread.
///
/// The reader thread feeds every inbound chunk to the [`Connection`] and
/// closes it on end of stream, read error or unrecoverable framing error.
pub struct Session {
    connection: Arc<Connection<CpcWriter>>,
    reader: Option<JoinHandle<()>>,
    process: Option<CpcProcess>,
    transport: &'static str,
    stopped: bool,
}

impl Session {
    /// Start reading from `stream` and send the capability request.
    pub fn start(stream: CpcStream, config: ConnectionConfig) -> Result<Self> {
        let transport = stream.transport_name();
        let (reader, writer, process) = stream.into_parts();
        reader.set_read_timeout(config.frame.read_timeout)?;
        writer.set_write_timeout(config.frame.write_timeout)?;

        let connection = Arc::new(Connection::new(writer, config));
        let reader = {
            let connection = Arc::clone(&connection);
            std::thread::Builder::new()
                .name("cpc-reader".to_string())
                .spawn(move || read_loop(reader, connection))
                .map_err(TransportError::from)?
        };

        let session = Self {
            connection,
            reader: Some(reader),
            process,
            transport,
            stopped: false,
        };
        session.connection.handshake()?;
        info!(transport, "session started");
        Ok(session)
    }

    pub fn connection(&self) -> &Arc<Connection<CpcWriter>> {
        &self.connection
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        self.transport
    }

    /// Wait for the peer's capability reply, up to the configured handshake
    /// timeout.
    pub fn capabilities(&self) -> Result<Capabilities> {
        let timeout = self.connection.config().handshake.timeout;
        self.connection.wait_capabilities(timeout)
    }

    /// Emulator process id, for process transports.
    pub fn process_id(&self) -> Option<u32> {
        self.process.as_ref().map(CpcProcess::id)
    }

    /// Whether the reader thread has stopped (the peer went away).
    pub fn is_finished(&self) -> bool {
        self.reader.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Close the session.
    ///
    /// A process peer gets a lone newline and end of input, then has a grace
    /// period to exit before it is killed. Socket peers see a write shutdown.
    /// Dropping a session does the same.
    pub fn close(mut self) -> Result<SessionExit> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<SessionExit> {
        let mut exit = SessionExit {
            status: None,
            killed: false,
        };
        if self.stopped {
            return Ok(exit);
        }
        self.stopped = true;

        let farewell = self.process.is_some();
        let shutdown = self.connection.with_writer(|writer| {
            if farewell {
                if let Err(err) = writer.write_all(b"\n").and_then(|()| writer.flush()) {
                    debug!(%err, "could not send farewell newline");
                }
            }
            writer.shutdown()
        });
        if let Err(err) = shutdown {
            warn!(%err, transport = self.transport, "transport shutdown failed");
        }
        self.connection.close("session closed");

        if let Some(process) = self.process.take() {
            let (status, killed) = process.close(DEFAULT_CLOSE_GRACE)?;
            exit = SessionExit {
                status: Some(status),
                killed,
            };
        }

        if let Some(reader) = self.reader.take() {
            if reader.is_finished() {
                let _ = reader.join();
            } else {
                debug!("reader thread still blocked; detaching");
            }
        }
        Ok(exit)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(%err, transport = self.transport, "session cleanup failed");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.transport)
            .field("connection", &self.connection)
            .field("process", &self.process)
            .finish()
    }
}

fn read_loop(mut reader: CpcReader, connection: Arc<Connection<CpcWriter>>) {
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => {
                connection.close("peer closed the stream");
                break;
            }
            Ok(n) => {
                if let Err(err) = connection.feed(&chunk[..n]) {
                    debug!(%err, "reader stopping");
                    break;
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                connection.expire_requests();
                if connection.is_closed() {
                    break;
                }
            }
            Err(err) => {
                warn!(%err, "read failed");
                connection.close("read failed");
                break;
            }
        }
    }
}
