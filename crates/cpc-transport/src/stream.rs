use std::io::{Read, Write};
use std::net::Shutdown;
use std::process::{ChildStdin, ChildStdout};

use crate::error::Result;
use crate::process::CpcProcess;

/// A connected raw-mode peer, not yet split into its two halves.
///
/// Process transports carry the [`CpcProcess`] handle so the caller can
/// close the emulator gracefully once the session ends.
pub struct CpcStream {
    reader: CpcReader,
    writer: CpcWriter,
    process: Option<CpcProcess>,
}

impl CpcStream {
    pub(crate) fn new(reader: CpcReader, writer: CpcWriter, process: Option<CpcProcess>) -> Self {
        Self {
            reader,
            writer,
            process,
        }
    }

    /// Split into the inbound half, the outbound half and the process handle.
    pub fn into_parts(self) -> (CpcReader, CpcWriter, Option<CpcProcess>) {
        (self.reader, self.writer, self.process)
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        self.writer.transport_name()
    }
}

impl std::fmt::Debug for CpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpcStream")
            .field("type", &self.transport_name())
            .field("process", &self.process.as_ref().map(CpcProcess::id))
            .finish()
    }
}

/// Inbound half of a transport. Implements `Read`.
pub struct CpcReader {
    inner: ReaderInner,
}

enum ReaderInner {
    Process(ChildStdout),
    Tcp(std::net::TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

/// Outbound half of a transport. Implements `Write`.
pub struct CpcWriter {
    inner: WriterInner,
}

enum WriterInner {
    Process(Option<ChildStdin>),
    Tcp(std::net::TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl CpcReader {
    pub(crate) fn from_process(stdout: ChildStdout) -> Self {
        Self {
            inner: ReaderInner::Process(stdout),
        }
    }

    pub(crate) fn from_tcp(stream: std::net::TcpStream) -> Self {
        Self {
            inner: ReaderInner::Tcp(stream),
        }
    }

    #[cfg(unix)]
    pub(crate) fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: ReaderInner::Unix(stream),
        }
    }

    /// Set read timeout on socket transports. Process pipes ignore it.
    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            ReaderInner::Process(_) => Ok(()),
            ReaderInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            ReaderInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }
}

impl Read for CpcReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            ReaderInner::Process(stdout) => stdout.read(buf),
            ReaderInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            ReaderInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl std::fmt::Debug for CpcReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.inner {
            ReaderInner::Process(_) => "process",
            ReaderInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            ReaderInner::Unix(_) => "unix",
        };
        f.debug_struct("CpcReader").field("type", &kind).finish()
    }
}

impl CpcWriter {
    pub(crate) fn from_process(stdin: ChildStdin) -> Self {
        Self {
            inner: WriterInner::Process(Some(stdin)),
        }
    }

    pub(crate) fn from_tcp(stream: std::net::TcpStream) -> Self {
        Self {
            inner: WriterInner::Tcp(stream),
        }
    }

    #[cfg(unix)]
    pub(crate) fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: WriterInner::Unix(stream),
        }
    }

    /// Close the outbound direction. Further writes fail with `BrokenPipe`.
    ///
    /// For a process this drops stdin, which the emulator reads as end of input.
    pub fn shutdown(&mut self) -> Result<()> {
        match &mut self.inner {
            WriterInner::Process(stdin) => {
                stdin.take();
                Ok(())
            }
            WriterInner::Tcp(stream) => stream.shutdown(Shutdown::Write).map_err(Into::into),
            #[cfg(unix)]
            WriterInner::Unix(stream) => stream.shutdown(Shutdown::Write).map_err(Into::into),
        }
    }

    /// Set write timeout on socket transports. Process pipes ignore it.
    pub fn set_write_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            WriterInner::Process(_) => Ok(()),
            WriterInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            WriterInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            WriterInner::Process(_) => "process-stdio",
            WriterInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            WriterInner::Unix(_) => "unix-domain-socket",
        }
    }
}

fn closed_pipe() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "process stdin closed")
}

impl Write for CpcWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            WriterInner::Process(Some(stdin)) => stdin.write(buf),
            WriterInner::Process(None) => Err(closed_pipe()),
            WriterInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            WriterInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            WriterInner::Process(Some(stdin)) => stdin.flush(),
            WriterInner::Process(None) => Ok(()),
            WriterInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            WriterInner::Unix(stream) => stream.flush(),
        }
    }
}

impl std::fmt::Debug for CpcWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpcWriter")
            .field("type", &self.transport_name())
            .finish()
    }
}
