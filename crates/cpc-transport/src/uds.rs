use std::os::unix::net::UnixStream;
use std::path::Path;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::stream::{CpcReader, CpcStream, CpcWriter};

/// Maximum socket path length.
/// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

/// Connect to a raw-mode peer listening on a Unix domain socket (blocking).
pub fn connect_unix(path: impl AsRef<Path>) -> Result<CpcStream> {
    let path = path.as_ref();

    let path_bytes = path.as_os_str().len();
    if path_bytes >= MAX_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len: path_bytes,
            max: MAX_PATH_LEN,
        });
    }

    let stream = UnixStream::connect(path).map_err(|e| TransportError::Connect {
        target: path.display().to_string(),
        source: e,
    })?;
    let reader_stream = stream.try_clone()?;
    debug!(?path, "connected to unix domain socket");
    Ok(CpcStream::new(
        CpcReader::from_unix(reader_stream),
        CpcWriter::from_unix(stream),
        None,
    ))
}
