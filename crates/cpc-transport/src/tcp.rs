use std::net::{TcpStream, ToSocketAddrs};

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::stream::{CpcReader, CpcStream, CpcWriter};

/// Connect to a raw-mode peer listening on a TCP socket (blocking).
pub fn connect_tcp(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<CpcStream> {
    let target = format!("{addr:?}");
    let stream = TcpStream::connect(&addr).map_err(|e| TransportError::Connect {
        target: target.clone(),
        source: e,
    })?;
    // Frames are small and latency-sensitive (keystrokes).
    stream.set_nodelay(true)?;
    let reader_stream = stream.try_clone()?;
    debug!(%target, "connected to tcp peer");
    Ok(CpcStream::new(
        CpcReader::from_tcp(reader_stream),
        CpcWriter::from_tcp(stream),
        None,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    #[test]
    fn connect_and_exchange_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).unwrap();
            sock.write_all(&buf).unwrap();
        });

        let (mut reader, mut writer, process) = connect_tcp(addr).unwrap().into_parts();
        assert!(process.is_none());
        assert_eq!(writer.transport_name(), "tcp");

        writer.write_all(b"!CPC0").unwrap();
        let mut echoed = [0u8; 5];
        reader.read_exact(&mut echoed).unwrap();
        assert_eq!(&echoed, b"!CPC0");

        server.join().unwrap();
    }

    #[test]
    fn connect_refused_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect_tcp(addr).unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
