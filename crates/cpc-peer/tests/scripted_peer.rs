#![cfg(unix)]

use std::collections::HashMap;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use cpc_frame::{FrameReader, FrameWriter};
use cpc_message::{
    encode_message, Capabilities, FileStat, FsData, FsOperation, FsReply, FsReplyBody, Message,
    OpenMode, Request, WindowEvent,
};
use cpc_peer::{
    connect_unix, negotiated_mode, ConnectionConfig, ConnectionObserver, PeerError, Window,
};

fn temp_socket(tag: &str) -> (PathBuf, PathBuf) {
    let dir = std::env::temp_dir().join(format!(
        "cpc-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("peer.sock");
    (dir, path)
}

/// A minimal emulator: answers the handshake, then serves file-system
/// requests from an in-memory file table.
struct ScriptedPeer {
    reader: FrameReader<UnixStream>,
    writer: FrameWriter<UnixStream>,
    files: HashMap<String, Vec<u8>>,
}

impl ScriptedPeer {
    fn accept(listener: &UnixListener) -> Self {
        let (stream, _) = listener.accept().unwrap();
        let reader = FrameReader::new(stream.try_clone().unwrap());
        let writer = FrameWriter::new(stream);
        let mut files = HashMap::new();
        files.insert("/startup.lua".to_string(), b"print('hi')".to_vec());
        Self {
            reader,
            writer,
            files,
        }
    }

    fn send(&mut self, message: &Message) {
        self.writer.send(&encode_message(message).unwrap()).unwrap();
    }

    fn reply(&mut self, request_id: u8, operation: FsOperation, body: FsReplyBody) {
        self.send(&Message::FsReply(FsReply {
            window_id: 0,
            request_id,
            operation,
            body,
        }));
    }

    fn next_request(&mut self) -> Option<Request> {
        let frame = self.reader.read_frame().ok()?;
        Some(Request::decode(&frame.payload).unwrap())
    }

    fn handshake(&mut self, granted: u16) {
        let Some(Request::Capabilities(requested)) = self.next_request() else {
            panic!("expected capability request first");
        };
        assert_eq!(requested.to_bits(), 0x03);

        // The reply itself still travels in the default mode.
        let capabilities = Capabilities::from_bits(granted);
        self.send(&Message::Capabilities {
            window_id: 0,
            capabilities,
        });
        let mode = negotiated_mode(capabilities);
        self.reader.set_mode(mode);
        self.writer.set_mode(mode);
    }

    fn serve(mut self) {
        while let Some(request) = self.next_request() {
            let Request::Fs(request) = request else {
                continue;
            };
            let id = request.request_id;
            let op = request.operation;
            match (op, request.path.as_str()) {
                (_, "/slow") => {}
                (FsOperation::Exists, path) => {
                    let found = self.files.contains_key(path);
                    self.reply(id, op, FsReplyBody::Bool(found));
                }
                (FsOperation::Attributes, path) => {
                    let stat = self.files.get(path).map(|data| FileStat {
                        size: data.len() as u32,
                        created: 1_700_000_000_000,
                        modified: 1_700_000_000_500,
                        is_dir: false,
                        is_read_only: false,
                    });
                    self.reply(id, op, FsReplyBody::Stat(stat));
                }
                (FsOperation::List, "/") => {
                    let mut names: Vec<String> = self
                        .files
                        .keys()
                        .map(|path| path.trim_start_matches('/').to_string())
                        .collect();
                    names.sort();
                    self.reply(id, op, FsReplyBody::TextList(names));
                }
                (FsOperation::Delete, "/rom") => {
                    self.reply(id, op, FsReplyBody::Failed("/rom: Access denied".to_string()));
                }
                (FsOperation::Open { mode: OpenMode::Read, .. }, path) => {
                    let data = match self.files.get(path) {
                        Some(data) => FsData {
                            window_id: 0,
                            request_id: id,
                            failed: false,
                            data: Bytes::from(data.clone()),
                        },
                        None => FsData {
                            window_id: 0,
                            request_id: id,
                            failed: true,
                            data: Bytes::from(format!("{path}: No such file")),
                        },
                    };
                    self.send(&Message::FsData(data));
                }
                (FsOperation::Open { mode: OpenMode::Write, .. }, path) => {
                    let Some(Request::FsData(payload)) = self.next_request() else {
                        panic!("write request without payload");
                    };
                    assert_eq!(payload.request_id, id);
                    self.files.insert(path.to_string(), payload.data.to_vec());
                    self.reply(id, op, FsReplyBody::Done);
                }
                (FsOperation::Move, from) => {
                    let to = request.target.clone().unwrap();
                    match self.files.remove(from) {
                        Some(data) => {
                            self.files.insert(to, data);
                            self.reply(id, op, FsReplyBody::Done);
                        }
                        None => self.reply(id, op, FsReplyBody::Failed("No such file".into())),
                    }
                }
                (FsOperation::Find, "/shutdown") => {
                    // Stray reply first, then the answer, then shut down.
                    self.reply(id.wrapping_add(100), op, FsReplyBody::TextList(vec![]));
                    self.reply(id, op, FsReplyBody::TextList(vec!["a".into()]));
                    self.send(&Message::Window {
                        window_id: 0,
                        event: WindowEvent::ShutdownAll,
                    });
                }
                _ => self.reply(id, op, FsReplyBody::Failed(String::new())),
            }
        }
    }
}

#[test]
fn stat_of_missing_path_is_none() {
    let (dir, path) = temp_socket("stat");
    let listener = UnixListener::bind(&path).unwrap();

    let server = thread::spawn(move || {
        let mut peer = ScriptedPeer::accept(&listener);
        peer.handshake(0x03);
        peer.serve();
    });

    let session = connect_unix(&path, ConnectionConfig::default()).unwrap();
    let capabilities = session.capabilities().unwrap();
    assert!(capabilities.binary_checksum);
    assert!(capabilities.filesystem);

    let connection = session.connection();
    assert_eq!(connection.stat(0, "/does/not/exist").unwrap(), None);

    let stat = connection.stat(0, "/startup.lua").unwrap().unwrap();
    assert_eq!(stat.size, 11);
    assert!(!stat.is_dir);

    session.close().unwrap();
    server.join().unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn file_operations_roundtrip() {
    let (dir, path) = temp_socket("fs");
    let listener = UnixListener::bind(&path).unwrap();

    let server = thread::spawn(move || {
        let mut peer = ScriptedPeer::accept(&listener);
        peer.handshake(0x03);
        peer.serve();
    });

    let session = connect_unix(&path, ConnectionConfig::default()).unwrap();
    session.capabilities().unwrap();
    let connection = session.connection();

    assert!(connection.exists(0, "/startup.lua").unwrap());
    assert!(!connection.exists(0, "/nope").unwrap());

    // Large enough to need the extended header.
    let big = Bytes::from(vec![b'x'; 70_000]);
    connection.write(0, "/big.txt", big.clone(), true).unwrap();
    assert_eq!(connection.read(0, "/big.txt", true).unwrap(), big);

    connection.rename(0, "/big.txt", "/moved.txt").unwrap();
    assert_eq!(
        connection.list(0, "/").unwrap(),
        vec!["moved.txt".to_string(), "startup.lua".to_string()]
    );

    match connection.delete(0, "/rom") {
        Err(PeerError::OperationFailed { operation, message }) => {
            assert_eq!(operation, "delete");
            assert_eq!(message, "/rom: Access denied");
        }
        other => panic!("expected failure, got {other:?}"),
    }

    match connection.read(0, "/missing.lua", false) {
        Err(PeerError::OperationFailed { message, .. }) => {
            assert!(message.contains("No such file"));
        }
        other => panic!("expected failure, got {other:?}"),
    }

    assert_eq!(connection.pending_requests(), 0);
    session.close().unwrap();
    server.join().unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn timed_out_request_does_not_block_the_next() {
    let (dir, path) = temp_socket("timeout");
    let listener = UnixListener::bind(&path).unwrap();

    let server = thread::spawn(move || {
        let mut peer = ScriptedPeer::accept(&listener);
        peer.handshake(0x03);
        peer.serve();
    });

    let config = ConnectionConfig {
        request_timeout: Duration::from_millis(150),
        ..ConnectionConfig::default()
    };
    let session = connect_unix(&path, config).unwrap();
    session.capabilities().unwrap();
    let connection = session.connection();

    assert!(matches!(
        connection.exists(0, "/slow"),
        Err(PeerError::Timeout(_))
    ));
    assert_eq!(connection.pending_requests(), 0);
    assert!(connection.exists(0, "/startup.lua").unwrap());
    assert!(!connection.is_closed());

    session.close().unwrap();
    server.join().unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}

#[derive(Default)]
struct ShutdownWatch {
    shutdowns: AtomicUsize,
    windows: AtomicUsize,
}

impl ConnectionObserver for ShutdownWatch {
    fn on_window_changed(&self, _window: &Window) {
        self.windows.fetch_add(1, Ordering::SeqCst);
    }

    fn on_shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn stray_reply_is_ignored_and_shutdown_closes() {
    let (dir, path) = temp_socket("shutdown");
    let listener = UnixListener::bind(&path).unwrap();

    let server = thread::spawn(move || {
        let mut peer = ScriptedPeer::accept(&listener);
        peer.handshake(0x03);
        peer.send(&Message::Window {
            window_id: 0,
            event: WindowEvent::Opened {
                parent_computer: 0,
                width: 51,
                height: 19,
                title: "CraftOS-PC Terminal: Computer 0".to_string(),
            },
        });
        peer.serve();
    });

    let watch = Arc::new(ShutdownWatch::default());
    let session = connect_unix(&path, ConnectionConfig::default()).unwrap();
    session.connection().add_observer(watch.clone());
    session.capabilities().unwrap();

    let connection = Arc::clone(session.connection());
    assert_eq!(connection.find(0, "/shutdown").unwrap(), vec!["a".to_string()]);

    for _ in 0..100 {
        if connection.is_closed() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(connection.is_closed());
    assert_eq!(watch.shutdowns.load(Ordering::SeqCst), 1);
    assert!(connection.windows().is_empty());
    assert!(matches!(
        connection.exists(0, "/"),
        Err(PeerError::Disconnected(_))
    ));

    session.close().unwrap();
    server.join().unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn filesystem_denied_by_peer() {
    let (dir, path) = temp_socket("nofs");
    let listener = UnixListener::bind(&path).unwrap();

    let server = thread::spawn(move || {
        let mut peer = ScriptedPeer::accept(&listener);
        peer.handshake(0x01);
        peer.serve();
    });

    let session = connect_unix(&path, ConnectionConfig::default()).unwrap();
    let capabilities = session.capabilities().unwrap();
    assert!(!capabilities.filesystem);
    assert!(matches!(
        session.connection().list(0, "/"),
        Err(PeerError::FilesystemUnsupported)
    ));

    session.close().unwrap();
    server.join().unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}
