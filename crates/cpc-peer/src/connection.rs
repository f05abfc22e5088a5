use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use cpc_frame::{FrameConfig, FrameDecoder, FrameError, FrameWriter};
use cpc_message::{
    decode_message_with_limit, reply_request_id, Capabilities, FileStat, FsData, FsOperation,
    FsReplyBody, FsRequest, InputEvent, Message, OpenMode, Request, WindowEvent,
    DEFAULT_MAX_STRING_LEN,
};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::correlator::{Correlator, FsResponse, DEFAULT_REQUEST_TIMEOUT};
use crate::error::{PeerError, Result};
use crate::handshake::{handshake_request, negotiated_mode, HandshakeConfig};
use crate::observer::ConnectionObserver;
use crate::registry::{Window, WindowRegistry, WindowUpdate};

/// Configuration for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long a file-system request waits for its reply. Default: 3000 ms.
    pub request_timeout: Duration,
    /// Capability negotiation settings.
    pub handshake: HandshakeConfig,
    /// Longest null-terminated string accepted in a message.
    pub max_string_len: usize,
    /// Frame codec limits and socket timeouts.
    pub frame: FrameConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            handshake: HandshakeConfig::default(),
            max_string_len: DEFAULT_MAX_STRING_LEN,
            frame: FrameConfig::default(),
        }
    }
}

/// Protocol state for one peer: frame decoder, writer, window table and
/// pending file-system requests.
///
/// Inbound bytes go through [`Connection::feed`], strictly in arrival order
/// from one thread. Outbound operations may be called from any thread; each
/// frame is written whole under the writer lock.
pub struct Connection<W> {
    decoder: Mutex<FrameDecoder>,
    writer: Mutex<FrameWriter<W>>,
    registry: Mutex<WindowRegistry>,
    correlator: Correlator,
    capabilities: Mutex<Option<Capabilities>>,
    capabilities_ready: Condvar,
    closed: AtomicBool,
    config: ConnectionConfig,
}

impl<W: Write> Connection<W> {
    /// Wrap the outbound half of a transport.
    pub fn new(writer: W, config: ConnectionConfig) -> Self {
        Self {
            decoder: Mutex::new(FrameDecoder::with_max_payload(config.frame.max_payload_size)),
            writer: Mutex::new(FrameWriter::with_config(writer, config.frame.clone())),
            registry: Mutex::new(WindowRegistry::new()),
            correlator: Correlator::new(config.request_timeout),
            capabilities: Mutex::new(None),
            capabilities_ready: Condvar::new(),
            closed: AtomicBool::new(false),
            config,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Register an observer for window and notification events.
    pub fn add_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.registry.lock().add_observer(observer);
    }

    /// Send the capability request. Everything sent before the reply uses
    /// text checksums and standard headers.
    pub fn handshake(&self) -> Result<()> {
        let request = handshake_request(&self.config.handshake);
        debug!(
            requested = self.config.handshake.capabilities.to_bits(),
            "sending capability request"
        );
        self.send(&request)
    }

    /// Capabilities from the peer's reply, if it has arrived.
    pub fn capabilities(&self) -> Option<Capabilities> {
        *self.capabilities.lock()
    }

    /// Block until the capability reply arrives or `timeout` passes.
    pub fn wait_capabilities(&self, timeout: Duration) -> Result<Capabilities> {
        let deadline = Instant::now() + timeout;
        let mut capabilities = self.capabilities.lock();
        loop {
            if let Some(capabilities) = *capabilities {
                return Ok(capabilities);
            }
            if self.is_closed() {
                return Err(PeerError::Disconnected(
                    "closed before capability reply".to_string(),
                ));
            }
            if self
                .capabilities_ready
                .wait_until(&mut capabilities, deadline)
                .timed_out()
            {
                return match *capabilities {
                    Some(capabilities) => Ok(capabilities),
                    None => Err(PeerError::HandshakeFailed(format!(
                        "no capability reply within {timeout:?}"
                    ))),
                };
            }
        }
    }

    /// Consume one inbound chunk and dispatch every complete message in it.
    ///
    /// Returns the number of messages dispatched. Corrupted frames and
    /// undecodable messages are logged and skipped; an unrecoverable framing
    /// error closes the connection and is returned.
    pub fn feed(&self, chunk: &[u8]) -> Result<usize> {
        self.ensure_open()?;

        let mut decoder = self.decoder.lock();
        decoder.push(chunk);

        let mut dispatched = 0;
        while !self.is_closed() {
            let frame = match decoder.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    error!(%err, buffered = decoder.buffered(), "unrecoverable framing error");
                    decoder.clear();
                    drop(decoder);
                    self.close("framing error");
                    return Err(err.into());
                }
            };

            let message = match decode_message_with_limit(&frame.payload, self.config.max_string_len)
            {
                Ok(message) => message,
                Err(err) => {
                    warn!(%err, len = frame.payload.len(), "dropping undecodable message");
                    if let Some(request_id) = reply_request_id(&frame.payload) {
                        self.correlator.fail(request_id, PeerError::Message(err));
                    }
                    continue;
                }
            };

            if let Message::Capabilities { capabilities, .. } = &message {
                // Applies to the very next frame, including ones already buffered.
                let mode = negotiated_mode(*capabilities);
                decoder.set_mode(mode);
                self.writer.lock().set_mode(mode);
            }

            self.dispatch(message);
            dispatched += 1;
        }

        Ok(dispatched)
    }

    fn dispatch(&self, message: Message) {
        match message {
            Message::Terminal { window_id, state } => {
                self.update_window(window_id, WindowUpdate::Terminal(state));
            }
            Message::Window { window_id, event } => match event {
                WindowEvent::Opened {
                    parent_computer,
                    width,
                    height,
                    title,
                } => {
                    info!(window_id, %title, width, height, "window opened");
                    self.update_window(
                        window_id,
                        WindowUpdate::Opened {
                            parent_computer,
                            width,
                            height,
                            title,
                        },
                    );
                }
                WindowEvent::Closed => {
                    let removed = self.registry.lock().discard(window_id).is_some();
                    if removed {
                        for observer in self.observers() {
                            observer.on_window_closed(window_id);
                        }
                    }
                }
                WindowEvent::ShutdownAll => {
                    info!("peer is shutting down");
                    for observer in self.observers() {
                        observer.on_shutdown();
                    }
                    self.close("peer shut down");
                }
            },
            Message::Notification {
                window_id,
                notification,
            } => match notification.kind() {
                Some(kind) => {
                    for observer in self.observers() {
                        observer.on_notification(
                            window_id,
                            kind,
                            &notification.title,
                            &notification.message,
                        );
                    }
                }
                None => debug!(
                    flags = notification.flags,
                    "ignoring notification with unknown flags"
                ),
            },
            Message::Capabilities { capabilities, .. } => {
                info!(
                    binary_checksum = capabilities.binary_checksum,
                    filesystem = capabilities.filesystem,
                    extended_framing = capabilities.allows_extended_frames(),
                    "capabilities negotiated"
                );
                *self.capabilities.lock() = Some(capabilities);
                self.capabilities_ready.notify_all();
                for observer in self.observers() {
                    observer.on_capabilities(capabilities);
                }
            }
            Message::FsReply(reply) => {
                let request_id = reply.request_id;
                if !self.correlator.complete_reply(reply) {
                    warn!(request_id, "discarding stray file-system reply");
                }
            }
            Message::FsData(data) => {
                let request_id = data.request_id;
                if !self.correlator.complete_data(data) {
                    warn!(request_id, "discarding stray file-system data");
                }
            }
            Message::Unknown { .. } => {}
        }
    }

    // Observers run without the registry lock held, so they may query the
    // connection.
    fn observers(&self) -> Vec<Arc<dyn ConnectionObserver>> {
        self.registry.lock().observers()
    }

    fn update_window(&self, window_id: u8, update: WindowUpdate) {
        let (window, observers) = {
            let mut registry = self.registry.lock();
            let window = registry.apply(window_id, update).clone();
            (window, registry.observers())
        };
        for observer in &observers {
            observer.on_window_changed(&window);
        }
    }

    /// Forward an input event to a window.
    pub fn send_input(&self, event: InputEvent) -> Result<()> {
        self.send(&Request::Input(event))
    }

    fn send(&self, request: &Request) -> Result<()> {
        self.ensure_open()?;
        let payload = request.encode()?;
        let result = self.writer.lock().send(&payload);
        self.check_write(result.map(|_| ()))
    }

    fn check_write(&self, result: std::result::Result<(), FrameError>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(err @ (FrameError::Io(_) | FrameError::ConnectionClosed)) => {
                warn!(%err, "write failed; closing connection");
                self.close("write failed");
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Mark the connection closed, fail every pending request and drop all
    /// windows. Idempotent.
    pub fn close(&self, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let failed = self.correlator.fail_all(reason);
        info!(reason, failed_requests = failed, "connection closed");
        self.registry.lock().clear();
        for observer in self.observers() {
            observer.on_windows_reset();
        }
        // Wake anyone still waiting for capabilities.
        let _guard = self.capabilities.lock();
        self.capabilities_ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(PeerError::Disconnected("connection closed".to_string()));
        }
        Ok(())
    }

    /// Fail requests whose deadline has passed. Returns how many.
    pub fn expire_requests(&self) -> usize {
        self.correlator.expire(Instant::now())
    }

    /// Requests awaiting a reply.
    pub fn pending_requests(&self) -> usize {
        self.correlator.pending()
    }

    /// Corrupted frames skipped so far.
    pub fn resyncs(&self) -> u64 {
        self.decoder.lock().resyncs()
    }

    /// Snapshot of one window.
    pub fn window(&self, window_id: u8) -> Option<Window> {
        self.registry.lock().get(window_id).cloned()
    }

    /// Snapshot of every window, ordered by id.
    pub fn windows(&self) -> Vec<Window> {
        self.registry.lock().windows().cloned().collect()
    }

    /// Run `f` against the live window table.
    pub fn with_registry<T>(&self, f: impl FnOnce(&WindowRegistry) -> T) -> T {
        f(&self.registry.lock())
    }

    pub(crate) fn with_writer<T>(&self, f: impl FnOnce(&mut W) -> T) -> T {
        f(self.writer.lock().get_mut())
    }

    fn require_filesystem(&self) -> Result<()> {
        match self.capabilities() {
            Some(capabilities) if capabilities.filesystem => Ok(()),
            _ => Err(PeerError::FilesystemUnsupported),
        }
    }

    /// Send one file-system request (and its payload for writes) and wait for
    /// the answer.
    pub fn fs_request(
        &self,
        computer_id: u8,
        operation: FsOperation,
        path: &str,
        target: Option<&str>,
        payload: Option<Bytes>,
    ) -> Result<FsResponse> {
        self.ensure_open()?;
        self.require_filesystem()?;

        let pending = self.correlator.register(operation)?;
        let request_id = pending.id();
        let request = Request::Fs(FsRequest {
            computer_id,
            request_id,
            operation,
            path: path.to_string(),
            target: target.map(str::to_string),
        })
        .encode()?;
        let data = if operation.needs_payload() {
            Some(
                Request::FsData(FsData {
                    window_id: computer_id,
                    request_id,
                    failed: false,
                    data: payload.unwrap_or_default(),
                })
                .encode()?,
            )
        } else {
            None
        };

        debug!(
            computer_id,
            request_id,
            operation = operation.name(),
            path,
            "sending file-system request"
        );
        let result = {
            let mut writer = self.writer.lock();
            writer.send(&request).and_then(|_| match &data {
                Some(data) => writer.send(data).map(|header| {
                    debug!(request_id, ?header, len = data.len(), "sent file payload");
                }),
                None => Ok(()),
            })
        };
        // Dropping `pending` on error releases the id.
        self.check_write(result)?;

        pending.wait()
    }

    pub fn exists(&self, computer_id: u8, path: &str) -> Result<bool> {
        self.bool_op(computer_id, FsOperation::Exists, path)
    }

    pub fn is_directory(&self, computer_id: u8, path: &str) -> Result<bool> {
        self.bool_op(computer_id, FsOperation::IsDir, path)
    }

    pub fn is_read_only(&self, computer_id: u8, path: &str) -> Result<bool> {
        self.bool_op(computer_id, FsOperation::IsReadOnly, path)
    }

    /// File size in bytes.
    pub fn size(&self, computer_id: u8, path: &str) -> Result<u32> {
        self.size_op(computer_id, FsOperation::GetSize, path)
    }

    /// Name of the drive holding `path` (`hdd`, `rom`, ...).
    pub fn drive(&self, computer_id: u8, path: &str) -> Result<String> {
        let operation = FsOperation::GetDrive;
        match self.reply(computer_id, operation, path, None, None)? {
            FsReplyBody::Text(drive) => Ok(drive),
            body => Err(unexpected(operation, body)),
        }
    }

    pub fn capacity(&self, computer_id: u8, path: &str) -> Result<u32> {
        self.size_op(computer_id, FsOperation::GetCapacity, path)
    }

    pub fn free_space(&self, computer_id: u8, path: &str) -> Result<u32> {
        self.size_op(computer_id, FsOperation::GetFreeSpace, path)
    }

    /// Entry names in a directory.
    pub fn list(&self, computer_id: u8, path: &str) -> Result<Vec<String>> {
        self.list_op(computer_id, FsOperation::List, path)
    }

    /// Paths matching a wildcard pattern.
    pub fn find(&self, computer_id: u8, pattern: &str) -> Result<Vec<String>> {
        self.list_op(computer_id, FsOperation::Find, pattern)
    }

    /// Attributes of `path`, or `None` if it does not exist.
    pub fn stat(&self, computer_id: u8, path: &str) -> Result<Option<FileStat>> {
        let operation = FsOperation::Attributes;
        match self.reply(computer_id, operation, path, None, None)? {
            FsReplyBody::Stat(stat) => Ok(stat),
            body => Err(unexpected(operation, body)),
        }
    }

    /// Read a whole file.
    pub fn read(&self, computer_id: u8, path: &str, binary: bool) -> Result<Bytes> {
        let operation = FsOperation::Open {
            mode: OpenMode::Read,
            binary,
        };
        match self.fs_request(computer_id, operation, path, None, None)? {
            FsResponse::Data(data) if data.failed => Err(PeerError::OperationFailed {
                operation: operation.name(),
                message: data.error_message(),
            }),
            FsResponse::Data(data) => Ok(data.data),
            FsResponse::Reply(body) => Err(into_failure(operation, body)),
        }
    }

    /// Replace a file's contents.
    pub fn write(&self, computer_id: u8, path: &str, data: Bytes, binary: bool) -> Result<()> {
        let operation = FsOperation::Open {
            mode: OpenMode::Write,
            binary,
        };
        self.status_op(computer_id, operation, path, None, Some(data))
    }

    pub fn append(&self, computer_id: u8, path: &str, data: Bytes, binary: bool) -> Result<()> {
        let operation = FsOperation::Open {
            mode: OpenMode::Append,
            binary,
        };
        self.status_op(computer_id, operation, path, None, Some(data))
    }

    pub fn create_directory(&self, computer_id: u8, path: &str) -> Result<()> {
        self.status_op(computer_id, FsOperation::MakeDir, path, None, None)
    }

    pub fn delete(&self, computer_id: u8, path: &str) -> Result<()> {
        self.status_op(computer_id, FsOperation::Delete, path, None, None)
    }

    /// Move `from` to `to`.
    pub fn rename(&self, computer_id: u8, from: &str, to: &str) -> Result<()> {
        self.status_op(computer_id, FsOperation::Move, from, Some(to), None)
    }

    pub fn copy(&self, computer_id: u8, from: &str, to: &str) -> Result<()> {
        self.status_op(computer_id, FsOperation::Copy, from, Some(to), None)
    }

    fn reply(
        &self,
        computer_id: u8,
        operation: FsOperation,
        path: &str,
        target: Option<&str>,
        payload: Option<Bytes>,
    ) -> Result<FsReplyBody> {
        match self.fs_request(computer_id, operation, path, target, payload)? {
            FsResponse::Reply(FsReplyBody::Failed(message)) => Err(failed(operation, message)),
            FsResponse::Reply(body) => Ok(body),
            FsResponse::Data(_) => Err(PeerError::UnexpectedReply {
                operation: operation.name(),
                found: "file data".to_string(),
            }),
        }
    }

    fn bool_op(&self, computer_id: u8, operation: FsOperation, path: &str) -> Result<bool> {
        match self.reply(computer_id, operation, path, None, None)? {
            FsReplyBody::Bool(value) => Ok(value),
            body => Err(unexpected(operation, body)),
        }
    }

    fn size_op(&self, computer_id: u8, operation: FsOperation, path: &str) -> Result<u32> {
        match self.reply(computer_id, operation, path, None, None)? {
            FsReplyBody::Size(value) => Ok(value),
            body => Err(unexpected(operation, body)),
        }
    }

    fn list_op(&self, computer_id: u8, operation: FsOperation, path: &str) -> Result<Vec<String>> {
        match self.reply(computer_id, operation, path, None, None)? {
            FsReplyBody::TextList(entries) => Ok(entries),
            body => Err(unexpected(operation, body)),
        }
    }

    fn status_op(
        &self,
        computer_id: u8,
        operation: FsOperation,
        path: &str,
        target: Option<&str>,
        payload: Option<Bytes>,
    ) -> Result<()> {
        match self.reply(computer_id, operation, path, target, payload)? {
            FsReplyBody::Done => Ok(()),
            body => Err(unexpected(operation, body)),
        }
    }
}

fn failed(operation: FsOperation, message: String) -> PeerError {
    let message = if message.is_empty() {
        "peer reported failure".to_string()
    } else {
        message
    };
    PeerError::OperationFailed {
        operation: operation.name(),
        message,
    }
}

fn unexpected(operation: FsOperation, body: FsReplyBody) -> PeerError {
    PeerError::UnexpectedReply {
        operation: operation.name(),
        found: format!("{body:?}"),
    }
}

fn into_failure(operation: FsOperation, body: FsReplyBody) -> PeerError {
    match body {
        FsReplyBody::Failed(message) => failed(operation, message),
        body => unexpected(operation, body),
    }
}

impl<W> std::fmt::Debug for Connection<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .field("correlator", &self.correlator)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use bytes::BytesMut;
    use cpc_frame::{encode_frame, FrameMode};
    use cpc_message::{encode_message, Notification, NotificationKind};

    use super::*;

    fn frame(message: &Message, mode: FrameMode) -> Vec<u8> {
        let payload = encode_message(message).unwrap();
        let mut wire = BytesMut::new();
        encode_frame(&payload, mode, &mut wire).unwrap();
        wire.to_vec()
    }

    fn capabilities(bits: u16) -> Message {
        Message::Capabilities {
            window_id: 0,
            capabilities: Capabilities::from_bits(bits),
        }
    }

    #[test]
    fn handshake_writes_capability_frame() {
        let connection = Connection::new(Vec::new(), ConnectionConfig::default());
        connection.handshake().unwrap();
        let written = connection.with_writer(|sink| sink.clone());
        assert!(written.starts_with(b"!CPC0008"));
        assert!(written.ends_with(b"\n"));
    }

    #[test]
    fn capability_reply_switches_mode_for_buffered_frames() {
        let connection = Connection::new(Vec::new(), ConnectionConfig::default());
        let binary = FrameMode {
            binary_checksum: true,
            extended_framing: true,
        };

        let mut wire = frame(&capabilities(0x03), FrameMode::default());
        wire.extend(frame(
            &Message::Window {
                window_id: 0,
                event: WindowEvent::Opened {
                    parent_computer: 0,
                    width: 51,
                    height: 19,
                    title: "CraftOS-PC Terminal".to_string(),
                },
            },
            binary,
        ));

        assert_eq!(connection.feed(&wire).unwrap(), 2);
        assert_eq!(connection.resyncs(), 0);
        assert!(connection.capabilities().unwrap().filesystem);
        assert_eq!(connection.windows().len(), 1);
        assert_eq!(
            connection.wait_capabilities(Duration::ZERO).unwrap(),
            Capabilities::from_bits(0x03)
        );
    }

    #[test]
    fn filesystem_requires_negotiation() {
        let connection = Connection::new(Vec::new(), ConnectionConfig::default());
        assert!(matches!(
            connection.exists(0, "/"),
            Err(PeerError::FilesystemUnsupported)
        ));

        connection
            .feed(&frame(&capabilities(0x01), FrameMode::default()))
            .unwrap();
        assert!(matches!(
            connection.exists(0, "/"),
            Err(PeerError::FilesystemUnsupported)
        ));
    }

    #[test]
    fn framing_error_closes_connection() {
        let connection = Connection::new(Vec::new(), ConnectionConfig::default());
        let err = connection.feed(b"!XYZ0000").unwrap_err();
        assert!(matches!(err, PeerError::Frame(_)));
        assert!(connection.is_closed());
        assert!(matches!(
            connection.feed(b"anything"),
            Err(PeerError::Disconnected(_))
        ));
    }

    #[test]
    fn undecodable_message_is_skipped() {
        let connection = Connection::new(Vec::new(), ConnectionConfig::default());
        let mut wire = BytesMut::new();
        encode_frame(&[4, 0, 9], FrameMode::default(), &mut wire).unwrap();
        let mut wire = wire.to_vec();
        wire.extend(frame(
            &Message::Window {
                window_id: 1,
                event: WindowEvent::Closed,
            },
            FrameMode::default(),
        ));
        assert_eq!(connection.feed(&wire).unwrap(), 1);
        assert!(!connection.is_closed());
    }

    #[test]
    fn malformed_reply_fails_its_request() {
        let config = ConnectionConfig {
            request_timeout: Duration::from_secs(30),
            ..ConnectionConfig::default()
        };
        let connection = Arc::new(Connection::new(Vec::new(), config));
        connection
            .feed(&frame(&capabilities(0x03), FrameMode::default()))
            .unwrap();

        let caller = Arc::clone(&connection);
        let started = Instant::now();
        let request = std::thread::spawn(move || caller.exists(0, "/startup.lua"));
        while connection.pending_requests() == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }

        // Exists reply for id 0 with its body cut off.
        let mode = negotiated_mode(Capabilities::from_bits(0x03));
        let mut wire = BytesMut::new();
        encode_frame(&[8, 0, 0, 0], mode, &mut wire).unwrap();
        assert_eq!(connection.feed(&wire).unwrap(), 0);

        assert!(matches!(
            request.join().unwrap(),
            Err(PeerError::Message(_))
        ));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(connection.pending_requests(), 0);
        assert!(!connection.is_closed());
    }

    /// Queries the connection from inside every callback.
    #[derive(Default)]
    struct Reentrant {
        connection: std::sync::OnceLock<std::sync::Weak<Connection<Vec<u8>>>>,
        seen: AtomicUsize,
    }

    impl Reentrant {
        fn query(&self) {
            if let Some(connection) = self.connection.get().and_then(|weak| weak.upgrade()) {
                let _ = connection.windows();
                self.seen.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    impl ConnectionObserver for Reentrant {
        fn on_window_changed(&self, _window: &Window) {
            self.query();
        }

        fn on_window_closed(&self, _window_id: u8) {
            self.query();
        }

        fn on_notification(&self, _id: u8, _kind: NotificationKind, _title: &str, _msg: &str) {
            self.query();
        }

        fn on_capabilities(&self, _capabilities: Capabilities) {
            self.query();
        }

        fn on_windows_reset(&self) {
            self.query();
        }
    }

    #[test]
    fn observers_may_query_the_connection() {
        let connection = Arc::new(Connection::new(Vec::new(), ConnectionConfig::default()));
        let observer = Arc::new(Reentrant::default());
        observer
            .connection
            .set(Arc::downgrade(&connection))
            .unwrap();
        connection.add_observer(observer.clone());

        let mut wire = frame(&capabilities(0x00), FrameMode::default());
        wire.extend(frame(
            &Message::Window {
                window_id: 0,
                event: WindowEvent::Opened {
                    parent_computer: 0,
                    width: 51,
                    height: 19,
                    title: "Computer 0".to_string(),
                },
            },
            FrameMode::default(),
        ));
        wire.extend(frame(
            &Message::Notification {
                window_id: 0,
                notification: Notification {
                    flags: NotificationKind::Info.flags(),
                    title: "Update".to_string(),
                    message: "available".to_string(),
                },
            },
            FrameMode::default(),
        ));
        wire.extend(frame(
            &Message::Window {
                window_id: 0,
                event: WindowEvent::Closed,
            },
            FrameMode::default(),
        ));

        assert_eq!(connection.feed(&wire).unwrap(), 4);
        connection.close("done");
        assert_eq!(observer.seen.load(Ordering::SeqCst), 5);
    }

    #[derive(Default)]
    struct Events {
        notifications: AtomicUsize,
        shutdowns: AtomicUsize,
        resets: AtomicUsize,
    }

    impl ConnectionObserver for Events {
        fn on_notification(&self, _id: u8, kind: NotificationKind, title: &str, _message: &str) {
            assert_eq!(kind, NotificationKind::Info);
            assert_eq!(title, "Update");
            self.notifications.fetch_add(1, Ordering::SeqCst);
        }

        fn on_windows_reset(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }

        fn on_shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn notifications_and_shutdown_reach_observers() {
        let connection = Connection::new(Vec::new(), ConnectionConfig::default());
        let events = Arc::new(Events::default());
        connection.add_observer(events.clone());

        let notify = |flags| Message::Notification {
            window_id: 0,
            notification: Notification {
                flags,
                title: "Update".to_string(),
                message: "available".to_string(),
            },
        };
        let mut wire = frame(&notify(0x40), FrameMode::default());
        wire.extend(frame(&notify(0x80), FrameMode::default()));
        wire.extend(frame(
            &Message::Window {
                window_id: 0,
                event: WindowEvent::ShutdownAll,
            },
            FrameMode::default(),
        ));
        // Anything after the shutdown is not dispatched.
        wire.extend(frame(&notify(0x40), FrameMode::default()));

        assert_eq!(connection.feed(&wire).unwrap(), 3);
        assert_eq!(events.notifications.load(Ordering::SeqCst), 1);
        assert_eq!(events.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(events.resets.load(Ordering::SeqCst), 1);
        assert!(connection.is_closed());
    }

    struct Stalled;

    impl Write for Stalled {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(std::io::ErrorKind::WouldBlock))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stalled_writer_closes_instead_of_spinning() {
        let connection = Connection::new(Stalled, ConnectionConfig::default());
        assert!(matches!(
            connection.send_input(InputEvent::char(0, &b"a"[..])),
            Err(PeerError::Frame(FrameError::Io(_)))
        ));
        assert!(connection.is_closed());
    }

    #[test]
    fn close_is_idempotent_and_unblocks_waiters() {
        let connection = Connection::new(Vec::new(), ConnectionConfig::default());
        connection.close("test");
        connection.close("again");
        assert!(matches!(
            connection.wait_capabilities(Duration::from_secs(5)),
            Err(PeerError::Disconnected(_))
        ));
        assert!(matches!(
            connection.send_input(InputEvent::char(0, &b"a"[..])),
            Err(PeerError::Disconnected(_))
        ));
    }
}
