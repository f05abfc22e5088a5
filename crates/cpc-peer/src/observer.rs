use cpc_message::{Capabilities, NotificationKind};

use crate::registry::Window;

/// Receives connection events as frames are dispatched.
///
/// Callbacks run synchronously on the thread feeding the connection, in
/// registration order. The window table is not locked while they run, so
/// they may read windows from the connection; blocking file-system calls
/// from a callback would stall the reader and time out.
pub trait ConnectionObserver: Send + Sync {
    /// A window was created or updated.
    fn on_window_changed(&self, _window: &Window) {}

    /// A window was closed by the peer.
    fn on_window_closed(&self, _window_id: u8) {}

    /// Every window was dropped (disconnect or shutdown).
    fn on_windows_reset(&self) {}

    /// A notification with a known severity arrived.
    fn on_notification(&self, _window_id: u8, _kind: NotificationKind, _title: &str, _message: &str) {
    }

    /// The peer answered the capability handshake.
    fn on_capabilities(&self, _capabilities: Capabilities) {}

    /// The peer is shutting down; the connection closes right after.
    fn on_shutdown(&self) {}
}
