use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;

use cpc_message::{TerminalMode, TerminalState};
use serde::Serialize;
use tracing::debug;

use crate::observer::ConnectionObserver;

const MONITOR_MARKER: &str = "Monitor";

/// One terminal surface: a computer's display or an attached monitor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Window {
    pub id: u8,
    pub title: Option<String>,
    /// `None` until the kind of window can be determined.
    pub is_monitor: Option<bool>,
    /// Owning computer, known for monitors opened with a parent index.
    pub computer_id: Option<u8>,
    pub term: TerminalState,
}

impl Window {
    fn new(id: u8) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Whether this window is known to be a monitor.
    pub fn is_monitor(&self) -> bool {
        self.is_monitor == Some(true)
    }
}

/// Partial window state carried by one inbound message.
#[derive(Debug, Clone)]
pub enum WindowUpdate {
    /// A full terminal snapshot.
    Terminal(TerminalState),
    /// Size and title from a window-opened event.
    Opened {
        parent_computer: u8,
        width: u16,
        height: u16,
        title: String,
    },
}

impl Window {
    /// Merge `update` into this window.
    ///
    /// A snapshot replaces the planes its mode carries and keeps the rest:
    /// text mode keeps the previous pixels, graphics modes keep the previous
    /// characters and colors. An opened event only touches size and title.
    pub fn merge(&mut self, update: WindowUpdate) {
        match update {
            WindowUpdate::Terminal(mut state) => {
                if state.mode == TerminalMode::Text {
                    state.pixels = mem::take(&mut self.term.pixels);
                } else {
                    state.screen = mem::take(&mut self.term.screen);
                    state.colors = mem::take(&mut self.term.colors);
                }
                self.term = state;
            }
            WindowUpdate::Opened {
                parent_computer,
                width,
                height,
                title,
            } => {
                self.term.width = width;
                self.term.height = height;
                self.title = Some(title);
                if parent_computer != 0 {
                    self.is_monitor = Some(false);
                    self.computer_id = Some(parent_computer - 1);
                }
            }
        }

        if self.is_monitor.is_none() {
            if let Some(title) = &self.title {
                self.is_monitor = Some(title.contains(MONITOR_MARKER));
            }
        }
    }
}

/// Window table for one connection.
#[derive(Default)]
pub struct WindowRegistry {
    windows: BTreeMap<u8, Window>,
    observers: Vec<Arc<dyn ConnectionObserver>>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Observers are called in registration order.
    pub fn add_observer(&mut self, observer: Arc<dyn ConnectionObserver>) {
        self.observers.push(observer);
    }

    /// Registered observers, cloned so callers can notify without holding
    /// the registry.
    pub(crate) fn observers(&self) -> Vec<Arc<dyn ConnectionObserver>> {
        self.observers.clone()
    }

    /// Create the window if absent, merge `update`, and notify.
    pub fn upsert(&mut self, window_id: u8, update: WindowUpdate) -> &Window {
        self.apply(window_id, update);
        let window = &self.windows[&window_id];
        for observer in &self.observers {
            observer.on_window_changed(window);
        }
        window
    }

    /// [`upsert`](Self::upsert) without notifying observers.
    pub(crate) fn apply(&mut self, window_id: u8, update: WindowUpdate) -> &Window {
        let window = self
            .windows
            .entry(window_id)
            .or_insert_with(|| Window::new(window_id));
        window.merge(update);
        debug!(
            window_id,
            width = window.term.width,
            height = window.term.height,
            is_monitor = ?window.is_monitor,
            "window updated"
        );
        window
    }

    /// Delete a window. Observers hear about it only if it existed.
    pub fn remove(&mut self, window_id: u8) -> Option<Window> {
        let removed = self.discard(window_id);
        if removed.is_some() {
            for observer in &self.observers {
                observer.on_window_closed(window_id);
            }
        }
        removed
    }

    pub(crate) fn discard(&mut self, window_id: u8) -> Option<Window> {
        let removed = self.windows.remove(&window_id);
        if removed.is_some() {
            debug!(window_id, "window closed");
        }
        removed
    }

    /// Drop every window and notify.
    pub fn reset(&mut self) {
        self.clear();
        for observer in &self.observers {
            observer.on_windows_reset();
        }
    }

    pub(crate) fn clear(&mut self) {
        self.windows.clear();
    }

    pub fn get(&self, window_id: u8) -> Option<&Window> {
        self.windows.get(&window_id)
    }

    /// Windows ordered by id.
    pub fn windows(&self) -> impl Iterator<Item = &Window> {
        self.windows.values()
    }

    /// Windows not known to be monitors.
    pub fn computers(&self) -> impl Iterator<Item = &Window> {
        self.windows.values().filter(|window| !window.is_monitor())
    }

    pub fn monitors(&self) -> impl Iterator<Item = &Window> {
        self.windows.values().filter(|window| window.is_monitor())
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl std::fmt::Debug for WindowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowRegistry")
            .field("windows", &self.windows.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}
