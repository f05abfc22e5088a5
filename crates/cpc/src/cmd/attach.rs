use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use cpc_message::NotificationKind;
use cpc_peer::{ConnectionObserver, Window};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::cmd::AttachArgs;
use crate::exit::{peer_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_record, OutputFormat, Record};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn run(args: AttachArgs, format: OutputFormat) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let session = args.peer.open()?;
    let (tx, rx) = mpsc::channel();
    let forwarder = Arc::new(EventForwarder::new(tx, args.redraws));
    session.connection().add_observer(forwarder.clone());

    let capabilities = session
        .capabilities()
        .map_err(|err| peer_error("handshake failed", err))?;
    info!(
        transport = session.transport_name(),
        bits = capabilities.to_bits(),
        "attached"
    );
    print_record(
        &Record::new(
            "capabilities",
            None,
            format!("bits=0x{:04x}", capabilities.to_bits()),
        )
        .with_detail(capabilities),
        format,
    );

    // Windows announced before the observer was registered.
    for window in session.connection().windows() {
        forwarder.on_window_changed(&window);
    }

    let mut printed = 0usize;
    let code = loop {
        if !running.load(Ordering::SeqCst) {
            break SUCCESS;
        }
        if args.count.is_some_and(|count| printed >= count) {
            break SUCCESS;
        }

        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(record) => {
                let shutdown = record.kind == "shutdown";
                print_record(&record, format);
                printed = printed.saturating_add(1);
                if shutdown {
                    break SUCCESS;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if session.connection().is_closed() {
                    for record in rx.try_iter() {
                        print_record(&record, format);
                    }
                    debug!("peer closed the connection");
                    break FAILURE;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break FAILURE,
        }
    };

    let exit = session
        .close()
        .map_err(|err| peer_error("close failed", err))?;
    if exit.killed {
        info!("peer did not close correctly; process was killed");
    }
    Ok(code)
}

/// Turns connection callbacks into output records.
struct EventForwarder {
    tx: Sender<Record>,
    redraws: bool,
    /// Last title and size printed per window.
    seen: Mutex<HashMap<u8, (Option<String>, u16, u16)>>,
}

impl EventForwarder {
    fn new(tx: Sender<Record>, redraws: bool) -> Self {
        Self {
            tx,
            redraws,
            seen: Mutex::new(HashMap::new()),
        }
    }

    fn forward(&self, record: Record) {
        // The receiver is gone once the command is exiting.
        let _ = self.tx.send(record);
    }
}

impl ConnectionObserver for EventForwarder {
    fn on_window_changed(&self, window: &Window) {
        let shape = (window.title.clone(), window.term.width, window.term.height);
        let changed = self.seen.lock().insert(window.id, shape.clone()) != Some(shape);
        if !changed && !self.redraws {
            return;
        }

        let role = if window.is_monitor() { "monitor" } else { "computer" };
        let summary = format!(
            "{} {}x{} {:?} ({role})",
            window.title.as_deref().unwrap_or("<untitled>"),
            window.term.width,
            window.term.height,
            window.term.mode,
        );
        self.forward(Record::new("window", Some(window.id), summary).with_detail(window));
    }

    fn on_window_closed(&self, window_id: u8) {
        self.seen.lock().remove(&window_id);
        self.forward(Record::new("window-closed", Some(window_id), "closed"));
    }

    fn on_windows_reset(&self) {
        self.seen.lock().clear();
    }

    fn on_notification(&self, window_id: u8, kind: NotificationKind, title: &str, message: &str) {
        let severity = format!("{kind:?}").to_lowercase();
        self.forward(Record::new(
            "notification",
            Some(window_id),
            format!("[{severity}] {title}: {message}"),
        ));
    }

    fn on_shutdown(&self) {
        self.forward(Record::new("shutdown", None, "peer is shutting down"));
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
