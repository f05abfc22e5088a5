//! Request/response correlation for file-system operations.
//!
//! Each request takes an 8-bit id from a wrapping counter. An id is reused
//! only after its previous occupant was answered, timed out, cancelled or
//! failed by a disconnect. Completion and timeout race for the entry under
//! one lock: whoever removes it first decides the outcome, the other is a
//! no-op.

use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpc_message::{FsData, FsOperation, FsReply, FsReplyBody, OpenMode};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{PeerError, Result};

/// Default time a file-system request waits for its reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(3000);

const REQUEST_SLOTS: usize = 256;

/// What answered a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsResponse {
    /// A type-8 reply body.
    Reply(FsReplyBody),
    /// A type-9 data frame (reads).
    Data(FsData),
}

type Completion = SyncSender<Result<FsResponse>>;

struct Pending {
    ticket: u64,
    operation: FsOperation,
    deadline: Instant,
    tx: Completion,
}

impl Pending {
    fn resolve(self, outcome: Result<FsResponse>) {
        // The waiter may already be gone; its outcome no longer matters.
        let _ = self.tx.try_send(outcome);
    }
}

#[derive(Default)]
struct Table {
    slots: HashMap<u8, Pending>,
    next_id: u8,
    next_ticket: u64,
}

impl Table {
    fn remove_if_ticket(&mut self, id: u8, ticket: u64) -> Option<Pending> {
        match self.slots.get(&id) {
            Some(pending) if pending.ticket == ticket => self.slots.remove(&id),
            _ => None,
        }
    }

    fn expire(&mut self, now: Instant, timeout: Duration) -> usize {
        let expired: Vec<u8> = self
            .slots
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            if let Some(pending) = self.slots.remove(id) {
                debug!(request_id = id, operation = pending.operation.name(), "request timed out");
                pending.resolve(Err(PeerError::Timeout(timeout)));
            }
        }
        expired.len()
    }
}

/// Pending-request table for one connection.
#[derive(Clone)]
pub struct Correlator {
    table: Arc<Mutex<Table>>,
    timeout: Duration,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl Correlator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Arc::new(Mutex::new(Table::default())),
            timeout,
        }
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Allocate an id for `operation` and start its deadline.
    ///
    /// Fails with `RequestSlotsExhausted` when all 256 ids are live; a live
    /// entry is never overwritten.
    pub fn register(&self, operation: FsOperation) -> Result<PendingReply> {
        let now = Instant::now();
        let mut table = self.table.lock();
        table.expire(now, self.timeout);

        if table.slots.len() >= REQUEST_SLOTS {
            return Err(PeerError::RequestSlotsExhausted);
        }

        let mut id = table.next_id;
        while table.slots.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        table.next_id = id.wrapping_add(1);

        let ticket = table.next_ticket;
        table.next_ticket += 1;

        let deadline = now + self.timeout;
        let (tx, rx) = sync_channel(1);
        table.slots.insert(
            id,
            Pending {
                ticket,
                operation,
                deadline,
                tx,
            },
        );

        Ok(PendingReply {
            id,
            ticket,
            operation,
            deadline,
            timeout: self.timeout,
            rx,
            table: Arc::clone(&self.table),
        })
    }

    /// Resolve the request a type-8 reply answers.
    ///
    /// Returns `false` for a stray reply (no live request with that id),
    /// which leaves every pending entry untouched.
    pub fn complete_reply(&self, reply: FsReply) -> bool {
        let mut table = self.table.lock();
        let Some(pending) = table.slots.remove(&reply.request_id) else {
            return false;
        };

        let outcome = if reply.operation.code() == pending.operation.code() {
            Ok(FsResponse::Reply(reply.body))
        } else {
            warn!(
                request_id = reply.request_id,
                expected = pending.operation.name(),
                found = reply.operation.name(),
                "reply class does not match request"
            );
            Err(PeerError::UnexpectedReply {
                operation: pending.operation.name(),
                found: format!("{} reply", reply.operation.name()),
            })
        };
        pending.resolve(outcome);
        true
    }

    /// Resolve the read a type-9 data frame answers.
    pub fn complete_data(&self, data: FsData) -> bool {
        let mut table = self.table.lock();
        let Some(pending) = table.slots.remove(&data.request_id) else {
            return false;
        };

        let outcome = match pending.operation {
            FsOperation::Open {
                mode: OpenMode::Read,
                ..
            } => Ok(FsResponse::Data(data)),
            other => Err(PeerError::UnexpectedReply {
                operation: other.name(),
                found: "file data".to_string(),
            }),
        };
        pending.resolve(outcome);
        true
    }

    /// Resolve the request `id` with `err`, for replies that name a live
    /// request but cannot be decoded. Returns `false` if no request is live.
    pub fn fail(&self, id: u8, err: PeerError) -> bool {
        let mut table = self.table.lock();
        let Some(pending) = table.slots.remove(&id) else {
            return false;
        };
        debug!(request_id = id, operation = pending.operation.name(), %err, "request failed");
        pending.resolve(Err(err));
        true
    }

    /// Fail every request whose deadline has passed. Returns how many.
    pub fn expire(&self, now: Instant) -> usize {
        self.table.lock().expire(now, self.timeout)
    }

    /// Fail every pending request with `Disconnected`. Returns how many.
    pub fn fail_all(&self, reason: &str) -> usize {
        let mut table = self.table.lock();
        let count = table.slots.len();
        for (_, pending) in table.slots.drain() {
            pending.resolve(Err(PeerError::Disconnected(reason.to_string())));
        }
        count
    }

    /// Requests currently awaiting a reply.
    pub fn pending(&self) -> usize {
        self.table.lock().slots.len()
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Handle to one in-flight request. Dropping it releases the id.
#[derive(Debug)]
pub struct PendingReply {
    id: u8,
    ticket: u64,
    operation: FsOperation,
    deadline: Instant,
    timeout: Duration,
    rx: Receiver<Result<FsResponse>>,
    table: Arc<Mutex<Table>>,
}

impl PendingReply {
    /// Request id to put on the wire.
    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn operation(&self) -> FsOperation {
        self.operation
    }

    /// Block until the request is answered, fails, or times out.
    pub fn wait(self) -> Result<FsResponse> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        match self.rx.recv_timeout(remaining) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                let removed = self.table.lock().remove_if_ticket(self.id, self.ticket);
                if removed.is_some() {
                    debug!(
                        request_id = self.id,
                        operation = self.operation.name(),
                        "request timed out"
                    );
                    return Err(PeerError::Timeout(self.timeout));
                }
                // Someone else removed the entry, and resolved it under the lock.
                self.rx
                    .try_recv()
                    .unwrap_or(Err(PeerError::Timeout(self.timeout)))
            }
            Err(RecvTimeoutError::Disconnected) => Err(PeerError::Disconnected(
                "request table dropped".to_string(),
            )),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.table.lock().remove_if_ticket(self.id, self.ticket);
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("pending", &self.slots.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}
