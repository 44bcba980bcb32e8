//! Stream-id bookkeeping for one connection.
//!
//! A connection multiplexes up to 127 in-flight requests over stream
//! ids 1..=127. Id 0 belongs to unsolicited server messages and -1 to
//! server events, so neither is ever handed to a request. When every id
//! is taken, new requests wait in a FIFO queue and are transmitted one
//! at a time as responses free their slots.
//!
//! This table is plain owned state with no I/O; the connection mutates
//! it under its lock.

use crate::error::ClientError;
use bytes::Bytes;
use cqlio_protocol::{Frame, Opcode, MAX_STREAMS};
use std::collections::VecDeque;
use tokio::sync::oneshot;

/// Completion handle for one request: resolves with the response frame
/// or the error that ended it.
pub(crate) type ResponseSender = oneshot::Sender<Result<Frame, ClientError>>;

/// A request parked until a stream id frees up.
struct QueuedRequest {
    opcode: Opcode,
    body: Bytes,
    tx: ResponseSender,
}

/// Outcome of submitting a request to the table.
pub(crate) enum Submission {
    /// A slot was free; the caller must transmit this frame.
    Write(Frame),
    /// All ids are busy; the request is queued and will be transmitted
    /// when a response frees a slot.
    Queued,
    /// The connection is closed; the error was already delivered on the
    /// handle.
    Rejected,
}

pub(crate) struct StreamTable {
    /// Slot `i` holds the pending handle for stream id `i + 1`.
    slots: Vec<Option<ResponseSender>>,
    queue: VecDeque<QueuedRequest>,
    closed: Option<String>,
}

impl StreamTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: (0..MAX_STREAMS).map(|_| None).collect(),
            queue: VecDeque::new(),
            closed: None,
        }
    }

    pub(crate) fn closed_reason(&self) -> Option<&str> {
        self.closed.as_deref()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Installs a request: grants the lowest free stream id, or parks
    /// the request when all 127 are busy.
    pub(crate) fn submit(&mut self, opcode: Opcode, body: Bytes, tx: ResponseSender) -> Submission {
        if let Some(reason) = &self.closed {
            let _ = tx.send(Err(ClientError::closed(reason)));
            return Submission::Rejected;
        }
        match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(tx);
                Submission::Write(Frame::request(index as i8 + 1, opcode, body))
            }
            None => {
                self.queue.push_back(QueuedRequest { opcode, body, tx });
                Submission::Queued
            }
        }
    }

    /// Takes the pending handle for a stream id, freeing the slot.
    ///
    /// Returns `None` for ids outside 1..=127 and for slots with no
    /// pending request.
    pub(crate) fn complete(&mut self, stream: i8) -> Option<ResponseSender> {
        if stream < 1 {
            return None;
        }
        self.slots.get_mut(stream as usize - 1)?.take()
    }

    /// Moves the oldest live queued request onto the freed stream id.
    ///
    /// Returns the frame to transmit, or `None` when the queue is
    /// empty. Queued requests whose handle was dropped are discarded
    /// here without ever touching the wire.
    pub(crate) fn pop_queued(&mut self, stream: i8) -> Option<Frame> {
        debug_assert!((1..=MAX_STREAMS as i8).contains(&stream));
        while let Some(request) = self.queue.pop_front() {
            if request.tx.is_closed() {
                tracing::trace!(queued = self.queue.len(), "dropping cancelled queued request");
                continue;
            }
            self.slots[stream as usize - 1] = Some(request.tx);
            return Some(Frame::request(stream, request.opcode, request.body));
        }
        None
    }

    /// Fails every in-flight and queued request with the same error and
    /// marks the table closed. Later submissions are rejected with the
    /// recorded reason.
    pub(crate) fn fail_all(&mut self, reason: &str) {
        self.closed = Some(reason.to_string());
        for slot in &mut self.slots {
            if let Some(tx) = slot.take() {
                let _ = tx.send(Err(ClientError::closed(reason)));
            }
        }
        for request in self.queue.drain(..) {
            let _ = request.tx.send(Err(ClientError::closed(reason)));
        }
    }
}
