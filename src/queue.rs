//! Bounded MPMC packet queue.
//!
//! Feeds the dissector worker pool. Producers are the capture thread (via
//! the session's analyze step) and the stream dispatcher (virtual packets).
//! Consumers are the dissector workers.
//!
//! Close semantics: `close()` drops the producer side held by the queue.
//! Consumers drain whatever is in flight and then see `Closed`; producers
//! see `Closed` immediately. FIFO order holds per producer; no total order
//! across producers is promised — sequence numbers are assigned downstream
//! by the store.

use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};

use crate::error::Closed;
use crate::packet::Packet;

/// Outcome of a timed push. `Full` hands the packet back so the caller
/// can decide whether to drop or retry.
#[derive(Debug)]
pub enum PushTimeoutError {
    Full(Packet),
    Closed,
}

/// Default queue bound. Deep enough to ride out dissection hiccups,
/// shallow enough to bound memory under sustained overload.
pub const DEFAULT_CAPACITY: usize = 2048;

/// Bounded multi-producer/multi-consumer FIFO of owned packets.
pub struct PacketQueue {
    tx: Mutex<Option<Sender<Packet>>>,
    rx: Receiver<Packet>,
}

impl PacketQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    /// Enqueue a packet, blocking while the queue is full.
    pub fn push(&self, pkt: Packet) -> Result<(), Closed> {
        // Clone the sender out so a full-queue block doesn't hold the lock.
        let tx = match self.tx.lock().expect("queue lock poisoned").as_ref() {
            Some(tx) => tx.clone(),
            None => return Err(Closed),
        };
        tx.send(pkt).map_err(|_| Closed)
    }

    /// Enqueue with a deadline. Used by the capture thread so overload
    /// drops frames instead of stalling the device read loop.
    pub fn push_timeout(&self, pkt: Packet, timeout: Duration) -> Result<(), PushTimeoutError> {
        let tx = match self.tx.lock().expect("queue lock poisoned").as_ref() {
            Some(tx) => tx.clone(),
            None => return Err(PushTimeoutError::Closed),
        };
        match tx.send_timeout(pkt, timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(pkt)) => Err(PushTimeoutError::Full(pkt)),
            Err(SendTimeoutError::Disconnected(_)) => Err(PushTimeoutError::Closed),
        }
    }

    /// Dequeue a packet, blocking until one is available. Returns
    /// `Err(Closed)` once the queue is closed and drained.
    pub fn pop(&self) -> Result<Packet, Closed> {
        self.rx.recv().map_err(|_| Closed)
    }

    /// Close the queue. Idempotent. Consumers drain in-flight packets and
    /// then observe `Closed`; new pushes fail immediately.
    pub fn close(&self) {
        self.tx.lock().expect("queue lock poisoned").take();
    }

    /// Whether `close` has been called. In-flight packets may still drain.
    pub fn is_closed(&self) -> bool {
        self.tx.lock().expect("queue lock poisoned").is_none()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
