//! Per-flow reorder window.
//!
//! Chunks within a flow carry ordinal stream sequences. The window holds
//! out-of-order arrivals in a sorted buffer and releases the longest
//! in-order run whenever the next expected ordinal shows up. Buffering is
//! bounded per flow; on overflow the oldest buffered chunks are evicted
//! and reported so the host can see the loss.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::StreamChunk;

/// Maximum buffered out-of-order chunks per flow.
pub const MAX_PENDING_CHUNKS: usize = 256;

/// Maximum buffered out-of-order bytes per flow.
pub const MAX_PENDING_BYTES: usize = 4 * 1024 * 1024;

/// Reassembly state for one flow.
pub struct FlowWindow {
    /// Next expected stream ordinal.
    next_seq: u64,
    /// Out-of-order chunks keyed by ordinal.
    pending: BTreeMap<u64, StreamChunk>,
    pending_bytes: usize,
    /// A chunk carrying the FIN marker has been delivered.
    finished: bool,
    last_activity: Instant,
}

impl FlowWindow {
    pub fn new() -> Self {
        Self {
            next_seq: 0,
            pending: BTreeMap::new(),
            pending_bytes: 0,
            finished: false,
            last_activity: Instant::now(),
        }
    }

    /// Insert a chunk. Returns the chunks that are now deliverable in
    /// order, plus the number of buffered chunks evicted by window
    /// overflow.
    pub fn insert(&mut self, chunk: StreamChunk) -> (Vec<StreamChunk>, usize) {
        self.last_activity = Instant::now();

        // Duplicate or already-delivered ordinal: drop silently.
        if chunk.stream_seq < self.next_seq || self.pending.contains_key(&chunk.stream_seq) {
            return (Vec::new(), 0);
        }

        if chunk.stream_seq != self.next_seq {
            self.pending_bytes += chunk.payload.len();
            self.pending.insert(chunk.stream_seq, chunk);
            let evicted = self.evict_overflow();
            return (Vec::new(), evicted);
        }

        // In order: release this chunk plus any now-contiguous run.
        let mut ready = Vec::with_capacity(1 + self.pending.len());
        self.finished |= chunk.fin;
        self.next_seq = chunk.stream_seq + 1;
        ready.push(chunk);

        while let Some(entry) = self.pending.first_entry() {
            if *entry.key() != self.next_seq {
                break;
            }
            let chunk = entry.remove();
            self.pending_bytes -= chunk.payload.len();
            self.finished |= chunk.fin;
            self.next_seq += 1;
            ready.push(chunk);
        }

        (ready, 0)
    }

    /// Drop oldest buffered chunks until the window fits its bounds.
    fn evict_overflow(&mut self) -> usize {
        let mut evicted = 0;
        while self.pending.len() > MAX_PENDING_CHUNKS || self.pending_bytes > MAX_PENDING_BYTES {
            let Some(entry) = self.pending.first_entry() else {
                break;
            };
            let chunk = entry.remove();
            self.pending_bytes -= chunk.payload.len();
            evicted += 1;
        }
        evicted
    }

    /// Whether the FIN-marked chunk has been delivered.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether the flow has seen no traffic for `timeout`.
    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() >= timeout
    }

    /// Number of chunks buffered out of order.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Default for FlowWindow {
    fn default() -> Self {
        Self::new()
    }
}
