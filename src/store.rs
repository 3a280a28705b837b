//! Sequence-keyed packet store.
//!
//! Insertion assigns a monotonically increasing `seq` and freezes the
//! packet behind an `Arc`. Workers may finish out of order, so the store
//! distinguishes the raw insertion counter from the *watermark*: the
//! highest seq such that every slot below it is present. Downstream
//! consumers (filter workers, the status snapshot) only ever look at the
//! watermark, which gives them a stable "everything up to here is final"
//! point without chasing a sparse set.
//!
//! Change handlers run on the inserting thread on every watermark advance
//! and must not block.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::Duration;

use crate::packet::Packet;

/// Handler invoked with the new watermark after each contiguous advance.
pub type StoreHandler = Box<dyn Fn(u32) + Send + Sync>;

/// Append-mostly store keyed by monotonic sequence number.
pub struct PacketStore {
    slots: RwLock<Vec<Option<Arc<Packet>>>>,
    next_seq: AtomicU32,
    /// Mirror of the watermark for cheap lock-free reads.
    watermark: AtomicU32,
    /// Watermark recomputation and condvar waiting are serialised here.
    sync: Mutex<u32>,
    cond: Condvar,
    handlers: Mutex<Vec<StoreHandler>>,
}

impl PacketStore {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            next_seq: AtomicU32::new(0),
            watermark: AtomicU32::new(0),
            sync: Mutex::new(0),
            cond: Condvar::new(),
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Insert a packet, assigning the next sequence number. Notifies
    /// registered handlers if the contiguous watermark advanced.
    pub fn insert(&self, pkt: Packet) -> u32 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let idx = seq as usize;

        {
            let mut slots = self.slots.write().expect("store lock poisoned");
            if slots.len() <= idx {
                slots.resize(idx + 1, None);
            }
            slots[idx] = Some(Arc::new(pkt));
        }

        self.advance_watermark();
        seq
    }

    /// Recompute the contiguous watermark and wake/notify on advance.
    fn advance_watermark(&self) {
        let mut advanced_to = None;
        {
            let mut wm = self.sync.lock().expect("store lock poisoned");
            let slots = self.slots.read().expect("store lock poisoned");
            let mut w = *wm;
            while (w as usize) < slots.len() && slots[w as usize].is_some() {
                w += 1;
            }
            if w != *wm {
                *wm = w;
                self.watermark.store(w, Ordering::Release);
                advanced_to = Some(w);
            }
        }

        if let Some(w) = advanced_to {
            self.cond.notify_all();
            for handler in self.handlers.lock().expect("store lock poisoned").iter() {
                handler(w);
            }
        }
    }

    /// Read a packet by sequence number.
    pub fn get(&self, seq: u32) -> Option<Arc<Packet>> {
        self.slots
            .read()
            .expect("store lock poisoned")
            .get(seq as usize)
            .and_then(|slot| slot.clone())
    }

    /// Contiguous high-water mark: every seq below this is present.
    /// Monotone non-decreasing for the lifetime of the store.
    pub fn max_seq(&self) -> u32 {
        self.watermark.load(Ordering::Acquire)
    }

    /// Register a change notifier. Called with the new watermark on each
    /// advance, on the inserting thread.
    pub fn add_handler(&self, handler: StoreHandler) {
        self.handlers.lock().expect("store lock poisoned").push(handler);
    }

    /// Block until the watermark exceeds `seq` or the timeout elapses.
    /// Returns the watermark observed on wakeup. Filter workers loop on
    /// this instead of spinning, re-checking their cancellation flag
    /// between waits.
    pub fn wait_watermark(&self, seq: u32, timeout: Duration) -> u32 {
        let wm = self.sync.lock().expect("store lock poisoned");
        if *wm > seq {
            return *wm;
        }
        let (wm, _) = self
            .cond
            .wait_timeout_while(wm, timeout, |w| *w <= seq)
            .expect("store lock poisoned");
        *wm
    }
}

impl Default for PacketStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn pkt(byte: u8) -> Packet {
        Packet::new(0, 1, 1, Bytes::copy_from_slice(&[byte]))
    }

    #[test]
    fn test_insert_assigns_monotonic_seqs() {
        let store = PacketStore::new();
        assert_eq!(store.insert(pkt(0)), 0);
        assert_eq!(store.insert(pkt(1)), 1);
        assert_eq!(store.insert(pkt(2)), 2);
        assert_eq!(store.max_seq(), 3);
    }

    #[test]
    fn test_get_returns_inserted_packet() {
        let store = PacketStore::new();
        let seq = store.insert(pkt(7));
        let got = store.get(seq).unwrap();
        assert_eq!(got.payload()[0], 7);
        assert!(store.get(seq + 1).is_none());
    }

    #[test]
    fn test_durability_below_watermark() {
        let store = PacketStore::new();
        for i in 0..100u8 {
            store.insert(pkt(i));
        }
        for seq in 0..store.max_seq() {
            assert!(store.get(seq).is_some());
        }
    }

    #[test]
    fn test_handler_sees_watermark_advance() {
        let store = PacketStore::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        store.add_handler(Box::new(move |wm| {
            s.store(wm as usize, Ordering::SeqCst);
        }));

        store.insert(pkt(0));
        store.insert(pkt(1));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_inserts_keep_watermark_contiguous() {
        let store = Arc::new(PacketStore::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let s = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for i in 0..250u8 {
                    s.insert(pkt(i));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.max_seq(), 1000);
        for seq in 0..1000 {
            assert!(store.get(seq).is_some());
        }
    }

    #[test]
    fn test_wait_watermark_wakes_on_insert() {
        let store = Arc::new(PacketStore::new());
        let s = Arc::clone(&store);
        let waiter = thread::spawn(move || s.wait_watermark(0, Duration::from_secs(5)));

        thread::sleep(Duration::from_millis(30));
        store.insert(pkt(0));
        assert!(waiter.join().unwrap() >= 1);
    }

    #[test]
    fn test_wait_watermark_times_out() {
        let store = PacketStore::new();
        let wm = store.wait_watermark(5, Duration::from_millis(20));
        assert_eq!(wm, 0);
    }
}
