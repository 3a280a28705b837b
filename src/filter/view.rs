//! Ordered filter view.
//!
//! Filter workers evaluate claimed seqs out of order, but the view must
//! stay an ascending list of matching seqs. Decisions land in a pending
//! map first and are emitted into the sorted list only when every smaller
//! seq has been decided — the same emit-on-contiguous discipline the store
//! uses for its watermark.

use std::collections::BTreeMap;
use std::sync::Mutex;

/// Handler invoked with the new view length after each growth.
pub type ViewHandler = Box<dyn Fn(u32) + Send + Sync>;

#[derive(Default)]
struct ViewInner {
    /// Next seq whose decision can be emitted.
    next_emit: u32,
    /// Out-of-order decisions: seq -> matched.
    pending: BTreeMap<u32, bool>,
    /// Ascending seqs of matching packets.
    seqs: Vec<u32>,
}

/// Ordered sequence-index view maintained by one filter pool.
pub struct FilterView {
    inner: Mutex<ViewInner>,
    handlers: Mutex<Vec<ViewHandler>>,
}

impl FilterView {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ViewInner::default()),
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Record the predicate decision for one seq. Safe to call out of
    /// order; matching seqs become visible once contiguous.
    pub fn record(&self, seq: u32, matched: bool) {
        let mut grew = None;
        {
            let mut guard = self.inner.lock().expect("view lock poisoned");
            let inner = &mut *guard;
            if seq < inner.next_emit || inner.pending.contains_key(&seq) {
                return; // duplicate decision
            }
            inner.pending.insert(seq, matched);

            while let Some(entry) = inner.pending.first_entry() {
                if *entry.key() != inner.next_emit {
                    break;
                }
                let matched = entry.remove();
                let seq = inner.next_emit;
                inner.next_emit += 1;
                if matched {
                    inner.seqs.push(seq);
                    grew = Some(inner.seqs.len() as u32);
                }
            }
        }

        if let Some(len) = grew {
            for handler in self.handlers.lock().expect("view lock poisoned").iter() {
                handler(len);
            }
        }
    }

    /// Register a growth notifier, called with the new length.
    pub fn add_handler(&self, handler: ViewHandler) {
        self.handlers
            .lock()
            .expect("view lock poisoned")
            .push(handler);
    }

    /// Matching seqs with values in `[start, end)`, ascending.
    pub fn get(&self, start: u32, end: u32) -> Vec<u32> {
        let inner = self.inner.lock().expect("view lock poisoned");
        let lo = inner.seqs.partition_point(|&s| s < start);
        let hi = inner.seqs.partition_point(|&s| s < end);
        inner.seqs[lo..hi].to_vec()
    }

    /// Number of matching seqs emitted so far.
    pub fn len(&self) -> u32 {
        self.inner.lock().expect("view lock poisoned").seqs.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest seq (exclusive) whose decision has been emitted.
    pub fn decided_up_to(&self) -> u32 {
        self.inner.lock().expect("view lock poisoned").next_emit
    }
}

impl Default for FilterView {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_in_order_emission() {
        let view = FilterView::new();
        view.record(0, true);
        view.record(1, false);
        view.record(2, true);

        assert_eq!(view.get(0, 10), vec![0, 2]);
        assert_eq!(view.decided_up_to(), 3);
    }

    #[test]
    fn test_out_of_order_decisions_emit_sorted() {
        let view = FilterView::new();
        view.record(2, true);
        view.record(0, true);
        assert_eq!(view.get(0, 10), vec![0]); // 2 held back behind 1

        view.record(1, true);
        assert_eq!(view.get(0, 10), vec![0, 1, 2]);
    }

    #[test]
    fn test_range_query_bounds() {
        let view = FilterView::new();
        for seq in 0..10 {
            view.record(seq, seq % 2 == 0);
        }
        assert_eq!(view.get(0, 10), vec![0, 2, 4, 6, 8]);
        assert_eq!(view.get(2, 7), vec![2, 4, 6]);
        assert_eq!(view.get(3, 4), Vec::<u32>::new());
        assert_eq!(view.get(8, 8), Vec::<u32>::new());
    }

    #[test]
    fn test_duplicate_decisions_ignored() {
        let view = FilterView::new();
        view.record(0, true);
        view.record(0, false);
        assert_eq!(view.get(0, 10), vec![0]);
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn test_handler_fires_on_growth_only() {
        let view = FilterView::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        view.add_handler(Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        view.record(0, false); // no growth
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        view.record(1, true); // grows
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
