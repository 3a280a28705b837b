//! Filter worker pool.
//!
//! One pool per named filter. Workers share an atomic claim cursor over
//! the seq space: a worker claims the next seq, waits until the store
//! watermark covers it, evaluates the predicate and records the decision
//! in the view. Replacing or removing the filter flips the cancellation
//! flag; workers observe it at their next claim boundary or wait wakeup.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::trace;

use crate::bridge::{LogMessage, LogSink};
use crate::store::PacketStore;

use super::{FilterPredicate, FilterView};

/// How long a worker sleeps on the watermark before re-checking its
/// cancellation flag.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// State shared by the workers of one filter pool.
pub struct FilterContext {
    pub name: String,
    pub store: Arc<PacketStore>,
    pub predicate: Arc<dyn FilterPredicate>,
    pub view: Arc<FilterView>,
    pub cursor: AtomicU32,
    pub cancel: AtomicBool,
    pub sink: LogSink,
}

impl FilterContext {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// One worker thread of a filter pool. Joined on drop.
pub struct FilterWorker {
    handle: Option<JoinHandle<()>>,
}

impl FilterWorker {
    pub fn spawn(ctx: Arc<FilterContext>) -> Self {
        let handle = thread::Builder::new()
            .name("netlens-filter".into())
            .spawn(move || run(ctx))
            .expect("failed to spawn filter worker");
        Self {
            handle: Some(handle),
        }
    }
}

impl Drop for FilterWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(ctx: Arc<FilterContext>) {
    'claims: while !ctx.cancelled() {
        let seq = ctx.cursor.fetch_add(1, Ordering::Relaxed);

        // Cooperative wait until the store has finalised this seq.
        while ctx.store.max_seq() <= seq {
            if ctx.cancelled() {
                break 'claims;
            }
            ctx.store.wait_watermark(seq, WAIT_SLICE);
        }

        let Some(pkt) = ctx.store.get(seq) else {
            // Below the watermark every slot is present; this is a bug
            // and takes the whole session down.
            ctx.sink.fatal(
                LogMessage::error("filter", format!("missing packet below watermark: {seq}"))
                    .with_resource(ctx.name.clone()),
            );
            ctx.view.record(seq, false);
            continue;
        };

        let matched = match ctx.predicate.eval(&pkt) {
            Ok(matched) => matched,
            Err(err) => {
                ctx.sink.log(
                    LogMessage::error("filter", err.to_string()).with_resource(ctx.name.clone()),
                );
                false
            }
        };
        ctx.view.record(seq, matched);
    }
    trace!(filter = %ctx.name, "filter worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::HostBridge;
    use crate::error::FilterEvalError;
    use crate::filter::ExprCompiler;
    use crate::filter::FilterCompiler;
    use crate::packet::{Layer, Packet};
    use bytes::Bytes;

    fn pkt_with_layer(name: &str) -> Packet {
        let mut pkt = Packet::new(0, 1, 1, Bytes::from_static(b"x"));
        pkt.push_layer(Layer::new("test", "raw"));
        if !name.is_empty() {
            pkt.push_layer(Layer::new("test", name));
        }
        pkt
    }

    fn pool(store: Arc<PacketStore>, expr: &str, workers: usize) -> (Arc<FilterContext>, Vec<FilterWorker>) {
        let predicate = ExprCompiler::new().compile("", expr).unwrap();
        let ctx = Arc::new(FilterContext {
            name: "test".into(),
            store,
            predicate,
            view: Arc::new(FilterView::new()),
            cursor: AtomicU32::new(0),
            cancel: AtomicBool::new(false),
            sink: LogSink::new(HostBridge::new()),
        });
        let handles = (0..workers)
            .map(|_| FilterWorker::spawn(Arc::clone(&ctx)))
            .collect();
        (ctx, handles)
    }

    fn wait_decided(ctx: &FilterContext, up_to: u32) {
        for _ in 0..200 {
            if ctx.view.decided_up_to() >= up_to {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("filter pool did not converge");
    }

    #[test]
    fn test_pool_scans_existing_store() {
        let store = Arc::new(PacketStore::new());
        for i in 0..20 {
            store.insert(pkt_with_layer(if i % 2 == 0 { "Eth" } else { "" }));
        }

        let (ctx, workers) = pool(Arc::clone(&store), "layer('Eth') != nil", 3);
        wait_decided(&ctx, 20);

        let view = ctx.view.get(0, 20);
        assert_eq!(view, (0..20).filter(|s| s % 2 == 0).collect::<Vec<_>>());

        ctx.cancel();
        drop(workers);
    }

    #[test]
    fn test_pool_follows_new_inserts() {
        let store = Arc::new(PacketStore::new());
        let (ctx, workers) = pool(Arc::clone(&store), "layer('Eth') != nil", 2);

        store.insert(pkt_with_layer("Eth"));
        wait_decided(&ctx, 1);
        assert_eq!(ctx.view.get(0, 10), vec![0]);

        store.insert(pkt_with_layer(""));
        store.insert(pkt_with_layer("Eth"));
        wait_decided(&ctx, 3);
        assert_eq!(ctx.view.get(0, 10), vec![0, 2]);

        ctx.cancel();
        drop(workers);
    }

    #[test]
    fn test_cancel_unblocks_waiting_workers() {
        let store = Arc::new(PacketStore::new());
        let (ctx, workers) = pool(store, "true", 2);

        // Workers are parked waiting for seq 0; cancel must free them.
        thread::sleep(Duration::from_millis(50));
        ctx.cancel();
        drop(workers); // joins; hangs the test if cancellation is broken
    }

    #[test]
    fn test_eval_error_counts_as_non_match() {
        struct Exploding;
        impl FilterPredicate for Exploding {
            fn eval(&self, _: &Packet) -> Result<bool, FilterEvalError> {
                Err(FilterEvalError::Type {
                    reason: "boom".into(),
                })
            }
        }

        let store = Arc::new(PacketStore::new());
        store.insert(pkt_with_layer("Eth"));

        let bridge = HostBridge::new();
        let ctx = Arc::new(FilterContext {
            name: "exploding".into(),
            store,
            predicate: Arc::new(Exploding),
            view: Arc::new(FilterView::new()),
            cursor: AtomicU32::new(0),
            cancel: AtomicBool::new(false),
            sink: LogSink::new(Arc::clone(&bridge)),
        });
        let worker = FilterWorker::spawn(Arc::clone(&ctx));

        wait_decided(&ctx, 1);
        assert!(ctx.view.is_empty());
        assert!(bridge
            .drain_logs()
            .iter()
            .any(|l| l.message.contains("boom")));

        ctx.cancel();
        drop(worker);
    }
}
