//! Stream dispatcher: sharded, per-flow-ordered chunk processing.
//!
//! Chunks enter through a cloneable [`StreamDispatcherHandle`] and are
//! routed to one of `threads` shard workers by a stable hash of the flow
//! id, so each worker owns a disjoint flow set and per-flow processing is
//! serialised without locks. Workers feed in-order chunks to the stream
//! dissectors; synthesised virtual packets go back into the packet queue
//! (the loopback edge of the pipeline), and chained chunks re-enter the
//! handle.
//!
//! The dissector-pool → dispatcher → queue → dissector-pool cycle is made
//! of channels, not calls: nothing here holds a reference back into the
//! worker pool.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace};

use crate::bridge::{LogMessage, LogSink};
use crate::error::StreamError;
use crate::packet::Packet;
use crate::queue::PacketQueue;

use super::{FlowWindow, StreamChunk, StreamDissector};

/// Shard tick: bounds both idle-flow sweeping latency and shutdown latency.
const SHARD_TICK: Duration = Duration::from_millis(250);

/// Default idle timeout after which a quiet flow is retired.
pub const DEFAULT_FLOW_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared context for the shard workers.
pub struct StreamDispatcherContext {
    pub dissectors: Vec<Arc<dyn StreamDissector>>,
    /// Loopback edge: virtual packets are pushed here for dissection.
    pub queue: Arc<PacketQueue>,
    pub sink: LogSink,
    pub idle_timeout: Duration,
}

/// Cloneable chunk entry point. Routes each chunk to the shard owning its
/// flow.
#[derive(Clone)]
pub struct StreamDispatcherHandle {
    shards: Arc<Vec<Sender<Vec<StreamChunk>>>>,
}

impl StreamDispatcherHandle {
    /// Entry point for dissector workers: tag chunks with the seq of the
    /// packet they came from, then route.
    pub fn insert(&self, origin_seq: u32, mut chunks: Vec<StreamChunk>) {
        for chunk in &mut chunks {
            chunk.origin_seq = origin_seq;
        }
        self.route(chunks);
    }

    /// Entry point for stream dissectors: chained chunks keep the origin
    /// they already carry.
    pub fn insert_chunks(&self, chunks: Vec<StreamChunk>) {
        self.route(chunks);
    }

    fn route(&self, chunks: Vec<StreamChunk>) {
        if chunks.is_empty() {
            return;
        }
        let n = self.shards.len();
        let mut buckets: HashMap<usize, Vec<StreamChunk>> = HashMap::new();
        for chunk in chunks {
            buckets
                .entry(shard_of(&chunk.flow_id, n))
                .or_default()
                .push(chunk);
        }
        for (shard, batch) in buckets {
            // A closed shard means teardown is underway; drop silently.
            let _ = self.shards[shard].send(batch);
        }
    }

    /// Single-shard handle with an inspectable receiver, for tests.
    #[cfg(test)]
    pub(crate) fn test_pair() -> (Self, Receiver<Vec<StreamChunk>>) {
        let (tx, rx) = unbounded();
        (
            Self {
                shards: Arc::new(vec![tx]),
            },
            rx,
        )
    }
}

/// Stable within-session shard assignment for a flow id.
fn shard_of(flow_id: &Bytes, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    flow_id.hash(&mut hasher);
    (hasher.finish() as usize) % shards
}

/// Owns the shard workers. Shut down explicitly by the session after the
/// dissector pool has drained.
pub struct StreamDispatcher {
    handle: StreamDispatcherHandle,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl StreamDispatcher {
    pub fn new(threads: usize, ctx: StreamDispatcherContext) -> Self {
        let threads = threads.max(1);
        let stop = Arc::new(AtomicBool::new(false));
        let ctx = Arc::new(ctx);

        let mut txs = Vec::with_capacity(threads);
        let mut rxs = Vec::with_capacity(threads);
        for _ in 0..threads {
            let (tx, rx) = unbounded();
            txs.push(tx);
            rxs.push(rx);
        }
        let handle = StreamDispatcherHandle {
            shards: Arc::new(txs),
        };

        let workers = rxs
            .into_iter()
            .map(|rx| {
                let ctx = Arc::clone(&ctx);
                let handle = handle.clone();
                let stop = Arc::clone(&stop);
                thread::Builder::new()
                    .name("netlens-stream".into())
                    .spawn(move || run_shard(rx, handle, ctx, stop))
                    .expect("failed to spawn stream shard worker")
            })
            .collect();

        Self {
            handle,
            stop,
            workers,
        }
    }

    pub fn handle(&self) -> StreamDispatcherHandle {
        self.handle.clone()
    }

    /// Drain in-flight chunks and join the shard workers. Call only after
    /// the producers (dissector pool) have exited.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for StreamDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_shard(
    rx: Receiver<Vec<StreamChunk>>,
    handle: StreamDispatcherHandle,
    ctx: Arc<StreamDispatcherContext>,
    stop: Arc<AtomicBool>,
) {
    let mut flows: HashMap<Bytes, FlowWindow> = HashMap::new();

    loop {
        match rx.recv_timeout(SHARD_TICK) {
            Ok(chunks) => process_batch(&handle, &ctx, &mut flows, chunks),
            Err(RecvTimeoutError::Timeout) => sweep_idle(&ctx, &mut flows),
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if stop.load(Ordering::Acquire) {
            // Drain whatever is already queued, then exit.
            while let Ok(chunks) = rx.try_recv() {
                process_batch(&handle, &ctx, &mut flows, chunks);
            }
            break;
        }
    }

    for flow_id in flows.keys() {
        retire_flow(&ctx, flow_id);
    }
    trace!("stream shard worker exiting");
}

fn process_batch(
    handle: &StreamDispatcherHandle,
    ctx: &StreamDispatcherContext,
    flows: &mut HashMap<Bytes, FlowWindow>,
    chunks: Vec<StreamChunk>,
) {
    for chunk in chunks {
        let flow_id = chunk.flow_id.clone();
        let window = flows.entry(flow_id.clone()).or_default();

        let (ready, evicted) = window.insert(chunk);
        if evicted > 0 {
            ctx.sink.log(
                LogMessage::warn(
                    "stream",
                    StreamError::WindowOverflow { dropped: evicted }.to_string(),
                )
                .with_resource(format_flow(&flow_id)),
            );
        }

        if !ready.is_empty() {
            deliver(handle, ctx, &flow_id, &ready);
        }

        if flows.get(&flow_id).map(|w| w.is_finished()).unwrap_or(false) {
            retire_flow(ctx, &flow_id);
            flows.remove(&flow_id);
        }
    }
}

/// Feed an in-order chunk run to every accepting dissector.
fn deliver(
    handle: &StreamDispatcherHandle,
    ctx: &StreamDispatcherContext,
    flow_id: &Bytes,
    ready: &[StreamChunk],
) {
    for dissector in ctx.dissectors.iter().filter(|d| d.accepts(flow_id)) {
        match dissector.dissect(flow_id, ready) {
            Ok(out) => {
                for log in out.logs {
                    ctx.sink.log(log);
                }
                if !out.chunks.is_empty() {
                    handle.insert_chunks(out.chunks);
                }
                for layer in out.vp_layers {
                    let pkt = Packet::from_layer(now_us(), layer);
                    if ctx.queue.push(pkt).is_err() {
                        debug!("virtual packet dropped: queue closed during teardown");
                    }
                }
            }
            Err(err) => {
                ctx.sink.log(
                    LogMessage::error("stream", err.to_string())
                        .with_resource(dissector.name().to_string()),
                );
            }
        }
    }
}

fn sweep_idle(ctx: &StreamDispatcherContext, flows: &mut HashMap<Bytes, FlowWindow>) {
    let timeout = ctx.idle_timeout;
    let idle: Vec<Bytes> = flows
        .iter()
        .filter(|(_, w)| w.is_idle(timeout))
        .map(|(id, _)| id.clone())
        .collect();

    for flow_id in idle {
        if let Some(window) = flows.remove(&flow_id) {
            if window.pending_len() > 0 {
                ctx.sink.log(
                    LogMessage::warn(
                        "stream",
                        format!(
                            "flow retired idle with {} undelivered chunk(s)",
                            window.pending_len()
                        ),
                    )
                    .with_resource(format_flow(&flow_id)),
                );
            }
            retire_flow(ctx, &flow_id);
        }
    }
}

fn retire_flow(ctx: &StreamDispatcherContext, flow_id: &Bytes) {
    for dissector in ctx.dissectors.iter().filter(|d| d.accepts(flow_id)) {
        dissector.retire(flow_id);
    }
}

fn format_flow(flow_id: &Bytes) -> String {
    match std::str::from_utf8(flow_id) {
        Ok(s) => s.to_string(),
        Err(_) => format!("{:02x?}", flow_id.as_ref()),
    }
}

fn now_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::HostBridge;
    use crate::stream::StreamOutput;
    use std::sync::Mutex;

    /// Records delivery order and concatenates payloads per flow.
    struct Recorder {
        seen: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl StreamDissector for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        fn accepts(&self, _: &[u8]) -> bool {
            true
        }
        fn dissect(&self, flow_id: &[u8], chunks: &[StreamChunk]) -> Result<StreamOutput, StreamError> {
            let mut seen = self.seen.lock().unwrap();
            for chunk in chunks {
                seen.push((flow_id.to_vec(), chunk.payload.to_vec()));
            }
            Ok(StreamOutput::new())
        }
    }

    fn dispatcher_with(
        dissector: Arc<dyn StreamDissector>,
        threads: usize,
    ) -> (StreamDispatcher, Arc<PacketQueue>, Arc<HostBridge>) {
        let queue = Arc::new(PacketQueue::new(64));
        let bridge = HostBridge::new();
        let dispatcher = StreamDispatcher::new(
            threads,
            StreamDispatcherContext {
                dissectors: vec![dissector],
                queue: Arc::clone(&queue),
                sink: LogSink::new(Arc::clone(&bridge)),
                idle_timeout: DEFAULT_FLOW_IDLE_TIMEOUT,
            },
        );
        (dispatcher, queue, bridge)
    }

    fn chunk(flow: &'static [u8], seq: u64, payload: &'static [u8]) -> StreamChunk {
        StreamChunk::new(Bytes::from_static(flow), seq, Bytes::from_static(payload))
    }

    #[test]
    fn test_out_of_order_chunks_delivered_in_order() {
        let recorder = Recorder::new();
        let (mut dispatcher, _queue, _bridge) =
            dispatcher_with(Arc::clone(&recorder) as Arc<dyn StreamDissector>, 2);

        let handle = dispatcher.handle();
        handle.insert(0, vec![chunk(b"flow", 0, b"AB")]);
        handle.insert(1, vec![chunk(b"flow", 2, b"EF")]);
        handle.insert(2, vec![chunk(b"flow", 1, b"CD")]);

        // Allow shard workers to drain
        std::thread::sleep(Duration::from_millis(100));
        dispatcher.shutdown();

        let seen = recorder.seen.lock().unwrap();
        let payloads: Vec<&[u8]> = seen.iter().map(|(_, p)| p.as_slice()).collect();
        assert_eq!(payloads, vec![&b"AB"[..], &b"CD"[..], &b"EF"[..]]);
    }

    #[test]
    fn test_flows_are_independent() {
        let recorder = Recorder::new();
        let (mut dispatcher, _queue, _bridge) =
            dispatcher_with(Arc::clone(&recorder) as Arc<dyn StreamDissector>, 4);

        let handle = dispatcher.handle();
        handle.insert(0, vec![chunk(b"a", 0, b"1"), chunk(b"b", 0, b"2")]);

        std::thread::sleep(Duration::from_millis(100));
        dispatcher.shutdown();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_vp_layers_loop_back_into_queue() {
        struct Synthesiser;
        impl StreamDissector for Synthesiser {
            fn name(&self) -> &str {
                "synth"
            }
            fn accepts(&self, _: &[u8]) -> bool {
                true
            }
            fn dissect(&self, _: &[u8], chunks: &[StreamChunk]) -> Result<StreamOutput, StreamError> {
                let mut out = StreamOutput::new();
                for chunk in chunks {
                    out.vp_layers.push(
                        crate::packet::Layer::new("test", "Synth")
                            .with_payload(chunk.payload.clone()),
                    );
                }
                Ok(out)
            }
        }

        let (mut dispatcher, queue, _bridge) = dispatcher_with(Arc::new(Synthesiser), 1);
        dispatcher.handle().insert(0, vec![chunk(b"f", 0, b"PDU")]);

        let pkt = queue.pop().expect("virtual packet expected");
        assert_eq!(pkt.payload().as_ref(), b"PDU");
        assert_eq!(pkt.layers()[0].name(), "Synth");
        dispatcher.shutdown();
    }

    #[test]
    fn test_shutdown_drains_queued_chunks() {
        let recorder = Recorder::new();
        let (mut dispatcher, _queue, _bridge) =
            dispatcher_with(Arc::clone(&recorder) as Arc<dyn StreamDissector>, 1);

        let handle = dispatcher.handle();
        for seq in 0..50 {
            handle.insert(0, vec![chunk(b"flow", seq, b"x")]);
        }
        dispatcher.shutdown();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 50);
    }
}
