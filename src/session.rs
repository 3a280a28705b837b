//! Session facade.
//!
//! A [`Session`] owns the whole pipeline: packet queue, store, dissector
//! pool, stream dispatcher, filter pools, capture source and host bridge.
//! Construction wires the components together and leaves them idle
//! (`Configured`); `start`/`stop` drive the capture source; dropping the
//! session tears the pipeline down in dependency order — capture, queue,
//! dissector pool, dispatcher, filter pools, bridge.
//!
//! The embedding host is single-threaded: callbacks registered with
//! [`set_status_callback`](Session::set_status_callback) and
//! [`set_log_callback`](Session::set_log_callback) are only invoked from
//! [`poll`](Session::poll), which the host calls from its own loop.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32};
use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::bridge::{HostBridge, LogMessage, LogSink, StatusUpdate};
use crate::capture::{
    devices as capture_devices, permission as capture_permission, CaptureSource, DeviceInfo,
    FrameHandler, LiveSource, RawFrame,
};
use crate::dissect::{DissectorContext, DissectorRegistry, DissectorWorker};
use crate::error::{BpfError, CaptureError, Error, Result};
use crate::filter::{ExprCompiler, FilterCompiler, FilterContext, FilterView, FilterWorker};
use crate::packet::{Layer, Packet};
use crate::queue::{PacketQueue, PushTimeoutError, DEFAULT_CAPACITY};
use crate::store::PacketStore;
use crate::stream::{
    StreamDispatcher, StreamDispatcherContext, StreamDissector, DEFAULT_FLOW_IDLE_TIMEOUT,
};

/// How long the capture thread will wait on a full queue before dropping
/// a frame. Overload sheds load at the capture edge, never mid-pipeline.
const CAPTURE_PUSH_TIMEOUT: Duration = Duration::from_millis(100);

/// Lifecycle state of a session. `Destroyed` is the drop itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Pools instantiated and idle; capture source quiescent.
    Configured,
    /// Capture source producing.
    Running,
    /// Capture stopped; in-flight packets drain through the pipeline.
    Stopped,
}

/// Construction-time configuration.
pub struct SessionConfig {
    /// Namespace stamped on every layer the session creates.
    pub namespace: String,
    /// Script prelude compiled into every filter.
    pub filter_script: String,
    /// Worker count per pool. 0 means hardware parallelism minus one,
    /// floor 1.
    pub threads: usize,
    pub dissectors: Vec<Arc<dyn crate::dissect::Dissector>>,
    pub stream_dissectors: Vec<Arc<dyn StreamDissector>>,
    /// Capture driver; defaults to the libpcap source.
    pub capture: Option<Box<dyn CaptureSource>>,
    /// Filter script environment; defaults to the built-in expression
    /// engine.
    pub compiler: Option<Arc<dyn FilterCompiler>>,
    pub queue_capacity: usize,
    pub flow_idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            filter_script: String::new(),
            threads: 0,
            dissectors: Vec::new(),
            stream_dissectors: Vec::new(),
            capture: None,
            compiler: None,
            queue_capacity: DEFAULT_CAPACITY,
            flow_idle_timeout: DEFAULT_FLOW_IDLE_TIMEOUT,
        }
    }
}

type StatusCallback = Box<dyn FnMut(&StatusUpdate)>;
type LogCallback = Box<dyn FnMut(&LogMessage)>;

/// One named filter: its pool plus the expression that built it.
struct FilterPool {
    expr: String,
    ctx: Arc<FilterContext>,
    workers: Vec<FilterWorker>,
}

impl FilterPool {
    fn cancel_and_join(self) {
        self.ctx.cancel();
        drop(self.workers); // joins
    }
}

/// Owning facade over the capture/analysis pipeline.
pub struct Session {
    namespace: Arc<str>,
    filter_script: String,
    threads: usize,
    queue: Arc<PacketQueue>,
    store: Arc<PacketStore>,
    bridge: Arc<HostBridge>,
    sink: LogSink,
    compiler: Arc<dyn FilterCompiler>,
    dissector_workers: Vec<DissectorWorker>,
    dispatcher: Option<StreamDispatcher>,
    filters: HashMap<String, FilterPool>,
    capture: Box<dyn CaptureSource>,
    capturing: bool,
    state: SessionState,
    status_cb: Option<StatusCallback>,
    log_cb: Option<LogCallback>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let threads = resolve_threads(config.threads);
        let namespace: Arc<str> = Arc::from(config.namespace.as_str());

        let bridge = HostBridge::new();
        let sink = LogSink::new(Arc::clone(&bridge));

        let queue = Arc::new(PacketQueue::new(config.queue_capacity));
        let store = Arc::new(PacketStore::new());
        {
            let bridge = Arc::clone(&bridge);
            store.add_handler(Box::new(move |_| bridge.signal_status()));
        }

        let dispatcher = StreamDispatcher::new(
            threads,
            StreamDispatcherContext {
                dissectors: config.stream_dissectors,
                queue: Arc::clone(&queue),
                sink: sink.clone(),
                idle_timeout: config.flow_idle_timeout,
            },
        );

        let registry = Arc::new(DissectorRegistry::from_dissectors(config.dissectors));
        let dissector_ctx = Arc::new(DissectorContext {
            queue: Arc::clone(&queue),
            store: Arc::clone(&store),
            registry,
            namespace: Arc::clone(&namespace),
            streams: dispatcher.handle(),
            sink: sink.clone(),
        });
        let dissector_workers = (0..threads)
            .map(|_| DissectorWorker::spawn(Arc::clone(&dissector_ctx)))
            .collect();

        let mut capture = config
            .capture
            .unwrap_or_else(|| Box::new(LiveSource::new()));
        capture.connect(
            frame_handler(Arc::clone(&queue), Arc::clone(&namespace), sink.clone()),
            sink.clone(),
        );

        let compiler = config
            .compiler
            .unwrap_or_else(|| Arc::new(ExprCompiler::new()));

        Self {
            namespace,
            filter_script: config.filter_script,
            threads,
            queue,
            store,
            bridge,
            sink,
            compiler,
            dissector_workers,
            dispatcher: Some(dispatcher),
            filters: HashMap::new(),
            capture,
            capturing: false,
            state: SessionState::Configured,
            status_cb: None,
            log_cb: None,
        }
    }

    // ------------------------------------------------------------------
    // Control surface
    // ------------------------------------------------------------------

    pub fn start(&mut self) -> Result<()> {
        if self.state == SessionState::Running {
            return Ok(());
        }
        self.capture.start().map_err(Error::Capture)?;
        self.capturing = true;
        self.state = SessionState::Running;
        self.bridge.signal_status();
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.state != SessionState::Running {
            return;
        }
        self.capture.stop();
        self.capturing = false;
        self.state = SessionState::Stopped;
        self.bridge.signal_status();
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Inject one raw frame into the pipeline, as the capture source
    /// would. Blocks while the queue is full.
    pub fn analyze(&self, frame: RawFrame) -> Result<()> {
        let pkt = wrap_frame(frame, &self.namespace);
        self.queue.push(pkt).map_err(Error::from)
    }

    // ------------------------------------------------------------------
    // Capture configuration (delegated)
    // ------------------------------------------------------------------

    pub fn set_interface(&mut self, name: &str) {
        self.capture.set_interface(name);
    }

    pub fn interface(&self) -> &str {
        self.capture.interface()
    }

    pub fn set_promiscuous(&mut self, on: bool) {
        self.capture.set_promiscuous(on);
    }

    pub fn promiscuous(&self) -> bool {
        self.capture.promiscuous()
    }

    pub fn set_snaplen(&mut self, len: u32) {
        self.capture.set_snaplen(len);
    }

    pub fn snaplen(&self) -> u32 {
        self.capture.snaplen()
    }

    /// Validate and install a capture filter. Errors come back
    /// synchronously so the caller can reject the input.
    pub fn set_bpf(&mut self, expr: &str) -> std::result::Result<(), BpfError> {
        self.capture.set_bpf(expr)
    }

    /// Enumerate capture devices.
    pub fn devices() -> std::result::Result<Vec<DeviceInfo>, CaptureError> {
        capture_devices()
    }

    /// Whether this process can open a capture device.
    pub fn permission() -> bool {
        capture_permission()
    }

    // ------------------------------------------------------------------
    // Filters
    // ------------------------------------------------------------------

    /// Create, replace or remove the named filter. An unchanged
    /// expression is a no-op; an empty expression tears the pool down;
    /// a compile error leaves any existing pool untouched.
    pub fn filter(&mut self, name: &str, expr: &str) -> Result<()> {
        if let Some(pool) = self.filters.get(name) {
            if pool.expr == expr {
                return Ok(());
            }
        }

        if expr.is_empty() {
            if let Some(pool) = self.filters.remove(name) {
                pool.cancel_and_join();
            }
            self.bridge.signal_status();
            return Ok(());
        }

        let predicate = self
            .compiler
            .compile(&self.filter_script, expr)
            .map_err(Error::FilterCompile)?;

        if let Some(pool) = self.filters.remove(name) {
            pool.cancel_and_join();
        }

        let view = Arc::new(FilterView::new());
        {
            let bridge = Arc::clone(&self.bridge);
            view.add_handler(Box::new(move |_| bridge.signal_status()));
        }

        let ctx = Arc::new(FilterContext {
            name: name.to_string(),
            store: Arc::clone(&self.store),
            predicate,
            view,
            cursor: AtomicU32::new(0),
            cancel: AtomicBool::new(false),
            sink: self.sink.clone(),
        });
        let workers = (0..self.threads)
            .map(|_| FilterWorker::spawn(Arc::clone(&ctx)))
            .collect();

        self.filters.insert(
            name.to_string(),
            FilterPool {
                expr: expr.to_string(),
                ctx,
                workers,
            },
        );
        self.bridge.signal_status();
        Ok(())
    }

    /// Read a stored packet by seq.
    pub fn get(&self, seq: u32) -> Option<Arc<Packet>> {
        self.store.get(seq)
    }

    /// Matching seqs of the named filter within `[start, end)`. Unknown
    /// filters yield an empty list.
    pub fn get_filtered(&self, name: &str, start: u32, end: u32) -> Vec<u32> {
        self.filters
            .get(name)
            .map(|pool| pool.ctx.view.get(start, end))
            .unwrap_or_default()
    }

    /// Store watermark: number of packets finalised so far.
    pub fn packets(&self) -> u32 {
        self.store.max_seq()
    }

    // ------------------------------------------------------------------
    // Host bridge
    // ------------------------------------------------------------------

    pub fn set_status_callback(&mut self, cb: impl FnMut(&StatusUpdate) + 'static) {
        self.status_cb = Some(Box::new(cb));
    }

    pub fn set_log_callback(&mut self, cb: impl FnMut(&LogMessage) + 'static) {
        self.log_cb = Some(Box::new(cb));
    }

    /// Service pending bridge signals on the host thread. At most one
    /// status callback per call; each pending log record is delivered
    /// exactly once. Callback panics are caught and logged.
    pub fn poll(&mut self) {
        // Records keep coalescing in the bridge until a callback exists.
        if let Some(cb) = self.log_cb.as_mut() {
            for msg in &self.bridge.drain_logs() {
                if catch_unwind(AssertUnwindSafe(|| cb(msg))).is_err() {
                    error!("log callback panicked");
                }
            }
        }

        // An invariant violation anywhere in the pipeline stops the
        // session; the status snapshot below is the final update.
        if self.bridge.take_fatal_signal() {
            self.stop();
        }

        if self.bridge.take_status_signal() {
            let update = StatusUpdate {
                capturing: self.capturing,
                packets: self.store.max_seq(),
                filtered: self
                    .filters
                    .iter()
                    .map(|(name, pool)| (name.clone(), pool.ctx.view.len()))
                    .collect(),
            };
            if let Some(cb) = self.status_cb.as_mut() {
                if catch_unwind(AssertUnwindSafe(|| cb(&update))).is_err() {
                    error!("status callback panicked");
                }
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Teardown propagates from the capture edge outward. Each stage
        // quiesces before the next is torn down.
        self.capture.stop();
        self.queue.close();
        self.dissector_workers.clear(); // joins; drains the queue
        if let Some(mut dispatcher) = self.dispatcher.take() {
            dispatcher.shutdown();
        }
        for (_, pool) in self.filters.drain() {
            pool.cancel_and_join();
        }
        self.bridge.close();
    }
}

/// Worker count default: hardware parallelism minus one, floor 1.
fn resolve_threads(configured: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Wrap a raw frame into a packet with the session's raw layer.
fn wrap_frame(frame: RawFrame, namespace: &str) -> Packet {
    let mut pkt = Packet::new(
        frame.timestamp_us,
        frame.captured_len,
        frame.original_len,
        frame.data,
    );
    let raw = Layer::new(namespace, "raw").with_payload(pkt.payload().clone());
    pkt.push_layer(raw);
    pkt
}

/// Handler given to the capture source: wrap each frame and push it with
/// a deadline, shedding load at the edge when the pipeline is saturated.
fn frame_handler(queue: Arc<PacketQueue>, namespace: Arc<str>, sink: LogSink) -> FrameHandler {
    Arc::new(move |frame: RawFrame| {
        let pkt = wrap_frame(frame, &namespace);
        match queue.push_timeout(pkt, CAPTURE_PUSH_TIMEOUT) {
            Ok(()) => {}
            Err(PushTimeoutError::Full(_)) => {
                sink.log(LogMessage::warn(
                    "capture",
                    "frame dropped: analysis queue saturated",
                ));
            }
            Err(PushTimeoutError::Closed) => {}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::NullSource;
    use bytes::Bytes;

    fn frame(data: &'static [u8]) -> RawFrame {
        RawFrame {
            timestamp_us: 1,
            captured_len: data.len() as u32,
            original_len: data.len() as u32,
            data: Bytes::from_static(data),
        }
    }

    fn test_session() -> Session {
        Session::new(SessionConfig {
            namespace: "test".into(),
            threads: 2,
            capture: Some(Box::new(NullSource::new())),
            ..SessionConfig::default()
        })
    }

    fn wait_packets(session: &Session, n: u32) {
        for _ in 0..200 {
            if session.packets() >= n {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("pipeline did not store {n} packets");
    }

    #[test]
    fn test_lifecycle_states() {
        let mut session = test_session();
        assert_eq!(session.state(), SessionState::Configured);

        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Running);

        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    fn test_analyze_stores_packet_with_raw_layer() {
        let session = test_session();
        session.analyze(frame(b"\xde\xad\xbe\xef")).unwrap();
        wait_packets(&session, 1);

        let pkt = session.get(0).unwrap();
        assert_eq!(pkt.layers().len(), 1);
        assert_eq!(pkt.layers()[0].name(), "raw");
        assert_eq!(pkt.layers()[0].namespace(), "test");
        assert_eq!(pkt.payload().as_ref(), b"\xde\xad\xbe\xef");
    }

    #[test]
    fn test_filter_same_expression_is_noop() {
        let mut session = test_session();
        session.filter("a", "payload_len() > 0").unwrap();
        let ctx_before = Arc::as_ptr(&session.filters["a"].ctx);

        session.filter("a", "payload_len() > 0").unwrap();
        assert_eq!(Arc::as_ptr(&session.filters["a"].ctx), ctx_before);

        session.filter("a", "payload_len() > 1").unwrap();
        assert_ne!(Arc::as_ptr(&session.filters["a"].ctx), ctx_before);
    }

    #[test]
    fn test_filter_compile_error_keeps_old_pool() {
        let mut session = test_session();
        session.filter("a", "payload_len() > 0").unwrap();

        let err = session.filter("a", "layer(").unwrap_err();
        assert!(matches!(err, Error::FilterCompile(_)));
        assert!(session.filters.contains_key("a"));
        assert_eq!(session.filters["a"].expr, "payload_len() > 0");
    }

    #[test]
    fn test_empty_expression_removes_filter() {
        let mut session = test_session();
        session.filter("a", "true").unwrap();
        session.filter("a", "").unwrap();
        assert!(session.filters.is_empty());
        assert!(session.get_filtered("a", 0, 100).is_empty());
    }

    #[test]
    fn test_threads_default_floor() {
        assert!(resolve_threads(0) >= 1);
        assert_eq!(resolve_threads(7), 7);
    }
}
