//! Host bridge: coalesced cross-thread notification of a single-threaded
//! cooperative host.
//!
//! Worker threads never call into the host. They set edge-triggered signal
//! bits (status) or stash records in a keyed map (logs); the host services
//! both from its own thread via [`Session::poll`](crate::session::Session::poll).
//! Between two service points, any number of worker-side signals collapse
//! into at most one status callback and one delivery per log dedup key —
//! the newest record per key wins.
//!
//! Worker-side access goes through a cheap cloneable [`LogSink`].

mod log;

pub use log::{LogLevel, LogMessage};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Snapshot delivered to the status callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    /// Whether the capture source is currently producing.
    pub capturing: bool,
    /// Store watermark: packets finalised so far.
    pub packets: u32,
    /// Per-filter view sizes, keyed by filter name.
    pub filtered: HashMap<String, u32>,
}

/// Shared core of the bridge.
pub struct HostBridge {
    status_signal: AtomicBool,
    log_signal: AtomicBool,
    fatal_signal: AtomicBool,
    logs: Mutex<HashMap<String, LogMessage>>,
    closed: AtomicBool,
}

impl HostBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            status_signal: AtomicBool::new(false),
            log_signal: AtomicBool::new(false),
            fatal_signal: AtomicBool::new(false),
            logs: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Raise the status signal. Any number of raises between two services
    /// collapse into one callback invocation.
    pub fn signal_status(&self) {
        if !self.closed.load(Ordering::Acquire) {
            self.status_signal.store(true, Ordering::Release);
        }
    }

    /// Insert a log record, replacing any earlier record with the same
    /// dedup key, and raise the log signal.
    pub fn log(&self, msg: LogMessage) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.logs
            .lock()
            .expect("bridge lock poisoned")
            .insert(msg.key(), msg);
        self.log_signal.store(true, Ordering::Release);
    }

    /// Report an invariant violation. The session observes this on its
    /// next service cycle and stops.
    pub fn signal_fatal(&self, msg: LogMessage) {
        self.log(msg);
        if !self.closed.load(Ordering::Acquire) {
            self.fatal_signal.store(true, Ordering::Release);
        }
    }

    /// Host side: consume the status signal. Returns true if a status
    /// callback is due.
    pub fn take_status_signal(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.status_signal.swap(false, Ordering::AcqRel)
    }

    /// Host side: consume the fatal signal.
    pub fn take_fatal_signal(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.fatal_signal.swap(false, Ordering::AcqRel)
    }

    /// Host side: consume the log signal and swap out the pending records.
    /// Each surviving record is delivered exactly once.
    pub fn drain_logs(&self) -> Vec<LogMessage> {
        if self.closed.load(Ordering::Acquire) || !self.log_signal.swap(false, Ordering::AcqRel) {
            return Vec::new();
        }
        let mut drained = HashMap::new();
        {
            let mut logs = self.logs.lock().expect("bridge lock poisoned");
            std::mem::swap(&mut *logs, &mut drained);
        }
        drained.into_values().collect()
    }

    /// Tear the bridge down: pending signals are cancelled, later worker
    /// signals are ignored.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.status_signal.store(false, Ordering::Release);
        self.log_signal.store(false, Ordering::Release);
        self.fatal_signal.store(false, Ordering::Release);
        self.logs.lock().expect("bridge lock poisoned").clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Cloneable worker-side handle for logging and status signalling.
#[derive(Clone)]
pub struct LogSink {
    bridge: Arc<HostBridge>,
}

impl LogSink {
    pub fn new(bridge: Arc<HostBridge>) -> Self {
        Self { bridge }
    }

    pub fn log(&self, msg: LogMessage) {
        self.bridge.log(msg);
    }

    /// Report an invariant violation; stops the session.
    pub fn fatal(&self, msg: LogMessage) {
        self.bridge.signal_fatal(msg);
    }

    pub fn signal_status(&self) {
        self.bridge.signal_status();
    }
}
