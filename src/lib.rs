//! netlens - Live packet capture and analysis engine.
//!
//! This library provides a concurrent pipeline that ingests raw frames
//! from a capture source, decomposes them into layered protocol
//! representations via pluggable dissectors, reassembles transport-level
//! byte streams, re-injects synthesised sub-packets, and maintains named
//! filtered views over the packet store — all while keeping a
//! single-threaded host responsive through coalesced callbacks.
//!
//! # Example
//!
//! ```no_run
//! use netlens::dissect::builtin::default_dissectors;
//! use netlens::{Session, SessionConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut session = Session::new(SessionConfig {
//!         namespace: "app".into(),
//!         dissectors: default_dissectors(),
//!         ..SessionConfig::default()
//!     });
//!     session.set_interface("eth0");
//!     session.filter("tcp", "layer('Tcp') != nil")?;
//!     session.set_status_callback(|status| {
//!         println!("{} packets", status.packets);
//!     });
//!     session.start()?;
//!     loop {
//!         session.poll();
//!         std::thread::sleep(std::time::Duration::from_millis(200));
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                            netlens                                 |
//! +--------------------------------------------------------------------+
//! |  capture/   - CaptureSource boundary, libpcap live source          |
//! |  packet/    - Packet, Layer, attribute values                      |
//! |  queue      - bounded MPMC queue feeding the dissector pool        |
//! |  store      - seq-keyed store with contiguous watermark            |
//! |  dissect/   - Dissector trait, registry, worker pool, builtins     |
//! |  stream/    - per-flow ordering, stream dissectors, vp loopback    |
//! |  filter/    - expression engine, filter pools, ordered views       |
//! |  bridge/    - coalesced status/log delivery to the host thread     |
//! |  session    - owning facade and lifecycle                          |
//! +--------------------------------------------------------------------+
//! ```
//!
//! Data flow: capture → queue → dissector pool → store (+ stream chunks →
//! dispatcher → stream dissectors → virtual packets back into the queue).
//! The store's watermark drives the filter pools and the host status
//! channel.

pub mod bridge;
pub mod capture;
pub mod dissect;
pub mod error;
pub mod filter;
pub mod packet;
pub mod queue;
pub mod session;
pub mod store;
pub mod stream;

pub use bridge::{HostBridge, LogLevel, LogMessage, LogSink, StatusUpdate};
pub use capture::{CaptureSource, DeviceInfo, NullSource, RawFrame};
pub use error::{
    BpfError, CaptureError, Closed, DissectorError, Error, FilterCompileError, FilterEvalError,
    Result, StreamError,
};
pub use packet::{AttrValue, Layer, Packet};
pub use session::{Session, SessionConfig, SessionState};
pub use stream::{StreamChunk, StreamDissector, StreamOutput};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
