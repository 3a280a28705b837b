//! Capture source boundary.
//!
//! The engine treats the capture driver as an external collaborator behind
//! the [`CaptureSource`] trait: the session wires a frame handler in at
//! construction, then drives the source through its control surface. The
//! default implementation is [`LiveSource`], built on libpcap; tests and
//! embedders that inject frames themselves use [`NullSource`].

mod live;

pub use live::{devices, permission, LiveSource};

use std::sync::Arc;

use bytes::Bytes;

use crate::bridge::LogSink;
use crate::error::{BpfError, CaptureError};

/// One frame as delivered by the capture driver.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Capture timestamp, microseconds since the Unix epoch.
    pub timestamp_us: i64,
    pub captured_len: u32,
    pub original_len: u32,
    pub data: Bytes,
}

/// A capture device as reported by [`devices`].
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Link-layer type (DLT), 0 when it could not be probed.
    pub link: i32,
    pub loopback: bool,
}

/// Callback the source invokes for every captured frame. Called from the
/// capture thread.
pub type FrameHandler = Arc<dyn Fn(RawFrame) + Send + Sync>;

/// Contract of the capture driver.
pub trait CaptureSource: Send {
    /// Wire the frame handler and log sink. Called once by the session
    /// before any control operation.
    fn connect(&mut self, handler: FrameHandler, sink: LogSink);

    fn set_interface(&mut self, name: &str);
    fn interface(&self) -> &str;

    fn set_promiscuous(&mut self, on: bool);
    fn promiscuous(&self) -> bool;

    fn set_snaplen(&mut self, len: u32);
    fn snaplen(&self) -> u32;

    /// Validate and store a BPF expression. The error is returned
    /// synchronously so the caller can reject bad input; device-specific
    /// failures at activation go through the log channel instead.
    fn set_bpf(&mut self, expr: &str) -> Result<(), BpfError>;

    /// Begin delivering frames to the connected handler.
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Stop delivering frames. Idempotent; blocks until the capture
    /// thread has quiesced.
    fn stop(&mut self);
}

/// A capture source that never produces frames. Used by sessions whose
/// packets are injected directly (tests, replay hosts).
#[derive(Default)]
pub struct NullSource {
    interface: String,
    promiscuous: bool,
    snaplen: u32,
    running: bool,
}

impl NullSource {
    pub fn new() -> Self {
        Self {
            snaplen: 65535,
            ..Self::default()
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl CaptureSource for NullSource {
    fn connect(&mut self, _handler: FrameHandler, _sink: LogSink) {}

    fn set_interface(&mut self, name: &str) {
        self.interface = name.to_string();
    }

    fn interface(&self) -> &str {
        &self.interface
    }

    fn set_promiscuous(&mut self, on: bool) {
        self.promiscuous = on;
    }

    fn promiscuous(&self) -> bool {
        self.promiscuous
    }

    fn set_snaplen(&mut self, len: u32) {
        self.snaplen = len;
    }

    fn snaplen(&self) -> u32 {
        self.snaplen
    }

    fn set_bpf(&mut self, _expr: &str) -> Result<(), BpfError> {
        Ok(())
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_source_control_surface() {
        let mut source = NullSource::new();
        source.set_interface("eth0");
        source.set_promiscuous(true);
        source.set_snaplen(1500);

        assert_eq!(source.interface(), "eth0");
        assert!(source.promiscuous());
        assert_eq!(source.snaplen(), 1500);
        assert!(source.set_bpf("tcp port 80").is_ok());

        source.start().unwrap();
        assert!(source.is_running());
        source.stop();
        assert!(!source.is_running());
    }
}
