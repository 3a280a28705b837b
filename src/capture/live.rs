//! Live capture via libpcap.
//!
//! The capture thread reads with a short timeout so the stop flag is
//! observed promptly, converts each frame into a [`RawFrame`] and hands it
//! to the connected handler. Read errors are surfaced through the log
//! channel; they stop the capture loop only when the device goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use pcap::{Capture, Device, Linktype};
use tracing::debug;

use crate::bridge::{LogMessage, LogSink};
use crate::error::{BpfError, CaptureError};

use super::{CaptureSource, DeviceInfo, FrameHandler, RawFrame};

/// Poll timeout for the capture loop, milliseconds. Bounds stop latency.
const READ_TIMEOUT_MS: i32 = 100;

/// libpcap-backed capture source.
pub struct LiveSource {
    interface: String,
    promiscuous: bool,
    snaplen: u32,
    bpf: Option<String>,
    handler: Option<FrameHandler>,
    sink: Option<LogSink>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl LiveSource {
    pub fn new() -> Self {
        Self {
            interface: String::new(),
            promiscuous: false,
            snaplen: 65535,
            bpf: None,
            handler: None,
            sink: None,
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    fn resolve_device(&self) -> Result<Device, CaptureError> {
        if self.interface.is_empty() {
            return Device::lookup()
                .map_err(|e| CaptureError::Read {
                    reason: e.to_string(),
                })?
                .ok_or(CaptureError::NoDevice);
        }
        Device::list()
            .map_err(|e| CaptureError::Read {
                reason: e.to_string(),
            })?
            .into_iter()
            .find(|d| d.name == self.interface)
            .ok_or_else(|| CaptureError::DeviceOpen {
                device: self.interface.clone(),
                reason: "no such device".into(),
            })
    }
}

impl Default for LiveSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for LiveSource {
    fn connect(&mut self, handler: FrameHandler, sink: LogSink) {
        self.handler = Some(handler);
        self.sink = Some(sink);
    }

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

    fn set_bpf(&mut self, expr: &str) -> Result<(), BpfError> {
        // Validate against a dead capture so bad expressions are rejected
        // before any device is touched.
        let mut probe =
            Capture::dead(Linktype::ETHERNET).map_err(|e| BpfError::Invalid {
                expr: expr.to_string(),
                reason: e.to_string(),
            })?;
        probe.filter(expr, true).map_err(|e| BpfError::Invalid {
            expr: expr.to_string(),
            reason: e.to_string(),
        })?;

        self.bpf = Some(expr.to_string());
        Ok(())
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        if self.thread.is_some() {
            return Ok(());
        }
        let handler = self.handler.clone().expect("capture source not connected");
        let sink = self.sink.clone().expect("capture source not connected");

        let device = self.resolve_device()?;
        let device_name = device.name.clone();

        let mut cap = Capture::from_device(device)
            .map_err(|e| CaptureError::DeviceOpen {
                device: device_name.clone(),
                reason: e.to_string(),
            })?
            .promisc(self.promiscuous)
            .snaplen(self.snaplen as i32)
            .timeout(READ_TIMEOUT_MS)
            .open()
            .map_err(|e| CaptureError::DeviceOpen {
                device: device_name.clone(),
                reason: e.to_string(),
            })?;

        if let Some(expr) = &self.bpf {
            // Already validated; a device-specific refusal is logged, not fatal.
            if let Err(e) = cap.filter(expr, true) {
                sink.log(
                    LogMessage::warn("capture", format!("device rejected filter: {e}"))
                        .with_resource(device_name.clone()),
                );
            }
        }

        self.stop.store(false, Ordering::Release);
        let stop = Arc::clone(&self.stop);
        let thread = std::thread::Builder::new()
            .name("netlens-capture".into())
            .spawn(move || capture_loop(cap, handler, sink, stop, device_name))
            .expect("failed to spawn capture thread");
        self.thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for LiveSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    mut cap: Capture<pcap::Active>,
    handler: FrameHandler,
    sink: LogSink,
    stop: Arc<AtomicBool>,
    device: String,
) {
    while !stop.load(Ordering::Acquire) {
        match cap.next_packet() {
            Ok(packet) => {
                let ts = packet.header.ts;
                let frame = RawFrame {
                    timestamp_us: ts.tv_sec as i64 * 1_000_000 + ts.tv_usec as i64,
                    captured_len: packet.header.caplen,
                    original_len: packet.header.len,
                    data: Bytes::copy_from_slice(packet.data),
                };
                handler(frame);
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => {
                sink.log(
                    LogMessage::error("capture", format!("read failed: {e}"))
                        .with_resource(device.clone()),
                );
                break;
            }
        }
    }
    debug!(device = %device, "capture thread exiting");
}

/// Enumerate capture devices. The link type is probed best-effort: devices
/// the process may not open report 0.
pub fn devices() -> Result<Vec<DeviceInfo>, CaptureError> {
    let devices = Device::list().map_err(|e| CaptureError::Read {
        reason: e.to_string(),
    })?;

    Ok(devices
        .into_iter()
        .map(|d| {
            let link = Capture::from_device(d.clone())
                .and_then(|c| c.timeout(10).open())
                .map(|c| c.get_datalink().0)
                .unwrap_or(0);
            DeviceInfo {
                id: d.name.clone(),
                name: d.name,
                description: d.desc.unwrap_or_default(),
                link,
                loopback: d.flags.is_loopback(),
            }
        })
        .collect())
}

/// Capability probe: whether this process can open a capture device.
pub fn permission() -> bool {
    let Ok(Some(device)) = Device::lookup() else {
        return false;
    };
    Capture::from_device(device)
        .and_then(|c| c.timeout(10).open())
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_bpf_rejects_garbage() {
        let mut source = LiveSource::new();
        assert!(source.set_bpf("tcp port 80").is_ok());
        assert!(matches!(
            source.set_bpf("not a real filter !!"),
            Err(BpfError::Invalid { .. })
        ));
        // The last good expression is retained
        assert_eq!(source.bpf.as_deref(), Some("tcp port 80"));
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let mut source = LiveSource::new();
        source.stop();
        source.stop();
    }
}
