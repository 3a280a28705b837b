//! Packet data model.
//!
//! A [`Packet`] is the immutable record of one captured frame (or one
//! synthesised virtual packet): capture timestamp, lengths, an owned payload
//! and an ordered, non-empty sequence of [`Layer`]s. The first layer is
//! always the raw layer inserted by the session's `analyze` step; dissector
//! workers append further layers before the packet is frozen into the store.
//!
//! Identity: a packet has no intrinsic id. Its `seq` is the slot index the
//! store assigns on insertion, unique within a session.

mod layer;

pub use layer::{AttrEntry, AttrValue, Layer};

use bytes::Bytes;

/// Immutable record of one frame with ordered protocol layers.
#[derive(Debug, Clone)]
pub struct Packet {
    timestamp_us: i64,
    captured_len: u32,
    original_len: u32,
    payload: Bytes,
    layers: Vec<Layer>,
}

impl Packet {
    /// Create a packet from a captured frame. The layer list starts empty;
    /// the session's analyze step pushes the raw layer before the packet
    /// enters the pipeline.
    pub fn new(timestamp_us: i64, captured_len: u32, original_len: u32, payload: Bytes) -> Self {
        Self {
            timestamp_us,
            captured_len,
            original_len,
            payload,
            layers: Vec::new(),
        }
    }

    /// Create a virtual packet from a single synthesised layer. The layer's
    /// payload becomes the packet payload; lengths reflect that payload.
    pub fn from_layer(timestamp_us: i64, layer: Layer) -> Self {
        let payload = layer.payload().clone();
        let len = payload.len() as u32;
        Self {
            timestamp_us,
            captured_len: len,
            original_len: len,
            payload,
            layers: vec![layer],
        }
    }

    pub fn timestamp_us(&self) -> i64 {
        self.timestamp_us
    }

    pub fn captured_len(&self) -> u32 {
        self.captured_len
    }

    pub fn original_len(&self) -> u32 {
        self.original_len
    }

    /// Check if the frame was truncated during capture.
    pub fn is_truncated(&self) -> bool {
        self.captured_len < self.original_len
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Ordered layer sequence. Non-empty for any packet in the pipeline.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Find the first layer with the given name.
    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name() == name)
    }

    /// Append a layer. Only valid before the packet is stored; the store
    /// holds packets behind `Arc`, which makes later mutation impossible.
    pub fn push_layer(&mut self, layer: Layer) {
        self.layers.push(layer);
    }
}
