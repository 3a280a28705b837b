//! Stream reassembly and stream dissection.
//!
//! Dissector workers extract [`StreamChunk`]s from packets; the
//! [`StreamDispatcher`] orders them per flow, feeds them to registered
//! [`StreamDissector`]s in strict stream-sequence order, and loops any
//! synthesised virtual packets back into the packet queue.

mod dispatcher;
mod flow;
mod http;

pub use dispatcher::{
    StreamDispatcher, StreamDispatcherContext, StreamDispatcherHandle, DEFAULT_FLOW_IDLE_TIMEOUT,
};
pub use flow::{FlowWindow, MAX_PENDING_BYTES, MAX_PENDING_CHUNKS};
pub use http::HttpStreamDissector;

use bytes::Bytes;

use crate::bridge::LogMessage;
use crate::error::StreamError;
use crate::packet::Layer;

/// One reassembly unit extracted from a packet.
///
/// `stream_seq` is an ordinal within the flow: chunk N+1 is delivered to
/// stream dissectors after chunk N. Gaps buffer inside the per-flow window
/// until filled or evicted.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    /// Opaque flow identifier, typically derived from the 5-tuple.
    pub flow_id: Bytes,
    /// Ordinal position of this chunk within its flow.
    pub stream_seq: u64,
    pub payload: Bytes,
    /// Marks the final chunk of the flow; delivering it retires the flow.
    pub fin: bool,
    /// Seq of the packet this chunk was extracted from. Tagged by the
    /// dispatcher entry point; zero for chunks not yet inserted.
    pub origin_seq: u32,
}

impl StreamChunk {
    pub fn new(flow_id: impl Into<Bytes>, stream_seq: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            flow_id: flow_id.into(),
            stream_seq,
            payload: payload.into(),
            fin: false,
            origin_seq: 0,
        }
    }

    pub fn with_fin(mut self) -> Self {
        self.fin = true;
        self
    }
}

/// Everything a stream dissector produced for one delivery.
#[derive(Debug, Default)]
pub struct StreamOutput {
    /// Chunks to feed back into reassembly (chained flows).
    pub chunks: Vec<StreamChunk>,
    /// Virtual-packet layers: each becomes a fresh packet looped back into
    /// the dissection queue with its own seq.
    pub vp_layers: Vec<Layer>,
    /// Host-bound log records.
    pub logs: Vec<LogMessage>,
}

impl StreamOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vp_layer(mut self, layer: Layer) -> Self {
        self.vp_layers.push(layer);
        self
    }

    pub fn with_chunk(mut self, chunk: StreamChunk) -> Self {
        self.chunks.push(chunk);
        self
    }
}

/// Trait for stream dissectors.
///
/// `dissect` is called with batches of chunks in strict stream-sequence
/// order per flow; across flows no ordering is promised. Implementations
/// that accumulate bytes across calls keep their own per-flow state and
/// release it in [`retire`](StreamDissector::retire). Must be safe to call
/// concurrently for *different* flows; the dispatcher serialises calls
/// within one flow.
pub trait StreamDissector: Send + Sync {
    /// Identifier used in log records.
    fn name(&self) -> &str;

    /// Whether this dissector wants the given flow.
    fn accepts(&self, flow_id: &[u8]) -> bool;

    /// Consume in-order chunks of an accepted flow.
    fn dissect(&self, flow_id: &[u8], chunks: &[StreamChunk]) -> Result<StreamOutput, StreamError>;

    /// Flow teardown (FIN delivered or idle timeout). Drop per-flow state.
    fn retire(&self, _flow_id: &[u8]) {}
}
