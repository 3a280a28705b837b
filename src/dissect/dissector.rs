use crate::bridge::LogMessage;
use crate::error::DissectorError;
use crate::packet::Layer;
use crate::stream::StreamChunk;

/// Everything a dissector produced for one layer.
#[derive(Debug, Default)]
pub struct DissectOutput {
    /// Layers to append to the packet. Further dissectors may fire on
    /// these in the same pass.
    pub layers: Vec<Layer>,
    /// Stream chunks extracted from this layer. Tagged with the packet's
    /// seq by the worker once the packet is stored.
    pub chunks: Vec<StreamChunk>,
    /// Host-bound log records.
    pub logs: Vec<LogMessage>,
}

impl DissectOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn with_chunk(mut self, chunk: StreamChunk) -> Self {
        self.chunks.push(chunk);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty() && self.chunks.is_empty() && self.logs.is_empty()
    }
}

/// Trait for layer dissectors.
///
/// A dissector inspects one layer and may emit further layers, stream
/// chunks and log records. Implementations must be safe to call from
/// several worker threads at once and must not retain references to the
/// input layer beyond the call.
pub trait Dissector: Send + Sync {
    /// Identifier used in log records (e.g. "eth", "tcp").
    fn name(&self) -> &str;

    /// Whether this dissector wants to run on the given layer. Typically a
    /// namespace + layer-name match.
    fn accepts(&self, layer: &Layer) -> bool;

    /// Dissect one layer. An error is reported through the log channel and
    /// does not prevent the packet from being stored.
    fn dissect(&self, layer: &Layer, namespace: &str) -> Result<DissectOutput, DissectorError>;
}
