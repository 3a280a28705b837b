//! Dissector worker pool.
//!
//! Each worker drains the packet queue, runs registered dissectors to a
//! fixed point over the packet's layers, inserts the finished packet into
//! the store, and hands any extracted stream chunks to the dispatcher
//! tagged with the packet's assigned seq.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::trace;

use crate::bridge::{LogMessage, LogSink};
use crate::error::DissectorError;
use crate::packet::Packet;
use crate::queue::PacketQueue;
use crate::store::PacketStore;
use crate::stream::{StreamChunk, StreamDispatcherHandle};

use super::DissectorRegistry;

/// Safety cap on dissection passes for one packet. Dissectors may fire on
/// newly added layers in the same visit; a packet that keeps growing past
/// this many passes is stored as-is with a warn log.
pub const MAX_DISSECTION_PASSES: u32 = 128;

/// Shared context for the dissector worker pool.
pub struct DissectorContext {
    pub queue: Arc<PacketQueue>,
    pub store: Arc<PacketStore>,
    pub registry: Arc<DissectorRegistry>,
    pub namespace: Arc<str>,
    pub streams: StreamDispatcherHandle,
    pub sink: LogSink,
}

/// One worker thread of the pool. Joined on drop.
pub struct DissectorWorker {
    handle: Option<JoinHandle<()>>,
}

impl DissectorWorker {
    pub fn spawn(ctx: Arc<DissectorContext>) -> Self {
        let handle = thread::Builder::new()
            .name("netlens-dissect".into())
            .spawn(move || run(ctx))
            .expect("failed to spawn dissector worker");
        Self {
            handle: Some(handle),
        }
    }
}

impl Drop for DissectorWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(ctx: Arc<DissectorContext>) {
    while let Ok(mut pkt) = ctx.queue.pop() {
        let mut chunks = Vec::new();
        dissect_packet(&ctx, &mut pkt, &mut chunks);

        let seq = ctx.store.insert(pkt);

        if !chunks.is_empty() {
            ctx.streams.insert(seq, chunks);
        }
    }
    trace!("dissector worker exiting");
}

/// Run dissectors over the packet's layers until no pass produces a new
/// layer, or the pass cap is hit.
fn dissect_packet(ctx: &DissectorContext, pkt: &mut Packet, chunks: &mut Vec<StreamChunk>) {
    let mut cursor = 0;
    let mut passes = 0u32;

    while cursor < pkt.layers().len() {
        passes += 1;
        if passes > MAX_DISSECTION_PASSES {
            ctx.sink.log(
                LogMessage::warn(
                    "dissector",
                    DissectorError::DepthExceeded {
                        cap: MAX_DISSECTION_PASSES,
                    }
                    .to_string(),
                )
                .with_resource("pipeline"),
            );
            break;
        }

        let end = pkt.layers().len();
        let mut fresh = Vec::new();

        for idx in cursor..end {
            let layer = &pkt.layers()[idx];
            for dissector in ctx.registry.matching(layer) {
                match dissector.dissect(layer, &ctx.namespace) {
                    Ok(out) => {
                        fresh.extend(out.layers);
                        chunks.extend(out.chunks);
                        for log in out.logs {
                            ctx.sink.log(log);
                        }
                    }
                    Err(err) => {
                        ctx.sink.log(
                            LogMessage::error("dissector", err.to_string())
                                .with_resource(dissector.name().to_string()),
                        );
                    }
                }
            }
        }

        cursor = end;
        for layer in fresh {
            pkt.push_layer(layer);
        }
    }
}
