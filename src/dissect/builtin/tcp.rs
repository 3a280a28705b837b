//! TCP dissector.
//!
//! Emits a `Tcp` layer per segment and, for segments carrying data or a
//! FIN, a stream chunk keyed by the directional 5-tuple. Chunk ordinals
//! come from a per-flow arrival counter: segments are numbered in the
//! order this dissector sees them. Captures that reorder TCP segments are
//! therefore replayed to stream dissectors in arrival order; exact
//! renumbering is left to dissectors that track transport sequence space
//! themselves.

use std::collections::HashMap;
use std::sync::Mutex;

use etherparse::TcpHeaderSlice;

use crate::dissect::{DissectOutput, Dissector};
use crate::error::DissectorError;
use crate::packet::{AttrValue, Layer};
use crate::stream::StreamChunk;

use super::ipv4::IP_PROTO_TCP;

/// TCP dissector. Fires on IPv4 layers carrying protocol 6.
pub struct TcpDissector {
    /// Next chunk ordinal per directional flow. Entries are dropped when
    /// the FIN-bearing segment is seen.
    ordinals: Mutex<HashMap<String, u64>>,
}

impl TcpDissector {
    pub fn new() -> Self {
        Self {
            ordinals: Mutex::new(HashMap::new()),
        }
    }

    fn next_ordinal(&self, flow: &str, fin: bool) -> u64 {
        let mut ordinals = self.ordinals.lock().expect("tcp ordinal lock poisoned");
        if fin {
            ordinals.remove(flow).unwrap_or(0)
        } else {
            let counter = ordinals.entry(flow.to_string()).or_insert(0);
            let ordinal = *counter;
            *counter += 1;
            ordinal
        }
    }
}

impl Default for TcpDissector {
    fn default() -> Self {
        Self::new()
    }
}

impl Dissector for TcpDissector {
    fn name(&self) -> &str {
        "tcp"
    }

    fn accepts(&self, layer: &Layer) -> bool {
        layer.name() == "Ipv4"
            && layer.attr("protocol").and_then(|v| v.as_int()) == Some(IP_PROTO_TCP as i64)
    }

    fn dissect(&self, layer: &Layer, namespace: &str) -> Result<DissectOutput, DissectorError> {
        let data = layer.payload();
        let tcp = TcpHeaderSlice::from_slice(data).map_err(|e| DissectorError::Failed {
            dissector: "tcp".into(),
            reason: e.to_string(),
        })?;

        let header_len = tcp.slice().len();
        let payload = data.slice(header_len..);

        let src = layer.attr("src").and_then(|v| v.as_str()).unwrap_or("?");
        let dst = layer.attr("dst").and_then(|v| v.as_str()).unwrap_or("?");
        let flow = format!(
            "tcp/{src}:{}>{dst}:{}",
            tcp.source_port(),
            tcp.destination_port()
        );

        let out_layer = Layer::new(namespace, "Tcp")
            .with_payload(payload.clone())
            .with_attr("src_port", AttrValue::Int(tcp.source_port() as i64))
            .with_attr("dst_port", AttrValue::Int(tcp.destination_port() as i64))
            .with_attr("seq", AttrValue::Int(tcp.sequence_number() as i64))
            .with_attr("ack", AttrValue::Int(tcp.acknowledgment_number() as i64))
            .with_attr("flag_syn", AttrValue::Int(tcp.syn() as i64))
            .with_attr("flag_ack", AttrValue::Int(tcp.ack() as i64))
            .with_attr("flag_fin", AttrValue::Int(tcp.fin() as i64))
            .with_attr("flag_rst", AttrValue::Int(tcp.rst() as i64))
            .with_attr("window", AttrValue::Int(tcp.window_size() as i64));

        let mut out = DissectOutput::new().with_layer(out_layer);

        if !payload.is_empty() || tcp.fin() {
            let ordinal = self.next_ordinal(&flow, tcp.fin());
            let mut chunk = StreamChunk::new(flow.into_bytes(), ordinal, payload);
            chunk.fin = tcp.fin();
            out.chunks.push(chunk);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn tcp_segment(src: u16, dst: u16, flags: u8, payload: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&src.to_be_bytes());
        data.extend_from_slice(&dst.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes()); // seq
        data.extend_from_slice(&0u32.to_be_bytes()); // ack
        data.push(0x50); // data offset: 5
        data.push(flags);
        data.extend_from_slice(&0xffffu16.to_be_bytes()); // window
        data.extend_from_slice(&[0, 0, 0, 0]); // checksum, urgent
        data.extend_from_slice(payload);
        data
    }

    fn ipv4_layer(payload: Vec<u8>) -> Layer {
        Layer::new("test", "Ipv4")
            .with_payload(Bytes::from(payload))
            .with_attr("src", AttrValue::Str("10.0.0.1".into()))
            .with_attr("dst", AttrValue::Str("10.0.0.2".into()))
            .with_attr("protocol", AttrValue::Int(IP_PROTO_TCP as i64))
    }

    #[test]
    fn test_parses_ports_and_flags() {
        let d = TcpDissector::new();
        let layer = ipv4_layer(tcp_segment(40000, 80, 0x18, b"GET")); // PSH+ACK
        let out = d.dissect(&layer, "test").unwrap();

        let tcp = &out.layers[0];
        assert_eq!(tcp.attr("src_port").and_then(|v| v.as_int()), Some(40000));
        assert_eq!(tcp.attr("dst_port").and_then(|v| v.as_int()), Some(80));
        assert_eq!(tcp.attr("flag_ack").and_then(|v| v.as_int()), Some(1));
        assert_eq!(tcp.attr("flag_fin").and_then(|v| v.as_int()), Some(0));
    }

    #[test]
    fn test_data_segment_emits_ordinal_chunk() {
        let d = TcpDissector::new();
        let layer = ipv4_layer(tcp_segment(40000, 80, 0x18, b"AB"));

        let out = d.dissect(&layer, "test").unwrap();
        assert_eq!(out.chunks.len(), 1);
        let chunk = &out.chunks[0];
        assert_eq!(chunk.flow_id.as_ref(), b"tcp/10.0.0.1:40000>10.0.0.2:80");
        assert_eq!(chunk.stream_seq, 0);
        assert_eq!(chunk.payload.as_ref(), b"AB");

        // Second segment of the same flow gets the next ordinal
        let out = d.dissect(&layer, "test").unwrap();
        assert_eq!(out.chunks[0].stream_seq, 1);
    }

    #[test]
    fn test_empty_ack_emits_no_chunk() {
        let d = TcpDissector::new();
        let layer = ipv4_layer(tcp_segment(40000, 80, 0x10, b"")); // bare ACK
        let out = d.dissect(&layer, "test").unwrap();
        assert!(out.chunks.is_empty());
    }

    #[test]
    fn test_fin_emits_fin_chunk_and_resets_flow() {
        let d = TcpDissector::new();
        let data_layer = ipv4_layer(tcp_segment(40000, 80, 0x18, b"X"));
        let fin_layer = ipv4_layer(tcp_segment(40000, 80, 0x11, b"")); // FIN+ACK

        d.dissect(&data_layer, "test").unwrap();
        let out = d.dissect(&fin_layer, "test").unwrap();
        assert_eq!(out.chunks.len(), 1);
        assert!(out.chunks[0].fin);
        assert_eq!(out.chunks[0].stream_seq, 1);

        // Flow state was dropped: a new flow starts at ordinal 0
        let out = d.dissect(&data_layer, "test").unwrap();
        assert_eq!(out.chunks[0].stream_seq, 0);
    }

    #[test]
    fn test_flows_are_directional() {
        let d = TcpDissector::new();
        let fwd = ipv4_layer(tcp_segment(40000, 80, 0x18, b"req"));
        let rev = ipv4_layer(tcp_segment(80, 40000, 0x18, b"resp"));

        let a = d.dissect(&fwd, "test").unwrap();
        let b = d.dissect(&rev, "test").unwrap();
        assert_ne!(a.chunks[0].flow_id, b.chunks[0].flow_id);
        assert_eq!(b.chunks[0].stream_seq, 0);
    }
}
