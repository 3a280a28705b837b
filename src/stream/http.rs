//! Built-in HTTP/1.x stream dissector.
//!
//! Accumulates reassembled flow bytes and emits one virtual-packet layer
//! per complete HTTP message head (plus body when Content-Length is
//! present). Keep-alive flows yield multiple messages. Chunked bodies are
//! skipped through; anything the parser cannot recognise stops dissection
//! of that flow without failing it.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use httparse::{Request, Response, Status, EMPTY_HEADER};

use crate::error::StreamError;
use crate::packet::{AttrValue, Layer};

use super::{StreamChunk, StreamDissector, StreamOutput};

/// Maximum number of headers to parse per message.
const MAX_HEADERS: usize = 64;

/// Ports treated as HTTP when they appear in a `tcp/` flow id.
const HTTP_PORTS: [u16; 6] = [80, 8080, 8000, 8888, 3000, 5000];

/// HTTP/1.x stream dissector.
pub struct HttpStreamDissector {
    /// Accumulated undelivered bytes per flow.
    buffers: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    namespace: String,
}

impl HttpStreamDissector {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            namespace: namespace.into(),
        }
    }

    /// Parse one message from the front of `data`. Returns the layer and
    /// the number of bytes consumed, or None when more data is needed or
    /// the bytes are not HTTP.
    fn parse_message(&self, data: &[u8]) -> Option<(Layer, usize)> {
        if data.starts_with(b"HTTP/") {
            self.parse_response(data)
        } else {
            self.parse_request(data)
        }
    }

    fn parse_request(&self, data: &[u8]) -> Option<(Layer, usize)> {
        let mut headers = [EMPTY_HEADER; MAX_HEADERS];
        let mut req = Request::new(&mut headers);
        let head_len = match req.parse(data) {
            Ok(Status::Complete(n)) => n,
            Ok(Status::Partial) | Err(_) => return None,
        };

        let content_length = header_content_length(req.headers);
        let total = message_end(data, head_len, content_length)?;

        let layer = Layer::new(self.namespace.clone(), "Http")
            .with_payload(Bytes::copy_from_slice(&data[..total]))
            .with_attr("type", AttrValue::Str("request".into()))
            .with_attr(
                "method",
                AttrValue::Str(req.method.unwrap_or_default().into()),
            )
            .with_attr("target", AttrValue::Str(req.path.unwrap_or_default().into()))
            .with_attr(
                "headers",
                AttrValue::Int(req.headers.iter().filter(|h| !h.name.is_empty()).count() as i64),
            )
            .with_attr(
                "content_length",
                AttrValue::Int(content_length.unwrap_or(0) as i64),
            );
        Some((layer, total))
    }

    fn parse_response(&self, data: &[u8]) -> Option<(Layer, usize)> {
        let mut headers = [EMPTY_HEADER; MAX_HEADERS];
        let mut resp = Response::new(&mut headers);
        let head_len = match resp.parse(data) {
            Ok(Status::Complete(n)) => n,
            Ok(Status::Partial) | Err(_) => return None,
        };

        let content_length = header_content_length(resp.headers);
        let total = message_end(data, head_len, content_length)?;

        let layer = Layer::new(self.namespace.clone(), "Http")
            .with_payload(Bytes::copy_from_slice(&data[..total]))
            .with_attr("type", AttrValue::Str("response".into()))
            .with_attr("status", AttrValue::Int(resp.code.unwrap_or(0) as i64))
            .with_attr(
                "headers",
                AttrValue::Int(resp.headers.iter().filter(|h| !h.name.is_empty()).count() as i64),
            )
            .with_attr(
                "content_length",
                AttrValue::Int(content_length.unwrap_or(0) as i64),
            );
        Some((layer, total))
    }
}

/// Content-Length header value, if present and numeric.
fn header_content_length(headers: &[httparse::Header]) -> Option<usize> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-length"))
        .and_then(|h| std::str::from_utf8(h.value).ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Total message length given a complete head, or None when the declared
/// body has not fully arrived yet. Without a Content-Length the head alone
/// is the message.
fn message_end(data: &[u8], head_len: usize, content_length: Option<usize>) -> Option<usize> {
    match content_length {
        Some(len) if data.len() < head_len + len => None,
        Some(len) => Some(head_len + len),
        None => Some(head_len),
    }
}

/// Extract both ports from a `tcp/src:sport>dst:dport` flow id.
fn flow_ports(flow_id: &[u8]) -> Option<(u16, u16)> {
    let s = std::str::from_utf8(flow_id).ok()?;
    let rest = s.strip_prefix("tcp/")?;
    let (src, dst) = rest.split_once('>')?;
    let sport = src.rsplit_once(':')?.1.parse().ok()?;
    let dport = dst.rsplit_once(':')?.1.parse().ok()?;
    Some((sport, dport))
}

impl StreamDissector for HttpStreamDissector {
    fn name(&self) -> &str {
        "http"
    }

    fn accepts(&self, flow_id: &[u8]) -> bool {
        match flow_ports(flow_id) {
            Some((sport, dport)) => {
                HTTP_PORTS.contains(&sport) || HTTP_PORTS.contains(&dport)
            }
            None => false,
        }
    }

    fn dissect(&self, flow_id: &[u8], chunks: &[StreamChunk]) -> Result<StreamOutput, StreamError> {
        let mut out = StreamOutput::new();
        let mut buffers = self.buffers.lock().expect("http buffer lock poisoned");
        let buffer = buffers.entry(flow_id.to_vec()).or_default();

        for chunk in chunks {
            buffer.extend_from_slice(&chunk.payload);
        }

        let mut consumed = 0;
        while let Some((layer, n)) = self.parse_message(&buffer[consumed..]) {
            out.vp_layers.push(layer);
            consumed += n;
        }
        if consumed > 0 {
            buffer.drain(..consumed);
        }

        Ok(out)
    }

    fn retire(&self, flow_id: &[u8]) {
        self.buffers
            .lock()
            .expect("http buffer lock poisoned")
            .remove(flow_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(seq: u64, payload: &'static [u8]) -> StreamChunk {
        StreamChunk::new(Bytes::from_static(b"tcp/1.1.1.1:40000>2.2.2.2:80"), seq, payload)
    }

    const FLOW: &[u8] = b"tcp/1.1.1.1:40000>2.2.2.2:80";

    #[test]
    fn test_accepts_http_ports_only() {
        let d = HttpStreamDissector::new("test");
        assert!(d.accepts(b"tcp/1.1.1.1:40000>2.2.2.2:80"));
        assert!(d.accepts(b"tcp/1.1.1.1:8080>2.2.2.2:50000"));
        assert!(!d.accepts(b"tcp/1.1.1.1:40000>2.2.2.2:22"));
        assert!(!d.accepts(b"udp/1.1.1.1:53>2.2.2.2:53"));
        assert!(!d.accepts(b"\xff\xfe"));
    }

    #[test]
    fn test_request_head_emits_layer() {
        let d = HttpStreamDissector::new("test");
        let out = d
            .dissect(FLOW, &[chunk(0, b"GET /index.html HTTP/1.1\r\nHost: a\r\n\r\n")])
            .unwrap();

        assert_eq!(out.vp_layers.len(), 1);
        let layer = &out.vp_layers[0];
        assert_eq!(layer.name(), "Http");
        assert_eq!(layer.attr("method").and_then(|v| v.as_str()), Some("GET"));
        assert_eq!(
            layer.attr("target").and_then(|v| v.as_str()),
            Some("/index.html")
        );
    }

    #[test]
    fn test_head_split_across_chunks() {
        let d = HttpStreamDissector::new("test");
        let out = d.dissect(FLOW, &[chunk(0, b"GET / HT")]).unwrap();
        assert!(out.vp_layers.is_empty());

        let out = d
            .dissect(FLOW, &[chunk(1, b"TP/1.1\r\nHost: a\r\n\r\n")])
            .unwrap();
        assert_eq!(out.vp_layers.len(), 1);
    }

    #[test]
    fn test_response_with_body_waits_for_content_length() {
        let d = HttpStreamDissector::new("test");
        let head = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n";

        let out = d.dissect(FLOW, &[chunk(0, head)]).unwrap();
        assert!(out.vp_layers.is_empty());

        let out = d.dissect(FLOW, &[chunk(1, b"hello")]).unwrap();
        assert_eq!(out.vp_layers.len(), 1);
        let layer = &out.vp_layers[0];
        assert_eq!(layer.attr("status").and_then(|v| v.as_int()), Some(200));
        assert_eq!(
            layer.attr("content_length").and_then(|v| v.as_int()),
            Some(5)
        );
        assert!(layer.payload().ends_with(b"hello"));
    }

    #[test]
    fn test_pipelined_messages() {
        let d = HttpStreamDissector::new("test");
        let two = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let out = d.dissect(FLOW, &[chunk(0, two)]).unwrap();
        assert_eq!(out.vp_layers.len(), 2);
    }

    #[test]
    fn test_retire_drops_state() {
        let d = HttpStreamDissector::new("test");
        d.dissect(FLOW, &[chunk(0, b"GET / HT")]).unwrap();
        d.retire(FLOW);

        // A fresh complete head parses cleanly, untainted by old bytes
        let out = d
            .dissect(FLOW, &[chunk(1, b"GET / HTTP/1.1\r\n\r\n")])
            .unwrap();
        assert_eq!(out.vp_layers.len(), 1);
    }

    #[test]
    fn test_non_http_bytes_ignored() {
        let d = HttpStreamDissector::new("test");
        let out = d.dissect(FLOW, &[chunk(0, b"\x16\x03\x01\x02\x00")]).unwrap();
        assert!(out.vp_layers.is_empty());
    }
}
