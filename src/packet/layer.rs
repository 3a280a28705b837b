//! Layer and attribute value types.
//!
//! A [`Layer`] is a namespaced logical protocol view over some slice of a
//! packet's bytes. Layers are built up by dissectors and are immutable once
//! the dissector returns. Attribute storage is a small ordered list rather
//! than a map: most layers carry well under a dozen attributes, so linear
//! search wins over hashing.

use bytes::Bytes;
use compact_str::CompactString;
use smallvec::SmallVec;

/// Attribute entry: (key, value). Keys are short protocol-defined strings.
pub type AttrEntry = (CompactString, AttrValue);

/// Tagged attribute value.
///
/// `Bytes` variants share the packet buffer rather than copying;
/// `Str` uses CompactString for small-string optimization.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// Signed integer (ports, counters, flags widen into this)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Raw bytes, shared with the packet buffer where possible
    Bytes(Bytes),
    /// Short string value
    Str(CompactString),
    /// Nested attribute object (e.g. decoded option lists)
    Nested(Vec<AttrEntry>),
}

impl AttrValue {
    /// Try to get as i64.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get as str.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Namespaced logical protocol view of a span of packet bytes.
#[derive(Debug, Clone)]
pub struct Layer {
    namespace: CompactString,
    name: CompactString,
    payload: Bytes,
    attrs: SmallVec<[AttrEntry; 8]>,
    confidence: f32,
}

impl Layer {
    /// Create a layer with full confidence and no attributes.
    pub fn new(namespace: impl Into<CompactString>, name: impl Into<CompactString>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            payload: Bytes::new(),
            attrs: SmallVec::new(),
            confidence: 1.0,
        }
    }

    /// Builder-style payload assignment.
    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = payload;
        self
    }

    /// Builder-style confidence assignment, clamped to [0, 1].
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Builder-style attribute append. Attribute order is preserved.
    pub fn with_attr(mut self, key: impl Into<CompactString>, value: AttrValue) -> Self {
        self.attrs.push((key.into(), value));
        self
    }

    /// Append an attribute in place.
    pub fn push_attr(&mut self, key: impl Into<CompactString>, value: AttrValue) {
        self.attrs.push((key.into(), value));
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Ordered attribute entries.
    pub fn attrs(&self) -> &[AttrEntry] {
        &self.attrs
    }

    /// Get an attribute value by key (linear search, N is small).
    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}
