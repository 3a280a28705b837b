//! IPv4 dissector.

use etherparse::Ipv4HeaderSlice;

use crate::dissect::{DissectOutput, Dissector};
use crate::error::DissectorError;
use crate::packet::{AttrValue, Layer};

use super::ethernet::ETHERTYPE_IPV4;

/// IP protocol numbers surfaced to the transport dissectors.
pub const IP_PROTO_TCP: u8 = 6;
pub const IP_PROTO_UDP: u8 = 17;

/// IPv4 dissector. Fires on Ethernet layers with the IPv4 ethertype.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ipv4Dissector;

impl Dissector for Ipv4Dissector {
    fn name(&self) -> &str {
        "ipv4"
    }

    fn accepts(&self, layer: &Layer) -> bool {
        layer.name() == "Eth"
            && layer.attr("ethertype").and_then(|v| v.as_int()) == Some(ETHERTYPE_IPV4 as i64)
    }

    fn dissect(&self, layer: &Layer, namespace: &str) -> Result<DissectOutput, DissectorError> {
        let data = layer.payload();
        let ip = Ipv4HeaderSlice::from_slice(data).map_err(|e| DissectorError::Failed {
            dissector: "ipv4".into(),
            reason: e.to_string(),
        })?;

        let header_len = ip.slice().len();
        // Trust total_len when sane; truncated captures fall back to the
        // available bytes.
        let total = (ip.total_len() as usize).clamp(header_len, data.len());

        let out_layer = Layer::new(namespace, "Ipv4")
            .with_payload(data.slice(header_len..total))
            .with_attr("src", AttrValue::Str(ip.source_addr().to_string().into()))
            .with_attr(
                "dst",
                AttrValue::Str(ip.destination_addr().to_string().into()),
            )
            .with_attr("protocol", AttrValue::Int(ip.protocol().0 as i64))
            .with_attr("ttl", AttrValue::Int(ip.ttl() as i64));

        Ok(DissectOutput::new().with_layer(out_layer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    /// Minimal IPv4 header (20 bytes, TCP protocol) plus 4 payload bytes.
    pub(crate) fn ipv4_packet(protocol: u8, payload: &[u8]) -> Vec<u8> {
        let total_len = 20 + payload.len() as u16;
        let mut data = vec![
            0x45, 0x00, // version + IHL, DSCP
            (total_len >> 8) as u8,
            total_len as u8, // total length
            0x00, 0x00, // identification
            0x00, 0x00, // flags + fragment offset
            0x40, protocol, // TTL, protocol
            0x00, 0x00, // checksum
            10, 0, 0, 1, // src
            10, 0, 0, 2, // dst
        ];
        data.extend_from_slice(payload);
        data
    }

    fn eth_layer(payload: Vec<u8>) -> Layer {
        Layer::new("test", "Eth")
            .with_payload(Bytes::from(payload))
            .with_attr("ethertype", AttrValue::Int(ETHERTYPE_IPV4 as i64))
    }

    #[test]
    fn test_parses_addresses_and_protocol() {
        let layer = eth_layer(ipv4_packet(IP_PROTO_TCP, b"PAYL"));
        let out = Ipv4Dissector.dissect(&layer, "test").unwrap();

        let ip = &out.layers[0];
        assert_eq!(ip.name(), "Ipv4");
        assert_eq!(ip.attr("src").and_then(|v| v.as_str()), Some("10.0.0.1"));
        assert_eq!(ip.attr("dst").and_then(|v| v.as_str()), Some("10.0.0.2"));
        assert_eq!(
            ip.attr("protocol").and_then(|v| v.as_int()),
            Some(IP_PROTO_TCP as i64)
        );
        assert_eq!(ip.payload().as_ref(), b"PAYL");
    }

    #[test]
    fn test_accepts_only_ipv4_ethertype() {
        let d = Ipv4Dissector;
        let arp = Layer::new("test", "Eth").with_attr("ethertype", AttrValue::Int(0x0806));
        assert!(!d.accepts(&arp));
        assert!(d.accepts(&eth_layer(Vec::new())));
        assert!(!d.accepts(&Layer::new("test", "raw")));
    }

    #[test]
    fn test_short_header_fails() {
        let layer = eth_layer(vec![0x45, 0x00, 0x00]);
        assert!(Ipv4Dissector.dissect(&layer, "test").is_err());
    }
}
