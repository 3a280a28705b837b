//! UDP dissector.

use etherparse::UdpHeaderSlice;

use crate::dissect::{DissectOutput, Dissector};
use crate::error::DissectorError;
use crate::packet::{AttrValue, Layer};

use super::ipv4::IP_PROTO_UDP;

/// UDP dissector. Fires on IPv4 layers carrying protocol 17.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpDissector;

impl Dissector for UdpDissector {
    fn name(&self) -> &str {
        "udp"
    }

    fn accepts(&self, layer: &Layer) -> bool {
        layer.name() == "Ipv4"
            && layer.attr("protocol").and_then(|v| v.as_int()) == Some(IP_PROTO_UDP as i64)
    }

    fn dissect(&self, layer: &Layer, namespace: &str) -> Result<DissectOutput, DissectorError> {
        let data = layer.payload();
        let udp = UdpHeaderSlice::from_slice(data).map_err(|e| DissectorError::Failed {
            dissector: "udp".into(),
            reason: e.to_string(),
        })?;

        let header_len = udp.slice().len();
        let out_layer = Layer::new(namespace, "Udp")
            .with_payload(data.slice(header_len..))
            .with_attr("src_port", AttrValue::Int(udp.source_port() as i64))
            .with_attr("dst_port", AttrValue::Int(udp.destination_port() as i64))
            .with_attr("length", AttrValue::Int(udp.length() as i64));

        Ok(DissectOutput::new().with_layer(out_layer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn udp_datagram(src: u16, dst: u16, payload: &[u8]) -> Vec<u8> {
        let len = 8 + payload.len() as u16;
        let mut data = Vec::new();
        data.extend_from_slice(&src.to_be_bytes());
        data.extend_from_slice(&dst.to_be_bytes());
        data.extend_from_slice(&len.to_be_bytes());
        data.extend_from_slice(&[0, 0]); // checksum
        data.extend_from_slice(payload);
        data
    }

    fn ipv4_layer(payload: Vec<u8>) -> Layer {
        Layer::new("test", "Ipv4")
            .with_payload(Bytes::from(payload))
            .with_attr("protocol", AttrValue::Int(IP_PROTO_UDP as i64))
    }

    #[test]
    fn test_parses_ports_and_payload() {
        let layer = ipv4_layer(udp_datagram(5353, 53, b"query"));
        let out = UdpDissector.dissect(&layer, "test").unwrap();

        let udp = &out.layers[0];
        assert_eq!(udp.name(), "Udp");
        assert_eq!(udp.attr("src_port").and_then(|v| v.as_int()), Some(5353));
        assert_eq!(udp.attr("dst_port").and_then(|v| v.as_int()), Some(53));
        assert_eq!(udp.payload().as_ref(), b"query");
    }

    #[test]
    fn test_accepts_udp_protocol_only() {
        let d = UdpDissector;
        assert!(d.accepts(&ipv4_layer(Vec::new())));
        let tcp = Layer::new("test", "Ipv4").with_attr("protocol", AttrValue::Int(6));
        assert!(!d.accepts(&tcp));
    }
}
