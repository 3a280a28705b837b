//! Built-in layer dissectors.
//!
//! A small default chain for IPv4 traffic over Ethernet: raw → Eth →
//! Ipv4 → Tcp/Udp. Sessions are free to register these, replace them, or
//! run entirely on plug-in dissectors.

mod ethernet;
mod ipv4;
mod tcp;
mod udp;

pub use ethernet::{EthDissector, ETHERTYPE_ARP, ETHERTYPE_IPV4, ETHERTYPE_IPV6};
pub use ipv4::{Ipv4Dissector, IP_PROTO_TCP, IP_PROTO_UDP};
pub use tcp::TcpDissector;
pub use udp::UdpDissector;

use std::sync::Arc;

use super::Dissector;

/// The default dissector chain, in registration order.
pub fn default_dissectors() -> Vec<Arc<dyn Dissector>> {
    vec![
        Arc::new(EthDissector),
        Arc::new(Ipv4Dissector),
        Arc::new(TcpDissector::new()),
        Arc::new(UdpDissector),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Layer;
    use bytes::Bytes;

    #[test]
    fn test_default_chain_links_up() {
        let dissectors = default_dissectors();
        assert_eq!(dissectors.len(), 4);

        // An Ethernet+IPv4+TCP frame walks the whole chain
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0u8; 12]); // macs
        frame.extend_from_slice(&0x0800u16.to_be_bytes());
        let tcp = {
            let mut seg = Vec::new();
            seg.extend_from_slice(&40000u16.to_be_bytes());
            seg.extend_from_slice(&80u16.to_be_bytes());
            seg.extend_from_slice(&[0u8; 8]); // seq + ack
            seg.push(0x50);
            seg.push(0x18);
            seg.extend_from_slice(&[0u8; 4]); // window + checksum
            seg.extend_from_slice(&[0u8; 2]); // urgent
            seg.extend_from_slice(b"hi");
            seg
        };
        let total_len = 20 + tcp.len() as u16;
        frame.extend_from_slice(&[0x45, 0x00]);
        frame.extend_from_slice(&total_len.to_be_bytes());
        frame.extend_from_slice(&[0, 0, 0, 0, 0x40, 6, 0, 0]);
        frame.extend_from_slice(&[10, 0, 0, 1, 10, 0, 0, 2]);
        frame.extend_from_slice(&tcp);

        let mut layer = Layer::new("t", "raw").with_payload(Bytes::from(frame));
        let mut names = vec!["raw".to_string()];
        // Walk the chain one hop at a time
        for _ in 0..3 {
            let next = dissectors
                .iter()
                .find(|d| d.accepts(&layer))
                .expect("chain should continue");
            let out = next.dissect(&layer, "t").unwrap();
            layer = out.layers.into_iter().next().unwrap();
            names.push(layer.name().to_string());
        }
        assert_eq!(names, vec!["raw", "Eth", "Ipv4", "Tcp"]);
    }
}
