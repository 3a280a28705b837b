//! Ethernet II dissector.

use etherparse::Ethernet2HeaderSlice;

use crate::dissect::{DissectOutput, Dissector};
use crate::error::DissectorError;
use crate::packet::{AttrValue, Layer};

/// EtherType values surfaced as attributes.
pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_IPV6: u16 = 0x86DD;

/// Ethernet II dissector. Fires on the raw layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct EthDissector;

fn format_mac(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

impl Dissector for EthDissector {
    fn name(&self) -> &str {
        "eth"
    }

    fn accepts(&self, layer: &Layer) -> bool {
        layer.name() == "raw"
    }

    fn dissect(&self, layer: &Layer, namespace: &str) -> Result<DissectOutput, DissectorError> {
        let data = layer.payload();
        let eth = Ethernet2HeaderSlice::from_slice(data).map_err(|e| DissectorError::Failed {
            dissector: "eth".into(),
            reason: e.to_string(),
        })?;

        let header_len = eth.slice().len();
        let out_layer = Layer::new(namespace, "Eth")
            .with_payload(data.slice(header_len..))
            .with_attr("src", AttrValue::Str(format_mac(&eth.source()).into()))
            .with_attr("dst", AttrValue::Str(format_mac(&eth.destination()).into()))
            .with_attr("ethertype", AttrValue::Int(eth.ether_type().0 as i64));

        Ok(DissectOutput::new().with_layer(out_layer))
    }
}
