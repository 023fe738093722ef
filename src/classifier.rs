use std::sync::Arc;

use crate::error::{Error, Result};
use crate::openflow0x01::message::parse_payload;
use crate::openflow0x01::{PacketIn, Payload};
use crate::packet::{EthTyp, MacAddr};
use crate::topology::Topology;

/// An unmatched packet whose endpoints are known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Flow {
    /// Switch that reported the packet.
    pub switch: u64,
    pub in_port: u16,
    pub src: MacAddr,
    pub dst: MacAddr,
    pub payload: Payload,
}

/// Turns packet-in events into flows between known hosts.
pub struct PacketClassifier {
    topology: Arc<dyn Topology>,
}

impl PacketClassifier {
    pub fn new(topology: Arc<dyn Topology>) -> PacketClassifier {
        PacketClassifier { topology }
    }

    /// Classify a packet reported by `switch`.
    ///
    /// LLDP and IPv6 frames are ignored. A broadcast (or all-zero) destination is only routable
    /// through its ARP payload, whose addresses are resolved against the topology.
    pub fn classify(&self, switch: u64, pkt: PacketIn) -> Result<Flow> {
        let packet = parse_payload(&pkt.input_payload).map_err(Error::Malformed)?;
        if packet.dl_typ == EthTyp::Lldp as u16 || packet.dl_typ == EthTyp::Ipv6 as u16 {
            return Err(Error::Filtered(packet.dl_typ));
        }

        let (mut src, mut dst) = (packet.dl_src, packet.dl_dst);
        if dst.is_broadcast() || dst.is_zero() {
            let arp = packet.arp().ok_or(Error::Unroutable)?;
            dst = self
                .topology
                .host_by_ip(arp.target_ip())
                .ok_or(Error::UnknownDestination(arp.target_ip()))?;
            match self.topology.host_by_ip(arp.sender_ip()) {
                Some(mac) => src = mac,
                // the frame's own source still names the sender
                None => log::debug!(
                    "[Classifier] sender {} unknown to the topology, keeping {}",
                    arp.sender_ip(),
                    src
                ),
            }
        }

        Ok(Flow {
            switch,
            in_port: pkt.port,
            src,
            dst,
            payload: pkt.input_payload,
        })
    }
}
