//! Keepalive probe sent to punch and hold the NAT binding.

use crate::net::AddressPlan;
use crate::net::gre::{GRE_HEADER, GRE_HEADER_LEN};
use crate::net::ipv4::{self, CHECKSUM_OFFSET, DST_OFFSET, MIN_HEADER_LEN, SRC_OFFSET};

/// Minimal IPv4 header with no payload: total length 20, identification 1,
/// TTL 64, protocol ICMP, zeroed addresses, checksum valid for the zeroed
/// addresses.
const TEMPLATE: [u8; MIN_HEADER_LEN] = [
    0x45, 0x00, 0x00, 0x14, 0x00, 0x01, 0x00, 0x00, 0x40, 0x01, 0x7a, 0xe9, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00,
];

/// The keepalive probe, ready to send on the raw socket.
///
/// Sent periodically to keep the NAT binding open and to tell the peer this
/// end is alive. The peer recognizes it by its ICMP protocol number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepaliveProbe {
    datagram: [u8; GRE_HEADER_LEN + MIN_HEADER_LEN],
}

impl KeepaliveProbe {
    /// Builds the probe from the local to the peer virtual address.
    pub fn new(plan: &AddressPlan) -> Self {
        let mut packet = TEMPLATE;
        let checksum = u16::from_be_bytes([
            packet[CHECKSUM_OFFSET],
            packet[CHECKSUM_OFFSET + 1],
        ]);
        let checksum = ipv4::checksum_fixup(
            checksum,
            &[
                (ipv4::addr_at(&TEMPLATE, SRC_OFFSET), plan.local_octets()),
                (ipv4::addr_at(&TEMPLATE, DST_OFFSET), plan.peer_octets()),
            ],
        );

        packet[SRC_OFFSET..SRC_OFFSET + 4].copy_from_slice(&plan.local_octets());
        packet[DST_OFFSET..DST_OFFSET + 4].copy_from_slice(&plan.peer_octets());
        packet[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_be_bytes());

        let mut datagram = [0u8; GRE_HEADER_LEN + MIN_HEADER_LEN];
        datagram[..GRE_HEADER_LEN].copy_from_slice(&GRE_HEADER);
        datagram[GRE_HEADER_LEN..].copy_from_slice(&packet);

        Self { datagram }
    }

    /// Returns the probe's IPv4 packet.
    pub fn packet(&self) -> &[u8] {
        &self.datagram[GRE_HEADER_LEN..]
    }

    /// Returns the probe prefixed with the GRE header.
    pub fn datagram(&self) -> &[u8] {
        &self.datagram
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::ipv4::{Ipv4Header, Protocol};

    fn plan(subnet: &str) -> AddressPlan {
        AddressPlan::new(subnet.parse().unwrap()).unwrap()
    }

    #[test]
    fn template_checksum_valid() {
        assert_eq!(ipv4::checksum(&TEMPLATE), 0x7ae9);
    }

    #[test]
    fn probe_for_default_subnet() {
        let probe = KeepaliveProbe::new(&plan("169.254.100.0/30"));
        let header = Ipv4Header::try_from(probe.packet()).unwrap();

        assert_eq!(header.src(), [169, 254, 100, 2]);
        assert_eq!(header.dst(), [169, 254, 100, 1]);
        assert_eq!(header.protocol(), Protocol::ICMP);
        assert_eq!(header.total_len(), 20);

        // Independent recomputation over the substituted header.
        assert_eq!(header.header_checksum(), ipv4::checksum(probe.packet()));
        assert!(header.is_valid_checksum());
    }

    #[test]
    fn probe_checksum_for_extreme_addresses() {
        for subnet in ["0.0.0.0/0", "255.255.255.254/31", "10.0.0.0/8"] {
            let probe = KeepaliveProbe::new(&plan(subnet));
            let header = Ipv4Header::try_from(probe.packet()).unwrap();

            assert!(header.is_valid_checksum(), "{subnet}");
        }
    }

    #[test]
    fn datagram_is_gre_prefixed() {
        let probe = KeepaliveProbe::new(&plan("169.254.100.0/30"));

        assert_eq!(probe.datagram().len(), 24);
        assert_eq!(&probe.datagram()[..4], &GRE_HEADER);
        assert_eq!(&probe.datagram()[4..], probe.packet());
    }
}
