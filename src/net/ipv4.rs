//! IPv4 header parsing and checksum maintenance.
//!
//! The tunnel never builds full packets. It only inspects the fixed part of
//! the header and substitutes addresses in place, so the checksum is kept
//! valid with the incremental update from [RFC 1624] rather than a full
//! recomputation.
//!
//! [RFC 1624]: https://www.rfc-editor.org/rfc/rfc1624

use crate::net::ParseError;

/// Minimum length of an IPv4 header in bytes.
pub const MIN_HEADER_LEN: usize = 20;

/// Offset of the `protocol` field.
pub const PROTOCOL_OFFSET: usize = 9;

/// Offset of the `header checksum` field.
pub const CHECKSUM_OFFSET: usize = 10;

/// Offset of the `source address` field.
pub const SRC_OFFSET: usize = 12;

/// Offset of the `destination address` field.
pub const DST_OFFSET: usize = 16;

/// IPv4 Datagram Header.
///
/// # Note
///
/// IPv4 options are accepted when parsing but not retained, so
/// [Ipv4Header::to_be_bytes] and [Ipv4Header::compute_header_checksum] only
/// describe option-less headers.
///
/// RFC 791 (3.1)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |Version|  IHL  |Type of Service|          Total Length         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Identification        |Flags|      Fragment Offset    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Time to Live |    Protocol   |         Header Checksum       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Source Address                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Destination Address                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Options                    |    Padding    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Version in the upper 4 bits, IHL (in 32-bit words) in the lower 4.
    version_ihl: u8,
    tos: u8,
    /// Length of the datagram, including header and payload.
    total_len: u16,
    id: u16,
    flags_and_offset: u16,
    ttl: u8,
    protocol: Protocol,
    header_checksum: u16,
    src_addr: [u8; 4],
    dst_addr: [u8; 4],
}

impl Ipv4Header {
    /// Returns the `version` field of the IPv4 header.
    pub fn version(&self) -> u8 {
        self.version_ihl >> 4
    }

    /// Returns the `IHL` field of the IPv4 header, specified in 32-bit words.
    pub fn ihl(&self) -> u8 {
        self.version_ihl & 0xF
    }

    /// Returns the `total length` field of the IPv4 header.
    pub fn total_len(&self) -> u16 {
        self.total_len
    }

    /// Returns the `identification` field of the IPv4 header.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Returns the `time to live` field of the IPv4 header.
    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    /// Returns the `protocol` field of the IPv4 header.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Returns the `header checksum` field of the IPv4 header.
    pub fn header_checksum(&self) -> u16 {
        self.header_checksum
    }

    /// Returns `true` if the IPv4 header checksum is valid.
    pub fn is_valid_checksum(&self) -> bool {
        self.header_checksum == self.compute_header_checksum()
    }

    /// Returns the `source address` field of the IPv4 header.
    pub fn src(&self) -> [u8; 4] {
        self.src_addr
    }

    /// Returns the `destination address` field of the IPv4 header.
    pub fn dst(&self) -> [u8; 4] {
        self.dst_addr
    }

    /// Returns the length of the IPv4 header in bytes, including options.
    pub fn header_len(&self) -> usize {
        (self.ihl() as usize) << 2
    }

    /// Returns the computed checksum of the IPv4 header.
    pub fn compute_header_checksum(&self) -> u16 {
        checksum(&self.to_be_bytes())
    }

    /// Returns the IPv4 header as a byte array in big-endian (network) byte
    /// order.
    #[allow(clippy::wrong_self_convention)]
    pub fn to_be_bytes(&self) -> [u8; MIN_HEADER_LEN] {
        let mut raw_header = [0u8; MIN_HEADER_LEN];

        raw_header[0] = self.version_ihl;
        raw_header[1] = self.tos;
        raw_header[2..4].copy_from_slice(&self.total_len.to_be_bytes());
        raw_header[4..6].copy_from_slice(&self.id.to_be_bytes());
        raw_header[6..8].copy_from_slice(&self.flags_and_offset.to_be_bytes());
        raw_header[8] = self.ttl;
        raw_header[PROTOCOL_OFFSET] = self.protocol.into();
        raw_header[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2]
            .copy_from_slice(&self.header_checksum.to_be_bytes());
        raw_header[SRC_OFFSET..SRC_OFFSET + 4].copy_from_slice(&self.src_addr);
        raw_header[DST_OFFSET..DST_OFFSET + 4].copy_from_slice(&self.dst_addr);

        raw_header
    }
}

impl TryFrom<&[u8]> for Ipv4Header {
    type Error = ParseError;

    fn try_from(header_raw: &[u8]) -> Result<Self, Self::Error> {
        if header_raw.len() < MIN_HEADER_LEN {
            return Err(ParseError::Truncated {
                provided: header_raw.len(),
                minimum: MIN_HEADER_LEN,
            });
        }

        let version_ihl = header_raw[0];

        if (version_ihl >> 4) != 4 {
            return Err(ParseError::InvalidVersion(version_ihl >> 4));
        }

        let header_len = ((version_ihl & 0xF) as usize) << 2;

        if header_len < MIN_HEADER_LEN {
            return Err(ParseError::InvalidIhl(version_ihl & 0xF));
        }

        if header_raw.len() < header_len {
            return Err(ParseError::Truncated {
                provided: header_raw.len(),
                minimum: header_len,
            });
        }

        let word = |at: usize| u16::from_be_bytes([header_raw[at], header_raw[at + 1]]);

        Ok(Self {
            version_ihl,
            tos: header_raw[1],
            total_len: word(2),
            id: word(4),
            flags_and_offset: word(6),
            ttl: header_raw[8],
            protocol: Protocol::from(header_raw[PROTOCOL_OFFSET]),
            header_checksum: word(CHECKSUM_OFFSET),
            src_addr: addr_at(header_raw, SRC_OFFSET),
            dst_addr: addr_at(header_raw, DST_OFFSET),
        })
    }
}

/// Assigned Internet Protocol Numbers relevant to the tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum Protocol {
    /// Internet Control Message, also used as the keepalive probe marker.
    ICMP,
    /// Transmission Control
    TCP,
    /// User Datagram
    UDP,
    /// Generic Routing Encapsulation
    GRE,
    /// Any other protocol number.
    Other(u8),
}

impl From<Protocol> for u8 {
    fn from(proto: Protocol) -> u8 {
        match proto {
            Protocol::ICMP => 1,
            Protocol::TCP => 6,
            Protocol::UDP => 17,
            Protocol::GRE => 47,
            Protocol::Other(val) => val,
        }
    }
}

impl From<u8> for Protocol {
    fn from(val: u8) -> Protocol {
        match val {
            1 => Protocol::ICMP,
            6 => Protocol::TCP,
            17 => Protocol::UDP,
            47 => Protocol::GRE,
            _ => Protocol::Other(val),
        }
    }
}

/// Computes the IPv4 header checksum from scratch.
///
/// The checksum field is the 16 bit one's complement of the one's complement
/// sum of all 16 bit words in the header. For purposes of computing the
/// checksum, the value of the checksum field is zero.
pub fn checksum(header: &[u8]) -> u16 {
    let mut sum = 0u32;

    for (i, pair) in header.chunks(2).enumerate() {
        // Checksum field must be 0 for computation.
        if i == CHECKSUM_OFFSET / 2 {
            continue;
        }

        let word = u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]);
        sum += word as u32;

        if sum > 0xFFFF {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
    }

    !fold(sum)
}

/// Incrementally updates an IPv4 header checksum for address substitutions.
///
/// Each `(old, new)` pair replaces one 4-byte address. Following RFC 1624
/// (eqn. 3), `HC' = ~(~HC + ~m + m')`, the removed words are subtracted by
/// adding their one's complement, and the result is identical to
/// recomputing [checksum] over the substituted header.
pub fn checksum_fixup(checksum: u16, substitutions: &[([u8; 4], [u8; 4])]) -> u16 {
    let mut sum = (!checksum) as u32;

    for (old, new) in substitutions {
        for i in [0, 2] {
            sum += (!u16::from_be_bytes([old[i], old[i + 1]])) as u32;
            sum += u16::from_be_bytes([new[i], new[i + 1]]) as u32;
        }
    }

    !fold(sum)
}

/// Overwrites the source and destination addresses of the IPv4 packet in
/// place, keeping the header checksum valid.
///
/// # Panics
///
/// Panics if `packet` is shorter than [MIN_HEADER_LEN].
pub fn rewrite_addresses(packet: &mut [u8], src: [u8; 4], dst: [u8; 4]) {
    let old_src = addr_at(packet, SRC_OFFSET);
    let old_dst = addr_at(packet, DST_OFFSET);
    let old_checksum = u16::from_be_bytes([packet[CHECKSUM_OFFSET], packet[CHECKSUM_OFFSET + 1]]);

    let new_checksum = checksum_fixup(old_checksum, &[(old_src, src), (old_dst, dst)]);

    packet[SRC_OFFSET..SRC_OFFSET + 4].copy_from_slice(&src);
    packet[DST_OFFSET..DST_OFFSET + 4].copy_from_slice(&dst);
    packet[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&new_checksum.to_be_bytes());
}

/// Returns the 4-byte address stored at `offset`.
pub(crate) fn addr_at(buf: &[u8], offset: usize) -> [u8; 4] {
    [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]]
}

/// Folds the carries of a one's complement sum back into the lower 16 bits.
fn fold(mut sum: u32) -> u16 {
    while sum > 0xFFFF {
        // Adds the higher 16-bits to the lower 16-bits.
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    sum as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const HEADER: [u8; 20] = [
        0x45, 0x00, 0x00, 0x3c, 0xbe, 0xfa, 0x40, 0x00, 0x40, 0x06, 0xfa, 0x43, 0xc0, 0xa8, 0x00,
        0x01, 0xc0, 0xa8, 0x00, 0x2c,
    ];

    /// Substitutes the addresses and recomputes the checksum from scratch.
    fn recompute(mut header: [u8; 20], src: [u8; 4], dst: [u8; 4]) -> u16 {
        header[SRC_OFFSET..SRC_OFFSET + 4].copy_from_slice(&src);
        header[DST_OFFSET..DST_OFFSET + 4].copy_from_slice(&dst);
        checksum(&header)
    }

    proptest! {
        #[test]
        fn fixup_matches_full_recomputation(
            mut header in prop::array::uniform20(any::<u8>()),
            src in prop::array::uniform4(any::<u8>()),
            dst in prop::array::uniform4(any::<u8>()),
        ) {
            header[0] = 0x45;
            let valid = checksum(&header);
            header[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&valid.to_be_bytes());

            let old_src = addr_at(&header, SRC_OFFSET);
            let old_dst = addr_at(&header, DST_OFFSET);

            prop_assert_eq!(
                checksum_fixup(valid, &[(old_src, src), (old_dst, dst)]),
                recompute(header, src, dst)
            );
        }

        #[test]
        fn header_parsing_no_panic(bytes in prop::collection::vec(any::<u8>(), 0..60)) {
            if let Ok(header) = Ipv4Header::try_from(&bytes[..]) {
                prop_assert!(header.header_len() <= bytes.len());
            }
        }
    }

    #[test]
    fn checksum_known_header() {
        assert_eq!(checksum(&HEADER), 0xFA43);

        let header = Ipv4Header::try_from(&HEADER[..]).unwrap();
        assert!(header.is_valid_checksum());
    }

    #[test]
    fn fixup_edge_addresses() {
        let edges = [[0u8; 4], [0xFF; 4], [0x00, 0xFF, 0x00, 0xFF], [0x80, 0, 0, 1]];

        for src in edges {
            for dst in edges {
                let mut header = HEADER;
                rewrite_addresses(&mut header, src, dst);

                assert_eq!(
                    u16::from_be_bytes([header[10], header[11]]),
                    recompute(HEADER, src, dst),
                    "src {src:?} dst {dst:?}"
                );
            }
        }
    }

    #[test]
    fn fixup_only_destination() {
        let new_dst = [10, 0, 0, 1];
        let fixed = checksum_fixup(0xFA43, &[(addr_at(&HEADER, DST_OFFSET), new_dst)]);

        assert_eq!(fixed, recompute(HEADER, addr_at(&HEADER, SRC_OFFSET), new_dst));
    }

    #[test]
    fn swapping_addresses_keeps_checksum() {
        let mut header = HEADER;
        rewrite_addresses(&mut header, [192, 168, 0, 44], [192, 168, 0, 1]);

        assert_eq!(&header[10..12], &[0xfa, 0x43]);
        assert_eq!(&header[12..16], &[192, 168, 0, 44]);
        assert_eq!(&header[16..20], &[192, 168, 0, 1]);
    }

    #[test]
    fn header_basic_valid() {
        let header = Ipv4Header::try_from(&HEADER[..]).unwrap();

        assert_eq!(header.version(), 4);
        assert_eq!(header.ihl(), 5);
        assert_eq!(header.header_len(), 20);
        assert_eq!(header.total_len(), 60);
        assert_eq!(header.id(), 48890);
        assert_eq!(header.ttl(), 64);
        assert_eq!(header.protocol(), Protocol::TCP);
        assert_eq!(header.header_checksum(), 0xFA43);
        assert_eq!(header.src(), [192, 168, 0, 1]);
        assert_eq!(header.dst(), [192, 168, 0, 44]);
        assert_eq!(header.to_be_bytes(), HEADER);
    }

    #[test]
    fn header_with_options_valid() {
        let mut bytes = [0u8; 24];
        bytes[..20].copy_from_slice(&HEADER);
        bytes[0] = 0x46;

        let header = Ipv4Header::try_from(&bytes[..]).unwrap();
        assert_eq!(header.header_len(), 24);

        assert!(Ipv4Header::try_from(&bytes[..22]).is_err());
    }

    #[test]
    fn header_invalid() {
        assert!(matches!(
            Ipv4Header::try_from(&HEADER[..14]),
            Err(ParseError::Truncated { provided: 14, minimum: 20 })
        ));

        let mut bytes = HEADER;
        bytes[0] = 0x65;
        assert!(matches!(
            Ipv4Header::try_from(&bytes[..]),
            Err(ParseError::InvalidVersion(6))
        ));

        bytes[0] = 0x43;
        assert!(matches!(
            Ipv4Header::try_from(&bytes[..]),
            Err(ParseError::InvalidIhl(3))
        ));
    }

    #[test]
    fn protocol_numbers() {
        assert_eq!(Protocol::from(1), Protocol::ICMP);
        assert_eq!(Protocol::from(47), Protocol::GRE);
        assert_eq!(Protocol::from(99), Protocol::Other(99));
        assert_eq!(u8::from(Protocol::UDP), 17);
        assert_eq!(u8::from(Protocol::Other(99)), 99);
    }
}
