//! GRE encapsulation as used on the tunnel's raw socket.
//!
//! Only the base header of RFC 2784 is used: no checksum, key or sequence
//! number, and the payload is always IPv4.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |C|       Reserved0       | Ver |         Protocol Type         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::ops::Range;

use crate::net::ParseError;
use crate::net::ipv4::Ipv4Header;

/// IP protocol number of GRE.
pub const IPPROTO_GRE: i32 = 47;

/// Length of the GRE header in bytes.
pub const GRE_HEADER_LEN: usize = 4;

/// No flags, version 0, protocol type IPv4 (Ethertype 0x0800).
pub const GRE_HEADER: [u8; GRE_HEADER_LEN] = [0x00, 0x00, 0x08, 0x00];

/// Locates the tunneled packet inside a datagram read from the raw GRE
/// socket.
///
/// Raw IPv4 sockets deliver the outer IP header along with the payload, so
/// the returned range skips both the outer header (sized by its IHL) and the
/// GRE header.
///
/// # Errors
///
/// Returns an error if the outer header is malformed, the datagram is too
/// short to hold a GRE header, or the GRE header is not [GRE_HEADER].
pub fn decapsulate(datagram: &[u8]) -> Result<Range<usize>, ParseError> {
    let outer_len = Ipv4Header::try_from(datagram)?.header_len();
    let inner_start = outer_len + GRE_HEADER_LEN;

    if datagram.len() < inner_start {
        return Err(ParseError::Truncated {
            provided: datagram.len(),
            minimum: inner_start,
        });
    }

    let header = &datagram[outer_len..inner_start];
    if header != GRE_HEADER {
        return Err(ParseError::UnexpectedGreHeader([
            header[0], header[1], header[2], header[3],
        ]));
    }

    Ok(inner_start..datagram.len())
}
