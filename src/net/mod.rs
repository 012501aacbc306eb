//! Wire formats and addressing for the tunnel: IPv4 headers, GRE
//! encapsulation, the virtual address plan, and the raw GRE socket.

pub mod addr;
pub mod gre;
pub mod ipv4;
pub mod socket;

pub use addr::AddressPlan;
pub use socket::GreSocket;

use thiserror::Error;

/// Errors from decoding a frame. These only ever cause the frame to be
/// dropped.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The buffer is shorter than the header it must contain.
    #[error("truncated frame: {provided} bytes (less than required {minimum} bytes)")]
    Truncated {
        /// The length of the input buffer provided.
        provided: usize,
        /// The number of bytes required.
        minimum: usize,
    },
    /// The IP version is not 4.
    #[error("invalid IP version: {0} (must be 4, indicating IPv4)")]
    InvalidVersion(u8),
    /// The IHL is smaller than the minimum header length.
    #[error("invalid IHL: {0} (must be at least 5)")]
    InvalidIhl(u8),
    /// The GRE header carries flags, a version, or a payload type this tunnel
    /// does not produce.
    #[error("unexpected GRE header: {0:02x?}")]
    UnexpectedGreHeader([u8; 4]),
}
