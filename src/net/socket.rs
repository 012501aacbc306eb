//! Raw IPv4 socket carrying GRE to the peer.

use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::unix::io::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, Socket, Type};

use crate::net::gre::IPPROTO_GRE;
use crate::tunnel::Link;

/// A raw IPv4 socket for GRE, connected to the peer's external address.
///
/// Sending requires only the GRE header and payload; the kernel fills in the
/// outer IP header. Received datagrams include the outer IP header.
#[derive(Debug)]
pub struct GreSocket {
    socket: Socket,
    peer: Ipv4Addr,
}

impl GreSocket {
    /// Opens a raw GRE socket and connects it to `peer`, so only datagrams
    /// from the peer are received.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be created (missing
    /// `CAP_NET_RAW`) or connected.
    pub fn connect(peer: Ipv4Addr) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::from(IPPROTO_GRE)))?;
        socket.connect(&SocketAddrV4::new(peer, 0).into())?;

        Ok(Self { socket, peer })
    }

    /// Returns the external address of the peer.
    pub fn peer(&self) -> Ipv4Addr {
        self.peer
    }
}

impl Link for GreSocket {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.socket).read(buf)
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf)
    }
}

impl AsRawFd for GreSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}
