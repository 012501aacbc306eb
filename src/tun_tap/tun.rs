use std::ffi::CStr;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::net::Ipv4Addr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::{mem, ptr};

use socket2::{Domain, Socket, Type};

use crate::error::ConfigError;
use crate::tunnel::Link;
use crate::{Result, errno};

/// Default MTU of the TUN interface. Leaves room for the outer IP and GRE
/// headers on common paths without relying on fragmentation.
pub const TUN_MTU: u32 = 1400;

/// Represents a TUN (network TUNnel) interface, a virtual network device that
/// acts as a software loopback for transferring IP packets between user space
/// and the kernel, operating at layer 3 of the OSI model.
///
/// The device is opened without packet information, so every read and write
/// carries exactly one raw IP packet.
#[derive(Debug)]
pub struct Tun {
    fd: File,
    name: String,
}

impl Tun {
    /// Creates a new TUN virtual network device without packet information.
    ///
    /// The name may contain a `%d` template, which the kernel replaces with
    /// the first free index.
    ///
    /// # Errors
    ///
    /// Returns an error if the name does not fit in `IFNAMSIZ` or contains a
    /// null byte, if the TUN device cannot be opened, or if the process does
    /// not have the required `CAP_NET_ADMIN` privilege.
    pub fn new(dev: &str) -> Result<Self> {
        // The interface name, if provided, must be less than `IFNAMSIZ` bytes.
        if dev.len() >= libc::IFNAMSIZ || dev.contains('\0') {
            return Err(ConfigError::InterfaceName(dev.to_string()).into());
        }

        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/net/tun")?;

        let mut ifr = ifreq(dev);

        // IFF_TUN   - TUN device (no Ethernet headers)
        //
        // IFF_NO_PI - Do not provide packet information
        ifr.ifr_ifru.ifru_flags = (libc::IFF_TUN | libc::IFF_NO_PI) as libc::c_short;

        if unsafe { libc::ioctl(fd.as_raw_fd(), libc::TUNSETIFF, &raw mut ifr) } == -1 {
            return Err(errno!(
                "failed to bind network interface with TUN file handle"
            ));
        }

        // SAFETY: `ifr_name` remains null-terminated after copying `dev`.
        let name = unsafe {
            CStr::from_ptr(ifr.ifr_name.as_ptr())
                .to_string_lossy()
                .into_owned()
        };

        Ok(Self { fd, name })
    }

    /// Returns the assigned name of the TUN virtual network device.
    ///
    /// The name given for creating the TUN device is more of a suggestion
    /// to the kernel rather than a requirement, so the assigned name may be
    /// different than the one originally provided.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the MTU, address and netmask of the interface.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the `SIOCSIF*` requests fail.
    pub fn configure(&self, mtu: u32, addr: Ipv4Addr, netmask: Ipv4Addr) -> Result<()> {
        let ctl = control_socket()?;

        let mut ifr = ifreq(&self.name);
        ifr.ifr_ifru.ifru_mtu = mtu as libc::c_int;
        if unsafe { libc::ioctl(ctl.as_raw_fd(), libc::SIOCSIFMTU, &raw mut ifr) } == -1 {
            return Err(errno!("failed to set MTU {mtu} on {}", self.name));
        }

        let mut ifr = ifreq(&self.name);
        ifr.ifr_ifru.ifru_addr = sockaddr(addr);
        if unsafe { libc::ioctl(ctl.as_raw_fd(), libc::SIOCSIFADDR, &raw mut ifr) } == -1 {
            return Err(errno!("failed to set address {addr} on {}", self.name));
        }

        let mut ifr = ifreq(&self.name);
        ifr.ifr_ifru.ifru_netmask = sockaddr(netmask);
        if unsafe { libc::ioctl(ctl.as_raw_fd(), libc::SIOCSIFNETMASK, &raw mut ifr) } == -1 {
            return Err(errno!("failed to set netmask {netmask} on {}", self.name));
        }

        Ok(())
    }

    /// Brings the interface up.
    ///
    /// # Errors
    ///
    /// Returns an error if the interface flags cannot be read or updated.
    pub fn up(&self) -> Result<()> {
        let ctl = control_socket()?;
        let mut ifr = ifreq(&self.name);

        if unsafe { libc::ioctl(ctl.as_raw_fd(), libc::SIOCGIFFLAGS, &raw mut ifr) } == -1 {
            return Err(errno!("failed to get flags of {}", self.name));
        }

        unsafe {
            ifr.ifr_ifru.ifru_flags |= (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_short;
        }

        if unsafe { libc::ioctl(ctl.as_raw_fd(), libc::SIOCSIFFLAGS, &raw mut ifr) } == -1 {
            return Err(errno!("failed to bring up {}", self.name));
        }

        Ok(())
    }
}

impl Link for Tun {
    /// Receives one IP packet. Blocks until the kernel routes a packet to the
    /// device.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.fd).read(buf)
    }

    /// Sends one IP packet to the kernel.
    ///
    /// Many errors are silently handled by the OS kernel, often resulting in
    /// dropped packets, e.g. on checksum validation failure or unassigned
    /// destination addresses.
    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        (&self.fd).write(buf)
    }
}

impl AsRawFd for Tun {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Returns a zeroed `ifreq` carrying the interface name.
fn ifreq(dev: &str) -> libc::ifreq {
    let mut ifr: libc::ifreq = unsafe { mem::zeroed() };

    unsafe {
        // SAFETY: `dev.len()` is less than `IFNAMSIZ`, checked in `Tun::new`,
        // so the name stays null-terminated.
        ptr::copy_nonoverlapping(
            dev.as_ptr(),
            ifr.ifr_name.as_mut_ptr() as *mut u8,
            dev.len(),
        );
    }

    ifr
}

/// Socket used only as a handle for interface configuration requests.
fn control_socket() -> Result<Socket> {
    Ok(Socket::new(Domain::IPV4, Type::DGRAM, None)?)
}

fn sockaddr(addr: Ipv4Addr) -> libc::sockaddr {
    let sin = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: 0,
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.octets()),
        },
        sin_zero: [0; 8],
    };

    // SAFETY: `sockaddr_in` and `sockaddr` have the same size, and
    // `sockaddr_in` is the layout the kernel expects for `AF_INET`.
    unsafe { mem::transmute::<libc::sockaddr_in, libc::sockaddr>(sin) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_name_too_long() {
        let name = "x".repeat(libc::IFNAMSIZ);

        assert!(matches!(
            Tun::new(&name),
            Err(crate::Error::Config(ConfigError::InterfaceName(_)))
        ));
    }

    #[test]
    fn sockaddr_layout() {
        let sa = sockaddr(Ipv4Addr::new(169, 254, 100, 2));

        assert_eq!(sa.sa_family, libc::AF_INET as libc::sa_family_t);
        // Port (2 bytes) followed by the address in network order.
        assert_eq!(&sa.sa_data[2..6], &[169u8 as libc::c_char, 254u8 as libc::c_char, 100, 2]);
    }
}
