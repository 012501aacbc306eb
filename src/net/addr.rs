//! Virtual endpoint addresses derived from the configured subnet.
//!
//! Both ends of the tunnel configure the same subnet and take the highest
//! usable host as their own address and the lowest as the peer's. Inbound
//! frames are rewritten to these addresses, so the two ends agree without
//! any negotiation.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::error::ConfigError;

/// The pair of virtual addresses used on the TUN interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPlan {
    subnet: Ipv4Net,
    local: Ipv4Addr,
    peer: Ipv4Addr,
}

impl AddressPlan {
    /// Derives the local (maximum usable host) and peer (minimum usable host)
    /// addresses of `subnet`.
    ///
    /// # Errors
    ///
    /// Returns [ConfigError::TooFewHosts] if the subnet has fewer than two
    /// usable host addresses.
    pub fn new(subnet: Ipv4Net) -> Result<Self, ConfigError> {
        let subnet = subnet.trunc();
        let mut hosts = subnet.hosts();

        match (hosts.next(), hosts.next_back()) {
            (Some(peer), Some(local)) => Ok(Self {
                subnet,
                local,
                peer,
            }),
            _ => Err(ConfigError::TooFewHosts { subnet }),
        }
    }

    /// Returns the configured subnet, with host bits cleared.
    pub fn subnet(&self) -> Ipv4Net {
        self.subnet
    }

    /// Returns the netmask of the subnet.
    pub fn netmask(&self) -> Ipv4Addr {
        self.subnet.netmask()
    }

    /// Returns the address of this end of the tunnel.
    pub fn local(&self) -> Ipv4Addr {
        self.local
    }

    /// Returns the address the remote end is reachable at through the tunnel.
    pub fn peer(&self) -> Ipv4Addr {
        self.peer
    }

    /// Returns the local address in network byte order.
    pub fn local_octets(&self) -> [u8; 4] {
        self.local.octets()
    }

    /// Returns the peer address in network byte order.
    pub fn peer_octets(&self) -> [u8; 4] {
        self.peer.octets()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(subnet: &str) -> Result<AddressPlan, ConfigError> {
        AddressPlan::new(subnet.parse().unwrap())
    }

    #[test]
    fn default_subnet() {
        let plan = plan("169.254.100.0/30").unwrap();

        assert_eq!(plan.local(), Ipv4Addr::new(169, 254, 100, 2));
        assert_eq!(plan.peer(), Ipv4Addr::new(169, 254, 100, 1));
        assert_eq!(plan.local_octets(), [169, 254, 100, 2]);
        assert_eq!(plan.peer_octets(), [169, 254, 100, 1]);
        assert_eq!(plan.netmask(), Ipv4Addr::new(255, 255, 255, 252));
        assert_eq!(plan.local().to_string(), "169.254.100.2");
    }

    #[test]
    fn larger_subnets_use_extreme_hosts() {
        let narrow = plan("10.8.0.0/24").unwrap();
        assert_eq!(narrow.local(), Ipv4Addr::new(10, 8, 0, 254));
        assert_eq!(narrow.peer(), Ipv4Addr::new(10, 8, 0, 1));

        let wide = plan("10.0.0.0/8").unwrap();
        assert_eq!(wide.local(), Ipv4Addr::new(10, 255, 255, 254));
        assert_eq!(wide.peer(), Ipv4Addr::new(10, 0, 0, 1));
    }

    #[test]
    fn host_bits_are_ignored() {
        let plan = plan("169.254.100.3/30").unwrap();

        assert_eq!(plan.subnet().to_string(), "169.254.100.0/30");
        assert_eq!(plan.local(), Ipv4Addr::new(169, 254, 100, 2));
    }

    #[test]
    fn point_to_point_subnet() {
        let plan = plan("192.0.2.4/31").unwrap();

        assert_eq!(plan.local(), Ipv4Addr::new(192, 0, 2, 5));
        assert_eq!(plan.peer(), Ipv4Addr::new(192, 0, 2, 4));
    }

    #[test]
    fn single_host_subnet_invalid() {
        assert!(matches!(
            plan("192.0.2.1/32"),
            Err(ConfigError::TooFewHosts { .. })
        ));
    }

    #[test]
    fn all_subnets_local_is_max_peer_is_min() {
        for prefix in 0..=31u8 {
            let subnet = Ipv4Net::new(Ipv4Addr::new(172, 16, 0, 0), prefix).unwrap();
            let plan = AddressPlan::new(subnet).unwrap();

            assert!(plan.peer() < plan.local(), "/{prefix}");
            assert!(subnet.contains(&plan.local()));
            assert!(subnet.contains(&plan.peer()));
            if prefix < 31 {
                assert_eq!(u32::from(plan.peer()), u32::from(subnet.network()) + 1);
                assert_eq!(u32::from(plan.local()), u32::from(subnet.broadcast()) - 1);
            }
        }
    }
}
