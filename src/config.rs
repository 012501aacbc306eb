//! Command-line configuration.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use ipnet::Ipv4Net;

use crate::error::ConfigError;
use crate::tun_tap::TUN_MTU;

/// Default virtual subnet, a /30 in the link-local range.
pub const DEFAULT_SUBNET: &str = "169.254.100.0/30";

/// GRE hole puncher: a point-to-point IPv4 tunnel to a peer behind NAT.
#[derive(Debug, Clone, Parser)]
#[command(name = "grepunch", version, about)]
pub struct Config {
    /// External IP of the peer (IP of remote NAT)
    pub peer: Ipv4Addr,

    /// Subnet for local interface with the virtual peer IP
    #[arg(long, alias = "virt_subnet", default_value = DEFAULT_SUBNET)]
    pub virt_subnet: Ipv4Net,

    /// Daemonize
    #[arg(long)]
    pub daemon: bool,

    /// Log file name (stderr if not set)
    #[arg(long)]
    pub logfile: Option<PathBuf>,

    /// TUN interface name, `%d` is replaced by the kernel
    #[arg(long, default_value = "tun%d")]
    pub interface: String,

    /// MTU of the TUN interface
    #[arg(long, default_value_t = TUN_MTU)]
    pub mtu: u32,

    /// Seconds between keepalive probes; the peer is considered dead after
    /// three intervals without traffic
    #[arg(long, default_value_t = 5)]
    pub keepalive_secs: u64,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    /// Checks values clap cannot validate on its own.
    ///
    /// # Errors
    ///
    /// Returns [ConfigError::KeepaliveInterval] for a zero interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keepalive_secs == 0 {
            return Err(ConfigError::KeepaliveInterval);
        }

        Ok(())
    }

    /// Returns the keepalive interval.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::try_parse_from(["grepunch", "203.0.113.7"]).unwrap();

        assert_eq!(config.peer, Ipv4Addr::new(203, 0, 113, 7));
        assert_eq!(config.virt_subnet, DEFAULT_SUBNET.parse::<Ipv4Net>().unwrap());
        assert!(!config.daemon);
        assert!(config.logfile.is_none());
        assert_eq!(config.interface, "tun%d");
        assert_eq!(config.mtu, 1400);
        assert_eq!(config.keepalive_interval(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn all_options() {
        let config = Config::try_parse_from([
            "grepunch",
            "198.51.100.2",
            "--virt-subnet",
            "10.9.0.0/29",
            "--daemon",
            "--logfile",
            "/var/log/grepunch.log",
            "--interface",
            "punch0",
            "--mtu",
            "1280",
            "--keepalive-secs",
            "2",
            "-v",
        ])
        .unwrap();

        assert_eq!(config.virt_subnet.to_string(), "10.9.0.0/29");
        assert!(config.daemon);
        assert_eq!(
            config.logfile.as_deref(),
            Some(std::path::Path::new("/var/log/grepunch.log"))
        );
        assert_eq!(config.interface, "punch0");
        assert_eq!(config.mtu, 1280);
        assert_eq!(config.keepalive_interval(), Duration::from_secs(2));
        assert!(config.verbose);
    }

    #[test]
    fn underscore_subnet_flag_accepted() {
        let config =
            Config::try_parse_from(["grepunch", "1.2.3.4", "--virt_subnet", "10.7.0.0/30"])
                .unwrap();

        assert_eq!(config.virt_subnet.to_string(), "10.7.0.0/30");
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(Config::try_parse_from(["grepunch"]).is_err());
        assert!(Config::try_parse_from(["grepunch", "not-an-ip"]).is_err());
        assert!(
            Config::try_parse_from(["grepunch", "1.2.3.4", "--virt-subnet", "10.0.0.0/33"])
                .is_err()
        );

        let config =
            Config::try_parse_from(["grepunch", "1.2.3.4", "--keepalive-secs", "0"]).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::KeepaliveInterval)
        ));
    }
}
