//! GRE hole puncher: a point-to-point IPv4 tunnel between two hosts behind
//! NAT.
//!
//! Traffic routed to a local TUN interface is encapsulated in GRE and sent on
//! a raw socket to the peer's external address. Periodic keepalive probes open
//! and hold the NAT binding and tell each end whether the other is alive.
//!
//! Both ends configure the same virtual subnet. Each takes the highest usable
//! host as its own address and the lowest as the peer's, and inbound packets
//! are rewritten accordingly, so no negotiation is needed.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

#[cfg(not(target_os = "linux"))]
compile_error!(
    "This crate is only compatible with Linux systems that support TUN/TAP devices and the epoll interface."
);

pub mod config;
pub mod daemon;
pub mod error;
pub mod log;
pub mod net;
pub mod tun_tap;
pub mod tunnel;

pub use config::Config;
pub use error::{ConfigError, Error, Result, TransportCondition};
pub(crate) use error::errno;
