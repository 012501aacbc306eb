//! The tunnel data plane: keepalive probe, peer liveness, the forwarder, and
//! the event loop driving them.

pub mod event_loop;
pub mod forwarder;
pub mod liveness;
pub mod probe;

use std::io;

use tracing::{error, info, info_span};

use crate::Result;
use crate::config::Config;
use crate::net::{AddressPlan, GreSocket};
use crate::tun_tap::Tun;

pub use forwarder::{Direction, Forwarder, Scheduler, Stats};
pub use liveness::{KeepaliveTracker, Liveness, Observed, Transition};
pub use probe::KeepaliveProbe;

/// A packet-oriented endpoint: every call moves exactly one frame.
pub trait Link {
    /// Receives one frame into `buf`, returning its length.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Sends one frame.
    fn send(&self, buf: &[u8]) -> io::Result<usize>;
}

/// Opens the raw GRE socket and the TUN interface, punches the NAT with an
/// initial keepalive, and forwards until shutdown.
///
/// # Errors
///
/// Any error is logged before it is returned.
pub fn punch_and_serve(config: &Config) -> Result<()> {
    serve(config).inspect_err(|err| error!("{err}"))
}

fn serve(config: &Config) -> Result<()> {
    config.validate()?;
    let plan = AddressPlan::new(config.virt_subnet)?;

    let socket = GreSocket::connect(config.peer).map_err(|err| {
        io::Error::new(
            err.kind(),
            format!("failed to open GRE socket to {}: {err}", config.peer),
        )
    })?;

    let tun = Tun::new(&config.interface)?;
    tun.configure(config.mtu, plan.local(), plan.netmask())?;
    tun.up()?;

    let span = info_span!("tunnel", peer = %config.peer, iface = tun.name());
    let mut forwarder = Forwarder::new(
        tun,
        socket,
        &plan,
        config.keepalive_interval(),
        Scheduler::new(),
        span.clone(),
    );

    forwarder.send_probe()?;
    info!(
        parent: &span,
        "running, local IP for peer: {} localhost: {}",
        plan.peer(),
        plan.local()
    );

    event_loop::run(&mut forwarder)
}
