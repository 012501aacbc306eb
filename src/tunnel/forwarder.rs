//! Per-event packet handling between the virtual interface and the raw GRE
//! socket.

use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{Span, debug, trace, warn};

use crate::error::TransportCondition;
use crate::net::AddressPlan;
use crate::net::gre::{self, GRE_HEADER, GRE_HEADER_LEN};
use crate::net::ipv4::{self, DST_OFFSET, Ipv4Header, MIN_HEADER_LEN, Protocol};
use crate::tunnel::Link;
use crate::tunnel::liveness::{KeepaliveTracker, Observed};
use crate::tunnel::probe::KeepaliveProbe;
use crate::{Error, Result};

/// Size of the frame buffer, the largest possible IPv4 datagram.
pub const FRAME_SIZE: usize = 0xFFFF;

/// Endpoint serviced in one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Read from the virtual interface, send on the raw socket.
    InterfaceToSocket,
    /// Read from the raw socket, write to the virtual interface.
    SocketToInterface,
}

/// Chooses which ready endpoint to service.
///
/// Exactly one endpoint is serviced per iteration, picked uniformly at random
/// among the ready ones, so neither direction can starve the other under
/// sustained load in both directions.
#[derive(Debug)]
pub struct Scheduler {
    rng: StdRng,
}

impl Scheduler {
    /// Creates a scheduler seeded from the OS.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Creates a scheduler with a fixed seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Returns the direction to service, or `None` if nothing is ready.
    pub fn pick(&mut self, ready: &[Direction]) -> Option<Direction> {
        ready.choose(&mut self.rng).copied()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Diagnostic counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Frames sent from the interface to the peer.
    pub tx_frames: u64,
    /// Frames received from the peer and written to the interface.
    pub rx_frames: u64,
    /// Keepalive probes sent.
    pub probes_sent: u64,
    /// Interface frames not addressed to the peer.
    pub dropped_not_for_peer: u64,
    /// Raw socket datagrams reported as too large (`EMSGSIZE`).
    pub dropped_oversized: u64,
    /// Raw socket datagrams that failed to decode.
    pub dropped_malformed: u64,
    /// `ENOPROTOOPT` reports from the raw socket.
    pub protocol_unavailable: u64,
}

/// Forwards frames between the virtual interface `I` and the raw GRE socket
/// `S`, and drives the keepalive probe and peer liveness.
#[derive(Debug)]
pub struct Forwarder<I, S> {
    iface: I,
    socket: S,
    local: [u8; 4],
    peer: [u8; 4],
    probe: KeepaliveProbe,
    tracker: KeepaliveTracker,
    scheduler: Scheduler,
    interval: Duration,
    stats: Stats,
    buf: Box<[u8]>,
    span: Span,
}

impl<I: Link, S: Link> Forwarder<I, S> {
    /// Creates a forwarder for the given address plan, probing every
    /// `interval`. Events are emitted under `span`.
    pub fn new(
        iface: I,
        socket: S,
        plan: &AddressPlan,
        interval: Duration,
        scheduler: Scheduler,
        span: Span,
    ) -> Self {
        Self {
            iface,
            socket,
            local: plan.local_octets(),
            peer: plan.peer_octets(),
            probe: KeepaliveProbe::new(plan),
            tracker: KeepaliveTracker::new(interval, Instant::now(), span.clone()),
            scheduler,
            interval,
            stats: Stats::default(),
            buf: vec![0u8; FRAME_SIZE].into_boxed_slice(),
            span,
        }
    }

    /// Returns the virtual interface.
    pub fn interface(&self) -> &I {
        &self.iface
    }

    /// Returns the raw socket.
    pub fn socket(&self) -> &S {
        &self.socket
    }

    /// Returns the liveness tracker.
    pub fn tracker(&self) -> &KeepaliveTracker {
        &self.tracker
    }

    /// Returns the keepalive interval, also the wait timeout of the loop.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the diagnostic counters.
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Sends the keepalive probe to the peer.
    ///
    /// # Errors
    ///
    /// Returns [Error::Transport] if the raw socket fails.
    pub fn send_probe(&mut self) -> Result<()> {
        self.socket
            .send(self.probe.datagram())
            .map_err(|err| Error::transport("failed to send keepalive", err))?;
        self.stats.probes_sent += 1;

        Ok(())
    }

    /// Handles a wait that timed out with nothing ready: sends the probe and
    /// evaluates peer liveness.
    ///
    /// # Errors
    ///
    /// Returns [Error::Transport] if the probe cannot be sent.
    pub fn on_timeout(&mut self, now: Instant) -> Result<()> {
        self.send_probe()?;
        self.tracker.check(now);

        trace!(parent: &self.span, stats = ?self.stats, "keepalive tick");

        Ok(())
    }

    /// Services one of the `ready` endpoints, chosen by the [Scheduler].
    ///
    /// # Errors
    ///
    /// Returns [Error::Transport] on fatal I/O failures of either endpoint.
    pub fn on_ready(&mut self, ready: &[Direction], now: Instant) -> Result<()> {
        match self.scheduler.pick(ready) {
            Some(Direction::InterfaceToSocket) => self.interface_to_socket(),
            Some(Direction::SocketToInterface) => self.socket_to_interface(now),
            None => Ok(()),
        }
    }

    /// Reads one frame from the interface and sends it to the peer if it is
    /// addressed to the peer's virtual address.
    ///
    /// # Errors
    ///
    /// Returns [Error::Transport] if the interface read or socket send fails.
    pub fn interface_to_socket(&mut self) -> Result<()> {
        // Leave room to prepend the GRE header without copying the frame.
        let nbytes = self
            .iface
            .recv(&mut self.buf[GRE_HEADER_LEN..])
            .map_err(|err| Error::transport("failed to read from virtual interface", err))?;

        let frame = &self.buf[GRE_HEADER_LEN..GRE_HEADER_LEN + nbytes];

        if frame.len() < MIN_HEADER_LEN || frame[DST_OFFSET..DST_OFFSET + 4] != self.peer {
            self.stats.dropped_not_for_peer += 1;
            return Ok(());
        }

        self.buf[..GRE_HEADER_LEN].copy_from_slice(&GRE_HEADER);
        self.socket
            .send(&self.buf[..GRE_HEADER_LEN + nbytes])
            .map_err(|err| Error::transport("failed to send to peer", err))?;
        self.stats.tx_frames += 1;

        Ok(())
    }

    /// Receives one datagram from the peer and writes the tunneled packet to
    /// the interface, rewritten to the local address plan.
    ///
    /// # Errors
    ///
    /// Returns [Error::Transport] if the socket read fails with anything other
    /// than a [TransportCondition], or if the interface write fails.
    pub fn socket_to_interface(&mut self, now: Instant) -> Result<()> {
        let nbytes = match self.socket.recv(&mut self.buf) {
            Ok(nbytes) => nbytes,
            Err(err) => {
                return match TransportCondition::classify(&err) {
                    Some(TransportCondition::ProtocolUnavailable) => {
                        self.stats.protocol_unavailable += 1;
                        if self.tracker.is_alive() {
                            warn!(parent: &self.span, "peer GRE unavailable: {err}");
                        }
                        Ok(())
                    }
                    Some(TransportCondition::Oversized) => {
                        self.stats.dropped_oversized += 1;
                        Ok(())
                    }
                    None => Err(Error::transport("failed to read from raw socket", err)),
                };
            }
        };

        let inner = match gre::decapsulate(&self.buf[..nbytes]) {
            Ok(inner) => inner,
            Err(err) => {
                self.stats.dropped_malformed += 1;
                debug!(parent: &self.span, "dropping datagram from peer: {err}");
                return Ok(());
            }
        };

        let packet = &mut self.buf[inner];

        let observed = match Ipv4Header::try_from(&packet[..]) {
            Ok(header) if header.protocol() == Protocol::ICMP => Observed::Keepalive,
            Ok(_) => Observed::Traffic,
            Err(err) => {
                self.stats.dropped_malformed += 1;
                debug!(parent: &self.span, "dropping tunneled packet: {err}");
                return Ok(());
            }
        };

        self.tracker.observe(now, observed);

        ipv4::rewrite_addresses(packet, self.peer, self.local);

        self.iface
            .send(packet)
            .map_err(|err| Error::transport("failed to write to virtual interface", err))?;
        self.stats.rx_frames += 1;

        Ok(())
    }
}
