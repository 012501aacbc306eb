//! Peer liveness, derived from inbound packets and the keepalive cadence.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{Span, info, warn};

/// Number of keepalive intervals without inbound packets after which the peer
/// is considered dead.
pub const MISSED_KEEPALIVES: u32 = 3;

/// Liveness of the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// No inbound packet within the liveness window. Initial state.
    Dead,
    /// An inbound packet arrived within the liveness window.
    Alive,
}

/// A change of [Liveness], reported once per transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `Dead -> Alive`.
    Recovered,
    /// `Alive -> Dead`.
    Lost,
}

/// What kind of inbound packet was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observed {
    /// The peer's keepalive probe.
    Keepalive,
    /// Any other tunneled packet.
    Traffic,
}

impl fmt::Display for Observed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observed::Keepalive => f.write_str("keepalive from peer"),
            Observed::Traffic => f.write_str("traffic"),
        }
    }
}

/// Tracks peer liveness.
///
/// ```text
///               packet observed
///   +------+ ------------------> +-------+
///   | Dead |                     | Alive | --+ packet observed
///   +------+ <------------------ +-------+ <-+
///               3 intervals idle
/// ```
#[derive(Debug)]
pub struct KeepaliveTracker {
    window: Duration,
    last_seen: Instant,
    state: Liveness,
    span: Span,
}

impl KeepaliveTracker {
    /// Creates a tracker in the [Liveness::Dead] state for the given keepalive
    /// interval. Events are emitted under `span`.
    pub fn new(interval: Duration, now: Instant, span: Span) -> Self {
        Self {
            window: interval * MISSED_KEEPALIVES,
            last_seen: now,
            state: Liveness::Dead,
            span,
        }
    }

    /// Returns the current liveness of the peer.
    pub fn state(&self) -> Liveness {
        self.state
    }

    /// Returns `true` if the peer is currently considered alive.
    pub fn is_alive(&self) -> bool {
        self.state == Liveness::Alive
    }

    /// Returns the time of the last inbound packet, or of construction if none
    /// arrived yet.
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Records an inbound packet at `now`.
    pub fn observe(&mut self, now: Instant, observed: Observed) -> Option<Transition> {
        self.last_seen = now;

        match self.state {
            Liveness::Alive => None,
            Liveness::Dead => {
                self.state = Liveness::Alive;
                info!(parent: &self.span, "peer is alive: {observed}");
                Some(Transition::Recovered)
            }
        }
    }

    /// Evaluates the liveness window at `now`, called once per keepalive
    /// tick.
    pub fn check(&mut self, now: Instant) -> Option<Transition> {
        if now.saturating_duration_since(self.last_seen) < self.window {
            return None;
        }

        match self.state {
            Liveness::Dead => None,
            Liveness::Alive => {
                self.state = Liveness::Dead;
                warn!(
                    parent: &self.span,
                    "keepalive missed: nothing received from peer for {:?}", self.window
                );
                Some(Transition::Lost)
            }
        }
    }
}
