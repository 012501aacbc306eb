//! Event loop multiplexing the TUN virtual network device, the raw GRE socket,
//! and signals for graceful shutdown.
//!
//! Each cycle blocks in `epoll_wait()` for at most one keepalive interval. A
//! timeout sends the keepalive probe and checks peer liveness; otherwise one
//! ready endpoint is serviced.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Instant;
use std::{io, mem, ptr};

use tracing::info;

use crate::tunnel::Link;
use crate::tunnel::forwarder::{Direction, Forwarder};
use crate::{Result, errno};

/// Total number of events returned each tick (event loop cycle).
const EPOLL_MAX_EVENTS: usize = 3;

/// Runs the forwarder until a shutdown signal (SIGINT or SIGTERM) arrives or
/// a fatal error occurs.
///
/// # Errors
///
/// Returns an error if the epoll or signal descriptors cannot be set up, or
/// if the forwarder reports a fatal transport error.
pub fn run<I, S>(forwarder: &mut Forwarder<I, S>) -> Result<()>
where
    I: Link + AsRawFd,
    S: Link + AsRawFd,
{
    // Stores events for ready file descriptors.
    let mut events = [libc::epoll_event { events: 0, u64: 0 }; EPOLL_MAX_EVENTS];

    let iface_fd = forwarder.interface().as_raw_fd();
    let socket_fd = forwarder.socket().as_raw_fd();
    let signal_fd = init_signal_fd()?;
    let epoll_fd = init_epoll_fd(&[iface_fd, socket_fd, signal_fd.as_raw_fd()])?;

    let timeout_ms = forwarder
        .interval()
        .as_millis()
        .clamp(1, libc::c_int::MAX as u128) as libc::c_int;

    loop {
        let rdfs = unsafe {
            libc::epoll_wait(
                epoll_fd.as_raw_fd(),
                events.as_mut_ptr(),
                EPOLL_MAX_EVENTS as libc::c_int,
                timeout_ms,
            )
        };

        if rdfs == -1 {
            if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(errno!("failed to wait on epoll"));
        }

        let now = Instant::now();

        if rdfs == 0 {
            forwarder.on_timeout(now)?;
            continue;
        }

        let mut ready = [Direction::InterfaceToSocket; 2];
        let mut nready = 0;

        for event in events.iter().take(rdfs as usize) {
            let fd = event.u64 as RawFd;

            // A signal was caught (SIGINT or SIGTERM).
            if fd == signal_fd.as_raw_fd() {
                info!(stats = ?forwarder.stats(), "signal caught -- shutting down");
                return Ok(());
            }

            if fd == iface_fd {
                ready[nready] = Direction::InterfaceToSocket;
                nready += 1;
            } else if fd == socket_fd {
                ready[nready] = Direction::SocketToInterface;
                nready += 1;
            }
        }

        forwarder.on_ready(&ready[..nready], now)?;
    }
}

/// Creates a non-blocking `signal_fd` for SIGINT and SIGTERM signals.
fn init_signal_fd() -> Result<OwnedFd> {
    unsafe {
        let mut mask: libc::sigset_t = mem::zeroed();

        // Initialize the signal set, excluding all signals.
        if libc::sigemptyset(&raw mut mask) == -1 {
            return Err(errno!("failed to initialize signal set"));
        }

        // Add both SIGINT and SIGTERM to the set.
        if libc::sigaddset(&raw mut mask, libc::SIGINT) == -1
            || libc::sigaddset(&raw mut mask, libc::SIGTERM) == -1
        {
            return Err(errno!("failed to update signal set"));
        }

        // Blocks SIGINT and SIGTERM from being intercepted by default handlers.
        if libc::sigprocmask(libc::SIG_BLOCK, &raw const mask, ptr::null_mut()) == -1 {
            return Err(errno!("failed to block signals on signal set"));
        }

        let signal_fd = libc::signalfd(-1, &raw const mask, libc::SFD_NONBLOCK | libc::SFD_CLOEXEC);
        if signal_fd == -1 {
            return Err(errno!("failed to create signal_fd"));
        }

        // SAFETY: `signal_fd` is a freshly created descriptor owned by no one
        // else.
        Ok(OwnedFd::from_raw_fd(signal_fd))
    }
}

/// Creates an `epoll_fd` and registers the given file descriptors for read
/// readiness.
fn init_epoll_fd(fds: &[RawFd]) -> Result<OwnedFd> {
    let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
    if epoll_fd == -1 {
        return Err(errno!("failed to create epoll_fd"));
    }

    // SAFETY: `epoll_fd` is a freshly created descriptor owned by no one else.
    let epoll_fd = unsafe { OwnedFd::from_raw_fd(epoll_fd) };

    for &fd in fds {
        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: fd as u64,
        };

        if unsafe { libc::epoll_ctl(epoll_fd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &raw mut ev) }
            == -1
        {
            return Err(errno!("failed to add fd {fd} to epoll interest list"));
        }
    }

    Ok(epoll_fd)
}
