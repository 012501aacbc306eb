//! Error types.

use std::{io, result};

use ipnet::Ipv4Net;
use thiserror::Error;

/// Creates a [`crate::Error::Io`] with a custom message prefixed to the current
/// `errno` value.
macro_rules! errno {
    ($($arg:tt)+) => {{
        let errno = ::std::io::Error::last_os_error();
        let prefix = format!($($arg)+);
        let msg = format!("{prefix}: {errno}");
        $crate::Error::Io(::std::io::Error::new(errno.kind(), msg))
    }};
}
pub(crate) use errno;

/// A convenience wrapper around `Result` for [crate::Error].
pub type Result<T> = result::Result<T, Error>;

/// Errors that terminate the tunnel.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The configuration was rejected before the tunnel started.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// An I/O failure on the virtual interface or the raw socket while
    /// forwarding.
    #[error("{context}: {source}")]
    Transport {
        /// What was being attempted when the failure occurred.
        context: &'static str,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Failure to set up an OS resource (TUN device, epoll, signals).
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn transport(context: &'static str, source: io::Error) -> Self {
        Error::Transport { context, source }
    }
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The virtual subnet cannot hold both tunnel endpoints.
    #[error("virtual subnet {subnet} has fewer than 2 usable host addresses")]
    TooFewHosts {
        /// The subnet provided.
        subnet: Ipv4Net,
    },
    /// The interface name does not fit in `IFNAMSIZ` or contains a null byte.
    #[error("invalid interface name {0:?}")]
    InterfaceName(String),
    /// A keepalive interval of zero would busy-loop the event loop.
    #[error("keepalive interval must be at least 1 second")]
    KeepaliveInterval,
}

/// Raw socket conditions that are recovered locally and never end the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCondition {
    /// `ENOPROTOOPT`: the peer has not opened its GRE socket yet, reported
    /// through an ICMP protocol-unreachable.
    ProtocolUnavailable,
    /// `EMSGSIZE`: an over-length datagram. The frame is dropped.
    Oversized,
}

impl TransportCondition {
    /// Classifies an error returned by the raw socket, returning `None` for
    /// errors that are fatal.
    pub fn classify(err: &io::Error) -> Option<Self> {
        match err.raw_os_error() {
            Some(libc::ENOPROTOOPT) => Some(TransportCondition::ProtocolUnavailable),
            Some(libc::EMSGSIZE) => Some(TransportCondition::Oversized),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_transient_conditions() {
        let err = io::Error::from_raw_os_error(libc::ENOPROTOOPT);
        assert_eq!(
            TransportCondition::classify(&err),
            Some(TransportCondition::ProtocolUnavailable)
        );

        let err = io::Error::from_raw_os_error(libc::EMSGSIZE);
        assert_eq!(
            TransportCondition::classify(&err),
            Some(TransportCondition::Oversized)
        );
    }

    #[test]
    fn classify_fatal_errors() {
        let err = io::Error::from_raw_os_error(libc::ECONNREFUSED);
        assert_eq!(TransportCondition::classify(&err), None);

        let err = io::Error::new(io::ErrorKind::Other, "no errno");
        assert_eq!(TransportCondition::classify(&err), None);
    }

    #[test]
    fn transport_error_display() {
        let err = Error::transport(
            "failed to read from raw socket",
            io::Error::from_raw_os_error(libc::EBADF),
        );
        assert!(
            err.to_string()
                .starts_with("failed to read from raw socket: ")
        );
    }
}
