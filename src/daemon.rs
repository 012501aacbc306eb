//! Detaching from the controlling terminal.

use crate::{Result, errno};

/// Forks into the background, starts a new session, changes the working
/// directory to `/` and redirects standard streams to `/dev/null`.
///
/// Must be called before any thread is spawned: only the calling thread
/// survives in the child.
///
/// # Errors
///
/// Returns an error if the fork or `setsid()` fails.
pub fn daemonize() -> Result<()> {
    if unsafe { libc::daemon(0, 0) } == -1 {
        return Err(errno!("failed to daemonize"));
    }

    Ok(())
}
