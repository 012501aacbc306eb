//! Installs the global `tracing` subscriber.

use std::io;
use std::path::Path;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

/// Installs a formatting subscriber writing to `logfile`, or to `stderr` if
/// none is given.
///
/// `RUST_LOG` takes precedence; otherwise the level is `info`, or `debug`
/// when `verbose` is set.
///
/// The log file is opened here and written synchronously, so no thread is
/// spawned and the process can still be daemonized afterwards.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened.
pub fn init(logfile: Option<&Path>, verbose: bool) -> io::Result<()> {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match logfile {
        Some(path) => {
            let appender = file_appender(path)?;
            builder.with_writer(appender).with_ansi(false).init();
        }
        None => builder.with_writer(io::stderr).init(),
    }

    Ok(())
}

/// Opens `path` for appending, without rotation.
fn file_appender(path: &Path) -> io::Result<RollingFileAppender> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("log file {} has no file name", path.display()),
        )
    })?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name.to_string_lossy())
        .build(dir)
        .map_err(io::Error::other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_appender_requires_file_name() {
        let err = file_appender(Path::new("/")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn file_appender_creates_file() {
        let path = std::env::temp_dir().join(format!("grepunch-log-{}.log", std::process::id()));

        let appender = file_appender(&path).unwrap();
        drop(appender);

        assert!(path.exists());
        std::fs::remove_file(path).unwrap();
    }
}
