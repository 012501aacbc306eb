use std::process::ExitCode;

use clap::Parser;

use grepunch::{Config, daemon, log, tunnel};

fn main() -> ExitCode {
    let mut config = Config::parse();

    if let Some(path) = config.logfile.take() {
        // The working directory changes to `/` when daemonized.
        match std::path::absolute(&path) {
            Ok(path) => config.logfile = Some(path),
            Err(err) => {
                eprintln!("invalid log file {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        }
    }

    if let Err(err) = log::init(config.logfile.as_deref(), config.verbose) {
        eprintln!("failed to initialize logging: {err}");
        return ExitCode::FAILURE;
    }

    if config.daemon {
        if let Err(err) = daemon::daemonize() {
            tracing::error!("{err}");
            return ExitCode::FAILURE;
        }
    }

    match tunnel::punch_and_serve(&config) {
        Ok(()) => ExitCode::SUCCESS,
        // Already logged.
        Err(_) => ExitCode::FAILURE,
    }
}
