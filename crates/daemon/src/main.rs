// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tether maintenance daemon (tetherd)
//!
//! Background process that periodically recovers stale queue tasks, purges
//! old completed tasks and removes lock keys without an expiry.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod lifecycle;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};

use crate::lifecycle::{Config, LifecycleError};

const DEFAULT_CONFIG: &str = "tether.toml";

#[derive(Debug, Parser)]
#[command(
    name = "tetherd",
    version,
    about = "Runs the tether maintenance sweep against the configured Redis server"
)]
struct Args {
    /// Path to the TOML configuration (default: tether.toml; built-in
    /// defaults are used when the default file is absent)
    config: Option<PathBuf>,

    /// Validate the configuration, print it with defaults filled in, and exit
    #[arg(long)]
    check: bool,
}

/// Load the named file, or the default file when present, or defaults
fn load_config(path: Option<&Path>) -> Result<Config, LifecycleError> {
    match path {
        Some(path) => Config::load(path),
        None if Path::new(DEFAULT_CONFIG).exists() => Config::load(Path::new(DEFAULT_CONFIG)),
        None => Ok(Config::default()),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.check {
        return match load_config(args.config.as_deref()).and_then(|c| c.render()) {
            Ok(rendered) => {
                println!("configuration ok");
                print!("{}", rendered);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), LifecycleError> {
    if let Some(log_path) = &config.daemon.log_path {
        write_startup_marker(log_path)?;
    }
    let _log_guard = setup_logging(&config)?;

    info!(pid = std::process::id(), "starting tetherd");

    let daemon = match lifecycle::startup(&config).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!("Failed to start daemon: {}", e);
            return Err(e);
        }
    };

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    // Signal ready for a supervising process
    println!("READY");
    info!("daemon ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep = daemon.run(shutdown_rx);
    tokio::pin!(sweep);

    let total = tokio::select! {
        total = &mut sweep => total,
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
            let _ = shutdown_tx.send(true);
            sweep.await
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down...");
            let _ = shutdown_tx.send(true);
            sweep.await
        }
    };

    daemon.shutdown(&total);
    Ok(())
}

/// Startup marker prefix written to the log before anything else.
/// Full format: "--- tetherd: starting (pid: 12345) ---"
pub const STARTUP_MARKER_PREFIX: &str = "--- tetherd: starting (pid: ";

/// Append the startup marker to the log file
fn write_startup_marker(log_path: &Path) -> Result<(), LifecycleError> {
    use std::io::Write;

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    writeln!(file, "{}{}) ---", STARTUP_MARKER_PREFIX, std::process::id())?;
    Ok(())
}

fn setup_logging(
    config: &Config,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, LifecycleError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(log_path) = &config.daemon.log_path else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
        return Ok(None);
    };

    let dir = match log_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        Some(_) => Path::new("."),
        None => return Err(LifecycleError::NoLogDir(log_path.clone())),
    };
    let file_name = log_path
        .file_name()
        .ok_or_else(|| LifecycleError::NoLogDir(log_path.clone()))?;
    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
        .init();

    Ok(Some(guard))
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
