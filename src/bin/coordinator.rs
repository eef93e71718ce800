//! Coordinator process.
//!
//! Creates the shared ring, reads candidate feedback arc sets from workers and
//! reports the smallest one. Stops after `-n` candidates, on an acyclic
//! solution, or on SIGINT/SIGTERM; then tells the workers to stop and removes
//! the shared ring.

use clap::Parser;
use core::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use fas::{
    BufferError, Coordinator, CoordinatorConfig, Namespace, SetupError, SharedRing,
    config::{DEFAULT_NAMESPACE, NamespaceError},
    coordinator::CoordinatorError,
    logging,
};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::{io, process::ExitCode};
use thiserror::Error;
use tracing::error;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_interrupt(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::Relaxed);
}

/// Search for a minimum feedback arc set with candidates supplied by workers.
#[derive(Parser)]
#[command(name = "fas-coordinator", version)]
struct Cli {
    /// Stop after reading this many candidates.
    #[arg(short = 'n', long, value_name = "LIMIT")]
    limit: Option<u64>,

    /// Seconds to wait before reading the first candidate.
    #[arg(short = 'w', long, value_name = "DELAY", default_value_t = 0)]
    delay: u64,

    /// Prefix of the shared memory and semaphore names.
    #[arg(long, env = "FAS_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Namespace(#[from] NamespaceError),
    #[error("failed to install signal handler: {0}")]
    Signal(nix::Error),
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Run(#[from] CoordinatorError),
    #[error("failed to write report: {0}")]
    Report(#[from] io::Error),
    #[error(transparent)]
    Teardown(#[from] BufferError),
}

fn install_signal_handlers() -> Result<(), AppError> {
    // No SA_RESTART: a blocked read must return so the loop can stop.
    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: The handler only stores to an atomic.
        unsafe { sigaction(signal, &action) }.map_err(AppError::Signal)?;
    }
    Ok(())
}

fn run(cli: Cli) -> Result<(), AppError> {
    let namespace = Namespace::new(&cli.namespace)?;
    install_signal_handlers()?;
    let ring = SharedRing::create(&namespace)?;
    let config = CoordinatorConfig {
        limit: cli.limit,
        delay: Duration::from_secs(cli.delay),
    };

    let mut out = io::stdout().lock();
    let result = Coordinator::new(&ring, config, &INTERRUPTED)
        .run(&mut out)
        .map_err(AppError::from)
        .and_then(|outcome| outcome.report(&mut out).map_err(AppError::from));
    let teardown = ring.teardown();
    result?;
    teardown?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "coordinator failed");
            eprintln!("fas-coordinator: {err}");
            ExitCode::FAILURE
        }
    }
}
