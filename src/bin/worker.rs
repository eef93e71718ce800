//! Worker process.
//!
//! Attaches to the coordinator's ring and keeps submitting the back-edges of
//! random vertex orders of the input graph until the coordinator asks it to
//! stop.

use clap::Parser;
use fas::{
    BufferError, CandidateGenerator, Edge, EdgeSet, GraphError, Namespace, SetupError, SharedRing,
    Worker, WorkerError,
    config::{DEFAULT_NAMESPACE, NamespaceError},
    logging,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::process::ExitCode;
use thiserror::Error;
use tracing::{error, info};

/// Generate candidate feedback arc sets for the coordinator.
#[derive(Parser)]
#[command(name = "fas-worker", version)]
struct Cli {
    /// Edges of the input graph, each formatted `u-v`.
    #[arg(value_name = "EDGE", required = true)]
    edges: Vec<Edge>,

    /// Seed for the random vertex orders; drawn from the OS if absent.
    #[arg(long)]
    seed: Option<u64>,

    /// Prefix of the shared memory and semaphore names.
    #[arg(long, env = "FAS_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Namespace(#[from] NamespaceError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Run(#[from] WorkerError),
    #[error(transparent)]
    Teardown(#[from] BufferError),
}

fn run(cli: Cli) -> Result<(), AppError> {
    let namespace = Namespace::new(&cli.namespace)?;
    let graph = EdgeSet::from_edges(cli.edges)?;
    let rng = match cli.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };
    info!(
        edges = graph.len(),
        vertices = graph.vertices().len(),
        "input graph loaded"
    );

    let ring = SharedRing::attach(&namespace)?;
    let result = Worker::new(CandidateGenerator::new(&graph, rng)).run(&ring);
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
            error!(%err, "worker failed");
            eprintln!("fas-worker: {err}");
            ExitCode::FAILURE
        }
    }
}
