//! Monte-Carlo search for small feedback arc sets, spread over processes.
//!
//! Any linear order of a directed graph's vertices induces a feedback arc set:
//! the arcs pointing backwards in that order. Worker processes draw random
//! orders and submit the induced sets; a single coordinator keeps the
//! smallest one it has seen.
//!
//! Candidates travel through a bounded ring buffer in POSIX shared memory:
//! - A free-slot semaphore (initially `MAX_DATA`) throttles producers when the
//!   ring is full.
//! - A filled-slot semaphore (initially 0) blocks the consumer when it is
//!   empty.
//! - A mutex semaphore serializes the cursor-and-slot update of concurrent
//!   writers. The single reader needs no lock.
//! - A termination flag in the same segment tells workers to stop.
//!
//! Key modules:
//! - `config`: slot bounds, object names and coordinator run limits.
//! - `graph`: the `EdgeSet` value shared by every other component.
//! - `buffer`: the ring itself, over shared memory or, for tests, process
//!   memory.
//! - `worker`: candidate generation and the producer loop.
//! - `coordinator`: best-candidate tracking and the consumer loop.
//!
//! Quick start:
//! 1. The coordinator calls `SharedRing::create` and runs a `Coordinator`.
//! 2. Every worker calls `SharedRing::attach` and runs a `Worker` over a
//!    `CandidateGenerator` for the input graph.
//! 3. When the coordinator stops it raises the termination flag and tears the
//!    ring down, removing all names from the system.
//!
//! Cancellation is cooperative. A worker blocked on a full ring only notices
//! termination once its write completes, so a worker can stay blocked if the
//! coordinator exits while the ring is full.

/// The shared ring buffer.
///
/// Contains the memory layout, the `Region`/`Semaphore` seams, the POSIX
/// backend with reverse-order setup unwinding, and an in-process backend.
pub mod buffer;
/// Compile-time bounds, POSIX object names and coordinator run limits.
pub mod config;
/// Consumer side: keeps the smallest candidate and drives shutdown.
pub mod coordinator;
/// Growable edge list with its vertex set.
pub mod graph;
/// Trace subscriber setup shared by the binaries.
pub mod logging;
mod sync;
/// Core value types (`Edge`, `VertexId`) and the cell wrapper used for
/// in-process rings.
pub mod types;
mod utils;
/// Producer side: random vertex orders and their back-edges.
pub mod worker;

pub use crate::{
    buffer::{BufferError, LocalRing, Region, RingBuffer, Role, SetupError, SharedRing},
    config::{CoordinatorConfig, MAX_DATA, MAX_EDGES, Namespace},
    coordinator::{BestSolution, Coordinator, Outcome, StopReason, Verdict},
    graph::{EdgeSet, GraphError},
    sync::{LocalSemaphore, Semaphore},
    types::{Edge, EdgeParseError, VertexId},
    worker::{CandidateGenerator, Worker, WorkerError, WorkerStats},
};
