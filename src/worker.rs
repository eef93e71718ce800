use crate::{
    buffer::{BufferError, Region, RingBuffer},
    config::MAX_EDGES,
    graph::{EdgeSet, GraphError},
    sync::Semaphore,
    types::{Edge, HashSet, VertexId},
    utils::FisherYates,
};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info};

/// Error that stops a worker loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum WorkerError {
    /// A candidate could not be built.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// A candidate could not be submitted.
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Derives candidate feedback arc sets of a fixed graph from random vertex
/// orders.
///
/// Removing all arcs that point backwards in some linear order of the vertices
/// leaves a graph that is consistent with that order, hence acyclic. Self-loops
/// can never point backwards, so every candidate contains all of them.
#[derive(Debug)]
pub struct CandidateGenerator<'g, R> {
    graph: &'g EdgeSet,
    arcs: HashSet<Edge>,
    self_loops: Vec<Edge>,
    order: Vec<VertexId>,
    rng: R,
}

impl<'g, R: Rng> CandidateGenerator<'g, R> {
    pub fn new(graph: &'g EdgeSet, rng: R) -> Self {
        let arcs = graph.edges().iter().copied().collect();
        let mut self_loops = graph
            .edges()
            .iter()
            .copied()
            .filter(|edge| edge.is_self_loop())
            .collect::<Vec<_>>();
        self_loops.sort_unstable();
        self_loops.dedup();
        Self {
            graph,
            arcs,
            self_loops,
            order: graph.vertices().to_vec(),
            rng,
        }
    }

    /// The input graph.
    #[must_use]
    pub fn graph(&self) -> &'g EdgeSet {
        self.graph
    }

    /// Shuffle the vertex order and return the back-edges of the new order.
    ///
    /// # Errors
    /// If the candidate cannot be allocated.
    pub fn next_candidate(&mut self) -> Result<EdgeSet, GraphError> {
        let Self { order, rng, .. } = self;
        order.fisher_yates(rng);
        self.candidate_for(&self.order)
    }

    /// Arcs of the input graph that point from a later to an earlier vertex of
    /// `order`, plus all self-loops.
    ///
    /// Each ordered vertex pair contributes at most one arc, so parallel input
    /// arcs show up once.
    ///
    /// # Errors
    /// If the candidate cannot be allocated.
    pub fn candidate_for(&self, order: &[VertexId]) -> Result<EdgeSet, GraphError> {
        let mut candidate = EdgeSet::new()?;
        for &edge in &self.self_loops {
            candidate.add_edge(edge)?;
        }
        for (i, &later) in order.iter().enumerate() {
            for &earlier in &order[..i] {
                let arc = Edge::new(later, earlier);
                if self.arcs.contains(&arc) {
                    candidate.add_edge(arc)?;
                }
            }
        }
        Ok(candidate)
    }
}

/// Counters of a finished worker loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Candidates generated.
    pub attempts: u64,
    /// Candidates submitted to the ring buffer.
    pub written: u64,
    /// Candidates dropped for not fitting into a slot.
    pub discarded: u64,
}

/// Producer loop feeding candidates of one generator into a ring buffer.
#[derive(Debug)]
pub struct Worker<'g, R> {
    generator: CandidateGenerator<'g, R>,
    stats: WorkerStats,
}

impl<'g, R: Rng> Worker<'g, R> {
    pub fn new(generator: CandidateGenerator<'g, R>) -> Self {
        Self {
            generator,
            stats: WorkerStats::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Generate and submit one candidate unless the ring asks to terminate.
    /// Returns `false` once termination has been observed.
    ///
    /// Candidates larger than a slot are dropped silently.
    ///
    /// # Errors
    /// If a candidate cannot be allocated or written.
    pub fn step<Reg: Region, S: Semaphore>(
        &mut self,
        buffer: &RingBuffer<Reg, S>,
    ) -> Result<bool, WorkerError> {
        if buffer.is_terminated() {
            return Ok(false);
        }
        let candidate = self.generator.next_candidate()?;
        self.stats.attempts += 1;
        if candidate.len() > MAX_EDGES {
            self.stats.discarded += 1;
            return Ok(true);
        }
        // Generation takes O(V²); the flag may have been raised meanwhile.
        if buffer.is_terminated() {
            return Ok(false);
        }
        buffer.write(&candidate)?;
        self.stats.written += 1;
        debug!(edges = candidate.len(), "candidate submitted");
        Ok(true)
    }

    /// Run [`step`](Self::step) until termination is observed.
    ///
    /// A worker blocked on a full ring only notices termination once its write
    /// completes.
    ///
    /// # Errors
    /// See [`step`](Self::step).
    pub fn run<Reg: Region, S: Semaphore>(
        &mut self,
        buffer: &RingBuffer<Reg, S>,
    ) -> Result<WorkerStats, WorkerError> {
        while self.step(buffer)? {}
        info!(
            attempts = self.stats.attempts,
            written = self.stats.written,
            discarded = self.stats.discarded,
            "worker stopped"
        );
        Ok(self.stats)
    }
}
