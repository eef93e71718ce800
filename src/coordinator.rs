use crate::{
    buffer::{BufferError, Region, RingBuffer},
    config::CoordinatorConfig,
    graph::{EdgeSet, GraphError},
    sync::Semaphore,
};
use core::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use std::{io, thread, time::Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Granularity at which the startup delay and an idle ring check for
/// interrupts.
const IDLE_STEP: Duration = Duration::from_millis(50);

/// Error that aborts the coordinator loop.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoordinatorError {
    /// Reading from the ring buffer failed.
    #[error(transparent)]
    Buffer(#[from] BufferError),
    /// A candidate could not be allocated.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Reporting to the output sink failed.
    #[error("failed to write report: {0}")]
    Io(#[from] io::Error),
}

/// What [`BestSolution::offer`] made of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The candidate has no edges: the graph is acyclic.
    Acyclic,
    /// The candidate is strictly smaller than every earlier one.
    Improved,
    /// The candidate is no better than the current best.
    Ignored,
}

/// Smallest candidate seen so far.
///
/// Starts out empty, which compares worse than any real candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BestSolution {
    best: Option<EdgeSet>,
}

impl BestSolution {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `candidate` if it has strictly fewer edges than the current best.
    pub fn offer(&mut self, candidate: EdgeSet) -> Verdict {
        if self
            .best
            .as_ref()
            .is_some_and(|best| best.len() <= candidate.len())
        {
            return Verdict::Ignored;
        }
        let verdict = if candidate.is_empty() {
            Verdict::Acyclic
        } else {
            Verdict::Improved
        };
        self.best = Some(candidate);
        verdict
    }

    #[must_use]
    pub fn get(&self) -> Option<&EdgeSet> {
        self.best.as_ref()
    }

    #[must_use]
    pub fn into_inner(self) -> Option<EdgeSet> {
        self.best
    }
}

/// Why the coordinator loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The configured number of candidates has been read.
    Limit,
    /// A candidate without edges was read.
    Acyclic,
    /// An interrupt was observed.
    Interrupted,
}

/// Result of a coordinator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Smallest candidate read, if any.
    pub best: Option<EdgeSet>,
    /// Number of candidates read.
    pub reads: u64,
    pub reason: StopReason,
}

impl Outcome {
    /// Write the final verdict to `out`.
    ///
    /// # Errors
    /// If writing fails.
    pub fn report(&self, out: &mut impl io::Write) -> io::Result<()> {
        match &self.best {
            Some(best) if best.is_empty() => writeln!(out, "graph is acyclic"),
            Some(best) => {
                write!(out, "best solution removes {} edges: ", best.len())?;
                best.print(out)
            }
            None => writeln!(out, "no solution received"),
        }
    }
}

/// Consumer loop that keeps the smallest candidate read from a ring buffer.
#[derive(Debug)]
pub struct Coordinator<'a, R: Region, S: Semaphore> {
    buffer: &'a RingBuffer<R, S>,
    config: CoordinatorConfig,
    interrupted: &'a AtomicBool,
}

impl<'a, R: Region, S: Semaphore> Coordinator<'a, R, S> {
    /// `interrupted` is polled between reads; raising it stops the loop.
    pub fn new(
        buffer: &'a RingBuffer<R, S>,
        config: CoordinatorConfig,
        interrupted: &'a AtomicBool,
    ) -> Self {
        Self {
            buffer,
            config,
            interrupted,
        }
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }

    /// Sleep for the configured delay; returns early on interrupt. A delay past
    /// the end of the clock lasts until the interrupt.
    fn delay(&self) {
        let deadline = Instant::now().checked_add(self.config.delay);
        while !self.is_interrupted() {
            let step = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => IDLE_STEP,
            };
            if step.is_zero() {
                break;
            }
            thread::sleep(step.min(IDLE_STEP));
        }
    }

    /// Read candidates until the limit is reached, an acyclic solution turns up
    /// or an interrupt is observed, reporting each improvement to `out`. The
    /// termination flag is raised on every exit path.
    ///
    /// # Errors
    /// On buffer, allocation or output failure.
    pub fn run(&self, out: &mut impl io::Write) -> Result<Outcome, CoordinatorError> {
        let result = self.read_loop(out);
        self.buffer.terminate();
        let (best, reads, reason) = result?;
        info!(reads, ?reason, "coordinator stopped");
        Ok(Outcome {
            best: best.into_inner(),
            reads,
            reason,
        })
    }

    fn read_loop(
        &self,
        out: &mut impl io::Write,
    ) -> Result<(BestSolution, u64, StopReason), CoordinatorError> {
        let mut best = BestSolution::new();
        let mut reads = 0u64;
        self.delay();
        let reason = loop {
            if self.is_interrupted() {
                break StopReason::Interrupted;
            }
            if self.config.limit.is_some_and(|limit| reads >= limit) {
                break StopReason::Limit;
            }
            let mut candidate = EdgeSet::new()?;
            // Bounded so an interrupt that lands just before the wait is still seen.
            match self.buffer.read_timeout(&mut candidate, IDLE_STEP) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(BufferError::Interrupted) => break StopReason::Interrupted,
                Err(err) => return Err(err.into()),
            }
            reads += 1;
            let len = candidate.len();
            match best.offer(candidate) {
                Verdict::Acyclic => break StopReason::Acyclic,
                Verdict::Improved => {
                    info!(edges = len, reads, "improved solution");
                    if let Some(solution) = best.get() {
                        write!(out, "solution with {len} edges: ")?;
                        solution.print(out)?;
                    }
                }
                Verdict::Ignored => debug!(edges = len, "candidate ignored"),
            }
        };
        Ok((best, reads, reason))
    }
}
