mod local;
mod posix;
mod setup;
mod transfer;

pub use crate::buffer::{
    local::LocalRegion,
    posix::{NamedSemaphore, ShmRegion},
    setup::SetupError,
};
use crate::{
    config::{MAX_DATA, MAX_EDGES},
    graph::{EdgeSet, GraphError},
    sync::{LocalSemaphore, Semaphore},
    types::Edge,
};
use core::{sync::atomic::AtomicU32, time::Duration};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Initial value of the free-slot semaphore.
const SLOTS: u32 = MAX_DATA as u32;

/// Ring buffer shared between one coordinator and any number of workers.
pub type SharedRing = RingBuffer<ShmRegion, NamedSemaphore>;
/// Ring buffer whose producers and consumer are threads of this process.
pub type LocalRing = RingBuffer<Arc<LocalRegion>, Arc<LocalSemaphore>>;

/// Error raised by ring buffer operations after setup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BufferError {
    /// A blocking wait was interrupted by a signal.
    #[error("wait interrupted by a signal")]
    Interrupted,
    /// A semaphore operation failed.
    #[error("semaphore {op} failed: {source}")]
    Semaphore {
        /// The failed operation.
        op: &'static str,
        /// Underlying OS error.
        source: nix::Error,
    },
    /// The candidate does not fit into a slot.
    #[error("candidate with {len} edges exceeds the slot capacity of {max}", max = MAX_EDGES)]
    Oversized {
        /// Number of edges in the rejected candidate.
        len: usize,
    },
    /// `read` was called through a worker handle.
    #[error("only the coordinator may read from the ring buffer")]
    NotCoordinator,
    /// The destination of a read could not grow.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Unmapping, closing or unlinking a shared resource failed.
    #[error("failed to {op} {resource}: {source}")]
    Release {
        /// The failed operation.
        op: &'static str,
        /// Name of the resource.
        resource: String,
        /// Underlying OS error.
        source: nix::Error,
    },
}

/// Which side of the ring a handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates, reads and finally destroys the ring.
    Coordinator,
    /// Attaches to an existing ring and writes candidates into it.
    Worker,
}

/// Memory image of the ring, identical for every attached process.
///
/// `write_pos` is only touched while holding the mutex semaphore, `read_pos`
/// only by the coordinator. Slot contents are published by the filled-slot
/// semaphore and reclaimed through the free-slot semaphore.
#[derive(Debug)]
#[repr(C)]
pub struct SharedLayout {
    terminate: AtomicU32,
    write_pos: u32,
    read_pos: u32,
    edge_counts: [u32; MAX_DATA],
    edges: [[Edge; MAX_EDGES]; MAX_DATA],
}

impl SharedLayout {
    /// Size of the layout in bytes.
    pub const SIZE: usize = size_of::<Self>();
}

/// Raw pointers into one slot of a [`Region`].
#[derive(Debug, Clone, Copy)]
pub struct SlotPtr {
    /// Number of valid edges in the slot.
    pub len: *mut u32,
    /// Edge storage of the slot.
    pub edges: *mut [Edge; MAX_EDGES],
}

/// Memory holding the ring state: the termination flag, both cursors and the
/// slots.
///
/// The `with_*` accessors lend raw pointers for the duration of a closure.
/// Dereferencing them is only sound under the protocol described on
/// [`RingBuffer`].
pub trait Region {
    /// Raise the termination flag.
    fn raise_terminate(&self);

    fn terminate_raised(&self) -> bool;

    fn with_write_pos<T>(&self, f: impl FnOnce(*mut u32) -> T) -> T;

    fn with_read_pos<T>(&self, f: impl FnOnce(*mut u32) -> T) -> T;

    /// Run `f` on slot `slot`.
    ///
    /// # Panics
    /// If `slot >= MAX_DATA`.
    fn with_slot<T>(&self, slot: usize, f: impl FnOnce(SlotPtr) -> T) -> T;

    /// Give up the memory. Must be idempotent.
    ///
    /// # Errors
    /// On failure to unmap, close or unlink the backing object.
    fn release(&mut self) -> Result<(), BufferError> {
        Ok(())
    }
}

impl<R: Region> Region for Arc<R> {
    fn raise_terminate(&self) {
        R::raise_terminate(self);
    }

    fn terminate_raised(&self) -> bool {
        R::terminate_raised(self)
    }

    fn with_write_pos<T>(&self, f: impl FnOnce(*mut u32) -> T) -> T {
        R::with_write_pos(self, f)
    }

    fn with_read_pos<T>(&self, f: impl FnOnce(*mut u32) -> T) -> T {
        R::with_read_pos(self, f)
    }

    fn with_slot<T>(&self, slot: usize, f: impl FnOnce(SlotPtr) -> T) -> T {
        R::with_slot(self, slot, f)
    }
}

/// Bounded FIFO of candidate edge sets.
///
/// Slot hand-off follows the classic bounded-buffer protocol: writers take a
/// unit of `free`, update the slot at the write cursor under `mutex` and post
/// `filled`; the single reader takes a unit of `filled`, drains the slot at the
/// read cursor and posts `free`. The termination flag lives in the region
/// and is polled by workers.
#[must_use]
#[derive(Debug)]
pub struct RingBuffer<R: Region, S: Semaphore> {
    region: R,
    free: S,
    filled: S,
    mutex: S,
    role: Role,
}

impl<R: Region, S: Semaphore> RingBuffer<R, S> {
    pub(crate) fn from_parts(region: R, free: S, filled: S, mutex: S, role: Role) -> Self {
        Self {
            region,
            free,
            filled,
            mutex,
            role,
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Copy `candidate` into the next free slot, blocking while the ring is
    /// full.
    ///
    /// Signals that interrupt the waits are ignored; the wait is resumed.
    ///
    /// # Errors
    /// [`BufferError::Oversized`] if `candidate` has more than [`MAX_EDGES`]
    /// edges (nothing is written), or a semaphore failure.
    pub fn write(&self, candidate: &EdgeSet) -> Result<(), BufferError> {
        let edges = candidate.edges();
        if edges.len() > MAX_EDGES {
            return Err(BufferError::Oversized { len: edges.len() });
        }
        wait_uninterrupted(&self.free)?;
        if let Err(err) = wait_uninterrupted(&self.mutex) {
            self.free.post()?;
            return Err(err);
        }
        // SAFETY: The mutex is held, so no other writer touches `write_pos` or the
        // slot it names. The unit taken from `free` guarantees that slot is not
        // waiting to be read. `edges` fits into a slot.
        let slot = unsafe { transfer::store(&self.region, edges) };
        // The slot is written either way; publish it before reporting a failed
        // unlock.
        let unlocked = self.mutex.post();
        self.filled.post()?;
        unlocked?;
        trace!(slot, edges = edges.len(), "candidate written");
        Ok(())
    }

    /// Append the edges of the oldest filled slot to `dest`, blocking while the
    /// ring is empty.
    ///
    /// # Errors
    /// [`BufferError::NotCoordinator`] on a worker handle,
    /// [`BufferError::Interrupted`] if a signal interrupted the wait (nothing is
    /// consumed), or a semaphore or allocation failure. The slot is released
    /// even when `dest` fails to grow.
    pub fn read(&self, dest: &mut EdgeSet) -> Result<(), BufferError> {
        self.ensure_coordinator()?;
        self.filled.wait()?;
        self.take_filled(dest)
    }

    /// Like [`read`](Self::read), but returns `Ok(false)` instead of blocking
    /// when the ring is empty.
    ///
    /// # Errors
    /// Same as [`read`](Self::read), except that it never reports an
    /// interruption.
    pub fn try_read(&self, dest: &mut EdgeSet) -> Result<bool, BufferError> {
        self.ensure_coordinator()?;
        if !self.filled.try_wait()? {
            return Ok(false);
        }
        self.take_filled(dest).map(|()| true)
    }

    /// Like [`read`](Self::read), but returns `Ok(false)` once `timeout` has
    /// passed without a filled slot.
    ///
    /// # Errors
    /// Same as [`read`](Self::read).
    pub fn read_timeout(&self, dest: &mut EdgeSet, timeout: Duration) -> Result<bool, BufferError> {
        self.ensure_coordinator()?;
        if !self.filled.wait_timeout(timeout)? {
            return Ok(false);
        }
        self.take_filled(dest).map(|()| true)
    }

    fn take_filled(&self, dest: &mut EdgeSet) -> Result<(), BufferError> {
        // SAFETY: The unit taken from `filled` makes the slot at `read_pos` fully
        // written, and only the coordinator moves `read_pos`.
        let taken = unsafe { transfer::take(&self.region) };
        self.free.post()?;
        trace!(slot = taken.slot, edges = taken.len, "candidate read");
        for &edge in taken.edges() {
            dest.add_edge(edge)?;
        }
        Ok(())
    }

    fn ensure_coordinator(&self) -> Result<(), BufferError> {
        match self.role {
            Role::Coordinator => Ok(()),
            Role::Worker => Err(BufferError::NotCoordinator),
        }
    }

    /// Ask all workers to stop after their current attempt.
    pub fn terminate(&self) {
        self.region.raise_terminate();
        debug!("termination flag raised");
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.region.terminate_raised()
    }

    /// Number of slots currently available to writers.
    ///
    /// # Errors
    /// On semaphore failure.
    pub fn free_slots(&self) -> Result<u32, BufferError> {
        self.free.value()
    }

    /// Number of slots written but not yet read.
    ///
    /// # Errors
    /// On semaphore failure.
    pub fn filled_slots(&self) -> Result<u32, BufferError> {
        self.filled.value()
    }

    /// Release every resource of this handle; the coordinator also removes all
    /// names from the system.
    ///
    /// Every step is attempted even if an earlier one fails.
    ///
    /// # Errors
    /// The first failure encountered.
    pub fn teardown(mut self) -> Result<(), BufferError> {
        let Self {
            region,
            free,
            filled,
            mutex,
            role,
        } = &mut self;
        let results = [
            region.release(),
            free.release(),
            filled.release(),
            mutex.release(),
        ];
        info!(?role, "ring buffer torn down");
        results.into_iter().find_map(Result::err).map_or(Ok(()), Err)
    }
}

impl LocalRing {
    /// Coordinator handle onto a fresh in-process ring.
    pub fn local() -> Self {
        Self::from_parts(
            Arc::new(LocalRegion::new()),
            Arc::new(LocalSemaphore::new(SLOTS)),
            Arc::new(LocalSemaphore::new(0)),
            Arc::new(LocalSemaphore::new(1)),
            Role::Coordinator,
        )
    }

    /// Another producer handle onto the same ring.
    pub fn worker_handle(&self) -> Self {
        Self::from_parts(
            self.region.clone(),
            self.free.clone(),
            self.filled.clone(),
            self.mutex.clone(),
            Role::Worker,
        )
    }
}

fn wait_uninterrupted(semaphore: &impl Semaphore) -> Result<(), BufferError> {
    loop {
        match semaphore.wait() {
            Err(BufferError::Interrupted) => continue,
            result => return result,
        }
    }
}
