use crate::{
    buffer::{NamedSemaphore, RingBuffer, Role, SLOTS, SharedRing, ShmRegion},
    config::Namespace,
};
use std::io;
use thiserror::Error;
use tracing::info;

/// Error kind for ring buffer setup failures.
///
/// By the time one of these is returned, every resource acquired during the
/// failed attempt has been released again, and names created by a coordinator
/// have been unlinked.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SetupError {
    /// The shared memory object could not be created or opened.
    #[error("failed to open shared memory {name}: {source}")]
    OpenSegment {
        /// Object name.
        name: String,
        /// Underlying OS error.
        source: io::Error,
    },
    /// The shared memory object could not be sized, or is smaller than the
    /// ring layout.
    #[error("failed to size shared memory {name}: {source}")]
    Resize {
        /// Object name.
        name: String,
        /// Underlying OS error.
        source: io::Error,
    },
    /// The shared memory object could not be mapped.
    #[error("failed to map shared memory {name}: {source}")]
    Map {
        /// Object name.
        name: String,
        /// Underlying OS error.
        source: io::Error,
    },
    /// A semaphore could not be created or opened.
    #[error("failed to open semaphore {name}: {source}")]
    OpenSemaphore {
        /// Semaphore name.
        name: String,
        /// Underlying OS error.
        source: io::Error,
    },
}

impl SharedRing {
    /// Wire up the ring named by `namespace`.
    ///
    /// The coordinator creates the segment and the three semaphores (free =
    /// `MAX_DATA`, filled = 0, mutex = 1) and resets the cursors and the
    /// termination flag. A worker attaches to what the coordinator created and
    /// fails if any part of it does not exist yet.
    ///
    /// # Errors
    /// If any resource cannot be acquired. Resources acquired before the failing
    /// step are released in reverse order before returning.
    pub fn setup(role: Role, namespace: &Namespace) -> Result<Self, SetupError> {
        // Each guard undoes its own step on drop, so an early return unwinds the
        // steps already taken in reverse order.
        let region = ShmRegion::open(&namespace.segment, role)?;
        let free = NamedSemaphore::open(&namespace.free, role, SLOTS)?;
        let filled = NamedSemaphore::open(&namespace.filled, role, 0)?;
        let mutex = NamedSemaphore::open(&namespace.mutex, role, 1)?;
        info!(namespace = namespace.segment(), ?role, "ring buffer ready");
        Ok(RingBuffer::from_parts(region, free, filled, mutex, role))
    }

    /// Coordinator-side [`setup`](Self::setup).
    ///
    /// # Errors
    /// See [`setup`](Self::setup).
    pub fn create(namespace: &Namespace) -> Result<Self, SetupError> {
        Self::setup(Role::Coordinator, namespace)
    }

    /// Worker-side [`setup`](Self::setup).
    ///
    /// # Errors
    /// See [`setup`](Self::setup).
    pub fn attach(namespace: &Namespace) -> Result<Self, SetupError> {
        Self::setup(Role::Worker, namespace)
    }
}
