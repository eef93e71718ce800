use crate::buffer::BufferError;
use core::time::Duration;

#[cfg(feature = "loom")]
mod imp {
    pub(crate) use loom::{
        cell::UnsafeCell,
        sync::{Condvar, Mutex, atomic::AtomicU32},
    };
}

#[cfg(not(feature = "loom"))]
mod imp {
    use crate::types::SyncUnsafeCell;
    pub(crate) use core::{cell::UnsafeCell, sync::atomic::AtomicU32};
    pub(crate) use std::sync::{Condvar, Mutex};

    pub(crate) trait LoomPtrCompat: Sized {
        type Ptr;
        fn with<R>(self, f: impl FnOnce(Self::Ptr) -> R) -> R;
    }

    impl<T> LoomPtrCompat for *mut T {
        type Ptr = *mut T;
        fn with<R>(self, f: impl FnOnce(Self::Ptr) -> R) -> R {
            f(self)
        }
    }

    pub(crate) trait LoomUnsafeCellCompat<T> {
        fn get_mut(&self) -> impl LoomPtrCompat<Ptr = *mut T>;
    }

    impl<T> LoomUnsafeCellCompat<T> for SyncUnsafeCell<T> {
        fn get_mut(&self) -> impl LoomPtrCompat<Ptr = *mut T> {
            self.get()
        }
    }
}

pub(crate) use imp::*;
use std::{
    sync::{Arc, PoisonError},
    thread,
    time::Instant,
};

/// Interval at which [`Semaphore::wait_timeout`] polls when the primitive has
/// no timed wait of its own.
const POLL_STEP: Duration = Duration::from_millis(1);

/// Counting semaphore as used by the ring buffer protocol.
///
/// Implemented by POSIX named semaphores for cross-process rings and by
/// [`LocalSemaphore`] for in-process rings.
pub trait Semaphore {
    /// Block until the count is positive, then decrement it.
    ///
    /// # Errors
    /// [`BufferError::Interrupted`] if a signal interrupted the wait, or
    /// [`BufferError::Semaphore`] on any other failure.
    fn wait(&self) -> Result<(), BufferError>;

    /// Decrement the count if it is positive. Returns whether it was.
    ///
    /// # Errors
    /// On failure of the underlying primitive.
    fn try_wait(&self) -> Result<bool, BufferError>;

    /// Like [`wait`](Self::wait), but gives up once `timeout` has passed.
    /// Returns whether a unit was taken.
    ///
    /// # Errors
    /// Same as [`wait`](Self::wait).
    fn wait_timeout(&self, timeout: Duration) -> Result<bool, BufferError> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if self.try_wait()? {
                return Ok(true);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(false);
            }
            thread::sleep(POLL_STEP);
        }
    }

    /// Increment the count, waking one waiter.
    ///
    /// # Errors
    /// On failure of the underlying primitive.
    fn post(&self) -> Result<(), BufferError>;

    /// Current count.
    ///
    /// # Errors
    /// On failure of the underlying primitive.
    fn value(&self) -> Result<u32, BufferError>;

    /// Give up this handle. Must be idempotent.
    ///
    /// # Errors
    /// On failure to close or unlink the underlying primitive.
    fn release(&mut self) -> Result<(), BufferError> {
        Ok(())
    }
}

/// Counting semaphore for threads of a single process.
#[derive(Debug)]
pub struct LocalSemaphore {
    count: Mutex<u32>,
    available: Condvar,
}

impl LocalSemaphore {
    #[must_use]
    pub fn new(initial: u32) -> Self {
        Self {
            count: Mutex::new(initial),
            available: Condvar::new(),
        }
    }
}

impl Semaphore for LocalSemaphore {
    fn wait(&self) -> Result<(), BufferError> {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count == 0 {
            count = self
                .available
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *count -= 1;
        Ok(())
    }

    fn try_wait(&self) -> Result<bool, BufferError> {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        if *count == 0 {
            return Ok(false);
        }
        *count -= 1;
        Ok(true)
    }

    fn wait_timeout(&self, timeout: Duration) -> Result<bool, BufferError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count == 0 {
            let left = deadline.map_or(timeout, |deadline| {
                deadline.saturating_duration_since(Instant::now())
            });
            if left.is_zero() {
                return Ok(false);
            }
            (count, _) = self
                .available
                .wait_timeout(count, left)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *count -= 1;
        Ok(true)
    }

    fn post(&self) -> Result<(), BufferError> {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count += 1;
        drop(count);
        self.available.notify_one();
        Ok(())
    }

    fn value(&self) -> Result<u32, BufferError> {
        Ok(*self.count.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<S: Semaphore> Semaphore for Arc<S> {
    fn wait(&self) -> Result<(), BufferError> {
        S::wait(self)
    }

    fn try_wait(&self) -> Result<bool, BufferError> {
        S::try_wait(self)
    }

    fn wait_timeout(&self, timeout: Duration) -> Result<bool, BufferError> {
        S::wait_timeout(self, timeout)
    }

    fn post(&self) -> Result<(), BufferError> {
        S::post(self)
    }

    fn value(&self) -> Result<u32, BufferError> {
        S::value(self)
    }

    fn release(&mut self) -> Result<(), BufferError> {
        // Shared handles are released by dropping the last `Arc`.
        Ok(())
    }
}
