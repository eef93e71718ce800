use crate::{
    buffer::{BufferError, Region, Role, SetupError, SharedLayout, SlotPtr},
    sync::Semaphore,
};
use core::{
    ffi::CStr,
    num::NonZeroUsize,
    ptr::NonNull,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};
use nix::{
    errno::Errno,
    fcntl::OFlag,
    sys::{
        mman::{MapFlags, ProtFlags, mmap, munmap, shm_open, shm_unlink},
        stat::Mode,
        time::TimeSpec,
    },
    time::{ClockId, clock_gettime},
};
use std::{ffi::CString, fs::File, io};
use tracing::{debug, warn};

const LAYOUT_LEN: NonZeroUsize = match NonZeroUsize::new(SharedLayout::SIZE) {
    Some(len) => len,
    None => panic!("shared layout must not be empty"),
};

fn display_name(name: &CStr) -> String {
    name.to_string_lossy().into_owned()
}

/// POSIX shared memory object mapped into this process.
///
/// The coordinator creates, sizes and zeroes the object and unlinks its name
/// on release; workers only map an existing object. The descriptor is closed
/// when the region is dropped.
#[derive(Debug)]
pub struct ShmRegion {
    layout: Option<NonNull<SharedLayout>>,
    file: File,
    name: CString,
    owner: bool,
}

// SAFETY: The mapping is process-wide; all access to it goes through the ring
// buffer protocol.
unsafe impl Send for ShmRegion {}
// SAFETY: See above.
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    pub(super) fn open(name: &CStr, role: Role) -> Result<Self, SetupError> {
        let owner = role == Role::Coordinator;
        let (flags, mode) = if owner {
            (
                OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
                Mode::S_IRUSR | Mode::S_IWUSR,
            )
        } else {
            (OFlag::O_RDWR, Mode::empty())
        };
        let fd = shm_open(name, flags, mode).map_err(|source| SetupError::OpenSegment {
            name: display_name(name),
            source: source.into(),
        })?;
        // From here on, dropping `region` undoes everything done so far.
        let mut region = Self {
            layout: None,
            file: File::from(fd),
            name: name.to_owned(),
            owner,
        };

        let resize_err = |source: io::Error| SetupError::Resize {
            name: display_name(name),
            source,
        };
        if owner {
            region
                .file
                .set_len(SharedLayout::SIZE as u64)
                .map_err(resize_err)?;
        } else if region.file.metadata().map_err(resize_err)?.len() < SharedLayout::SIZE as u64 {
            // The coordinator has not finished sizing the object yet.
            return Err(resize_err(Errno::EINVAL.into()));
        }

        // SAFETY: A fresh shared mapping of the whole object; the kernel picks the
        // address.
        let ptr = unsafe {
            mmap(
                None,
                LAYOUT_LEN,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &region.file,
                0,
            )
        }
        .map_err(|source| SetupError::Map {
            name: display_name(name),
            source: source.into(),
        })?;
        let layout = ptr.cast::<SharedLayout>();
        region.layout = Some(layout);

        if owner {
            // SAFETY: The mapping is `LAYOUT_LEN` bytes long and writable, and all-zero
            // bytes are a valid `SharedLayout`. Workers cannot use the ring before the
            // semaphores exist, which happens only after this.
            unsafe { layout.as_ptr().write_bytes(0, 1) };
        }
        debug!(name = %display_name(name), ?role, "shared memory mapped");
        Ok(region)
    }
}

impl ShmRegion {
    fn layout(&self) -> *mut SharedLayout {
        self.layout
            .unwrap_or_else(|| unreachable!("ShmRegion::layout: used after release"))
            .as_ptr()
    }

    fn terminate_flag(&self) -> &AtomicU32 {
        // SAFETY: The mapping outlives `&self`, and atomics may be shared freely.
        unsafe { &*(&raw const (*self.layout()).terminate) }
    }
}

impl Region for ShmRegion {
    fn raise_terminate(&self) {
        self.terminate_flag().store(1, Ordering::Release);
    }

    fn terminate_raised(&self) -> bool {
        self.terminate_flag().load(Ordering::Acquire) != 0
    }

    fn with_write_pos<T>(&self, f: impl FnOnce(*mut u32) -> T) -> T {
        // SAFETY: Only a field address is taken; no reference is created to memory
        // other processes may write concurrently.
        f(unsafe { &raw mut (*self.layout()).write_pos })
    }

    fn with_read_pos<T>(&self, f: impl FnOnce(*mut u32) -> T) -> T {
        // SAFETY: See `with_write_pos`.
        f(unsafe { &raw mut (*self.layout()).read_pos })
    }

    fn with_slot<T>(&self, slot: usize, f: impl FnOnce(SlotPtr) -> T) -> T {
        let layout = self.layout();
        // SAFETY: See `with_write_pos`; array indexing is bounds checked.
        let ptr = unsafe {
            SlotPtr {
                len: &raw mut (*layout).edge_counts[slot],
                edges: &raw mut (*layout).edges[slot],
            }
        };
        f(ptr)
    }

    fn release(&mut self) -> Result<(), BufferError> {
        let mut first_err = None;
        if let Some(layout) = self.layout.take() {
            // SAFETY: The mapping was created in `open` with `LAYOUT_LEN` bytes and
            // nothing borrowed from it outlives the ring buffer that owns `self`.
            if let Err(source) = unsafe { munmap(layout.cast(), LAYOUT_LEN.get()) } {
                first_err.get_or_insert(BufferError::Release {
                    op: "unmap",
                    resource: display_name(&self.name),
                    source,
                });
            }
        }
        if self.owner {
            self.owner = false;
            if let Err(source) = shm_unlink(self.name.as_c_str()) {
                first_err.get_or_insert(BufferError::Release {
                    op: "unlink",
                    resource: display_name(&self.name),
                    source,
                });
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(%err, "failed to release shared memory");
        }
    }
}

/// POSIX named counting semaphore.
///
/// The coordinator creates the name exclusively and unlinks it on release;
/// workers open an existing one.
#[derive(Debug)]
pub struct NamedSemaphore {
    sem: Option<NonNull<libc::sem_t>>,
    name: CString,
    owner: bool,
}

// SAFETY: POSIX semaphores are safe to use from any thread.
unsafe impl Send for NamedSemaphore {}
// SAFETY: See above.
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    pub(super) fn open(name: &CStr, role: Role, initial: u32) -> Result<Self, SetupError> {
        let owner = role == Role::Coordinator;
        // SAFETY: `name` is NUL terminated; the variadic arguments match what
        // `sem_open` expects with `O_CREAT`.
        let sem = unsafe {
            if owner {
                libc::sem_open(
                    name.as_ptr(),
                    libc::O_CREAT | libc::O_EXCL,
                    libc::c_uint::from(Mode::S_IRUSR.bits() | Mode::S_IWUSR.bits()),
                    libc::c_uint::from(initial),
                )
            } else {
                libc::sem_open(name.as_ptr(), 0)
            }
        };
        let sem = NonNull::new(sem)
            .filter(|sem| sem.as_ptr() != libc::SEM_FAILED)
            .ok_or_else(|| SetupError::OpenSemaphore {
                name: display_name(name),
                source: Errno::last().into(),
            })?;
        debug!(name = %display_name(name), ?role, initial, "semaphore opened");
        Ok(Self {
            sem: Some(sem),
            name: name.to_owned(),
            owner,
        })
    }

    fn handle(&self, op: &'static str) -> Result<*mut libc::sem_t, BufferError> {
        self.sem.map(NonNull::as_ptr).ok_or(BufferError::Semaphore {
            op,
            source: Errno::EBADF,
        })
    }
}

impl Semaphore for NamedSemaphore {
    fn wait(&self) -> Result<(), BufferError> {
        let sem = self.handle("wait")?;
        // SAFETY: `sem` is open until `release`, which needs `&mut self`.
        if unsafe { libc::sem_wait(sem) } == 0 {
            return Ok(());
        }
        match Errno::last() {
            Errno::EINTR => Err(BufferError::Interrupted),
            source => Err(BufferError::Semaphore { op: "wait", source }),
        }
    }

    fn try_wait(&self) -> Result<bool, BufferError> {
        let sem = self.handle("trywait")?;
        loop {
            // SAFETY: See `wait`.
            if unsafe { libc::sem_trywait(sem) } == 0 {
                return Ok(true);
            }
            match Errno::last() {
                Errno::EAGAIN => return Ok(false),
                Errno::EINTR => continue,
                source => {
                    return Err(BufferError::Semaphore {
                        op: "trywait",
                        source,
                    });
                }
            }
        }
    }

    #[cfg(not(target_vendor = "apple"))]
    fn wait_timeout(&self, timeout: Duration) -> Result<bool, BufferError> {
        let sem = self.handle("timedwait")?;
        let deadline = clock_gettime(ClockId::CLOCK_REALTIME)
            .map_err(|source| BufferError::Semaphore {
                op: "timedwait",
                source,
            })?
            + TimeSpec::from_duration(timeout);
        // SAFETY: See `wait`; `deadline` outlives the call.
        if unsafe { libc::sem_timedwait(sem, deadline.as_ref()) } == 0 {
            return Ok(true);
        }
        match Errno::last() {
            Errno::ETIMEDOUT => Ok(false),
            Errno::EINTR => Err(BufferError::Interrupted),
            source => Err(BufferError::Semaphore {
                op: "timedwait",
                source,
            }),
        }
    }

    fn post(&self) -> Result<(), BufferError> {
        let sem = self.handle("post")?;
        // SAFETY: See `wait`.
        if unsafe { libc::sem_post(sem) } == 0 {
            return Ok(());
        }
        Err(BufferError::Semaphore {
            op: "post",
            source: Errno::last(),
        })
    }

    fn value(&self) -> Result<u32, BufferError> {
        let sem = self.handle("getvalue")?;
        let mut value: libc::c_int = 0;
        // SAFETY: See `wait`; `value` is a valid out pointer.
        if unsafe { libc::sem_getvalue(sem, &mut value) } == 0 {
            // Some platforms report waiters as a negative count.
            return Ok(value.max(0).unsigned_abs());
        }
        Err(BufferError::Semaphore {
            op: "getvalue",
            source: Errno::last(),
        })
    }

    fn release(&mut self) -> Result<(), BufferError> {
        let mut first_err = None;
        if let Some(sem) = self.sem.take() {
            // SAFETY: `sem` came from `sem_open` and is closed exactly once.
            if unsafe { libc::sem_close(sem.as_ptr()) } != 0 {
                first_err.get_or_insert(BufferError::Release {
                    op: "close",
                    resource: display_name(&self.name),
                    source: Errno::last(),
                });
            }
        }
        if self.owner {
            self.owner = false;
            // SAFETY: `name` is NUL terminated.
            if unsafe { libc::sem_unlink(self.name.as_ptr()) } != 0 {
                first_err.get_or_insert(BufferError::Release {
                    op: "unlink",
                    resource: display_name(&self.name),
                    source: Errno::last(),
                });
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(%err, "failed to release semaphore");
        }
    }
}
