use core::time::Duration;
use std::ffi::CString;
use thiserror::Error;

/// Number of slots in the ring buffer.
///
/// Creator and attacher must be built with the same value; the shared layout
/// carries no version information.
pub const MAX_DATA: usize = 60;
/// Maximum number of edges a single slot can hold.
pub const MAX_EDGES: usize = 8;

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "fas";

/// Error returned when a namespace cannot be turned into POSIX object names.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum NamespaceError {
    /// The namespace is empty.
    #[error("namespace must not be empty")]
    Empty,
    /// The namespace contains a character that is not allowed in a POSIX
    /// object name.
    #[error("namespace {0:?} must not contain '/' or NUL")]
    InvalidChar(String),
}

/// Names of the shared segment and the three semaphores that make up one ring
/// buffer instance.
///
/// A namespace `ns` expands to `/ns_shm`, `/ns_sem_free`, `/ns_sem_used` and
/// `/ns_sem_mutex`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub(crate) segment: CString,
    pub(crate) free: CString,
    pub(crate) filled: CString,
    pub(crate) mutex: CString,
}

impl Namespace {
    /// Derive all object names from `prefix`.
    ///
    /// # Errors
    /// If `prefix` is empty or contains `/` or a NUL byte.
    pub fn new(prefix: &str) -> Result<Self, NamespaceError> {
        if prefix.is_empty() {
            return Err(NamespaceError::Empty);
        }
        if prefix.contains(['/', '\0']) {
            return Err(NamespaceError::InvalidChar(prefix.to_owned()));
        }
        let name = |suffix: &str| {
            CString::new(format!("/{prefix}_{suffix}"))
                .map_err(|_| NamespaceError::InvalidChar(prefix.to_owned()))
        };
        Ok(Self {
            segment: name("shm")?,
            free: name("sem_free")?,
            filled: name("sem_used")?,
            mutex: name("sem_mutex")?,
        })
    }

    /// Name of the shared memory object.
    #[must_use]
    pub fn segment(&self) -> &str {
        self.segment.to_str().unwrap_or_default()
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE).unwrap_or_else(|_| unreachable!("Namespace::default"))
    }
}

/// Run limits of the coordinator loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Stop after this many candidates have been read.
    pub limit: Option<u64>,
    /// Sleep before the first read so workers can attach.
    pub delay: Duration,
}
