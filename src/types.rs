use crate::sync::UnsafeCell;
use core::str::FromStr;
use derive_more::{Deref, DerefMut, Display};
use rustc_hash::FxBuildHasher;
use std::collections::HashSet as _HashSet;
use thiserror::Error;

/// A minimal `UnsafeCell` wrapper that is `Sync` when `T: Sync`.
///
/// Backs the cursors and slots of the in-process ring region, where access is
/// serialized by the ring's semaphores. Under `loom` every access is checked.
#[derive(Debug, Deref, DerefMut)]
#[repr(transparent)]
pub(crate) struct SyncUnsafeCell<T>(UnsafeCell<T>);

unsafe impl<T: Sync> Sync for SyncUnsafeCell<T> {}

impl<T> SyncUnsafeCell<T> {
    pub(crate) fn new(val: T) -> Self {
        Self(UnsafeCell::new(val))
    }
}

/// Identifier of a vertex.
pub type VertexId = u32;

pub(crate) type HashSet<T> = _HashSet<T, FxBuildHasher>;

/// Directed arc `u -> v`.
///
/// The layout is fixed because edges are copied verbatim into the shared
/// segment.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("{u}-{v}")]
#[repr(C)]
pub struct Edge {
    /// Tail of the arc.
    pub u: VertexId,
    /// Head of the arc.
    pub v: VertexId,
}

impl Edge {
    /// Construct the arc `u -> v`.
    #[must_use]
    pub const fn new(u: VertexId, v: VertexId) -> Self {
        Self { u, v }
    }

    #[must_use]
    pub const fn is_self_loop(self) -> bool {
        self.u == self.v
    }
}

/// Error produced when an edge argument is not of the form `u-v`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid edge {input:?}: expected `u-v` with non-negative integers u and v")]
pub struct EdgeParseError {
    input: String,
}

impl FromStr for Edge {
    type Err = EdgeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || EdgeParseError {
            input: s.to_owned(),
        };
        let (u, v) = s.split_once('-').ok_or_else(err)?;
        // `u32::from_str` accepts a leading '+', which is not a valid vertex here.
        let vertex = |part: &str| match part.bytes().next() {
            Some(b'0'..=b'9') => part.parse::<VertexId>().map_err(|_| err()),
            _ => Err(err()),
        };
        Ok(Self::new(vertex(u)?, vertex(v)?))
    }
}
