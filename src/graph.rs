use crate::types::{Edge, VertexId};
use core::fmt;
use std::{collections::TryReserveError, io};
use thiserror::Error;

/// Capacity of a freshly constructed edge or vertex list.
pub const INITIAL_CAPACITY: usize = 10;

/// Error returned when the backing storage of an [`EdgeSet`] cannot grow.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GraphError {
    /// The allocator refused to provide more memory.
    #[error("failed to allocate edge set storage: {0}")]
    Alloc(#[from] TryReserveError),
}

/// Growable array with an explicit capacity that doubles when full.
///
/// Unlike a bare `Vec`, every allocation is fallible and the growth policy is
/// fixed, so memory usage does not depend on the allocator's strategy.
#[derive(Debug, Clone)]
struct Storage<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T: Copy + PartialEq> Storage<T> {
    fn with_capacity(capacity: usize) -> Result<Self, GraphError> {
        let mut items = Vec::new();
        items.try_reserve_exact(capacity)?;
        Ok(Self { items, capacity })
    }

    fn push(&mut self, item: T) -> Result<(), GraphError> {
        if self.items.len() == self.capacity {
            let additional = self.capacity.max(1);
            self.items.try_reserve_exact(additional)?;
            self.capacity += additional;
        }
        self.items.push(item);
        Ok(())
    }

    fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    fn as_slice(&self) -> &[T] {
        &self.items
    }
}

/// A list of directed edges together with the distinct vertices they touch.
///
/// Serves both as the input graph and as a candidate feedback arc set. Edges
/// are only ever appended; vertices are recorded in first-seen order and never
/// duplicated. Edges themselves are not de-duplicated.
#[derive(Debug, Clone)]
pub struct EdgeSet {
    edges: Storage<Edge>,
    vertices: Storage<VertexId>,
}

impl EdgeSet {
    /// Construct an empty edge set with [`INITIAL_CAPACITY`].
    ///
    /// # Errors
    /// If the initial storage cannot be allocated.
    pub fn new() -> Result<Self, GraphError> {
        Ok(Self {
            edges: Storage::with_capacity(INITIAL_CAPACITY)?,
            vertices: Storage::with_capacity(INITIAL_CAPACITY)?,
        })
    }

    /// Build an edge set by adding every edge of `edges` in order.
    ///
    /// # Errors
    /// If storage cannot grow.
    pub fn from_edges(edges: impl IntoIterator<Item = Edge>) -> Result<Self, GraphError> {
        let mut set = Self::new()?;
        for edge in edges {
            set.add_edge(edge)?;
        }
        Ok(set)
    }

    /// Append `edge`, recording its endpoints if they are new.
    ///
    /// # Errors
    /// If storage cannot grow. The set is left unchanged in that case, except
    /// that the edge may already have been appended when only the vertex list
    /// failed to grow.
    pub fn add_edge(&mut self, edge: Edge) -> Result<(), GraphError> {
        self.edges.push(edge)?;
        for vertex in [edge.u, edge.v] {
            if !self.vertices.contains(&vertex) {
                self.vertices.push(vertex)?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn contains_edge(&self, edge: Edge) -> bool {
        self.edges.contains(&edge)
    }

    #[must_use]
    pub fn contains_vertex(&self, vertex: VertexId) -> bool {
        self.vertices.contains(&vertex)
    }

    /// Edges in insertion order.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        self.edges.as_slice()
    }

    /// Distinct vertices in first-seen order.
    #[must_use]
    pub fn vertices(&self) -> &[VertexId] {
        self.vertices.as_slice()
    }

    /// Number of edges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.edges().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges().is_empty()
    }

    /// Write the edges as space separated `u-v` tokens followed by a newline.
    ///
    /// # Errors
    /// If writing to `sink` fails.
    pub fn print(&self, sink: &mut impl io::Write) -> io::Result<()> {
        writeln!(sink, "{self}")
    }
}

impl fmt::Display for EdgeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut edges = self.edges().iter();
        if let Some(first) = edges.next() {
            write!(f, "{first}")?;
            for edge in edges {
                write!(f, " {edge}")?;
            }
        }
        Ok(())
    }
}

impl PartialEq for EdgeSet {
    fn eq(&self, other: &Self) -> bool {
        self.edges() == other.edges()
    }
}

impl Eq for EdgeSet {}
