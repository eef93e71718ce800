#![allow(dead_code)]

use fas::{Edge, EdgeSet, Namespace, VertexId};
use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicUsize, Ordering},
};

/// Namespace unique to this test process and call site.
pub fn namespace(tag: &str) -> (String, Namespace) {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let prefix = format!(
        "fas_test_{}_{}_{tag}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    );
    let namespace = Namespace::new(&prefix).unwrap();
    (prefix, namespace)
}

pub fn edge_set(edges: &[(VertexId, VertexId)]) -> EdgeSet {
    EdgeSet::from_edges(edges.iter().map(|&(u, v)| Edge::new(u, v))).unwrap()
}

/// Candidate with `len` distinct edges, tagged by `tag` so candidates of
/// different tags never compare equal.
pub fn tagged(tag: VertexId, len: usize) -> EdgeSet {
    let edges = (0..len as VertexId).map(|i| Edge::new(tag, 1000 + i));
    EdgeSet::from_edges(edges).unwrap()
}

/// Kahn's algorithm over the edges of `graph` that are not in `removed`.
pub fn is_acyclic_without(graph: &EdgeSet, removed: &EdgeSet) -> bool {
    let kept: Vec<Edge> = graph
        .edges()
        .iter()
        .copied()
        .filter(|&edge| !removed.contains_edge(edge))
        .collect();
    let mut in_degree: HashMap<VertexId, usize> =
        graph.vertices().iter().map(|&v| (v, 0)).collect();
    for edge in &kept {
        *in_degree.get_mut(&edge.v).unwrap() += 1;
    }
    let mut ready: VecDeque<VertexId> = in_degree
        .iter()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(&v, _)| v)
        .collect();
    let mut visited = 0;
    while let Some(vertex) = ready.pop_front() {
        visited += 1;
        for edge in kept.iter().filter(|edge| edge.u == vertex) {
            let degree = in_degree.get_mut(&edge.v).unwrap();
            *degree -= 1;
            if *degree == 0 {
                ready.push_back(edge.v);
            }
        }
    }
    visited == in_degree.len()
}
