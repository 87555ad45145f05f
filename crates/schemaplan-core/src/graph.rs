//! Directed dependency graph over arbitrary hashable vertices.
//!
//! The graph is discovered lazily: starting from a set of root vertices, an
//! injected expansion function supplies each vertex's successors until no new
//! vertex turns up. Vertices live in an arena and are addressed by index;
//! per-traversal state (discovery time, parent pointer, finish order) is kept
//! in index-keyed vectors and reset before every traversal, so one graph can
//! answer several queries.
//!
//! Depth-first search uses an explicit work stack rather than recursion, so
//! deep dependency chains cannot exhaust the thread stack.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use thiserror::Error;

/// Graph traversal errors. Vertices are reported by their display label.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A back-edge was found while traversing.
    #[error("circular dependency detected: {}", .cycle.join(" -> "))]
    CircularDependencyDetected {
        /// The cycle, starting and ending at the same vertex.
        cycle: Vec<String>,
    },

    /// The most recent traversal recorded no path between two vertices.
    #[error("no dependency path found from {from} to {to}")]
    NoDependencyPathFound {
        /// Start of the requested path.
        from: String,
        /// End of the requested path.
        to: String,
    },

    /// The vertex was never discovered while building the graph.
    #[error("vertex {0} is not part of the graph")]
    UnknownVertex(String),

    /// Expansion kept producing new vertices past the configured budget.
    #[error("graph expansion exceeded the limit of {limit} vertices")]
    TooLarge {
        /// The vertex budget that was exceeded.
        limit: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Mark {
    #[default]
    Unvisited,
    Entered,
    Exited,
}

#[derive(Debug, Clone, Copy, Default)]
struct VisitState {
    mark: Mark,
    discovered: usize,
    parent: Option<usize>,
}

/// A directed graph whose edges point from a vertex to its successors
/// (the things it depends on).
#[derive(Debug, Clone)]
pub struct DependencyGraph<V> {
    vertices: Vec<V>,
    index: HashMap<V, usize>,
    successors: Vec<Vec<usize>>,
    state: Vec<VisitState>,
    clock: usize,
    finish_order: Vec<usize>,
}

impl<V> DependencyGraph<V>
where
    V: Clone + Eq + Hash + fmt::Display,
{
    /// Build a graph by expanding `roots` breadth-first through `expand`.
    ///
    /// Cyclic successor data is fine; an expansion that never stops producing
    /// new vertices fails with [`GraphError::TooLarge`] once `max_vertices`
    /// have been discovered.
    pub fn build<E, F>(
        roots: impl IntoIterator<Item = V>,
        max_vertices: usize,
        mut expand: F,
    ) -> Result<Self, E>
    where
        F: FnMut(&V) -> Result<Vec<V>, E>,
        E: From<GraphError>,
    {
        let mut graph = Self {
            vertices: Vec::new(),
            index: HashMap::new(),
            successors: Vec::new(),
            state: Vec::new(),
            clock: 0,
            finish_order: Vec::new(),
        };

        let mut pending = VecDeque::new();
        for root in roots {
            let (idx, is_new) = graph.intern(root, max_vertices)?;
            if is_new {
                pending.push_back(idx);
            }
        }

        while let Some(idx) = pending.pop_front() {
            let found = expand(&graph.vertices[idx])?;
            let mut edges = Vec::with_capacity(found.len());
            for successor in found {
                let (succ_idx, is_new) = graph.intern(successor, max_vertices)?;
                if is_new {
                    pending.push_back(succ_idx);
                }
                if !edges.contains(&succ_idx) {
                    edges.push(succ_idx);
                }
            }
            graph.successors[idx] = edges;
        }

        Ok(graph)
    }

    fn intern(&mut self, vertex: V, limit: usize) -> Result<(usize, bool), GraphError> {
        if let Some(&idx) = self.index.get(&vertex) {
            return Ok((idx, false));
        }
        if self.vertices.len() >= limit {
            return Err(GraphError::TooLarge { limit });
        }
        let idx = self.vertices.len();
        self.index.insert(vertex.clone(), idx);
        self.vertices.push(vertex);
        self.successors.push(Vec::new());
        self.state.push(VisitState::default());
        Ok((idx, true))
    }

    /// All vertices, in discovery order.
    pub fn vertices(&self) -> &[V] {
        &self.vertices
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Whether the graph has no vertices.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Whether `vertex` was discovered while building the graph.
    pub fn contains(&self, vertex: &V) -> bool {
        self.index.contains_key(vertex)
    }

    /// Direct successors of `vertex`, in the order the expansion returned them.
    pub fn successors(&self, vertex: &V) -> Result<Vec<&V>, GraphError> {
        let idx = self.index_of(vertex)?;
        Ok(self.successors[idx]
            .iter()
            .map(|&s| &self.vertices[s])
            .collect())
    }

    /// Every edge as a `(vertex, successor)` pair.
    pub fn edges(&self) -> impl Iterator<Item = (&V, &V)> + '_ {
        self.successors.iter().enumerate().flat_map(move |(idx, succ)| {
            succ.iter()
                .map(move |&s| (&self.vertices[idx], &self.vertices[s]))
        })
    }

    /// Vertices with no incoming edge, in discovery order.
    pub fn roots(&self) -> Vec<V> {
        self.root_indices()
            .into_iter()
            .map(|idx| self.vertices[idx].clone())
            .collect()
    }

    fn root_indices(&self) -> Vec<usize> {
        let mut incoming = vec![0usize; self.vertices.len()];
        for succ in &self.successors {
            for &s in succ {
                incoming[s] += 1;
            }
        }
        incoming
            .iter()
            .enumerate()
            .filter(|(_, &count)| count == 0)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Order vertices so that every vertex precedes all of its successors.
    ///
    /// This is the reverse of the depth-first finish order. Fails on the first
    /// back-edge found.
    pub fn topological_order(&mut self) -> Result<Vec<V>, GraphError> {
        self.reset();
        for idx in 0..self.vertices.len() {
            self.visit(idx)?;
        }
        Ok(self.finished_in_reverse())
    }

    /// Traverse the whole graph, failing if it contains a cycle.
    pub fn cycle_check(&mut self) -> Result<(), GraphError> {
        self.topological_order().map(|_| ())
    }

    /// Topological order of the subgraph reachable from `vertex`, including
    /// `vertex` itself (which always comes first).
    pub fn reachable_from(&mut self, vertex: &V) -> Result<Vec<V>, GraphError> {
        let idx = self.index_of(vertex)?;
        self.reset();
        self.visit(idx)?;
        Ok(self.finished_in_reverse())
    }

    /// Group vertices into clusters of connected vertices.
    ///
    /// For every root (a vertex without incoming edges) its reachable set is
    /// computed and merged with every existing group it overlaps. Groups are
    /// returned in order of their earliest discovered vertex.
    pub fn weak_components(&mut self) -> Result<Vec<Vec<V>>, GraphError> {
        let mut groups: Vec<HashSet<usize>> = Vec::new();

        for root in self.root_indices() {
            self.reset();
            self.visit(root)?;
            let mut members: HashSet<usize> = self.finish_order.iter().copied().collect();

            let mut disjoint = Vec::with_capacity(groups.len() + 1);
            for group in groups.drain(..) {
                if group.is_disjoint(&members) {
                    disjoint.push(group);
                } else {
                    members.extend(group);
                }
            }
            disjoint.push(members);
            groups = disjoint;
        }

        let mut ordered: Vec<Vec<usize>> = groups
            .into_iter()
            .map(|group| {
                let mut members: Vec<usize> = group.into_iter().collect();
                members.sort_unstable();
                members
            })
            .collect();
        ordered.sort_by_key(|members| members.first().copied());

        Ok(ordered
            .into_iter()
            .map(|members| {
                members
                    .into_iter()
                    .map(|idx| self.vertices[idx].clone())
                    .collect()
            })
            .collect())
    }

    /// The path from `from` to `to` recorded by the most recent traversal.
    pub fn path_between(&self, from: &V, to: &V) -> Result<Vec<V>, GraphError> {
        let from_idx = self.index_of(from)?;
        let to_idx = self.index_of(to)?;
        let no_path = || GraphError::NoDependencyPathFound {
            from: from.to_string(),
            to: to.to_string(),
        };

        if self.state[to_idx].mark == Mark::Unvisited {
            return Err(no_path());
        }

        let mut path = vec![to_idx];
        let mut cursor = to_idx;
        while cursor != from_idx {
            cursor = self.state[cursor].parent.ok_or_else(no_path)?;
            path.push(cursor);
        }
        path.reverse();

        Ok(path.into_iter().map(|idx| self.vertices[idx].clone()).collect())
    }

    fn index_of(&self, vertex: &V) -> Result<usize, GraphError> {
        self.index
            .get(vertex)
            .copied()
            .ok_or_else(|| GraphError::UnknownVertex(vertex.to_string()))
    }

    fn reset(&mut self) {
        self.state.iter_mut().for_each(|s| *s = VisitState::default());
        self.clock = 0;
        self.finish_order.clear();
    }

    fn finished_in_reverse(&self) -> Vec<V> {
        self.finish_order
            .iter()
            .rev()
            .map(|&idx| self.vertices[idx].clone())
            .collect()
    }

    fn visit(&mut self, start: usize) -> Result<(), GraphError> {
        if self.state[start].mark != Mark::Unvisited {
            return Ok(());
        }

        self.enter(start, None);
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];

        while let Some(frame) = stack.last_mut() {
            let (vertex, cursor) = *frame;
            match self.successors[vertex].get(cursor).copied() {
                Some(successor) => {
                    frame.1 += 1;
                    let seen = self.state[successor];
                    match seen.mark {
                        Mark::Unvisited => {
                            self.enter(successor, Some(vertex));
                            stack.push((successor, 0));
                        }
                        Mark::Entered if seen.discovered <= self.state[vertex].discovered => {
                            return Err(self.cycle_error(successor, vertex));
                        }
                        _ => {}
                    }
                }
                None => {
                    stack.pop();
                    self.exit(vertex);
                }
            }
        }

        Ok(())
    }

    fn enter(&mut self, idx: usize, parent: Option<usize>) {
        self.clock += 1;
        let state = &mut self.state[idx];
        state.mark = Mark::Entered;
        state.discovered = self.clock;
        state.parent = parent;
    }

    fn exit(&mut self, idx: usize) {
        self.state[idx].mark = Mark::Exited;
        self.finish_order.push(idx);
    }

    /// Rebuild the cycle closed by the back-edge `current -> target`.
    fn cycle_error(&self, target: usize, current: usize) -> GraphError {
        let mut path = vec![current];
        let mut cursor = current;
        while cursor != target {
            match self.state[cursor].parent {
                Some(parent) => {
                    path.push(parent);
                    cursor = parent;
                }
                None => break,
            }
        }
        path.reverse();
        path.push(target);

        GraphError::CircularDependencyDetected {
            cycle: path
                .into_iter()
                .map(|idx| self.vertices[idx].to_string())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Adjacency = HashMap<&'static str, Vec<&'static str>>;

    fn graph_of(edges: &[(&'static str, &[&'static str])]) -> (DependencyGraph<&'static str>, Adjacency) {
        let adjacency: Adjacency = edges.iter().map(|(v, s)| (*v, s.to_vec())).collect();
        let roots: Vec<&'static str> = edges.iter().map(|(v, _)| *v).collect();
        let graph = DependencyGraph::build(roots, 100, |v| {
            Ok::<_, GraphError>(adjacency.get(v).cloned().unwrap_or_default())
        })
        .unwrap();
        (graph, adjacency)
    }

    fn position(order: &[&str], vertex: &str) -> usize {
        order.iter().position(|v| *v == vertex).unwrap()
    }

    #[test]
    fn test_topological_order_puts_vertices_before_successors() {
        let (mut graph, adjacency) = graph_of(&[
            ("app", &["web", "domain"]),
            ("web", &["component"]),
            ("domain", &["component", "sqlalchemy"]),
            ("component", &[]),
        ]);

        let order = graph.topological_order().unwrap();
        assert_eq!(order.len(), 5);
        for (vertex, successors) in &adjacency {
            for successor in successors {
                assert!(position(&order, vertex) < position(&order, successor));
            }
        }
    }

    #[test]
    fn test_expansion_discovers_vertices_not_listed_as_roots() {
        let (graph, _) = graph_of(&[("a", &["b"]), ("b", &["c"])]);
        assert!(graph.contains(&"c"));
        assert_eq!(graph.successors(&"c").unwrap().len(), 0);
    }

    #[test]
    fn test_cycle_is_reported_with_full_path() {
        let (mut graph, adjacency) = graph_of(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);

        let err = graph.topological_order().unwrap_err();
        let GraphError::CircularDependencyDetected { cycle } = err else {
            panic!("expected a cycle");
        };
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
        for pair in cycle.windows(2) {
            let successors = &adjacency[pair[0].as_str()];
            assert!(successors.iter().any(|s| *s == pair[1]));
        }
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let (mut graph, _) = graph_of(&[("a", &["a"])]);
        let err = graph.cycle_check().unwrap_err();
        assert_eq!(
            err,
            GraphError::CircularDependencyDetected {
                cycle: vec!["a".to_string(), "a".to_string()]
            }
        );
        assert_eq!(err.to_string(), "circular dependency detected: a -> a");
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let (mut graph, _) = graph_of(&[
            ("top", &["left", "right"]),
            ("left", &["bottom"]),
            ("right", &["bottom"]),
        ]);
        assert!(graph.cycle_check().is_ok());
    }

    #[test]
    fn test_state_is_reset_between_traversals() {
        let (mut graph, _) = graph_of(&[("a", &["b", "c"]), ("b", &["c"])]);
        let first = graph.topological_order().unwrap();
        let reachable = graph.reachable_from(&"b").unwrap();
        let second = graph.topological_order().unwrap();

        assert_eq!(reachable, vec!["b", "c"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_reachable_from_starts_at_the_vertex() {
        let (mut graph, _) = graph_of(&[("a", &["b"]), ("b", &["c"]), ("d", &["c"])]);
        let reachable = graph.reachable_from(&"a").unwrap();
        assert_eq!(reachable, vec!["a", "b", "c"]);

        let err = graph.reachable_from(&"zzz").unwrap_err();
        assert_eq!(err, GraphError::UnknownVertex("zzz".to_string()));
    }

    #[test]
    fn test_roots_have_no_incoming_edges() {
        let (graph, _) = graph_of(&[("a", &["b"]), ("c", &["b"]), ("b", &[])]);
        assert_eq!(graph.roots(), vec!["a", "c"]);
    }

    #[test]
    fn test_weak_components_merge_overlapping_reachable_sets() {
        let (mut graph, _) = graph_of(&[
            ("a", &["shared"]),
            ("b", &["shared"]),
            ("c", &["lonely"]),
        ]);

        let components = graph.weak_components().unwrap();
        assert_eq!(components.len(), 2);
        assert_eq!(components[0], vec!["a", "b", "shared"]);
        assert_eq!(components[1], vec!["c", "lonely"]);
    }

    #[test]
    fn test_path_between_follows_most_recent_traversal() {
        let (mut graph, _) = graph_of(&[("a", &["b"]), ("b", &["c"]), ("x", &[])]);
        graph.reachable_from(&"a").unwrap();

        assert_eq!(graph.path_between(&"a", &"c").unwrap(), vec!["a", "b", "c"]);
        assert_eq!(graph.path_between(&"b", &"c").unwrap(), vec!["b", "c"]);

        let err = graph.path_between(&"a", &"x").unwrap_err();
        assert!(matches!(err, GraphError::NoDependencyPathFound { .. }));
    }

    #[test]
    fn test_unbounded_expansion_is_rejected() {
        let result = DependencyGraph::build(vec![0u64], 50, |n| Ok::<_, GraphError>(vec![n + 1]));
        assert!(matches!(result, Err(GraphError::TooLarge { limit: 50 })));
    }

    #[test]
    fn test_expansion_errors_propagate() {
        #[derive(Debug)]
        #[allow(dead_code)]
        enum ExpandError {
            Graph(GraphError),
            Refused,
        }
        impl From<GraphError> for ExpandError {
            fn from(err: GraphError) -> Self {
                ExpandError::Graph(err)
            }
        }

        let result = DependencyGraph::build(vec!["a"], 10, |_| Err::<Vec<&str>, _>(ExpandError::Refused));
        assert!(matches!(result, Err(ExpandError::Refused)));
    }

    #[test]
    fn test_deep_chain_does_not_recurse() {
        let depth = 50_000u32;
        let mut graph = DependencyGraph::build(vec![0u32], depth as usize + 1, |n| {
            Ok::<_, GraphError>(if *n < depth { vec![n + 1] } else { Vec::new() })
        })
        .unwrap();

        let order = graph.topological_order().unwrap();
        assert_eq!(order.first(), Some(&0));
        assert_eq!(order.last(), Some(&depth));
    }
}
