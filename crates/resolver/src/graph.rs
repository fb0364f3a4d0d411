//! Dependency graph over composed parts
//!
//! Nodes are part indices. An edge runs from an importing part to the part
//! satisfying the import and records how the import is delivered. The same
//! graph answers the cycle checks during resolution and the construction
//! order and grouping questions when lowering to a runtime composition.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

/// How an import edge is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dependency {
    /// Delivered as a constructor argument
    pub constructor: bool,
    /// Delivered as a deferred accessor
    pub lazy: bool,
}

impl Dependency {
    /// Non-lazy constructor argument
    pub const CONSTRUCTOR: Dependency = Dependency {
        constructor: true,
        lazy: false,
    };

    /// Non-lazy member assignment
    pub const MEMBER: Dependency = Dependency {
        constructor: false,
        lazy: false,
    };

    /// The exporter must exist before the importer is finished
    pub fn is_eager(&self) -> bool {
        !self.lazy
    }

    /// The exporter must exist before the importer is created
    pub fn is_eager_constructor(&self) -> bool {
        self.constructor && !self.lazy
    }
}

/// A cycle of eager constructor dependencies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    /// Every part of the strongly connected component, by rank
    pub members: Vec<usize>,
    /// One concrete cycle through the lowest-ranked member, closed at both ends
    pub path: Vec<usize>,
}

/// Directed graph of import dependencies between parts
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<(), Dependency>,
}

impl DependencyGraph {
    /// Create a graph with nodes `0..node_count` and no edges
    pub fn new(node_count: usize) -> Self {
        let mut graph = DiGraph::with_capacity(node_count, node_count);
        for _ in 0..node_count {
            graph.add_node(());
        }
        Self { graph }
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Record that `importer` imports from `exporter`
    ///
    /// Out-of-range nodes are ignored.
    pub fn add_dependency(&mut self, importer: usize, exporter: usize, dependency: Dependency) {
        let count = self.node_count();
        debug_assert!(importer < count && exporter < count);
        if importer >= count || exporter >= count {
            return;
        }
        self.graph.add_edge(
            NodeIndex::new(importer),
            NodeIndex::new(exporter),
            dependency,
        );
    }

    /// Exporters `node` depends on through edges accepted by `filter`,
    /// ascending and without duplicates
    pub fn dependencies_of(&self, node: usize, filter: impl Fn(&Dependency) -> bool) -> Vec<usize> {
        if node >= self.node_count() {
            return Vec::new();
        }
        let mut out: Vec<usize> = self
            .graph
            .edges(NodeIndex::new(node))
            .filter(|e| filter(e.weight()))
            .map(|e| e.target().index())
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Cycles of eager constructor edges, one per strongly connected component
    ///
    /// `rank` orders nodes for reporting: members are listed by rank and the
    /// example path starts at the lowest-ranked member, visiting neighbors in
    /// rank order. The result therefore does not depend on node numbering.
    pub fn constructor_cycles(&self, rank: &[usize]) -> Vec<Cycle> {
        let sub = self.filtered(Dependency::is_eager_constructor);
        let mut cycles: Vec<Cycle> = Self::cyclic_components(&sub)
            .into_iter()
            .map(|mut members| {
                members.sort_by_key(|&m| rank_of(rank, m));
                let path = Self::find_cycle(&sub, &members, rank);
                Cycle { members, path }
            })
            .collect();
        cycles.sort_by_key(|c| c.members.first().map(|&m| rank_of(rank, m)));
        cycles
    }

    /// Strongly connected components of eager edges that contain a cycle
    pub fn eager_cycles(&self) -> Vec<Vec<usize>> {
        Self::cyclic_components(&self.filtered(Dependency::is_eager))
    }

    /// Every strongly connected component of eager edges, including single
    /// nodes; members ascending, components ordered by their first member
    pub fn eager_components(&self) -> Vec<Vec<usize>> {
        let sub = self.filtered(Dependency::is_eager);
        let mut components: Vec<Vec<usize>> = tarjan_scc(&sub)
            .into_iter()
            .map(|c| {
                let mut members: Vec<usize> = c.into_iter().map(|n| n.index()).collect();
                members.sort_unstable();
                members
            })
            .collect();
        components.sort();
        components
    }

    /// Kahn's algorithm over eager constructor edges, dependencies first
    ///
    /// Among nodes that are ready at the same time the lowest index goes
    /// first. Returns `None` if constructor edges form a cycle.
    pub fn construction_order(&self) -> Option<Vec<usize>> {
        let sub = self.filtered(Dependency::is_eager_constructor);
        let count = sub.node_count();
        let mut unmet = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for edge in sub.edge_references() {
            unmet[edge.source().index()] += 1;
            dependents[edge.target().index()].push(edge.source().index());
        }

        let mut ready: BinaryHeap<Reverse<usize>> = (0..count)
            .filter(|&n| unmet[n] == 0)
            .map(Reverse)
            .collect();
        let mut order = Vec::with_capacity(count);
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &dependent in &dependents[node] {
                unmet[dependent] -= 1;
                if unmet[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }
        (order.len() == count).then_some(order)
    }

    /// Copy of the graph keeping only edges accepted by `filter`, deduplicated
    fn filtered(&self, filter: impl Fn(&Dependency) -> bool) -> DiGraph<(), ()> {
        let mut sub = DiGraph::with_capacity(self.graph.node_count(), self.graph.edge_count());
        for _ in self.graph.node_indices() {
            sub.add_node(());
        }
        for edge in self.graph.edge_references() {
            if filter(edge.weight()) {
                sub.update_edge(edge.source(), edge.target(), ());
            }
        }
        sub
    }

    fn cyclic_components(sub: &DiGraph<(), ()>) -> Vec<Vec<usize>> {
        let mut components: Vec<Vec<usize>> = tarjan_scc(sub)
            .into_iter()
            .filter(|c| c.len() > 1 || c.iter().any(|&n| sub.contains_edge(n, n)))
            .map(|c| {
                let mut members: Vec<usize> = c.into_iter().map(|n| n.index()).collect();
                members.sort_unstable();
                members
            })
            .collect();
        components.sort();
        components
    }

    /// Three-color DFS inside one component for a path back to its first member
    fn find_cycle(sub: &DiGraph<(), ()>, members: &[usize], rank: &[usize]) -> Vec<usize> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        struct Frame {
            node: usize,
            neighbors: Vec<usize>,
            cursor: usize,
        }

        let Some(&start) = members.first() else {
            return Vec::new();
        };
        let mut in_component = vec![false; sub.node_count()];
        for &m in members {
            in_component[m] = true;
        }
        let neighbors = |node: usize| -> Vec<usize> {
            let mut out: Vec<usize> = sub
                .neighbors(NodeIndex::new(node))
                .map(|n| n.index())
                .filter(|&n| in_component[n])
                .collect();
            out.sort_by_key(|&n| rank_of(rank, n));
            out.dedup();
            out
        };

        let mut color = vec![Color::White; sub.node_count()];
        color[start] = Color::Gray;
        let mut stack = vec![Frame {
            node: start,
            neighbors: neighbors(start),
            cursor: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            match frame.neighbors.get(frame.cursor).copied() {
                Some(next) => {
                    frame.cursor += 1;
                    if next == start {
                        let mut path: Vec<usize> = stack.iter().map(|f| f.node).collect();
                        path.push(start);
                        return path;
                    }
                    if color[next] == Color::White {
                        color[next] = Color::Gray;
                        stack.push(Frame {
                            node: next,
                            neighbors: neighbors(next),
                            cursor: 0,
                        });
                    }
                }
                None => {
                    color[frame.node] = Color::Black;
                    stack.pop();
                }
            }
        }
        // Unreachable for a strongly connected component
        members.to_vec()
    }
}

fn rank_of(rank: &[usize], node: usize) -> usize {
    rank.get(node).copied().unwrap_or(node)
}
