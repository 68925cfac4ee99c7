//! Topology helpers over the DAG's adjacency matrix, expressed as a
//! `petgraph` graph so the orchestrator can reuse graph algorithms
//! instead of re-deriving predecessor/successor sets by hand.
use petgraph::graph::{Graph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction::{Incoming, Outgoing};

use crate::spec::DagSpec;

/// Edge weight: the message size in bytes, carried straight from the
/// adjacency matrix so downstream edge construction doesn't need to
/// re-consult the spec.
pub type MessageBytes = u32;

/// Build a `petgraph` graph whose node indices line up 1:1 with
/// `spec.tasks` indices, and whose edges are exactly the DAG's non-zero
/// adjacency entries.
pub fn build_topology(spec: &DagSpec) -> Graph<usize, MessageBytes> {
    let mut g = Graph::<usize, MessageBytes>::new();
    let nodes: Vec<NodeIndex> = (0..spec.tasks.len()).map(|i| g.add_node(i)).collect();
    for (s, row) in spec.adjacency.iter().enumerate() {
        for (t, &size) in row.iter().enumerate() {
            if size > 0 {
                g.add_edge(nodes[s], nodes[t], size);
            }
        }
    }
    g
}

pub trait GraphExtension {
    /// Tasks with no incoming edges. The §3 invariant requires exactly one.
    fn get_source_nodes(&self) -> Vec<NodeIndex>;
    /// Tasks with no outgoing edges. The §3 invariant requires exactly one.
    fn get_sink_nodes(&self) -> Vec<NodeIndex>;
    /// Predecessors of `node`, ordered ascending by source task index —
    /// the stable tie-break §4.6.3 requires for producer slot assignment.
    fn get_pre_nodes_ascending(&self, node: NodeIndex) -> Vec<NodeIndex>;
}

impl GraphExtension for Graph<usize, MessageBytes> {
    fn get_source_nodes(&self) -> Vec<NodeIndex> {
        self.node_indices()
            .filter(|&i| self.edges_directed(i, Incoming).next().is_none())
            .collect()
    }

    fn get_sink_nodes(&self) -> Vec<NodeIndex> {
        self.node_indices()
            .filter(|&i| self.edges_directed(i, Outgoing).next().is_none())
            .collect()
    }

    fn get_pre_nodes_ascending(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut pre: Vec<NodeIndex> = self
            .edges_directed(node, Incoming)
            .map(|edge| edge.source())
            .collect();
        pre.sort_by_key(|n| n.index());
        pre
    }
}
