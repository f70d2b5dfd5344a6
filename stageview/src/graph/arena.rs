//! Arena snapshot of one execution's flow graph.
//!
//! Nodes are stored in creation order and addressed by index. Parent links
//! are index lists, so branch/merge structure never forms reference cycles.
//! The innermost enclosing block of every node is resolved once, when the
//! arena is built.

use std::collections::HashMap;
use std::fmt;

use tracing::warn;

use super::node::{ExecutionNode, NodeId, NodeKind};

/// A structural anomaly found while indexing a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphAnomaly {
    /// Two nodes share an id; the later one was dropped.
    DuplicateId(NodeId),
    /// A parent id does not resolve to an earlier node.
    UnknownParent {
        /// The referencing node.
        node: NodeId,
        /// The unresolved parent.
        parent: NodeId,
    },
    /// A block end names a start that does not exist or is not a block start.
    UnmatchedBlockEnd {
        /// The block end node.
        node: NodeId,
        /// The start it claims to close.
        start: NodeId,
    },
    /// A block was closed twice; the second end is treated as a plain step.
    DuplicateBlockEnd {
        /// The block end node.
        node: NodeId,
        /// The start it claims to close.
        start: NodeId,
    },
}

impl fmt::Display for GraphAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateId(id) => write!(f, "duplicate node id {id}"),
            Self::UnknownParent { node, parent } => {
                write!(f, "node {node} references unknown parent {parent}")
            }
            Self::UnmatchedBlockEnd { node, start } => {
                write!(f, "block end {node} closes unknown block start {start}")
            }
            Self::DuplicateBlockEnd { node, start } => {
                write!(f, "block end {node} closes already closed block {start}")
            }
        }
    }
}

/// Indexed, immutable snapshot of an execution's nodes.
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    nodes: Vec<ExecutionNode>,
    index: HashMap<NodeId, usize>,
    parents: Vec<Vec<usize>>,
    enclosing: Vec<Option<usize>>,
    matched_end: Vec<bool>,
    block_ends: HashMap<usize, usize>,
    next_timed_start: Vec<Option<i64>>,
    anomalies: Vec<GraphAnomaly>,
}

impl FlowGraph {
    /// Builds the arena from nodes in creation order.
    ///
    /// Anomalies are recorded and logged; building never fails.
    #[must_use]
    pub fn from_nodes(nodes: Vec<ExecutionNode>) -> Self {
        let mut graph = Self {
            nodes: Vec::with_capacity(nodes.len()),
            ..Self::default()
        };

        for node in nodes {
            if graph.index.contains_key(&node.id) {
                graph.anomaly(GraphAnomaly::DuplicateId(node.id));
                continue;
            }
            graph.push(node);
        }

        graph.next_timed_start = vec![None; graph.nodes.len()];
        let mut next = None;
        for idx in (0..graph.nodes.len()).rev() {
            graph.next_timed_start[idx] = next;
            if let Some(timing) = graph.nodes[idx].timing {
                next = Some(timing.start_millis);
            }
        }

        graph
    }

    fn anomaly(&mut self, anomaly: GraphAnomaly) {
        warn!(anomaly = %anomaly, "Structural anomaly in flow graph");
        self.anomalies.push(anomaly);
    }

    fn push(&mut self, node: ExecutionNode) {
        let idx = self.nodes.len();

        let mut parents = Vec::with_capacity(node.parents.len());
        for parent in &node.parents {
            match self.index.get(parent) {
                Some(&p) => parents.push(p),
                None => self.anomaly(GraphAnomaly::UnknownParent {
                    node: node.id,
                    parent: *parent,
                }),
            }
        }

        let mut matched = false;
        let mut enclosing = None;
        if let NodeKind::BlockEnd { start } = &node.kind {
            match self.index.get(start).copied() {
                Some(s) if matches!(self.nodes[s].kind, NodeKind::BlockStart { .. }) => {
                    if self.block_ends.contains_key(&s) {
                        self.anomaly(GraphAnomaly::DuplicateBlockEnd {
                            node: node.id,
                            start: *start,
                        });
                    } else {
                        self.block_ends.insert(s, idx);
                        enclosing = self.enclosing[s];
                        matched = true;
                    }
                }
                _ => self.anomaly(GraphAnomaly::UnmatchedBlockEnd {
                    node: node.id,
                    start: *start,
                }),
            }
        }

        if !matched {
            enclosing = parents.first().and_then(|&p| self.block_of_child(p));
        }

        self.index.insert(node.id, idx);
        self.nodes.push(node);
        self.parents.push(parents);
        self.enclosing.push(enclosing);
        self.matched_end.push(matched);
    }

    /// The block a child of `parent` lives in.
    fn block_of_child(&self, parent: usize) -> Option<usize> {
        match self.nodes[parent].kind {
            NodeKind::BlockStart { .. } => Some(parent),
            _ => self.enclosing[parent],
        }
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in creation order.
    #[must_use]
    pub fn nodes(&self) -> &[ExecutionNode] {
        &self.nodes
    }

    /// The node at `idx`.
    #[must_use]
    pub fn node(&self, idx: usize) -> &ExecutionNode {
        &self.nodes[idx]
    }

    /// Looks up a node index by id.
    #[must_use]
    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// Parent indices of the node at `idx`.
    #[must_use]
    pub fn parents(&self, idx: usize) -> &[usize] {
        &self.parents[idx]
    }

    /// Innermost block start enclosing the node at `idx`.
    ///
    /// For a matched block end this is the block enclosing its start.
    #[must_use]
    pub fn enclosing_block(&self, idx: usize) -> Option<usize> {
        self.enclosing[idx]
    }

    /// Enclosing block starts, innermost first.
    pub fn enclosing_blocks(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.enclosing[idx], move |&b| self.enclosing[b])
    }

    /// Returns true if the node at `idx` is a block end matched to its start.
    #[must_use]
    pub fn is_matched_end(&self, idx: usize) -> bool {
        self.matched_end[idx]
    }

    /// The matching block end for the block start at `start`.
    #[must_use]
    pub fn block_end_of(&self, start: usize) -> Option<usize> {
        self.block_ends.get(&start).copied()
    }

    /// Start time of the first timed node after `idx`.
    #[must_use]
    pub fn next_timed_start(&self, idx: usize) -> Option<i64> {
        self.next_timed_start[idx]
    }

    /// Anomalies found while indexing.
    #[must_use]
    pub fn anomalies(&self) -> &[GraphAnomaly] {
        &self.anomalies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NodeTiming;

    fn start(id: u64, parent: u64, stage: Option<&str>) -> ExecutionNode {
        ExecutionNode::new(
            id,
            NodeKind::BlockStart {
                stage: stage.map(String::from),
            },
        )
        .with_parents([NodeId(parent)])
    }

    fn end(id: u64, parent: u64, start: u64) -> ExecutionNode {
        ExecutionNode::new(id, NodeKind::BlockEnd { start: NodeId(start) })
            .with_parents([NodeId(parent)])
    }

    fn step(id: u64, parent: u64) -> ExecutionNode {
        ExecutionNode::step(id).with_parents([NodeId(parent)])
    }

    #[test]
    fn test_enclosing_blocks_nested() {
        // 1 root, 2 stage start, 3 inner block, 4 step, 5 inner end, 6 step, 7 stage end, 8 step
        let graph = FlowGraph::from_nodes(vec![
            ExecutionNode::step(1),
            start(2, 1, Some("Build")),
            start(3, 2, None),
            step(4, 3),
            end(5, 4, 3),
            step(6, 5),
            end(7, 6, 2),
            step(8, 7),
        ]);

        assert!(graph.anomalies().is_empty());
        assert_eq!(graph.enclosing_block(0), None);
        assert_eq!(graph.enclosing_block(1), None);
        assert_eq!(graph.enclosing_block(2), Some(1));
        assert_eq!(graph.enclosing_block(3), Some(2));
        assert_eq!(graph.enclosing_blocks(3).collect::<Vec<_>>(), vec![2, 1]);
        // inner end sits in the stage block, as does the step after it
        assert_eq!(graph.enclosing_block(4), Some(1));
        assert_eq!(graph.enclosing_block(5), Some(1));
        // stage end and the step after it are outside every block
        assert_eq!(graph.enclosing_block(6), None);
        assert_eq!(graph.enclosing_block(7), None);
        assert_eq!(graph.block_end_of(1), Some(6));
        assert!(graph.is_matched_end(6));
    }

    #[test]
    fn test_merge_node_has_multiple_parents() {
        let graph = FlowGraph::from_nodes(vec![
            ExecutionNode::step(1),
            start(2, 1, None),
            step(3, 2),
            step(4, 2),
            end(5, 3, 2).with_parents([NodeId(3), NodeId(4)]),
        ]);

        assert_eq!(graph.parents(4), &[2, 3]);
        assert_eq!(graph.enclosing_block(2), Some(1));
        assert_eq!(graph.enclosing_block(3), Some(1));
        assert_eq!(graph.enclosing_block(4), None);
    }

    #[test]
    fn test_anomalies_are_recorded_not_fatal() {
        let graph = FlowGraph::from_nodes(vec![
            ExecutionNode::step(1),
            step(2, 99),
            end(3, 2, 42),
            step(1, 3),
            start(4, 3, None),
            end(5, 4, 4),
            end(6, 5, 4),
        ]);

        assert_eq!(graph.len(), 6);
        assert_eq!(
            graph.anomalies(),
            &[
                GraphAnomaly::UnknownParent {
                    node: NodeId(2),
                    parent: NodeId(99),
                },
                GraphAnomaly::UnmatchedBlockEnd {
                    node: NodeId(3),
                    start: NodeId(42),
                },
                GraphAnomaly::DuplicateId(NodeId(1)),
                GraphAnomaly::DuplicateBlockEnd {
                    node: NodeId(6),
                    start: NodeId(4),
                },
            ]
        );
        assert!(!graph.is_matched_end(2));
        assert!(graph.is_matched_end(4));
        assert!(!graph.is_matched_end(5));
    }

    #[test]
    fn test_next_timed_start_skips_untimed_nodes() {
        let graph = FlowGraph::from_nodes(vec![
            ExecutionNode::step(1).with_timing(NodeTiming::started(100)),
            step(2, 1),
            step(3, 2).with_timing(NodeTiming::started(300)),
            step(4, 3),
        ]);

        assert_eq!(graph.next_timed_start(0), Some(300));
        assert_eq!(graph.next_timed_start(1), Some(300));
        assert_eq!(graph.next_timed_start(2), None);
        assert_eq!(graph.next_timed_start(3), None);
    }
}
