//! The function call graph reconstructed from the profile's call edges
//!
//! Nodes and edges are stored separately and nodes are referenced by
//! identifier only, so recursion cycles are representable. Every traversal
//! carries a visited set and terminates within one expansion per node.

use indexmap::{IndexMap, IndexSet};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::metrics::EventKind;
use crate::profile::Profile;

/// The identity of a call-graph node
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    /// The owning file as referenced by the profile
    pub file: String,
    /// The function name
    pub function: String,
}

/// A directed edge from the owning node to `target`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// The number of calls
    pub count: u64,
    /// The primary-event value carried by the edge, covering the callee
    /// and its transitive callees
    pub inclusive: u64,
    /// The callee
    pub target: NodeId,
}

/// One function in the call graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallGraphNode {
    /// The outgoing edges in first-appearance order
    pub edges: Vec<GraphEdge>,
    /// The primary-event total incurred directly in this function
    pub exclusive: u64,
    /// The exclusive total plus the inclusive values of all outgoing edges
    ///
    /// The edge values already carry transitive cost, so children are not
    /// re-entered and cycles cannot double-count.
    pub inclusive: u64,
    /// The node identity
    pub id: NodeId,
    /// The last program counter by unsigned hex order, empty without PC data
    pub pc_end: String,
    /// The first program counter by unsigned hex order, empty without PC data
    pub pc_start: String,
    /// True if the function was only referenced as a call target
    pub stub: bool,
}

/// A finite tree materialized from an entry node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallTree {
    /// The expanded children, empty for repeat nodes
    pub children: Vec<CallTree>,
    /// The number of calls leading to this node, 0 for the entry itself
    pub count: u64,
    /// The node identity
    pub id: NodeId,
    /// True if the node was already expanded elsewhere in this tree
    pub repeated: bool,
}

/// The call graph of a profile, frozen after construction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallGraph {
    incoming: IndexMap<NodeId, IndexSet<NodeId>>,
    nodes: IndexMap<NodeId, CallGraphNode>,
    primary: EventKind,
    roots: Vec<NodeId>,
}

impl NodeId {
    /// Create a node identity from owning file and function name
    pub fn new<F, N>(file: F, function: N) -> Self
    where
        F: Into<String>,
        N: Into<String>,
    {
        Self {
            file: file.into(),
            function: function.into(),
        }
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.function)
    }
}

impl CallGraph {
    /// Build the call graph from a frozen profile
    ///
    /// Unresolved call targets become stub nodes with empty PC range and
    /// zero exclusive cost. The primary event is [`EventKind::Cy`] when the
    /// vocabulary carries it, [`EventKind::Ir`] otherwise.
    pub fn build(profile: &Profile) -> Self {
        let primary = profile.events.primary_kind();
        let mut nodes: IndexMap<NodeId, CallGraphNode> = IndexMap::new();

        for file in profile.files.values() {
            for function in file.functions.values() {
                let id = NodeId::new(&file.path, &function.name);
                let (pc_start, pc_end) = function.pc_range().unwrap_or_default();
                let edges = function
                    .calls
                    .iter()
                    .map(|call| GraphEdge {
                        count: call.count,
                        inclusive: call
                            .inclusive
                            .as_ref()
                            .and_then(|metrics| metrics.metric_by_kind(&primary))
                            .unwrap_or(0),
                        target: NodeId::new(
                            call.target_file.as_deref().unwrap_or(&file.path),
                            &call.target_function,
                        ),
                    })
                    .collect::<Vec<_>>();

                nodes.insert(
                    id.clone(),
                    CallGraphNode {
                        edges,
                        exclusive: function.totals.metric_by_kind(&primary).unwrap_or(0),
                        inclusive: 0,
                        id,
                        pc_end,
                        pc_start,
                        stub: false,
                    },
                );
            }
        }

        let targets = nodes
            .values()
            .flat_map(|node| node.edges.iter().map(|edge| edge.target.clone()))
            .collect::<IndexSet<_>>();
        for target in targets {
            if !nodes.contains_key(&target) {
                debug!("Creating stub node for unresolved call target '{target}'");
                nodes.insert(
                    target.clone(),
                    CallGraphNode {
                        edges: vec![],
                        exclusive: 0,
                        inclusive: 0,
                        id: target,
                        pc_end: String::new(),
                        pc_start: String::new(),
                        stub: true,
                    },
                );
            }
        }

        for node in nodes.values_mut() {
            node.inclusive = node
                .edges
                .iter()
                .fold(node.exclusive, |sum, edge| sum.saturating_add(edge.inclusive));
        }

        let mut incoming: IndexMap<NodeId, IndexSet<NodeId>> = IndexMap::new();
        for node in nodes.values() {
            for edge in &node.edges {
                incoming
                    .entry(edge.target.clone())
                    .or_default()
                    .insert(node.id.clone());
            }
        }

        let roots = nodes
            .keys()
            .filter(|id| !incoming.contains_key(*id))
            .cloned()
            .collect::<Vec<_>>();

        Self {
            incoming,
            nodes,
            primary,
            roots,
        }
    }

    /// The primary event kind this graph is weighted by
    pub fn primary(&self) -> &EventKind {
        &self.primary
    }

    /// All nodes in first-appearance order
    pub fn nodes(&self) -> impl Iterator<Item = &CallGraphNode> {
        self.nodes.values()
    }

    /// The number of nodes including stubs
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Return true if the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by its identity
    pub fn node(&self, id: &NodeId) -> Option<&CallGraphNode> {
        self.nodes.get(id)
    }

    /// The nodes without incoming edges, in first-appearance order
    pub fn roots(&self) -> Vec<&CallGraphNode> {
        self.roots
            .iter()
            .map(|id| &self.nodes[id])
            .collect()
    }

    /// The distinct callers of a node, in first-appearance order
    pub fn callers(&self, id: &NodeId) -> Vec<&CallGraphNode> {
        self.incoming
            .get(id)
            .into_iter()
            .flatten()
            .map(|caller| &self.nodes[caller])
            .collect()
    }

    /// The distinct callees of a node, in first-appearance order
    pub fn callees(&self, id: &NodeId) -> Vec<&CallGraphNode> {
        let Some(node) = self.nodes.get(id) else {
            return vec![];
        };
        node.edges
            .iter()
            .map(|edge| &edge.target)
            .collect::<IndexSet<_>>()
            .into_iter()
            .map(|target| &self.nodes[target])
            .collect()
    }

    /// Materialize the finite subtree rooted at `entry`
    ///
    /// Depth-first with a visited set, a node already expanded elsewhere in
    /// the tree becomes a leaf marked `repeated`. Returns `None` when the
    /// entry is not part of the graph.
    pub fn subtree_from(&self, entry: &NodeId) -> Option<CallTree> {
        if !self.nodes.contains_key(entry) {
            return None;
        }
        let mut visited = IndexSet::new();
        Some(self.expand(entry, 0, &mut visited))
    }

    fn expand(&self, id: &NodeId, count: u64, visited: &mut IndexSet<NodeId>) -> CallTree {
        if !visited.insert(id.clone()) {
            return CallTree {
                children: vec![],
                count,
                id: id.clone(),
                repeated: true,
            };
        }

        let children = self.nodes[id]
            .edges
            .iter()
            .map(|edge| self.expand(&edge.target, edge.count, visited))
            .collect();

        CallTree {
            children,
            count,
            id: id.clone(),
            repeated: false,
        }
    }

    /// The parent of every node reachable from the root set, built in one
    /// depth-first traversal
    ///
    /// The first parent found wins, roots have no entry.
    pub fn parent_map(&self) -> IndexMap<NodeId, NodeId> {
        let mut parents = IndexMap::new();
        let mut visited = IndexSet::new();
        for root in &self.roots {
            self.record_parents(root, &mut parents, &mut visited);
        }
        parents
    }

    fn record_parents(
        &self,
        id: &NodeId,
        parents: &mut IndexMap<NodeId, NodeId>,
        visited: &mut IndexSet<NodeId>,
    ) {
        if !visited.insert(id.clone()) {
            return;
        }
        for edge in &self.nodes[id].edges {
            parents.entry(edge.target.clone()).or_insert_with(|| id.clone());
            self.record_parents(&edge.target, parents, visited);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parser::ProfileParser;

    fn build(input: &str) -> CallGraph {
        let profile = ProfileParser::default().parse(input.as_bytes()).unwrap();
        CallGraph::build(&profile)
    }

    fn call_chain() -> CallGraph {
        build(
            "# callgrind format\n\
             events: Ir\n\
             fl=a.c\n\
             fn=main\n\
             1 10\n\
             cfn=helper\n\
             calls=2 5\n\
             5 40\n\
             fn=helper\n\
             7 35\n\
             cfi=b.c\n\
             cfn=leaf\n\
             calls=4 8\n\
             8 5\n\
             fl=b.c\n\
             fn=leaf\n\
             2 5\n",
        )
    }

    #[test]
    fn test_roots_have_no_incoming_edges() {
        let graph = call_chain();
        let roots = graph.roots();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id, NodeId::new("a.c", "main"));
    }

    #[test]
    fn test_inclusive_is_exclusive_plus_edge_values() {
        let graph = call_chain();

        let main = graph.node(&NodeId::new("a.c", "main")).unwrap();
        // 10 exclusive + 40 on the helper edge, the edge already carries
        // the transitive cost of leaf
        assert_eq!(main.exclusive, 50);
        assert_eq!(main.inclusive, 90);

        let helper = graph.node(&NodeId::new("a.c", "helper")).unwrap();
        assert_eq!(helper.exclusive, 40);
        assert_eq!(helper.inclusive, 45);
    }

    #[test]
    fn test_primary_prefers_cycles() {
        let graph = build(
            "events: Ir Cy\n\
             fl=a.c\n\
             fn=f\n\
             1 2 30\n",
        );
        assert_eq!(graph.primary(), &EventKind::Cy);
        assert_eq!(graph.node(&NodeId::new("a.c", "f")).unwrap().exclusive, 30);
    }

    #[test]
    fn test_unresolved_target_becomes_stub() {
        let graph = build(
            "# callgrind format\n\
             events: Ir\n\
             fl=a.c\n\
             fn=f\n\
             cfn=external\n\
             calls=1 3\n\
             3 100\n",
        );

        let stub = graph.node(&NodeId::new("a.c", "external")).unwrap();
        assert!(stub.stub);
        assert_eq!(stub.exclusive, 0);
        assert_eq!(stub.pc_start, "");
        assert_eq!(stub.pc_end, "");

        // Still traversable
        assert_eq!(graph.callees(&NodeId::new("a.c", "f")).len(), 1);
        assert_eq!(graph.callers(&NodeId::new("a.c", "external")).len(), 1);
    }

    #[test]
    fn test_subtree_terminates_on_recursion() {
        let graph = build(
            "# callgrind format\n\
             events: Ir\n\
             fl=a.c\n\
             fn=f\n\
             1 1\n\
             cfn=f\n\
             calls=1 2\n\
             2 9\n",
        );

        let tree = graph.subtree_from(&NodeId::new("a.c", "f")).unwrap();
        assert!(!tree.repeated);
        assert_eq!(tree.children.len(), 1);
        assert!(tree.children[0].repeated);
        assert!(tree.children[0].children.is_empty());
    }

    #[test]
    fn test_subtree_repeats_shared_nodes() {
        let graph = call_chain();
        let tree = graph.subtree_from(&NodeId::new("a.c", "main")).unwrap();

        assert_eq!(tree.id, NodeId::new("a.c", "main"));
        assert_eq!(tree.children.len(), 1);
        let helper = &tree.children[0];
        assert_eq!(helper.id, NodeId::new("a.c", "helper"));
        assert_eq!(helper.count, 2);
        assert_eq!(helper.children.len(), 1);
        assert_eq!(helper.children[0].id, NodeId::new("b.c", "leaf"));
        assert_eq!(helper.children[0].count, 4);
    }

    #[test]
    fn test_subtree_from_unknown_entry() {
        let graph = call_chain();
        assert_eq!(graph.subtree_from(&NodeId::new("a.c", "nope")), None);
    }

    #[test]
    fn test_parent_map_covers_reachable_nodes() {
        let graph = call_chain();
        let parents = graph.parent_map();

        assert_eq!(
            parents.get(&NodeId::new("a.c", "helper")),
            Some(&NodeId::new("a.c", "main"))
        );
        assert_eq!(
            parents.get(&NodeId::new("b.c", "leaf")),
            Some(&NodeId::new("a.c", "helper"))
        );
        assert_eq!(parents.get(&NodeId::new("a.c", "main")), None);
    }

    #[test]
    fn test_pc_range_from_profile() {
        let graph = build(
            "# callgrind format\n\
             events: Ir\n\
             positions: instr line\n\
             fl=a.c\n\
             fn=f\n\
             0x1004 10 1\n\
             0x1000 10 1\n\
             0x1010 11 2\n",
        );

        let node = graph.node(&NodeId::new("a.c", "f")).unwrap();
        assert_eq!(node.pc_start, "0x1000");
        assert_eq!(node.pc_end, "0x1010");
    }
}
