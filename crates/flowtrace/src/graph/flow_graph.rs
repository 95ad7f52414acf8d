//! The nested directed multigraph.
//!
//! Nodes are call sites plus the two sentinels `INPUT` and `OUTPUT`; edges
//! carry the object identifier of the value flowing between ports. A
//! non-atomic call node owns a nested subgraph describing its body.
//!
//! Built on `petgraph`'s stable graph so parallel edges are first-class
//! and targeted edge removal (the single-output-per-id invariant) is O(1)
//! by edge index.

use ahash::AHashMap;
use indexmap::IndexMap;
use petgraph::Direction;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;

/// Whether a port accepts or produces values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Input,
    Output,
}

impl PortKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }

    #[must_use]
    pub fn from_str(text: &str) -> Option<Self> {
        match text {
            "input" => Some(Self::Input),
            "output" => Some(Self::Output),
            _ => None,
        }
    }
}

/// Which kind of annotation a node carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationKind {
    Function,
    Type,
    Construct,
    Slot,
}

impl AnnotationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Type => "type",
            Self::Construct => "construct",
            Self::Slot => "slot",
        }
    }

    #[must_use]
    pub fn from_str(text: &str) -> Option<Self> {
        match text {
            "function" => Some(Self::Function),
            "type" => Some(Self::Type),
            "construct" => Some(Self::Construct),
            "slot" => Some(Self::Slot),
            _ => None,
        }
    }
}

/// Data recorded for one named port.
#[derive(Debug, Clone, PartialEq)]
pub struct PortData {
    pub portkind: PortKind,
    pub argname: Option<String>,
    /// Object identifier, when the value is tracked.
    pub object_id: Option<String>,
    /// Deep-copied primitive payload, when the value is JSON-representable.
    pub value: Option<serde_json::Value>,
    /// Module of the value's type, omitted for built-in types.
    pub module: Option<String>,
    /// Qualified name of the value's type, omitted for built-in types.
    pub qual_name: Option<String>,
    pub annotation: Option<String>,
    pub annotation_index: Option<usize>,
}

impl PortData {
    #[must_use]
    pub fn new(portkind: PortKind) -> Self {
        Self {
            portkind,
            argname: None,
            object_id: None,
            value: None,
            module: None,
            qual_name: None,
            annotation: None,
            annotation_index: None,
        }
    }
}

/// Attribute data on a call node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeData {
    pub module: Option<String>,
    pub qual_name: Option<String>,
    /// Ordered port map, inputs first.
    pub ports: IndexMap<String, PortData>,
    pub annotation: Option<String>,
    pub annotation_index: Option<usize>,
    pub annotation_kind: Option<AnnotationKind>,
    /// Attribute name, for retained attribute-access nodes.
    pub slot: Option<String>,
    /// Marks an un-annotated constructor call.
    pub construct: bool,
    /// The nested subgraph of a non-atomic call.
    pub graph: Option<Box<FlowGraph>>,
}

/// Attribute data on an edge.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EdgeData {
    /// Identifier of the object flowing along this edge.
    pub object_id: Option<String>,
    pub sourceport: Option<String>,
    pub targetport: Option<String>,
    /// Annotation key of the value's type.
    pub annotation: Option<String>,
}

/// Node role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Input,
    Output,
    Call,
}

#[derive(Debug, Clone, PartialEq)]
struct GraphNode {
    id: String,
    kind: NodeKind,
    data: NodeData,
}

/// A directed multigraph with sentinel `INPUT`/`OUTPUT` nodes.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    graph: StableDiGraph<GraphNode, EdgeData>,
    input: NodeIndex,
    output: NodeIndex,
}

impl FlowGraph {
    /// Creates an empty flow graph with the given sentinel identifiers.
    #[must_use]
    pub fn new(input_id: String, output_id: String) -> Self {
        let mut graph = StableDiGraph::new();
        let input = graph.add_node(GraphNode {
            id: input_id,
            kind: NodeKind::Input,
            data: NodeData::default(),
        });
        let output = graph.add_node(GraphNode {
            id: output_id,
            kind: NodeKind::Output,
            data: NodeData::default(),
        });
        Self {
            graph,
            input,
            output,
        }
    }

    #[must_use]
    pub fn input(&self) -> NodeIndex {
        self.input
    }

    #[must_use]
    pub fn output(&self) -> NodeIndex {
        self.output
    }

    #[must_use]
    pub fn input_id(&self) -> &str {
        &self.graph[self.input].id
    }

    #[must_use]
    pub fn output_id(&self) -> &str {
        &self.graph[self.output].id
    }

    /// Adds a call node with the given identifier and attribute data.
    pub fn add_call_node(&mut self, id: String, data: NodeData) -> NodeIndex {
        self.graph.add_node(GraphNode {
            id,
            kind: NodeKind::Call,
            data,
        })
    }

    /// Removes a node and all incident edges.
    pub fn remove_node(&mut self, node: NodeIndex) {
        self.graph.remove_node(node);
    }

    pub fn add_edge(&mut self, source: NodeIndex, target: NodeIndex, data: EdgeData) -> EdgeIndex {
        self.graph.add_edge(source, target, data)
    }

    pub fn remove_edge(&mut self, edge: EdgeIndex) {
        self.graph.remove_edge(edge);
    }

    #[must_use]
    pub fn node_id(&self, node: NodeIndex) -> &str {
        &self.graph[node].id
    }

    #[must_use]
    pub fn node_kind(&self, node: NodeIndex) -> NodeKind {
        self.graph[node].kind
    }

    #[must_use]
    pub fn node_data(&self, node: NodeIndex) -> &NodeData {
        &self.graph[node].data
    }

    pub fn node_data_mut(&mut self, node: NodeIndex) -> &mut NodeData {
        &mut self.graph[node].data
    }

    /// Number of call nodes (sentinels excluded).
    #[must_use]
    pub fn call_node_count(&self) -> usize {
        self.graph
            .node_indices()
            .filter(|&n| self.graph[n].kind == NodeKind::Call)
            .count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All nodes, as `(index, id, kind, data)`.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &str, NodeKind, &NodeData)> {
        self.graph
            .node_indices()
            .map(move |n| (n, self.graph[n].id.as_str(), self.graph[n].kind, &self.graph[n].data))
    }

    /// All edges, as `(source, target, data)`.
    pub fn edges(&self) -> impl Iterator<Item = (NodeIndex, NodeIndex, &EdgeData)> {
        self.graph.edge_indices().map(move |e| {
            let (source, target) = self
                .graph
                .edge_endpoints(e)
                .expect("edge indices are live");
            (source, target, &self.graph[e])
        })
    }

    /// Incoming edges of a node.
    pub fn in_edges(&self, node: NodeIndex) -> Vec<(NodeIndex, &EdgeData)> {
        self.graph
            .edges_directed(node, Direction::Incoming)
            .map(|edge| (edge.source(), edge.weight()))
            .collect()
    }

    /// Outgoing edges of a node.
    pub fn out_edges(&self, node: NodeIndex) -> Vec<(NodeIndex, &EdgeData)> {
        self.graph
            .edges_directed(node, Direction::Outgoing)
            .map(|edge| (edge.target(), edge.weight()))
            .collect()
    }

    /// First node satisfying the predicate.
    pub fn find_node<F>(&self, mut predicate: F) -> Option<NodeIndex>
    where
        F: FnMut(&str, &NodeData) -> bool,
    {
        self.graph
            .node_indices()
            .find(|&n| predicate(&self.graph[n].id, &self.graph[n].data))
    }

    /// The call node with the given qualified name, if unique use is known.
    #[must_use]
    pub fn node_by_qual_name(&self, qual_name: &str) -> Option<NodeIndex> {
        self.find_node(|_, data| data.qual_name.as_deref() == Some(qual_name))
    }

    /// The node with the given identifier.
    #[must_use]
    pub fn node_by_id(&self, id: &str) -> Option<NodeIndex> {
        self.find_node(|node_id, _| node_id == id)
    }

    /// Edge records in canonical order, for comparison and serialization:
    /// `(source id, target id, data)` sorted.
    #[must_use]
    pub fn edge_records(&self) -> Vec<(String, String, EdgeData)> {
        let mut records: Vec<(String, String, EdgeData)> = self
            .edges()
            .map(|(source, target, data)| {
                (
                    self.node_id(source).to_owned(),
                    self.node_id(target).to_owned(),
                    data.clone(),
                )
            })
            .collect();
        records.sort_by(|a, b| {
            let key = |r: &(String, String, EdgeData)| {
                (
                    r.0.clone(),
                    r.1.clone(),
                    r.2.object_id.clone(),
                    r.2.sourceport.clone(),
                    r.2.targetport.clone(),
                    r.2.annotation.clone(),
                )
            };
            key(a).cmp(&key(b))
        });
        records
    }
}

/// Structural equality: same sentinels, same node set (by identifier, with
/// data), same edge multiset.
impl PartialEq for FlowGraph {
    fn eq(&self, other: &Self) -> bool {
        if self.input_id() != other.input_id() || self.output_id() != other.output_id() {
            return false;
        }
        let collect = |graph: &Self| -> Vec<(String, NodeKind, NodeData)> {
            let mut nodes: Vec<(String, NodeKind, NodeData)> = graph
                .nodes()
                .map(|(_, id, kind, data)| (id.to_owned(), kind, data.clone()))
                .collect();
            nodes.sort_by(|a, b| a.0.cmp(&b.0));
            nodes
        };
        collect(self) == collect(other) && self.edge_records() == other.edge_records()
    }
}

/// Deterministic node identifiers: a base name concatenated with a running
/// count per base, shared across the entire recording including nested
/// graphs.
#[derive(Debug, Default)]
pub struct NodeNamer {
    counts: AHashMap<String, usize>,
}

impl NodeNamer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&mut self, base: &str) -> String {
        let count = self.counts.entry(base.to_owned()).or_insert(0);
        *count += 1;
        format!("{base}:{count}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_names_are_deterministic_per_base() {
        let mut namer = NodeNamer::new();
        assert_eq!(namer.name("f"), "f:1");
        assert_eq!(namer.name("f"), "f:2");
        assert_eq!(namer.name("g"), "g:1");
    }

    #[test]
    fn parallel_edges_are_kept() {
        let mut graph = FlowGraph::new("__in__:1".into(), "__out__:1".into());
        let a = graph.add_call_node("a:1".into(), NodeData::default());
        let b = graph.add_call_node("b:1".into(), NodeData::default());
        graph.add_edge(a, b, EdgeData::default());
        graph.add_edge(a, b, EdgeData::default());
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn removing_an_edge_by_index_is_targeted() {
        let mut graph = FlowGraph::new("__in__:1".into(), "__out__:1".into());
        let a = graph.add_call_node("a:1".into(), NodeData::default());
        let output = graph.output();
        let first = graph.add_edge(
            a,
            output,
            EdgeData {
                object_id: Some("1".into()),
                ..EdgeData::default()
            },
        );
        graph.add_edge(
            a,
            output,
            EdgeData {
                object_id: Some("2".into()),
                ..EdgeData::default()
            },
        );
        graph.remove_edge(first);
        let remaining: Vec<_> = graph.in_edges(output);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].1.object_id.as_deref(), Some("2"));
    }

    #[test]
    fn structural_equality_ignores_indices() {
        let build = || {
            let mut graph = FlowGraph::new("__in__:1".into(), "__out__:1".into());
            let a = graph.add_call_node("a:1".into(), NodeData::default());
            let output = graph.output();
            graph.add_edge(
                a,
                output,
                EdgeData {
                    sourceport: Some("return".into()),
                    ..EdgeData::default()
                },
            );
            graph
        };
        assert_eq!(build(), build());
    }
}
