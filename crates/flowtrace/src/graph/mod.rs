//! The object flow graph and its construction.

pub mod builder;
pub mod flow_graph;
pub mod graphml;

pub use builder::FlowGraphBuilder;
pub use flow_graph::{
    AnnotationKind, EdgeData, FlowGraph, NodeData, NodeKind, NodeNamer, PortData, PortKind,
};
