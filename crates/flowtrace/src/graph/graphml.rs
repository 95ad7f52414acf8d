//! GraphML interchange for nested flow graphs.
//!
//! Nodes and edges carry key/value attributes; the `ports` attribute is a
//! JSON string; a node with a nested graph contains a `<graph>` element;
//! each `<graph>` names its sentinel nodes in `input_node`/`output_node`
//! data entries. Node identifiers are unique across all sibling nested
//! graphs by construction, so the writer emits them verbatim.

use std::fmt;
use std::io::Write;

use indexmap::IndexMap;
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::graph::flow_graph::{
    AnnotationKind, EdgeData, FlowGraph, NodeData, NodeKind, PortData, PortKind,
};

const XMLNS: &str = "http://graphml.graphdrawing.org/xmlns";

/// Interchange failure: malformed XML or a structurally invalid document.
#[derive(Debug)]
pub enum GraphMlError {
    Xml(String),
    Malformed(String),
    Io(std::io::Error),
}

impl fmt::Display for GraphMlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xml(message) => write!(f, "graphml: {message}"),
            Self::Malformed(message) => write!(f, "graphml: {message}"),
            Self::Io(error) => write!(f, "graphml: {error}"),
        }
    }
}

impl std::error::Error for GraphMlError {}

impl From<std::io::Error> for GraphMlError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

fn xml_err<T, E: fmt::Display>(result: Result<T, E>) -> Result<T, GraphMlError> {
    result.map_err(|error| GraphMlError::Xml(error.to_string()))
}

// Fixed key declarations: (key id, element the key applies to).
const KEYS: &[(&str, &str)] = &[
    ("input_node", "graph"),
    ("output_node", "graph"),
    ("module", "node"),
    ("qual_name", "node"),
    ("annotation", "node"),
    ("annotation_index", "node"),
    ("annotation_kind", "node"),
    ("slot", "node"),
    ("construct", "node"),
    ("ports", "node"),
    ("id", "edge"),
    ("sourceport", "edge"),
    ("targetport", "edge"),
    ("edge_annotation", "edge"),
];

/// Serialises a flow graph to a GraphML string.
pub fn write_graphml_str(graph: &FlowGraph) -> Result<String, GraphMlError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    xml_err(writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None))))?;

    let mut graphml = BytesStart::new("graphml");
    graphml.push_attribute(("xmlns", XMLNS));
    xml_err(writer.write_event(Event::Start(graphml)))?;

    for (key, target) in KEYS {
        let mut element = BytesStart::new("key");
        element.push_attribute(("id", *key));
        element.push_attribute(("for", *target));
        element.push_attribute(("attr.name", *key));
        element.push_attribute(("attr.type", "string"));
        xml_err(writer.write_event(Event::Empty(element)))?;
    }

    write_graph(&mut writer, graph)?;
    xml_err(writer.write_event(Event::End(BytesEnd::new("graphml"))))?;

    let bytes = writer.into_inner();
    String::from_utf8(bytes).map_err(|error| GraphMlError::Xml(error.to_string()))
}

/// Serialises a flow graph as GraphML to a writer.
pub fn write_graphml(graph: &FlowGraph, out: &mut dyn Write) -> Result<(), GraphMlError> {
    let xml = write_graphml_str(graph)?;
    out.write_all(xml.as_bytes())?;
    out.write_all(b"\n")?;
    Ok(())
}

fn write_graph(writer: &mut Writer<Vec<u8>>, graph: &FlowGraph) -> Result<(), GraphMlError> {
    let graph_id = format!("graph[{}]", graph.input_id());
    let mut element = BytesStart::new("graph");
    element.push_attribute(("id", graph_id.as_str()));
    element.push_attribute(("edgedefault", "directed"));
    xml_err(writer.write_event(Event::Start(element)))?;

    write_data(writer, "input_node", graph.input_id())?;
    write_data(writer, "output_node", graph.output_id())?;

    for (_, id, kind, data) in graph.nodes() {
        let mut element = BytesStart::new("node");
        element.push_attribute(("id", id));
        if kind != NodeKind::Call {
            xml_err(writer.write_event(Event::Empty(element)))?;
            continue;
        }
        xml_err(writer.write_event(Event::Start(element)))?;
        if let Some(module) = &data.module {
            write_data(writer, "module", module)?;
        }
        if let Some(qual_name) = &data.qual_name {
            write_data(writer, "qual_name", qual_name)?;
        }
        if let Some(annotation) = &data.annotation {
            write_data(writer, "annotation", annotation)?;
        }
        if let Some(index) = data.annotation_index {
            write_data(writer, "annotation_index", &index.to_string())?;
        }
        if let Some(kind) = data.annotation_kind {
            write_data(writer, "annotation_kind", kind.as_str())?;
        }
        if let Some(slot) = &data.slot {
            write_data(writer, "slot", slot)?;
        }
        if data.construct {
            write_data(writer, "construct", "true")?;
        }
        if !data.ports.is_empty() {
            let json = serde_json::Value::Object(ports_to_json(&data.ports)).to_string();
            write_data(writer, "ports", &json)?;
        }
        if let Some(nested) = &data.graph {
            write_graph(writer, nested)?;
        }
        xml_err(writer.write_event(Event::End(BytesEnd::new("node"))))?;
    }

    for (source, target, data) in graph.edges() {
        let mut element = BytesStart::new("edge");
        element.push_attribute(("source", graph.node_id(source)));
        element.push_attribute(("target", graph.node_id(target)));
        xml_err(writer.write_event(Event::Start(element)))?;
        if let Some(object_id) = &data.object_id {
            write_data(writer, "id", object_id)?;
        }
        if let Some(sourceport) = &data.sourceport {
            write_data(writer, "sourceport", sourceport)?;
        }
        if let Some(targetport) = &data.targetport {
            write_data(writer, "targetport", targetport)?;
        }
        if let Some(annotation) = &data.annotation {
            write_data(writer, "edge_annotation", annotation)?;
        }
        xml_err(writer.write_event(Event::End(BytesEnd::new("edge"))))?;
    }

    xml_err(writer.write_event(Event::End(BytesEnd::new("graph"))))?;
    Ok(())
}

fn write_data(writer: &mut Writer<Vec<u8>>, key: &str, value: &str) -> Result<(), GraphMlError> {
    let mut element = BytesStart::new("data");
    element.push_attribute(("key", key));
    xml_err(writer.write_event(Event::Start(element)))?;
    xml_err(writer.write_event(Event::Text(BytesText::new(value))))?;
    xml_err(writer.write_event(Event::End(BytesEnd::new("data"))))?;
    Ok(())
}

fn ports_to_json(ports: &IndexMap<String, PortData>) -> serde_json::Map<String, serde_json::Value> {
    let mut object = serde_json::Map::new();
    for (name, port) in ports {
        let mut entry = serde_json::Map::new();
        entry.insert(
            "portkind".to_owned(),
            serde_json::Value::String(port.portkind.as_str().to_owned()),
        );
        if let Some(argname) = &port.argname {
            entry.insert("argname".to_owned(), serde_json::json!(argname));
        }
        if let Some(object_id) = &port.object_id {
            entry.insert("id".to_owned(), serde_json::json!(object_id));
        }
        if let Some(value) = &port.value {
            entry.insert("value".to_owned(), value.clone());
        }
        if let Some(module) = &port.module {
            entry.insert("module".to_owned(), serde_json::json!(module));
        }
        if let Some(qual_name) = &port.qual_name {
            entry.insert("qual_name".to_owned(), serde_json::json!(qual_name));
        }
        if let Some(annotation) = &port.annotation {
            entry.insert("annotation".to_owned(), serde_json::json!(annotation));
        }
        if let Some(index) = port.annotation_index {
            entry.insert("annotation_index".to_owned(), serde_json::json!(index));
        }
        object.insert(name.clone(), serde_json::Value::Object(entry));
    }
    object
}

fn ports_from_json(json: &str) -> Result<IndexMap<String, PortData>, GraphMlError> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|error| GraphMlError::Malformed(format!("ports payload: {error}")))?;
    let Some(object) = value.as_object() else {
        return Err(GraphMlError::Malformed("ports payload is not an object".into()));
    };
    let mut ports = IndexMap::new();
    for (name, entry) in object {
        let Some(entry) = entry.as_object() else {
            return Err(GraphMlError::Malformed(format!(
                "port '{name}' is not an object"
            )));
        };
        let portkind = entry
            .get("portkind")
            .and_then(|v| v.as_str())
            .and_then(PortKind::from_str)
            .ok_or_else(|| GraphMlError::Malformed(format!("port '{name}' lacks a portkind")))?;
        let mut port = PortData::new(portkind);
        port.argname = entry
            .get("argname")
            .and_then(|v| v.as_str())
            .map(str::to_owned);
        port.object_id = entry.get("id").and_then(|v| v.as_str()).map(str::to_owned);
        port.value = entry.get("value").cloned();
        port.module = entry
            .get("module")
            .and_then(|v| v.as_str())
            .map(str::to_owned);
        port.qual_name = entry
            .get("qual_name")
            .and_then(|v| v.as_str())
            .map(str::to_owned);
        port.annotation = entry
            .get("annotation")
            .and_then(|v| v.as_str())
            .map(str::to_owned);
        port.annotation_index = entry
            .get("annotation_index")
            .and_then(serde_json::Value::as_u64)
            .map(|v| v as usize);
        ports.insert(name.clone(), port);
    }
    Ok(ports)
}

// ----------------------------------------------------------------------
// Reader
// ----------------------------------------------------------------------

#[derive(Default)]
struct PartialGraph {
    input_id: Option<String>,
    output_id: Option<String>,
    nodes: Vec<PartialNode>,
    edges: Vec<PartialEdge>,
}

struct PartialNode {
    id: String,
    data: NodeData,
}

struct PartialEdge {
    source: String,
    target: String,
    data: EdgeData,
}

enum Element {
    Graph(PartialGraph),
    Node(PartialNode),
    Edge(PartialEdge),
}

/// Parses a GraphML string produced by [`write_graphml_str`].
pub fn read_graphml_str(xml: &str) -> Result<FlowGraph, GraphMlError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut result: Option<PartialGraph> = None;
    let mut current_key: Option<String> = None;
    let mut text = String::new();

    loop {
        let event = xml_err(reader.read_event())?;
        match event {
            Event::Start(element) => match element.name().as_ref() {
                b"graph" => stack.push(Element::Graph(PartialGraph::default())),
                b"node" => {
                    let id = required_attribute(&element, "id")?;
                    stack.push(Element::Node(PartialNode {
                        id,
                        data: NodeData::default(),
                    }));
                }
                b"edge" => {
                    let source = required_attribute(&element, "source")?;
                    let target = required_attribute(&element, "target")?;
                    stack.push(Element::Edge(PartialEdge {
                        source,
                        target,
                        data: EdgeData::default(),
                    }));
                }
                b"data" => {
                    current_key = Some(required_attribute(&element, "key")?);
                    text.clear();
                }
                _ => {}
            },
            Event::Empty(element) => match element.name().as_ref() {
                b"node" => {
                    let id = required_attribute(&element, "id")?;
                    attach_node(
                        &mut stack,
                        PartialNode {
                            id,
                            data: NodeData::default(),
                        },
                    )?;
                }
                b"edge" => {
                    let source = required_attribute(&element, "source")?;
                    let target = required_attribute(&element, "target")?;
                    attach_edge(
                        &mut stack,
                        PartialEdge {
                            source,
                            target,
                            data: EdgeData::default(),
                        },
                    )?;
                }
                _ => {}
            },
            Event::Text(content) => {
                if current_key.is_some() {
                    text.push_str(&xml_err(content.unescape())?);
                }
            }
            Event::End(element) => match element.name().as_ref() {
                b"data" => {
                    let key = current_key.take().ok_or_else(|| {
                        GraphMlError::Malformed("data end without a key".into())
                    })?;
                    assign_data(&mut stack, &key, text.trim())?;
                    text.clear();
                }
                b"node" => {
                    let Some(Element::Node(node)) = stack.pop() else {
                        return Err(GraphMlError::Malformed("unbalanced node element".into()));
                    };
                    attach_node(&mut stack, node)?;
                }
                b"edge" => {
                    let Some(Element::Edge(edge)) = stack.pop() else {
                        return Err(GraphMlError::Malformed("unbalanced edge element".into()));
                    };
                    attach_edge(&mut stack, edge)?;
                }
                b"graph" => {
                    let Some(Element::Graph(graph)) = stack.pop() else {
                        return Err(GraphMlError::Malformed("unbalanced graph element".into()));
                    };
                    match stack.last_mut() {
                        // A nested graph belongs to its enclosing node.
                        Some(Element::Node(node)) => {
                            node.data.graph = Some(Box::new(finalize_graph(graph)?));
                        }
                        None => result = Some(graph),
                        Some(_) => {
                            return Err(GraphMlError::Malformed(
                                "graph element inside an edge".into(),
                            ));
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    let root = result.ok_or_else(|| GraphMlError::Malformed("no graph element".into()))?;
    finalize_graph(root)
}

fn required_attribute(element: &BytesStart<'_>, name: &str) -> Result<String, GraphMlError> {
    let attribute = xml_err(element.try_get_attribute(name))?;
    let attribute = attribute.ok_or_else(|| {
        GraphMlError::Malformed(format!(
            "element '{}' lacks attribute '{name}'",
            String::from_utf8_lossy(element.name().as_ref())
        ))
    })?;
    Ok(xml_err(attribute.unescape_value())?.into_owned())
}

fn assign_data(stack: &mut [Element], key: &str, value: &str) -> Result<(), GraphMlError> {
    let Some(top) = stack.last_mut() else {
        return Err(GraphMlError::Malformed("data outside any element".into()));
    };
    match top {
        Element::Graph(graph) => match key {
            "input_node" => graph.input_id = Some(value.to_owned()),
            "output_node" => graph.output_id = Some(value.to_owned()),
            _ => {}
        },
        Element::Node(node) => match key {
            "module" => node.data.module = Some(value.to_owned()),
            "qual_name" => node.data.qual_name = Some(value.to_owned()),
            "annotation" => node.data.annotation = Some(value.to_owned()),
            "annotation_index" => {
                node.data.annotation_index = value.parse().ok();
            }
            "annotation_kind" => {
                node.data.annotation_kind = AnnotationKind::from_str(value);
            }
            "slot" => node.data.slot = Some(value.to_owned()),
            "construct" => node.data.construct = value == "true",
            "ports" => node.data.ports = ports_from_json(value)?,
            _ => {}
        },
        Element::Edge(edge) => match key {
            "id" => edge.data.object_id = Some(value.to_owned()),
            "sourceport" => edge.data.sourceport = Some(value.to_owned()),
            "targetport" => edge.data.targetport = Some(value.to_owned()),
            "edge_annotation" => edge.data.annotation = Some(value.to_owned()),
            _ => {}
        },
    }
    Ok(())
}

fn attach_node(stack: &mut [Element], node: PartialNode) -> Result<(), GraphMlError> {
    match stack.last_mut() {
        Some(Element::Graph(graph)) => {
            graph.nodes.push(node);
            Ok(())
        }
        _ => Err(GraphMlError::Malformed("node outside a graph".into())),
    }
}

fn attach_edge(stack: &mut [Element], edge: PartialEdge) -> Result<(), GraphMlError> {
    match stack.last_mut() {
        Some(Element::Graph(graph)) => {
            graph.edges.push(edge);
            Ok(())
        }
        _ => Err(GraphMlError::Malformed("edge outside a graph".into())),
    }
}

fn finalize_graph(partial: PartialGraph) -> Result<FlowGraph, GraphMlError> {
    let input_id = partial
        .input_id
        .ok_or_else(|| GraphMlError::Malformed("graph lacks input_node".into()))?;
    let output_id = partial
        .output_id
        .ok_or_else(|| GraphMlError::Malformed("graph lacks output_node".into()))?;

    let mut graph = FlowGraph::new(input_id.clone(), output_id.clone());
    let mut indices = ahash::AHashMap::new();
    indices.insert(input_id.clone(), graph.input());
    indices.insert(output_id.clone(), graph.output());

    for node in partial.nodes {
        if node.id == input_id || node.id == output_id {
            continue;
        }
        let index = graph.add_call_node(node.id.clone(), node.data);
        indices.insert(node.id, index);
    }
    for edge in partial.edges {
        let source = indices.get(&edge.source).ok_or_else(|| {
            GraphMlError::Malformed(format!("edge references unknown node '{}'", edge.source))
        })?;
        let target = indices.get(&edge.target).ok_or_else(|| {
            GraphMlError::Malformed(format!("edge references unknown node '{}'", edge.target))
        })?;
        graph.add_edge(*source, *target, edge.data);
    }
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_graph() -> FlowGraph {
        let mut graph = FlowGraph::new("__in__:1".into(), "__out__:1".into());
        let mut ports = IndexMap::new();
        let mut input_port = PortData::new(PortKind::Input);
        input_port.argname = Some("x".into());
        input_port.value = Some(serde_json::json!(10));
        ports.insert("x".into(), input_port);
        let mut output_port = PortData::new(PortKind::Output);
        output_port.argname = Some("return".into());
        output_port.object_id = Some("1".into());
        ports.insert("return".into(), output_port);

        let node = graph.add_call_node(
            "f:1".into(),
            NodeData {
                module: Some("shop".into()),
                qual_name: Some("f".into()),
                ports,
                annotation: Some("python/shop/f".into()),
                annotation_kind: Some(AnnotationKind::Function),
                ..NodeData::default()
            },
        );
        let output = graph.output();
        graph.add_edge(
            node,
            output,
            EdgeData {
                object_id: Some("1".into()),
                sourceport: Some("return".into()),
                targetport: None,
                annotation: None,
            },
        );
        graph
    }

    #[test]
    fn round_trip_preserves_structure() {
        let graph = sample_graph();
        let xml = write_graphml_str(&graph).unwrap();
        let recovered = read_graphml_str(&xml).unwrap();
        assert_eq!(graph, recovered);
    }

    #[test]
    fn round_trip_preserves_nested_graphs() {
        let mut outer = FlowGraph::new("__in__:1".into(), "__out__:1".into());
        let mut inner = FlowGraph::new("__in__:2".into(), "__out__:2".into());
        let inner_node = inner.add_call_node("g:1".into(), NodeData::default());
        let inner_output = inner.output();
        inner.add_edge(
            inner_node,
            inner_output,
            EdgeData {
                sourceport: Some("return".into()),
                ..EdgeData::default()
            },
        );
        outer.add_call_node(
            "f:1".into(),
            NodeData {
                qual_name: Some("f".into()),
                graph: Some(Box::new(inner)),
                ..NodeData::default()
            },
        );

        let xml = write_graphml_str(&outer).unwrap();
        let recovered = read_graphml_str(&xml).unwrap();
        assert_eq!(outer, recovered);
    }

    #[test]
    fn sentinels_are_stored_as_graph_attributes() {
        let xml = write_graphml_str(&sample_graph()).unwrap();
        assert!(xml.contains(r#"<data key="input_node">__in__:1</data>"#));
        assert!(xml.contains(r#"<data key="output_node">__out__:1</data>"#));
    }

    #[test]
    fn malformed_documents_are_rejected() {
        assert!(read_graphml_str("<graphml></graphml>").is_err());
        assert!(read_graphml_str("not xml at all").is_err());
    }
}
