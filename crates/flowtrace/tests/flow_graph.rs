//! End-to-end tests for the recording pipeline: source text in, flow
//! graph out.
//!
//! The traced programs call into a host-registered `objects` module whose
//! callables are atomic, mirroring how recorded programs use libraries.
//! Node identifiers are deterministic (`base:count`), so the expected
//! graphs are asserted structurally by id.

use indexmap::IndexMap;
use pretty_assertions::assert_eq;

use flowtrace::{
    AnnotationKind, FlowGraph, MemoryAnnotationDb, ModuleRegistry, NodeKind, PortKind,
    RecordOptions, Recording, Value, record_source, run_untraced,
};

const OBJECTS_SRC: &str = r#"
class Foo:
    def __init__(self):
        self.x = 1
        self.y = 3

    def do_sum(self):
        return self.x + self.y

    def apply(self, f):
        return f(self)

class Bar:
    def __init__(self, foo=None):
        self.foo = foo

    @classmethod
    def make_bar(cls):
        return Bar()

class Baz:
    def __init__(self):
        pass

class FooSlots:
    def __init__(self):
        self.x = 1
        self.y = 'hello'

class FooContainer:
    def __init__(self):
        self.foo = Foo()

def create_foo():
    return Foo()

def bar_from_foo(foo, x=None):
    return Bar(foo)

def bar_from_foo_mutating(foo):
    foo.x = 0
    return Bar(foo)

def baz_from_foo(foo):
    return Baz()

def baz_from_bar(bar):
    return Baz()

def create_foo_and_bar():
    return Foo(), Bar()

def sum_varargs(x, y=0, *args, **kw):
    return x + y
"#;

const ANNOTATIONS: &str = r#"[
    {"language": "python", "package": "objects", "id": "foo",
     "kind": "type", "class": "objects.Foo"},
    {"language": "python", "package": "objects", "id": "bar",
     "kind": "type", "class": "objects.Bar"},
    {"language": "python", "package": "objects", "id": "create-foo",
     "kind": "function", "function": "objects.create_foo",
     "outputs": [{"slot": "return"}]},
    {"language": "python", "package": "objects", "id": "bar-from-foo",
     "kind": "function", "function": "objects.bar_from_foo",
     "inputs": [{"slot": "foo"}, {"slot": "x"}],
     "outputs": [{"slot": "return"}]},
    {"language": "python", "package": "objects", "id": "bar-from-foo-mutating",
     "kind": "function", "function": "objects.bar_from_foo_mutating",
     "inputs": [{"slot": "foo"}],
     "outputs": [{"slot": "foo"}, {"slot": "return"}]},
    {"language": "python", "package": "objects", "id": "foo-slots",
     "kind": "type", "class": "objects.FooSlots",
     "slots": [{"slot": "x"}, {"slot": "y"}]},
    {"language": "python", "package": "objects", "id": "foo-container",
     "kind": "type", "class": "objects.FooContainer",
     "slots": [{"slot": "foo"}]},
    {"language": "python", "package": "builtins", "id": "int",
     "kind": "type", "class": "int"}
]"#;

fn registry() -> ModuleRegistry {
    let mut modules = ModuleRegistry::new();
    modules
        .register_source("objects", OBJECTS_SRC)
        .expect("objects module compiles");
    modules
}

fn record_with(code: &str, mut env: IndexMap<String, Value>, store_slots: bool) -> Recording {
    let modules = registry();
    if !env.contains_key("objects") {
        let objects = modules.get("objects").expect("registered above");
        env.insert("objects".to_owned(), Value::Module(objects));
    }
    let mut db = MemoryAnnotationDb::new();
    db.load_str(ANNOTATIONS).expect("annotations parse");
    record_source(
        code,
        RecordOptions {
            db: Box::new(db),
            env,
            modules,
            store_slots,
            ..RecordOptions::default()
        },
    )
    .expect("recording succeeds")
}

fn record(code: &str) -> Recording {
    record_with(code, IndexMap::new(), false)
}

/// Edges as `(source id, target id, object id, sourceport, targetport)`.
fn edges(graph: &FlowGraph) -> Vec<(String, String, Option<String>, Option<String>, Option<String>)> {
    graph
        .edge_records()
        .into_iter()
        .map(|(source, target, data)| {
            (
                source,
                target,
                data.object_id,
                data.sourceport,
                data.targetport,
            )
        })
        .collect()
}

fn edge(
    source: &str,
    target: &str,
    id: Option<&str>,
    sourceport: Option<&str>,
    targetport: Option<&str>,
) -> (String, String, Option<String>, Option<String>, Option<String>) {
    (
        source.to_owned(),
        target.to_owned(),
        id.map(str::to_owned),
        sourceport.map(str::to_owned),
        targetport.map(str::to_owned),
    )
}

/// Every edge's sourceport must be an output port of its source node and
/// every targetport an input port of its target node (sentinels aside).
fn assert_valid_ports(graph: &FlowGraph) {
    for (source, target, data) in graph.edges() {
        if graph.node_kind(source) == NodeKind::Call {
            let port = data
                .sourceport
                .as_ref()
                .expect("edges out of call nodes carry a sourceport");
            let ports = &graph.node_data(source).ports;
            assert_eq!(
                ports.get(port).map(|p| p.portkind),
                Some(PortKind::Output),
                "sourceport '{port}' missing on node '{}'",
                graph.node_id(source)
            );
        }
        if graph.node_kind(target) == NodeKind::Call {
            let port = data
                .targetport
                .as_ref()
                .expect("edges into call nodes carry a targetport");
            let ports = &graph.node_data(target).ports;
            assert_eq!(
                ports.get(port).map(|p| p.portkind),
                Some(PortKind::Input),
                "targetport '{port}' missing on node '{}'",
                graph.node_id(target)
            );
        }
    }
    for (_, _, _, data) in graph.nodes() {
        if let Some(nested) = &data.graph {
            assert_valid_ports(nested);
        }
    }
}

// =============================================================================
// 1. Basic flows
// =============================================================================

/// A simple two-object flow: the producer's return feeds the consumer.
#[test]
fn two_object_flow() {
    let recording = record("foo = objects.Foo()\nbar = objects.bar_from_foo(foo)\n");
    let graph = &recording.graph;
    let foo_id = recording.object_id("foo").unwrap();
    let bar_id = recording.object_id("bar").unwrap();

    assert_eq!(graph.call_node_count(), 2);
    let output = graph.output_id();
    let expected = vec![
        edge("Foo:1", "bar_from_foo:1", Some(&foo_id), Some("return"), Some("foo")),
        edge("Foo:1", output, Some(&foo_id), Some("return"), None),
        edge("bar_from_foo:1", output, Some(&bar_id), Some("return"), None),
    ];
    let mut actual = edges(graph);
    actual.sort();
    let mut expected = expected;
    expected.sort();
    assert_eq!(actual, expected);
    assert_valid_ports(graph);
}

/// An externally created input appears as an unknown input from INPUT.
#[test]
fn external_input_comes_from_input_sentinel() {
    let env = run_untraced(
        "import objects\nfoo = objects.Foo()\n",
        &registry(),
    )
    .expect("setup runs");
    let recording = record_with("bar = objects.bar_from_foo(foo)\n", env, false);
    let graph = &recording.graph;
    let foo_id = recording.object_id("foo").unwrap();
    let bar_id = recording.object_id("bar").unwrap();

    let mut actual = edges(graph);
    actual.sort();
    let mut expected = vec![
        edge(graph.input_id(), "bar_from_foo:1", Some(&foo_id), None, Some("foo")),
        edge("bar_from_foo:1", graph.output_id(), Some(&bar_id), Some("return"), None),
    ];
    expected.sort();
    assert_eq!(actual, expected);
}

/// Untrackable values passed by composition connect through the event
/// table: `sum(range(5))` still yields an edge, with no object id.
#[test]
fn untrackable_composition_connects_calls() {
    let recording = record("x = sum(range(5))");
    let graph = &recording.graph;
    assert!(matches!(recording.env.get("x"), Some(Value::Int(10))));

    let actual = edges(graph);
    assert!(
        actual.contains(&edge("range:1", "sum:1", None, Some("return"), Some("iterable"))),
        "missing range -> sum edge in {actual:?}"
    );
}

/// A shared untrackable producer serves multiple consumers through the
/// same `(node, port)` pair.
#[test]
fn shared_untrackable_producer_feeds_all_consumers() {
    let recording = record("n = len('abc')\na = str(n)\nb = str(n)\n");
    let actual = edges(&recording.graph);
    assert!(actual.contains(&edge("len:1", "str:1", None, Some("return"), Some("object"))));
    assert!(actual.contains(&edge("len:1", "str:2", None, Some("return"), Some("object"))));
}

// =============================================================================
// 2. Purity and mutation
// =============================================================================

/// A pure consumer leaves the producer as the object's provider: fan-out
/// keeps both consumers fed from the producer.
#[test]
fn pure_calls_fan_out_from_the_producer() {
    let recording = record(
        "foo = objects.Foo()\ny1 = objects.bar_from_foo(foo)\ny2 = objects.bar_from_foo(foo)\n",
    );
    let graph = &recording.graph;
    let foo_id = recording.object_id("foo").unwrap();

    let actual = edges(graph);
    assert!(actual.contains(&edge("Foo:1", "bar_from_foo:1", Some(&foo_id), Some("return"), Some("foo"))));
    assert!(actual.contains(&edge("Foo:1", "bar_from_foo:2", Some(&foo_id), Some("return"), Some("foo"))));
    assert!(
        actual.contains(&edge("Foo:1", graph.output_id(), Some(&foo_id), Some("return"), None)),
        "the producer must remain foo's provider"
    );
}

/// An annotated mutation re-routes the object's OUTPUT edge to the
/// mutating call's `arg!` port.
#[test]
fn mutation_reroutes_the_output_edge() {
    let recording = record(
        "foo = objects.Foo()\nbar = objects.bar_from_foo_mutating(foo)\nbaz = objects.baz_from_foo(foo)\n",
    );
    let graph = &recording.graph;
    let foo_id = recording.object_id("foo").unwrap();
    let output = graph.output_id();

    let actual = edges(graph);
    assert!(
        !actual.contains(&edge("Foo:1", output, Some(&foo_id), Some("return"), None)),
        "the constructor must no longer provide foo"
    );
    assert!(actual.contains(&edge(
        "bar_from_foo_mutating:1",
        output,
        Some(&foo_id),
        Some("foo!"),
        None
    )));
    assert!(actual.contains(&edge(
        "bar_from_foo_mutating:1",
        "baz_from_foo:1",
        Some(&foo_id),
        Some("foo!"),
        Some("foo")
    )));
}

/// At most one OUTPUT edge carries a given object id at any time.
#[test]
fn single_output_edge_per_object_id() {
    let recording = record(
        "foo = objects.Foo()\nb1 = objects.bar_from_foo_mutating(foo)\nb2 = objects.bar_from_foo_mutating(foo)\n",
    );
    let graph = &recording.graph;
    let foo_id = recording.object_id("foo").unwrap();
    let output_edges: Vec<_> = edges(graph)
        .into_iter()
        .filter(|(_, target, id, _, _)| {
            target == graph.output_id() && id.as_deref() == Some(foo_id.as_str())
        })
        .collect();
    assert_eq!(output_edges.len(), 1, "got {output_edges:?}");
}

// =============================================================================
// 3. Multiple return values
// =============================================================================

/// A destructured return produces one `return.i` port per element.
#[test]
fn destructured_returns_get_indexed_ports() {
    let recording = record("foo, bar = objects.create_foo_and_bar()\n");
    let graph = &recording.graph;
    let foo_id = recording.object_id("foo").unwrap();
    let bar_id = recording.object_id("bar").unwrap();
    let output = graph.output_id();

    let actual = edges(graph);
    assert!(actual.contains(&edge(
        "create_foo_and_bar:1",
        output,
        Some(&foo_id),
        Some("return.0"),
        None
    )));
    assert!(actual.contains(&edge(
        "create_foo_and_bar:1",
        output,
        Some(&bar_id),
        Some("return.1"),
        None
    )));

    let node = graph.node_by_qual_name("create_foo_and_bar").unwrap();
    let ports = &graph.node_data(node).ports;
    assert!(ports.contains_key("return.0"));
    assert!(ports.contains_key("return.1"));
    assert!(!ports.contains_key("return"));
}

/// Without destructuring the same call keeps a single `return` port.
#[test]
fn plain_assignment_keeps_a_single_return_port() {
    let recording = record("pair = objects.create_foo_and_bar()\n");
    let graph = &recording.graph;
    let node = graph.node_by_qual_name("create_foo_and_bar").unwrap();
    let ports = &graph.node_data(node).ports;
    assert!(ports.contains_key("return"));
    assert!(!ports.contains_key("return.0"));
}

// =============================================================================
// 4. Nested calls
// =============================================================================

/// A user-defined function gets a nested subgraph describing its body.
#[test]
fn user_functions_nest_their_body_graph() {
    let recording = record(
        "def outer_bar():\n    foo = objects.Foo()\n    return objects.bar_from_foo(foo)\n\nbar = outer_bar()\n",
    );
    let graph = &recording.graph;
    let bar_id = recording.object_id("bar").unwrap();

    assert_eq!(graph.call_node_count(), 1);
    let actual = edges(graph);
    assert!(actual.contains(&edge(
        "outer_bar:1",
        graph.output_id(),
        Some(&bar_id),
        Some("return"),
        None
    )));

    let node = graph.node_by_qual_name("outer_bar").unwrap();
    let nested = graph.node_data(node).graph.as_ref().expect("nested graph");
    assert_eq!(nested.call_node_count(), 2);
    let nested_edges = edges(nested);
    assert!(nested_edges
        .iter()
        .any(|(s, t, _, sp, tp)| s == "Foo:1"
            && t == "bar_from_foo:1"
            && sp.as_deref() == Some("return")
            && tp.as_deref() == Some("foo")));
    assert!(nested_edges
        .iter()
        .any(|(s, t, _, _, _)| s == "bar_from_foo:1" && t == nested.output_id()));
    assert_valid_ports(graph);
}

/// Class methods are recorded under their qualified name.
#[test]
fn class_methods_use_qualified_names() {
    let recording = record("bar = objects.Bar.make_bar()\n");
    let graph = &recording.graph;
    let bar_id = recording.object_id("bar").unwrap();
    let actual = edges(graph);
    assert!(actual.contains(&edge(
        "Bar.make_bar:1",
        graph.output_id(),
        Some(&bar_id),
        Some("return"),
        None
    )));
}

/// Callables passed into atomic calls do not leak their activity: the
/// lambda's constructor call is suppressed inside `Foo.apply`.
#[test]
fn higher_order_atomic_calls_suppress_inner_activity() {
    let recording = record("foo = objects.Foo()\nfoo.apply(lambda x: objects.Bar(x))\n");
    let graph = &recording.graph;
    let foo_id = recording.object_id("foo").unwrap();

    assert_eq!(graph.call_node_count(), 2, "Foo and Foo.apply only");
    assert!(graph.node_by_qual_name("Bar").is_none());
    let actual = edges(graph);
    assert!(actual.contains(&edge(
        "Foo:1",
        "Foo.apply:1",
        Some(&foo_id),
        Some("return"),
        Some("self")
    )));
}

// =============================================================================
// 5. Attribute access
// =============================================================================

/// Attribute reads that produce data are retained and labelled with the
/// slot; the receiver's type annotation upgrades them to slot nodes.
#[test]
fn getattr_nodes_are_labelled_with_slots() {
    let recording = record("foo = objects.FooSlots()\nx = foo.x\n");
    let graph = &recording.graph;
    let node = graph
        .find_node(|_, data| data.slot.as_deref() == Some("x"))
        .expect("slot-labelled getattr node");
    let data = graph.node_data(node);
    assert_eq!(data.qual_name.as_deref(), Some("getattr"));
    assert_eq!(data.annotation.as_deref(), Some("python/objects/foo-slots"));
    assert_eq!(data.annotation_index, Some(1));
    assert_eq!(data.annotation_kind, Some(AnnotationKind::Slot));

    let foo_id = recording.object_id("foo").unwrap();
    let actual = edges(graph);
    let getattr_id = graph.node_id(node).to_owned();
    assert!(actual.contains(&edge(
        "FooSlots:1",
        &getattr_id,
        Some(&foo_id),
        Some("return"),
        Some("0")
    )));
}

/// Attribute reads that produce methods are redundant: the method call
/// itself is traced, so the lookup node is removed.
#[test]
fn method_lookups_are_removed() {
    let recording = record("foo = objects.Foo()\ns = foo.do_sum()\n");
    let graph = &recording.graph;
    assert!(graph.node_by_qual_name("getattr").is_none());
    let node = graph.node_by_qual_name("Foo.do_sum").expect("method call node");
    let foo_id = recording.object_id("foo").unwrap();
    let actual = edges(graph);
    let node_id = graph.node_id(node).to_owned();
    assert!(actual.contains(&edge(
        "Foo:1",
        &node_id,
        Some(&foo_id),
        Some("return"),
        Some("self")
    )));
}

/// Un-annotated constructors are marked as constructions.
#[test]
fn constructors_are_marked() {
    let recording = record("baz = objects.Baz()\n");
    let graph = &recording.graph;
    let node = graph.node_by_qual_name("Baz").unwrap();
    assert!(graph.node_data(node).construct);

    let recording = record("foo = objects.Foo()\n");
    let graph = &recording.graph;
    let node = graph.node_by_qual_name("Foo").unwrap();
    let data = graph.node_data(node);
    assert!(!data.construct);
    assert_eq!(data.annotation.as_deref(), Some("python/objects/foo"));
    assert_eq!(data.annotation_kind, Some(AnnotationKind::Construct));
}

// =============================================================================
// 6. Port data
// =============================================================================

/// Input ports carry ids for tracked values, primitive payloads for
/// JSON-representable values, type names for non-builtin types, and
/// annotation indices from the function annotation.
#[test]
fn input_ports_carry_value_data() {
    let recording = record("foo = objects.Foo()\nbar = objects.bar_from_foo(foo, 10)\n");
    let graph = &recording.graph;
    let node = graph.node_by_qual_name("bar_from_foo").unwrap();
    let ports = &graph.node_data(node).ports;

    let foo_port = &ports["foo"];
    assert_eq!(foo_port.portkind, PortKind::Input);
    assert_eq!(foo_port.argname.as_deref(), Some("foo"));
    assert_eq!(foo_port.object_id, recording.object_id("foo"));
    assert_eq!(foo_port.module.as_deref(), Some("objects"));
    assert_eq!(foo_port.qual_name.as_deref(), Some("Foo"));
    assert_eq!(foo_port.annotation.as_deref(), Some("python/objects/foo"));
    assert_eq!(foo_port.annotation_index, Some(1));

    let x_port = &ports["x"];
    assert_eq!(x_port.value, Some(serde_json::json!(10)));
    assert_eq!(x_port.module, None, "builtin types are not recorded");
    assert_eq!(x_port.annotation.as_deref(), Some("python/builtins/int"));
    assert_eq!(x_port.annotation_index, Some(2));
}

/// Mutated arguments appear as output ports named with the `!` sentinel.
#[test]
fn mutated_arguments_get_output_ports() {
    let recording = record("foo = objects.Foo()\nbar = objects.bar_from_foo_mutating(foo)\n");
    let graph = &recording.graph;
    let node = graph.node_by_qual_name("bar_from_foo_mutating").unwrap();
    let ports = &graph.node_data(node).ports;

    let mutated = &ports["foo!"];
    assert_eq!(mutated.portkind, PortKind::Output);
    assert_eq!(mutated.argname.as_deref(), Some("foo"));
    assert_eq!(mutated.object_id, recording.object_id("foo"));
    assert_eq!(mutated.annotation_index, Some(1));

    let returned = &ports["return"];
    assert_eq!(returned.portkind, PortKind::Output);
    assert_eq!(returned.object_id, recording.object_id("bar"));
    assert_eq!(returned.annotation_index, Some(2));
}

/// Variadic parameters expand into the argument map: positional extras by
/// index, keyword extras by name.
#[test]
fn varargs_expand_into_the_argument_map() {
    let recording = record("objects.sum_varargs(1, 2, 3, w=4)\n");
    let graph = &recording.graph;
    let node = graph.node_by_qual_name("sum_varargs").unwrap();
    let names: Vec<&str> = graph
        .node_data(node)
        .ports
        .iter()
        .filter(|(_, port)| port.portkind == PortKind::Input)
        .map(|(name, _)| name.as_str())
        .collect();
    assert_eq!(names, ["x", "y", "0", "w"]);
}

// =============================================================================
// 7. Slot capture
// =============================================================================

/// With slot capture enabled, annotated slots become dedicated nodes fed
/// by the producing call.
#[test]
fn annotated_slots_are_captured_on_creation() {
    let recording = record_with("foo = objects.FooSlots()\n", IndexMap::new(), true);
    let graph = &recording.graph;
    let foo_id = recording.object_id("foo").unwrap();

    let x_node = graph
        .find_node(|_, data| data.slot.as_deref() == Some("x"))
        .expect("slot node for x");
    let data = graph.node_data(x_node);
    assert_eq!(data.annotation_kind, Some(AnnotationKind::Slot));
    assert_eq!(data.ports["self"].portkind, PortKind::Input);
    assert_eq!(data.ports["return"].portkind, PortKind::Output);
    assert_eq!(data.ports["return"].value, Some(serde_json::json!(1)));

    let x_id = graph.node_id(x_node).to_owned();
    let actual = edges(graph);
    assert!(actual.contains(&edge(
        "FooSlots:1",
        &x_id,
        Some(&foo_id),
        Some("return"),
        Some("self")
    )));
}

/// Trackable slot values recursively become outputs of their slot node.
#[test]
fn trackable_slot_values_become_outputs() {
    let recording = record_with("container = objects.FooContainer()\n", IndexMap::new(), true);
    let graph = &recording.graph;

    let slot_node = graph
        .find_node(|_, data| data.slot.as_deref() == Some("foo"))
        .expect("slot node for foo");
    let slot_id = graph.node_id(slot_node).to_owned();
    let inner_foo_id = graph.node_data(slot_node).ports["return"]
        .object_id
        .clone()
        .expect("slot value is tracked");
    let actual = edges(graph);
    assert!(actual.contains(&edge(
        &slot_id,
        graph.output_id(),
        Some(&inner_foo_id),
        Some("return"),
        None
    )));
}

/// Slot capture can be disabled.
#[test]
fn slot_capture_can_be_disabled() {
    let recording = record("foo = objects.FooSlots()\n");
    let graph = &recording.graph;
    assert_eq!(graph.call_node_count(), 1);
}

// =============================================================================
// 8. Variables and determinism
// =============================================================================

/// Rebinding a variable moves its table entry; deletion removes it, so a
/// later consumer sees an unknown value instead of a stale provider.
#[test]
fn deleted_variables_lose_their_provider() {
    let recording = record("n = len('ab')\ndel n\nn = 7\nx = str(n)\n");
    let actual = edges(&recording.graph);
    assert!(
        !actual
            .iter()
            .any(|(s, t, _, _, _)| s == "len:1" && t == "str:1"),
        "stale provider survived deletion: {actual:?}"
    );
}

/// Two identical runs produce identical graphs, including object ids.
#[test]
fn repeated_runs_are_deterministic() {
    let code = "foo = objects.Foo()\nbar = objects.bar_from_foo(foo)\nbaz = objects.baz_from_bar(bar)\n";
    let first = record(code);
    let second = record(code);
    assert_eq!(first.graph, second.graph);
}
