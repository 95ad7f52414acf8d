//! GraphML round-trip tests over recorded graphs.

use indexmap::IndexMap;
use pretty_assertions::assert_eq;

use flowtrace::{
    MemoryAnnotationDb, ModuleRegistry, RecordOptions, Recording, Value, read_graphml_str,
    record_source, write_graphml_str,
};

const OBJECTS_SRC: &str = r#"
class Foo:
    def __init__(self):
        self.x = 1

def bar_from_foo(foo):
    return Foo()
"#;

const ANNOTATIONS: &str = r#"[
    {"language": "python", "package": "objects", "id": "foo",
     "kind": "type", "class": "objects.Foo"}
]"#;

fn record(code: &str) -> Recording {
    let mut modules = ModuleRegistry::new();
    modules
        .register_source("objects", OBJECTS_SRC)
        .expect("objects module compiles");
    let mut env = IndexMap::new();
    env.insert(
        "objects".to_owned(),
        Value::Module(modules.get("objects").expect("registered above")),
    );
    let mut db = MemoryAnnotationDb::new();
    db.load_str(ANNOTATIONS).expect("annotations parse");
    record_source(
        code,
        RecordOptions {
            db: Box::new(db),
            env,
            modules,
            ..RecordOptions::default()
        },
    )
    .expect("recording succeeds")
}

/// Graph -> GraphML -> graph preserves the node set, the edge multiset and
/// all attribute maps.
#[test]
fn recorded_graph_round_trips() {
    let recording = record("foo = objects.Foo()\nbar = objects.bar_from_foo(foo)\n");
    let xml = write_graphml_str(&recording.graph).unwrap();
    let recovered = read_graphml_str(&xml).unwrap();
    assert_eq!(recording.graph, recovered);
}

/// Nested subgraphs survive the round trip.
#[test]
fn nested_graphs_round_trip() {
    let recording = record(
        "def wrapper(foo):\n    return objects.bar_from_foo(foo)\n\nfoo = objects.Foo()\nbar = wrapper(foo)\n",
    );
    let xml = write_graphml_str(&recording.graph).unwrap();
    let recovered = read_graphml_str(&xml).unwrap();
    assert_eq!(recording.graph, recovered);

    let node = recovered.node_by_qual_name("wrapper").expect("wrapper node");
    assert!(recovered.node_data(node).graph.is_some());
}

/// Writing is deterministic: the same graph serialises to the same bytes.
#[test]
fn serialisation_is_deterministic() {
    let recording = record("foo = objects.Foo()\nbar = objects.bar_from_foo(foo)\n");
    let first = write_graphml_str(&recording.graph).unwrap();
    let second = write_graphml_str(&recording.graph).unwrap();
    assert_eq!(first, second);
}
