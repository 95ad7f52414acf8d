//! Record flow graphs by running programs.
//!
//! The convenient entry point for users of the crate: wires a tracer and a
//! flow-graph builder around a single program execution.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::annotations::db::{AnnotationDb, MemoryAnnotationDb};
use crate::error::{RecordError, TraceError};
use crate::graph::FlowGraphBuilder;
use crate::graph::flow_graph::FlowGraph;
use crate::interp::{Interp, ModuleRegistry};
use crate::namespace::Scope;
use crate::parse::parse;
use crate::trace::event::NullSink;
use crate::trace::object_tracker::ObjectTracker;
use crate::trace::tracer::Tracer;
use crate::value::Value;

/// Module name the traced program executes under when none is given.
pub const DEFAULT_RECORD_MODULE: &str = "__record__";

/// Options for one recording.
pub struct RecordOptions {
    /// Annotation store consulted during graph construction.
    pub db: Box<dyn AnnotationDb>,
    /// Initial bindings visible to the traced program.
    pub env: IndexMap<String, Value>,
    /// Host-registered modules available to `import`.
    pub modules: ModuleRegistry,
    /// Module name the program executes under. Callables defined by the
    /// program itself are non-atomic; everything else is.
    pub module_name: String,
    /// Whether to capture annotated slots on object creation or mutation.
    pub store_slots: bool,
    /// Working directory for the execution, restored afterwards.
    pub cwd: Option<PathBuf>,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            db: Box::new(MemoryAnnotationDb::new()),
            env: IndexMap::new(),
            modules: ModuleRegistry::new(),
            module_name: DEFAULT_RECORD_MODULE.to_owned(),
            store_slots: true,
            cwd: None,
        }
    }
}

/// The result of a recording.
#[derive(Debug)]
pub struct Recording {
    /// The root flow graph.
    pub graph: FlowGraph,
    /// The module environment after execution.
    pub env: IndexMap<String, Value>,
    /// The tracker that assigned the graph's object identifiers.
    pub object_tracker: Rc<RefCell<ObjectTracker>>,
}

impl Recording {
    /// Object identifier of a variable in the final environment.
    #[must_use]
    pub fn object_id(&self, name: &str) -> Option<String> {
        let value = self.env.get(name)?;
        self.object_tracker.borrow().get_id(value)
    }
}

/// Evaluates and records a program from source text.
///
/// Any failure of the traced program surfaces unchanged; the partial graph
/// is discarded.
pub fn record_source(source: &str, options: RecordOptions) -> Result<Recording, RecordError> {
    let RecordOptions {
        db,
        env,
        modules,
        module_name,
        store_slots,
        cwd,
    } = options;

    let mut tracer = Tracer::new([module_name.clone()]);
    let mut builder = FlowGraphBuilder::new(db, Rc::clone(&tracer.object_tracker))
        .with_store_slots(store_slots);

    let saved_dir = match &cwd {
        Some(dir) => {
            let previous = std::env::current_dir()?;
            std::env::set_current_dir(dir)?;
            Some(previous)
        }
        None => None,
    };
    let outcome = tracer.trace(source, &module_name, env, &modules, &mut builder);
    if let Some(previous) = saved_dir {
        std::env::set_current_dir(previous)?;
    }

    let env = outcome?;
    let graph = builder.into_graph()?;
    Ok(Recording {
        graph,
        env,
        object_tracker: Rc::clone(&tracer.object_tracker),
    })
}

/// Evaluates and records a program from a script file.
pub fn record_script(path: &Path, options: RecordOptions) -> Result<Recording, RecordError> {
    let source = std::fs::read_to_string(path)?;
    record_source(&source, options)
}

/// Executes a program without tracing and returns its environment.
///
/// Useful for preparing external inputs to a later recording: values
/// created here are tracked only once the recording observes them.
pub fn run_untraced(
    source: &str,
    registry: &ModuleRegistry,
) -> Result<IndexMap<String, Value>, TraceError> {
    let statements = parse(source)?;
    let env = Scope::root();
    Scope::set(&env, "operator", registry.operator_module());
    let mut tracer = Tracer::new([]);
    let mut sink = NullSink;
    let mut interp = Interp::new(&mut tracer, registry, "__setup__", &mut sink);
    interp
        .exec_module(&statements, &env)
        .map_err(TraceError::Program)?;
    Ok(Scope::bindings(&env))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_a_trivial_program() {
        let recording = record_source("x = len('abc')", RecordOptions::default()).unwrap();
        assert_eq!(recording.graph.call_node_count(), 1);
        assert!(matches!(recording.env.get("x"), Some(Value::Int(3))));
    }

    #[test]
    fn program_failures_surface_unchanged() {
        let error = record_source("x = missing", RecordOptions::default()).unwrap_err();
        assert!(matches!(error, RecordError::Program(_)));
    }

    #[test]
    fn instrumentation_failures_are_reported_before_execution() {
        let error = record_source("x = [i for i in y]", RecordOptions::default()).unwrap_err();
        assert!(matches!(error, RecordError::Instrumentation(_)));
    }
}
