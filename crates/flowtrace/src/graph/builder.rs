//! Build an object flow graph from a stream of trace events.
//!
//! A flow graph is a directed multigraph describing the flow of objects
//! through a program. Its nodes are function calls and its edges are
//! (pointers to) objects: the incoming edges of a node are arguments, the
//! outgoing edges are return values and mutated arguments.
//!
//! The builder keeps one context per in-flight call. Each context carries
//! the subgraph under construction and three lookup tables:
//!
//! - the *output table* maps an object id to the `(node, port)` currently
//!   providing it — at any time there is at most one `OUTPUT` edge per id,
//!   and the table stores the edge index so the displaced edge is removed
//!   in O(1);
//! - the *variable table* maps a variable name to its most recent
//!   provider, carrying untrackable named values;
//! - the *event table* maps a value-bearing event to its provider,
//!   carrying untrackable values threaded through expressions.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use indexmap::IndexMap;
use log::debug;
use petgraph::stable_graph::{EdgeIndex, NodeIndex};

use crate::annotations::db::{Annotation, AnnotationDb, SlotDef, SlotRef};
use crate::annotations::Annotator;
use crate::ast::AssignSymbol;
use crate::error::BuilderError;
use crate::graph::flow_graph::{
    AnnotationKind, EdgeData, FlowGraph, NodeData, NodeNamer, PortData, PortKind,
};
use crate::trace::event::{
    AccessEvent, AssignEvent, CallEvent, DeleteEvent, EventId, EventSink, ReturnEvent, TraceEvent,
};
use crate::trace::object_tracker::ObjectTracker;
use crate::value::{Value, getattr_value};

/// Provider of an object: node, output port, and the OUTPUT edge index.
type OutputEntry = (NodeIndex, String, EdgeIndex);

/// Context for one in-flight call (or the top level).
struct BuildContext {
    /// The Call event that opened this context; `None` at the bottom.
    call: Option<Rc<CallEvent>>,
    /// Node created for the call, in the *enclosing* context's graph.
    node: Option<NodeIndex>,
    /// The graph under construction in this context. The root context owns
    /// the result; atomic calls own nothing (their inner events are
    /// suppressed by the tracer).
    graph: Option<FlowGraph>,
    output_table: AHashMap<String, OutputEntry>,
    variable_table: AHashMap<String, (NodeIndex, String)>,
    event_table: AHashMap<EventId, (NodeIndex, String)>,
}

impl BuildContext {
    fn root(graph: FlowGraph) -> Self {
        Self {
            call: None,
            node: None,
            graph: Some(graph),
            output_table: AHashMap::new(),
            variable_table: AHashMap::new(),
            event_table: AHashMap::new(),
        }
    }
}

/// Consumes trace events and maintains the evolving flow graph.
pub struct FlowGraphBuilder {
    annotator: Annotator,
    object_tracker: Rc<RefCell<ObjectTracker>>,
    /// Whether to capture annotated slots on object creation or mutation.
    store_slots: bool,
    namer: NodeNamer,
    stack: Vec<BuildContext>,
    error: Option<BuilderError>,
}

impl FlowGraphBuilder {
    pub fn new(db: Box<dyn AnnotationDb>, object_tracker: Rc<RefCell<ObjectTracker>>) -> Self {
        let mut builder = Self {
            annotator: Annotator::new(db),
            object_tracker,
            store_slots: true,
            namer: NodeNamer::new(),
            stack: Vec::new(),
            error: None,
        };
        builder.reset();
        builder
    }

    #[must_use]
    pub fn with_store_slots(mut self, store_slots: bool) -> Self {
        self.store_slots = store_slots;
        self
    }

    /// Discards all state, including pending contexts from an aborted
    /// execution, and starts a fresh root graph.
    pub fn reset(&mut self) {
        self.namer = NodeNamer::new();
        let root = self.new_graph();
        self.stack.clear();
        self.stack.push(BuildContext::root(root));
        self.error = None;
    }

    /// The completed root graph.
    ///
    /// Fails if construction observed mismatched Call/Return events.
    pub fn into_graph(mut self) -> Result<FlowGraph, BuilderError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let root = self
            .stack
            .first_mut()
            .and_then(|context| context.graph.take())
            .expect("root context always holds a graph");
        Ok(root)
    }

    /// A view of the root graph as built so far.
    #[must_use]
    pub fn graph(&self) -> &FlowGraph {
        self.stack
            .first()
            .and_then(|context| context.graph.as_ref())
            .expect("root context always holds a graph")
    }

    fn new_graph(&mut self) -> FlowGraph {
        let input = self.namer.name("__in__");
        let output = self.namer.name("__out__");
        FlowGraph::new(input, output)
    }

    fn fail(&mut self, error: BuilderError) {
        debug!("builder poisoned: {error}");
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    // ------------------------------------------------------------------
    // Call events
    // ------------------------------------------------------------------

    fn push_call_event(&mut self, event: &Rc<CallEvent>) {
        let annotation = self.annotator.notate_function(&event.function);

        // Input port data, and input edges, are computed against the
        // enclosing context.
        let node_id = self.namer.name(&event.qual_name);
        let input_names: Vec<(String, String)> = event
            .arguments
            .keys()
            .map(|name| (name.clone(), name.clone()))
            .collect();
        let ports = self.ports_data(
            &event.arguments,
            None,
            &input_names,
            annotation.as_deref().map_or(&[], |a| a.inputs.as_slice()),
            PortKind::Input,
        );
        let mut data = NodeData {
            module: Some(event.module.clone()),
            qual_name: Some(event.qual_name.clone()),
            ports,
            ..NodeData::default()
        };
        if let Some(annotation) = &annotation {
            data.annotation = Some(annotation.key());
            data.annotation_kind = Some(AnnotationKind::Function);
        }

        let mut context = self.stack.pop().expect("stack never empty");
        // Events inside an atomic call are suppressed by the tracer; a
        // context with no graph only arises defensively.
        let node = if context.graph.is_some() {
            let node = context
                .graph
                .as_mut()
                .expect("checked above")
                .add_call_node(node_id, data);
            for arg_name in event.arguments.keys() {
                self.add_call_in_edge(&mut context, event, node, arg_name);
            }
            Some(node)
        } else {
            None
        };
        self.stack.push(context);

        let nested = if event.atomic || node.is_none() {
            None
        } else {
            Some(self.new_graph())
        };
        self.stack.push(BuildContext {
            call: Some(Rc::clone(event)),
            node,
            graph: nested,
            output_table: AHashMap::new(),
            variable_table: AHashMap::new(),
            event_table: AHashMap::new(),
        });
    }

    /// Adds the incoming edge for one argument of a new call node.
    fn add_call_in_edge(
        &mut self,
        context: &mut BuildContext,
        event: &CallEvent,
        node: NodeIndex,
        arg_name: &str,
    ) {
        let arg = &event.arguments[arg_name];
        let arg_id = self.object_tracker.borrow_mut().maybe_track(arg);
        let annotation = self.annotator.notate_value(arg).map(|note| note.key());
        let graph = context.graph.as_mut().expect("caller checked graph");

        // Source resolution: a tracked argument resolves through the
        // output table; an untracked one falls back to the event that
        // produced it.
        let source: Option<(NodeIndex, String)> = match &arg_id {
            Some(id) => context
                .output_table
                .get(id)
                .map(|(source, port, _)| (*source, port.clone())),
            None => event
                .argument_events
                .get(arg_name)
                .and_then(|event_id| context.event_table.get(event_id).cloned()),
        };

        if let Some((source, source_port)) = source {
            graph.add_edge(
                source,
                node,
                EdgeData {
                    object_id: arg_id,
                    sourceport: Some(source_port),
                    targetport: Some(arg_name.to_owned()),
                    annotation,
                },
            );
        } else if let Some(id) = arg_id {
            // A tracked argument with no known provider is an unknown
            // input to the whole scope.
            let input = graph.input();
            graph.add_edge(
                input,
                node,
                EdgeData {
                    object_id: Some(id),
                    sourceport: None,
                    targetport: Some(arg_name.to_owned()),
                    annotation,
                },
            );
        }
    }

    // ------------------------------------------------------------------
    // Return events
    // ------------------------------------------------------------------

    fn push_return_event(&mut self, event: &Rc<ReturnEvent>) {
        let context = self.stack.pop().expect("stack never empty");
        let Some(call) = &context.call else {
            self.stack.push(context);
            self.fail(BuilderError {
                qual_name: event.full_name(),
                expected: None,
            });
            return;
        };
        if call.full_name() != event.full_name() {
            let expected = call.full_name();
            self.stack.push(context);
            self.fail(BuilderError {
                qual_name: event.full_name(),
                expected: Some(expected),
            });
            return;
        }
        let Some(node) = context.node else {
            return;
        };

        let mut parent = self.stack.pop().expect("root context below every call");
        if parent.graph.is_none() {
            self.stack.push(parent);
            return;
        }

        // Attribute lookups that produce functions, methods, modules or
        // types are not interesting flow: the method call itself will be
        // traced, so the lookup node is removed outright.
        if event.module == "builtins"
            && event.qual_name == "getattr"
            && event.value.is_function_like()
        {
            parent
                .graph
                .as_mut()
                .expect("checked above")
                .remove_node(node);
            self.stack.push(parent);
            return;
        }

        let annotation = self.annotator.notate_function(&event.function);

        // Output provision: each returned value, then each mutated
        // argument, becomes the current provider of its object id.
        if event.multiple_values {
            if let Value::Tuple(items) = &event.value {
                for (index, item) in items.iter().enumerate() {
                    let id = self.object_tracker.borrow_mut().maybe_track(item);
                    if let Some(id) = id {
                        self.set_object_output(
                            &mut parent,
                            item,
                            &id,
                            node,
                            &format!("return.{index}"),
                        );
                    }
                }
            }
        } else {
            let id = self.object_tracker.borrow_mut().maybe_track(&event.value);
            if let Some(id) = id {
                self.set_object_output(&mut parent, &event.value, &id, node, "return");
            }
        }
        for (arg_name, arg) in &event.arguments {
            let arg_id = self.object_tracker.borrow().get_id(arg);
            if let Some(arg_id) = arg_id {
                if !is_pure(event, annotation.as_deref(), arg_name) {
                    let port = mutated_port_name(arg_name);
                    self.set_object_output(&mut parent, arg, &arg_id, node, &port);
                }
            }
        }

        parent.event_table.insert(event.id, (node, "return".to_owned()));

        self.update_call_node_for_return(&mut parent, event, annotation.as_deref(), node);

        // A non-atomic call owns the subgraph its body built.
        if let Some(nested) = context.graph {
            let graph = parent.graph.as_mut().expect("checked above");
            graph.node_data_mut(node).graph = Some(Box::new(nested));
        }
        self.stack.push(parent);
    }

    /// Adds output ports and the special getattr/constructor updates.
    fn update_call_node_for_return(
        &mut self,
        context: &mut BuildContext,
        event: &ReturnEvent,
        annotation: Option<&Annotation>,
        node: NodeIndex,
    ) {
        // Special updates apply only when no annotation overrides them.
        if annotation.is_none() {
            if event.module == "builtins" && event.qual_name == "getattr" {
                self.update_getattr_node_for_return(context, event, node);
            } else if matches!(event.function, Value::Class(_)) {
                self.update_constructor_node_for_return(context, event, node);
            }
        }

        // Output port names: `return` (or `return.i` when the context
        // destructures), plus one mutated port per impure argument.
        let mut port_names: Vec<(String, String)> = Vec::new();
        if event.multiple_values {
            if let Value::Tuple(items) = &event.value {
                for index in 0..items.len() {
                    let name = format!("return.{index}");
                    port_names.push((name.clone(), name));
                }
            }
        } else if !matches!(event.value, Value::None) {
            port_names.push(("return".to_owned(), "return".to_owned()));
        }
        for arg_name in event.arguments.keys() {
            if !is_pure(event, annotation, arg_name) {
                port_names.push((arg_name.clone(), mutated_port_name(arg_name)));
            }
        }

        let output_ports = self.ports_data(
            &event.arguments,
            Some(&event.value),
            &port_names,
            annotation.map_or(&[], |a| a.outputs.as_slice()),
            PortKind::Output,
        );
        let graph = context.graph.as_mut().expect("caller checked graph");
        graph.node_data_mut(node).ports.extend(output_ports);
    }

    /// Records the looked-up attribute name on a retained `getattr` node,
    /// mapping it to a slot annotation when the receiver's type describes
    /// it.
    fn update_getattr_node_for_return(
        &mut self,
        context: &mut BuildContext,
        event: &ReturnEvent,
        node: NodeIndex,
    ) {
        let (Some((_, obj)), Some((_, name))) = (
            event.arguments.get_index(0),
            event.arguments.get_index(1),
        ) else {
            return;
        };
        let Value::Str(name) = name else { return };

        let note = self.annotator.notate_value(obj);
        let graph = context.graph.as_mut().expect("caller checked graph");
        let data = graph.node_data_mut(node);
        if let Some(note) = &note {
            for (slot_index, slot_def) in note.slots.iter().enumerate() {
                if let SlotRef::Name(slot) = &slot_def.slot {
                    if slot.as_str() == name.as_ref() {
                        data.slot = Some(slot.clone());
                        data.annotation = Some(note.key());
                        data.annotation_index = Some(slot_index + 1);
                        data.annotation_kind = Some(AnnotationKind::Slot);
                        return;
                    }
                }
            }
        }
        data.slot = Some(name.to_string());
    }

    /// Marks an object constructor: annotated construction when the
    /// created value's type is annotated, a bare `construct` flag
    /// otherwise.
    fn update_constructor_node_for_return(
        &mut self,
        context: &mut BuildContext,
        event: &ReturnEvent,
        node: NodeIndex,
    ) {
        let note = self.annotator.notate_value(&event.value);
        let graph = context.graph.as_mut().expect("caller checked graph");
        let data = graph.node_data_mut(node);
        match note {
            Some(note) => {
                data.annotation = Some(note.key());
                data.annotation_kind = Some(AnnotationKind::Construct);
            }
            None => data.construct = true,
        }
    }

    // ------------------------------------------------------------------
    // Variable events
    // ------------------------------------------------------------------

    fn push_access_event(&mut self, event: &AccessEvent) {
        let context = self.stack.last_mut().expect("stack never empty");
        if let Some(provider) = context.variable_table.get(&event.name).cloned() {
            context.event_table.insert(event.id, provider);
        }
    }

    fn push_assign_event(&mut self, event: &AssignEvent) {
        let value_id = self.object_tracker.borrow().get_id(&event.value);
        let context = self.stack.last_mut().expect("stack never empty");
        let source: Option<(NodeIndex, String)> = value_id
            .and_then(|id| {
                context
                    .output_table
                    .get(&id)
                    .map(|(node, port, _)| (*node, port.clone()))
            })
            .or_else(|| {
                event
                    .value_event
                    .and_then(|event_id| context.event_table.get(&event_id).cloned())
            });
        bind_symbol(&mut context.variable_table, &event.target, source);
    }

    fn push_delete_event(&mut self, event: &DeleteEvent) {
        let context = self.stack.last_mut().expect("stack never empty");
        context.variable_table.remove(&event.name);
    }

    // ------------------------------------------------------------------
    // Output provision and slot capture
    // ------------------------------------------------------------------

    /// Makes `(node, port)` the provider of `obj_id`, displacing any
    /// previous OUTPUT edge carrying that id.
    fn set_object_output(
        &mut self,
        context: &mut BuildContext,
        obj: &Value,
        obj_id: &str,
        node: NodeIndex,
        port: &str,
    ) {
        let annotation = self.annotator.notate_value(obj).map(|note| note.key());
        let graph = context.graph.as_mut().expect("caller checked graph");

        if let Some((_, _, old_edge)) = context.output_table.get(obj_id) {
            graph.remove_edge(*old_edge);
        }
        let output = graph.output();
        let edge = graph.add_edge(
            node,
            output,
            EdgeData {
                object_id: Some(obj_id.to_owned()),
                sourceport: Some(port.to_owned()),
                targetport: None,
                annotation,
            },
        );
        context
            .output_table
            .insert(obj_id.to_owned(), (node, port.to_owned(), edge));

        // The object was created or mutated: capture its annotated slots.
        if self.store_slots {
            self.add_object_slots(context, obj, obj_id, node, port);
        }
    }

    /// Synthesises `slot:<name>` nodes for the annotated slots of a
    /// created or mutated object, recursing into trackable slot values.
    fn add_object_slots(
        &mut self,
        context: &mut BuildContext,
        obj: &Value,
        obj_id: &str,
        node: NodeIndex,
        port: &str,
    ) {
        let Some(note) = self.annotator.notate_value(obj) else {
            return;
        };
        for (slot_index, slot_def) in note.slots.iter().enumerate() {
            let Some(slot_value) = get_slot(obj, &slot_def.slot) else {
                continue;
            };
            let slot_name = slot_ref_name(&slot_def.slot);
            let slot_node_id = self.namer.name(&format!("slot:{slot_name}"));

            let mut self_port = self.port_data_for_value(obj, PortKind::Input);
            self_port.annotation_index = Some(1);
            let mut return_port = self.port_data_for_value(&slot_value, PortKind::Output);
            return_port.annotation_index = Some(1);
            let mut ports = IndexMap::new();
            ports.insert("self".to_owned(), self_port);
            ports.insert("return".to_owned(), return_port);

            let data = NodeData {
                slot: Some(slot_name),
                annotation: Some(note.key()),
                annotation_index: Some(slot_index + 1),
                annotation_kind: Some(AnnotationKind::Slot),
                ports,
                ..NodeData::default()
            };
            let graph = context.graph.as_mut().expect("caller checked graph");
            let slot_node = graph.add_call_node(slot_node_id, data);
            graph.add_edge(
                node,
                slot_node,
                EdgeData {
                    object_id: Some(obj_id.to_owned()),
                    sourceport: Some(port.to_owned()),
                    targetport: Some("self".to_owned()),
                    annotation: Some(note.key()),
                },
            );

            let slot_id = self.object_tracker.borrow_mut().maybe_track(&slot_value);
            if let Some(slot_id) = slot_id {
                self.set_object_output(context, &slot_value, &slot_id, slot_node, "return");
            }
        }
    }

    // ------------------------------------------------------------------
    // Port data
    // ------------------------------------------------------------------

    /// Port data for a list of `(value name, port name)` pairs.
    ///
    /// `return_value` resolves the `return`/`return.i` names; everything
    /// else resolves through the argument map. The annotation slot list
    /// assigns 1-based annotation indices to the named ports.
    fn ports_data(
        &mut self,
        arguments: &IndexMap<String, Value>,
        return_value: Option<&Value>,
        names: &[(String, String)],
        annotated_slots: &[SlotDef],
        portkind: PortKind,
    ) -> IndexMap<String, PortData> {
        let mut annotation_table: AHashMap<String, usize> = AHashMap::new();
        for (index, slot_def) in annotated_slots.iter().enumerate() {
            let resolved = match &slot_def.slot {
                SlotRef::Index(position) => {
                    arguments.get_index(*position).map(|(name, _)| name.clone())
                }
                SlotRef::Name(name) => Some(name.clone()),
            };
            if let Some(name) = resolved {
                annotation_table.insert(name, index + 1);
            }
        }

        let mut ports = IndexMap::new();
        for (value_name, port_name) in names {
            let value = resolve_io_slot(arguments, return_value, value_name);
            let mut data = match value {
                Some(value) => self.port_data_for_value(&value, portkind),
                None => PortData::new(portkind),
            };
            data.argname = Some(value_name.clone());
            if let Some(index) = annotation_table.get(value_name.as_str()) {
                data.annotation_index = Some(*index);
            }
            ports.insert(port_name.clone(), data);
        }
        ports
    }

    /// Port data for a single value: object id if tracked, a deep-copied
    /// primitive payload if JSON-representable, the type unless built-in,
    /// and the type's annotation key if any.
    fn port_data_for_value(&mut self, value: &Value, portkind: PortKind) -> PortData {
        let mut data = PortData::new(portkind);
        data.object_id = self.object_tracker.borrow().get_id(value);
        data.value = value.to_json();
        let (module, qual_name) = value.class_names();
        if module != "builtins" {
            data.module = Some(module);
            data.qual_name = Some(qual_name);
        }
        data.annotation = self.annotator.notate_value(value).map(|note| note.key());
        data
    }
}

impl EventSink for FlowGraphBuilder {
    fn push_event(&mut self, event: TraceEvent) {
        if self.error.is_some() {
            return;
        }
        match &event {
            TraceEvent::Call(call) => self.push_call_event(call),
            TraceEvent::Return(ret) => self.push_return_event(ret),
            TraceEvent::Access(access) => self.push_access_event(access),
            TraceEvent::Assign(assign) => self.push_assign_event(assign),
            TraceEvent::Delete(delete) => self.push_delete_event(delete),
        }
    }
}

/// Binds every name in an assignment pattern to its resolved source; the
/// source port gains a `.i` suffix per destructuring position. An
/// unresolvable source leaves the name unbound.
fn bind_symbol(
    variable_table: &mut AHashMap<String, (NodeIndex, String)>,
    symbol: &AssignSymbol,
    source: Option<(NodeIndex, String)>,
) {
    match symbol {
        AssignSymbol::Name(name) => match source {
            Some(provider) => {
                variable_table.insert(name.clone(), provider);
            }
            None => {
                variable_table.remove(name);
            }
        },
        AssignSymbol::Pattern(elements) => {
            for (index, element) in elements.iter().enumerate() {
                let element_source = source
                    .as_ref()
                    .map(|(node, port)| (*node, format!("{port}.{index}")));
                bind_symbol(variable_table, element, element_source);
            }
        }
    }
}

/// Is the call pure with respect to the given argument?
///
/// Calls are pure unless annotated otherwise; the two canonical mutating
/// operators (attribute-set, item-set) mark their receiver as mutated by
/// default.
fn is_pure(event: &ReturnEvent, annotation: Option<&Annotation>, arg_name: &str) -> bool {
    let canonical_mutator = (event.module == "builtins" && event.qual_name == "setattr")
        || (event.module == "operator" && event.qual_name == "setitem");
    if canonical_mutator && (arg_name == "obj" || arg_name == "0") {
        return false;
    }
    let Some(annotation) = annotation else {
        return true;
    };
    !annotation.outputs.iter().any(|slot_def| {
        resolve_slot_name(&event.arguments, &slot_def.slot).as_deref() == Some(arg_name)
    })
}

/// Maps a slot descriptor to an argument name.
fn resolve_slot_name(arguments: &IndexMap<String, Value>, slot: &SlotRef) -> Option<String> {
    match slot {
        SlotRef::Index(position) => arguments.get_index(*position).map(|(name, _)| name.clone()),
        SlotRef::Name(name) => Some(name.clone()),
    }
}

/// Resolves an input/output slot name to its value.
fn resolve_io_slot(
    arguments: &IndexMap<String, Value>,
    return_value: Option<&Value>,
    name: &str,
) -> Option<Value> {
    if name == "return" {
        return return_value.cloned();
    }
    if let Some(index) = name.strip_prefix("return.") {
        let index: usize = index.parse().ok()?;
        return match return_value {
            Some(Value::Tuple(items)) => items.get(index).cloned(),
            _ => None,
        };
    }
    arguments.get(name).cloned()
}

/// Output port name for a mutated argument.
///
/// The interchange format requires port names unique across inputs and
/// outputs, so a mutated argument's output port is the argument name with
/// a trailing `!`.
fn mutated_port_name(arg_name: &str) -> String {
    format!("{arg_name}!")
}

/// Reads a named slot off a value: attributes, dict lookup and list
/// indexing, with dotted paths resolved stepwise. Methods are not readable
/// fields and yield nothing.
fn get_slot(value: &Value, slot: &SlotRef) -> Option<Value> {
    match slot {
        SlotRef::Index(index) => element_at(value, *index),
        SlotRef::Name(path) => {
            let mut current = value.clone();
            for key in path.split('.') {
                current = single_slot(&current, key)?;
            }
            Some(current)
        }
    }
}

fn single_slot(value: &Value, key: &str) -> Option<Value> {
    if let Ok(attr) = getattr_value(value, key) {
        // Bound methods are behaviour, not data.
        if matches!(attr, Value::BoundMethod(_)) {
            return None;
        }
        return Some(attr);
    }
    if let Value::Dict(map) = value {
        let hashed = crate::value::HashKey::Str(std::rc::Rc::from(key));
        if let Some(found) = map.borrow().get(&hashed) {
            return Some(found.clone());
        }
    }
    key.parse::<usize>().ok().and_then(|index| element_at(value, index))
}

fn element_at(value: &Value, index: usize) -> Option<Value> {
    match value {
        Value::List(items) => items.borrow().get(index).cloned(),
        Value::Tuple(items) => items.get(index).cloned(),
        _ => None,
    }
}

fn slot_ref_name(slot: &SlotRef) -> String {
    match slot {
        SlotRef::Index(index) => index.to_string(),
        SlotRef::Name(name) => name.clone(),
    }
}
