//! The tracer runtime.
//!
//! Receives hook invocations from instrumented code, reconstructs calls
//! with correctly bound argument names, tracks object identities, and
//! emits the typed event stream. One scope per in-flight non-atomic call
//! (plus the top level); each scope carries a substack of pending calls
//! whose arguments are still being observed.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;
use log::debug;

use crate::ast::AssignSymbol;
use crate::error::TraceError;
use crate::exception::{Exception, RunResult};
use crate::interp::{Interp, ModuleRegistry};
use crate::namespace::Scope;
use crate::parse::parse;
use crate::trace::bind_args::bind_arguments;
use crate::trace::event::{
    AccessEvent, AssignEvent, CallEvent, DeleteEvent, EventId, EventSink, ReturnEvent, TraceEvent,
};
use crate::trace::inspect_name::callable_names;
use crate::trace::normalise::normalise;
use crate::trace::object_tracker::ObjectTracker;
use crate::trace::transform::instrument;
use crate::value::Value;

/// A value travelling through the trace plumbing.
///
/// The boxed-value discipline: hook evaluation in boxed position yields
/// `Event`, carrying the producing event's identity alongside the raw
/// value; every public boundary unboxes to the raw value, so the wrapper
/// never escapes to user code.
#[derive(Debug)]
pub enum TracedValue {
    Raw(Value),
    Event { id: EventId, value: Value },
}

impl TracedValue {
    /// Unboxes to the raw value.
    pub fn into_value(self) -> Value {
        match self {
            Self::Raw(value) | Self::Event { value, .. } => value,
        }
    }

    /// Splits into the raw value and the producing event's id, if any.
    pub fn into_parts(self) -> (Value, Option<EventId>) {
        match self {
            Self::Raw(value) => (value, None),
            Self::Event { id, value } => (value, Some(id)),
        }
    }
}

/// A call whose arguments are still being observed.
#[derive(Debug)]
struct PendingCall {
    function: Value,
    nargs: usize,
    positional: Vec<Value>,
    positional_events: Vec<Option<EventId>>,
    keywords: IndexMap<String, Value>,
    keyword_events: AHashMap<String, EventId>,
}

/// One scope: the top level, or an in-flight call.
#[derive(Debug)]
struct ScopeState {
    /// The Call event that entered this scope; `None` at top level.
    call: Option<Rc<CallEvent>>,
    /// Whether events occurring inside this scope are emitted.
    emit_events: bool,
    /// Whether this scope's own Call/Return pair is emitted: the
    /// enclosing scope's permission, recorded at push time so the Return
    /// check reads the popped scope.
    emit_call_return: bool,
    pending: Vec<PendingCall>,
}

impl ScopeState {
    fn top_level() -> Self {
        Self {
            call: None,
            emit_events: true,
            emit_call_return: true,
            pending: Vec::new(),
        }
    }
}

/// Execution tracer.
///
/// `trace` parses, normalises and instruments a program, then executes it,
/// delivering events synchronously to the sink in textual execution order.
pub struct Tracer {
    /// Tracks objects using weak references. Shared with the flow-graph
    /// builder so both sides observe the same identifiers.
    pub object_tracker: Rc<RefCell<ObjectTracker>>,
    /// Module names whose callables are descended into (non-atomic).
    traced_modules: AHashSet<String>,
    scopes: Vec<ScopeState>,
    next_event_id: u64,
}

impl Tracer {
    #[must_use]
    pub fn new(traced_modules: impl IntoIterator<Item = String>) -> Self {
        Self {
            object_tracker: Rc::new(RefCell::new(ObjectTracker::new())),
            traced_modules: traced_modules.into_iter().collect(),
            scopes: vec![ScopeState::top_level()],
            next_event_id: 0,
        }
    }

    /// Marks a module's callables as traceable (non-atomic).
    pub fn add_traced_module(&mut self, module: &str) {
        self.traced_modules.insert(module.to_owned());
    }

    /// Executes and traces a program.
    ///
    /// The program is parsed, normalised, instrumented and interpreted
    /// under `module_name`, in an environment seeded with `env` and
    /// augmented with the operator support module. Returns the module
    /// environment after execution.
    ///
    /// On a program failure the scope stack invariant is restored before
    /// the exception propagates.
    pub fn trace<S: EventSink>(
        &mut self,
        source: &str,
        module_name: &str,
        env: IndexMap<String, Value>,
        registry: &ModuleRegistry,
        sink: &mut S,
    ) -> Result<IndexMap<String, Value>, TraceError> {
        let statements = instrument(normalise(parse(source)?)?)?;
        self.add_traced_module(module_name);
        self.reset();

        let module_env = Scope::root_with(env);
        Scope::set(&module_env, "operator", registry.operator_module());

        let mut interp = Interp::new(self, registry, module_name, sink);
        let outcome = interp.exec_module(&statements, &module_env);
        if let Err(error) = outcome {
            // Abandon in-flight scopes so the tracer is reusable.
            self.reset();
            return Err(TraceError::Program(error));
        }
        Ok(Scope::bindings(&module_env))
    }

    /// Discards all in-flight state.
    pub fn reset(&mut self) {
        self.scopes.clear();
        self.scopes.push(ScopeState::top_level());
    }

    /// Depth of the call scope stack, not counting the top level.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.scopes.len() - 1
    }

    fn next_id(&mut self) -> EventId {
        self.next_event_id += 1;
        EventId(self.next_event_id)
    }

    fn current(&mut self) -> &mut ScopeState {
        self.scopes.last_mut().expect("scope stack never empty")
    }

    // Hook interface, invoked by the interpreter for instrumented forms.

    /// Called after the callable of a traced call site is evaluated.
    ///
    /// Pushes a pending call; a zero-argument call is completed
    /// immediately.
    pub fn trace_function<S: EventSink>(
        &mut self,
        function: Value,
        nargs: usize,
        sink: &mut S,
    ) -> RunResult<()> {
        self.current().pending.push(PendingCall {
            function,
            nargs,
            positional: Vec::new(),
            positional_events: Vec::new(),
            keywords: IndexMap::new(),
            keyword_events: AHashMap::new(),
        });
        if nargs == 0 {
            self.complete_pending(sink)?;
        }
        Ok(())
    }

    /// Called after each argument of a traced call site is evaluated.
    ///
    /// Feeds the value into the innermost pending call according to
    /// `nstars` and returns the raw (unboxed) value for the actual call.
    pub fn trace_argument<S: EventSink>(
        &mut self,
        argument: TracedValue,
        name: Option<&str>,
        nstars: u8,
        sink: &mut S,
    ) -> RunResult<Value> {
        let (value, event) = argument.into_parts();
        let scope = self.current();
        let Some(pending) = scope.pending.last_mut() else {
            // No pending call: the hook fired outside a traced call site.
            return Ok(value);
        };

        match nstars {
            0 => match name {
                Some(name) => {
                    if let Some(id) = event {
                        pending.keyword_events.insert(name.to_owned(), id);
                    }
                    pending.keywords.insert(name.to_owned(), value.clone());
                }
                None => {
                    pending.positional.push(value.clone());
                    pending.positional_events.push(event);
                }
            },
            1 => {
                let elements = value.iterate()?;
                for element in &elements {
                    pending.positional.push(element.clone());
                    pending.positional_events.push(None);
                }
            }
            _ => match &value {
                Value::Dict(map) => {
                    for (key, item) in map.borrow().iter() {
                        if let crate::value::HashKey::Str(key) = key {
                            pending.keywords.insert(key.to_string(), item.clone());
                        }
                    }
                }
                other => {
                    return Err(Exception::type_error(format!(
                        "argument after ** must be a mapping, not '{}'",
                        other.type_name()
                    )));
                }
            },
        }

        pending.nargs = pending.nargs.saturating_sub(1);
        if pending.nargs == 0 {
            self.complete_pending(sink)?;
        }
        Ok(value)
    }

    /// All arguments observed: bind them, emit the Call event, and enter
    /// the call's scope.
    fn complete_pending<S: EventSink>(&mut self, sink: &mut S) -> RunResult<()> {
        let pending = self
            .current()
            .pending
            .pop()
            .expect("complete_pending with no pending call");

        let (module, qual_name) = callable_names(&pending.function);
        let atomic = !self.traced_modules.contains(&module);

        let bound = bind_arguments(&pending.function, &pending.positional, &pending.keywords)
            .map_err(|mismatch| Exception::type_error(mismatch.message()))?;

        let mut argument_events: AHashMap<String, EventId> = AHashMap::new();
        for (index, event) in pending.positional_events.iter().enumerate() {
            if let Some(id) = event {
                if let Some(name) = bound.positional_names.get(index) {
                    argument_events.insert(name.clone(), *id);
                }
            }
        }
        for (name, id) in &pending.keyword_events {
            argument_events.insert(name.clone(), *id);
        }

        let event = Rc::new(CallEvent {
            id: self.next_id(),
            function: pending.function,
            module,
            qual_name,
            atomic,
            arguments: bound.arguments,
            argument_events,
        });

        let enclosing = self.current();
        let emit_call_return = enclosing.emit_events;
        let emit_events = enclosing.emit_events && !atomic;
        debug!(
            "call {} atomic={} emit={}",
            event.qual_name, atomic, emit_call_return
        );
        if emit_call_return {
            sink.push_event(TraceEvent::Call(Rc::clone(&event)));
        }
        self.scopes.push(ScopeState {
            call: Some(event),
            emit_events,
            emit_call_return,
            pending: Vec::new(),
        });
        Ok(())
    }

    /// Called after a traced call returns. Pops the call's scope and emits
    /// the Return event; returns the (possibly coerced) value and the
    /// event for boxed propagation.
    pub fn trace_return<S: EventSink>(
        &mut self,
        value: Value,
        multiple_values: bool,
        sink: &mut S,
    ) -> RunResult<(Value, Rc<ReturnEvent>)> {
        let scope = self.scopes.pop().expect("scope stack never empty");
        let call = match scope.call {
            Some(call) => call,
            None => {
                // Return with no matching call: restore the top level and
                // fail loudly, this is an instrumentation bug.
                self.scopes.push(ScopeState::top_level());
                return Err(Exception::type_error(
                    "trace_return without a matching call",
                ));
            }
        };

        // Destructured returns are coerced to a concrete sequence so
        // ephemeral views become retainable sub-values. Failure to iterate
        // is ignored; the user's own error surfaces shortly.
        let value = if multiple_values {
            match value.iterate() {
                Ok(elements) => Value::tuple(elements),
                Err(_) => value,
            }
        } else {
            value
        };

        let event = Rc::new(ReturnEvent {
            id: self.next_id(),
            function: call.function.clone(),
            module: call.module.clone(),
            qual_name: call.qual_name.clone(),
            atomic: call.atomic,
            arguments: call.arguments.clone(),
            value: value.clone(),
            multiple_values,
        });
        if scope.emit_call_return {
            sink.push_event(TraceEvent::Return(Rc::clone(&event)));
        }
        Ok((value, event))
    }

    /// Called after a variable is read.
    pub fn trace_access<S: EventSink>(
        &mut self,
        name: &str,
        value: Value,
        sink: &mut S,
    ) -> Rc<AccessEvent> {
        let event = Rc::new(AccessEvent {
            id: self.next_id(),
            name: name.to_owned(),
            value,
        });
        if self.current().emit_events {
            sink.push_event(TraceEvent::Access(Rc::clone(&event)));
        }
        event
    }

    /// Called immediately before a variable is bound.
    pub fn trace_assign<S: EventSink>(
        &mut self,
        target: AssignSymbol,
        value: Value,
        value_event: Option<EventId>,
        sink: &mut S,
    ) {
        let event = Rc::new(AssignEvent {
            id: self.next_id(),
            target,
            value,
            value_event,
        });
        if self.current().emit_events {
            sink.push_event(TraceEvent::Assign(event));
        }
    }

    /// Called immediately before a name is deleted.
    pub fn trace_delete<S: EventSink>(&mut self, name: &str, sink: &mut S) {
        let event = Rc::new(DeleteEvent {
            id: self.next_id(),
            name: name.to_owned(),
        });
        if self.current().emit_events {
            sink.push_event(TraceEvent::Delete(event));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::event::RecordingSink;

    fn record_events(source: &str) -> Vec<TraceEvent> {
        let registry = ModuleRegistry::new();
        let mut tracer = Tracer::new([]);
        let mut sink = RecordingSink::new();
        tracer
            .trace(source, "__record__", IndexMap::new(), &registry, &mut sink)
            .unwrap();
        sink.into_events()
    }

    fn call_names(events: &[TraceEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                TraceEvent::Call(call) => Some(call.qual_name.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn calls_and_returns_pair_up() {
        let events = record_events("x = len('abc')");
        let mut depth = 0usize;
        let mut pairs = 0usize;
        for event in &events {
            match event {
                TraceEvent::Call(_) => depth += 1,
                TraceEvent::Return(_) => {
                    depth = depth.checked_sub(1).expect("return without call");
                    pairs += 1;
                }
                _ => {}
            }
        }
        assert_eq!(depth, 0);
        assert_eq!(pairs, 1);
    }

    #[test]
    fn composed_calls_emit_inner_first() {
        let events = record_events("x = sum(range(5))");
        assert_eq!(call_names(&events), ["range", "sum"]);
    }

    #[test]
    fn arguments_bind_through_known_signatures() {
        let events = record_events("x = sum(range(5))");
        let sum_call = events
            .iter()
            .find_map(|e| match e {
                TraceEvent::Call(call) if call.qual_name == "sum" => Some(Rc::clone(call)),
                _ => None,
            })
            .unwrap();
        let names: Vec<&str> = sum_call.arguments.keys().map(String::as_str).collect();
        assert_eq!(names, ["iterable", "start"]);
    }

    #[test]
    fn argument_events_link_composed_returns() {
        let events = record_events("x = sum(range(5))");
        let range_return = events
            .iter()
            .find_map(|e| match e {
                TraceEvent::Return(ret) if ret.qual_name == "range" => Some(ret.id),
                _ => None,
            })
            .unwrap();
        let sum_call = events
            .iter()
            .find_map(|e| match e {
                TraceEvent::Call(call) if call.qual_name == "sum" => Some(Rc::clone(call)),
                _ => None,
            })
            .unwrap();
        assert_eq!(sum_call.argument_events.get("iterable"), Some(&range_return));
    }

    #[test]
    fn access_precedes_consuming_call() {
        let events = record_events("y = 1\nx = len(str(y))\n");
        let access_index = events
            .iter()
            .position(|e| matches!(e, TraceEvent::Access(a) if a.name == "y"))
            .unwrap();
        let call_index = events
            .iter()
            .position(|e| matches!(e, TraceEvent::Call(c) if c.qual_name == "str"))
            .unwrap();
        assert!(access_index < call_index);
    }

    #[test]
    fn assign_event_links_to_producing_return() {
        let events = record_events("x = len('abc')");
        let return_id = events
            .iter()
            .find_map(|e| match e {
                TraceEvent::Return(ret) => Some(ret.id),
                _ => None,
            })
            .unwrap();
        let assign = events
            .iter()
            .find_map(|e| match e {
                TraceEvent::Assign(assign) => Some(Rc::clone(assign)),
                _ => None,
            })
            .unwrap();
        assert_eq!(assign.value_event, Some(return_id));
        assert_eq!(assign.target, AssignSymbol::Name("x".to_owned()));
    }

    #[test]
    fn user_functions_are_not_atomic() {
        let events = record_events("def f():\n    return 1\n\ny = f()\n");
        let call = events
            .iter()
            .find_map(|e| match e {
                TraceEvent::Call(call) if call.qual_name == "f" => Some(Rc::clone(call)),
                _ => None,
            })
            .unwrap();
        assert!(!call.atomic);
    }

    #[test]
    fn builtins_are_atomic() {
        let events = record_events("x = len('abc')");
        let call = events
            .iter()
            .find_map(|e| match e {
                TraceEvent::Call(call) => Some(Rc::clone(call)),
                _ => None,
            })
            .unwrap();
        assert!(call.atomic);
    }

    #[test]
    fn nested_user_calls_stay_properly_nested() {
        let events = record_events(
            "def inner():\n    return 1\n\ndef outer():\n    return inner()\n\ny = outer()\n",
        );
        let names = call_names(&events);
        assert_eq!(names, ["outer", "inner"]);
        // inner's Return must come before outer's Return.
        let inner_return = events
            .iter()
            .position(|e| matches!(e, TraceEvent::Return(r) if r.qual_name == "inner"))
            .unwrap();
        let outer_return = events
            .iter()
            .position(|e| matches!(e, TraceEvent::Return(r) if r.qual_name == "outer"))
            .unwrap();
        assert!(inner_return < outer_return);
    }

    #[test]
    fn delete_emits_event() {
        let events = record_events("x = 1\ndel x\n");
        assert!(events
            .iter()
            .any(|e| matches!(e, TraceEvent::Delete(d) if d.name == "x")));
    }

    #[test]
    fn destructured_return_is_coerced_and_flagged() {
        let events = record_events("def pair():\n    return 1, 2\n\na, b = pair()\n");
        let ret = events
            .iter()
            .find_map(|e| match e {
                TraceEvent::Return(ret) if ret.qual_name == "pair" => Some(Rc::clone(ret)),
                _ => None,
            })
            .unwrap();
        assert!(ret.multiple_values);
        assert!(matches!(&ret.value, Value::Tuple(items) if items.len() == 2));
    }

    #[test]
    fn program_failure_restores_scope_stack() {
        let registry = ModuleRegistry::new();
        let mut tracer = Tracer::new([]);
        let mut sink = RecordingSink::new();
        let result = tracer.trace(
            "x = len(undefined_name)",
            "__record__",
            IndexMap::new(),
            &registry,
            &mut sink,
        );
        assert!(matches!(result, Err(TraceError::Program(_))));
        assert_eq!(tracer.depth(), 0);
    }
}
