//! Trace events emitted during execution.

use std::rc::Rc;

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::ast::AssignSymbol;
use crate::value::Value;

/// Identity of a trace event.
///
/// Value-bearing events (Return, Access) key the builder's event table by
/// this ID, which stands in for object identity on the event itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub u64);

/// Event generated at the beginning of a function call.
#[derive(Debug)]
pub struct CallEvent {
    pub id: EventId,
    /// The callable that was invoked.
    pub function: Value,
    /// Module containing the callable's definition.
    pub module: String,
    /// Qualified name of the callable, e.g. `Foo.do_sum`.
    pub qual_name: String,
    /// Whether the call is atomic: its body will not be traced.
    pub atomic: bool,
    /// Argument name -> value, in definition order.
    pub arguments: IndexMap<String, Value>,
    /// Argument name -> the event that produced the argument's value, for
    /// arguments whose provenance was observed in the expression itself.
    pub argument_events: AHashMap<String, EventId>,
}

/// Event generated when a function returns.
#[derive(Debug)]
pub struct ReturnEvent {
    pub id: EventId,
    pub function: Value,
    pub module: String,
    pub qual_name: String,
    pub atomic: bool,
    /// Arguments at return time. Mutable arguments may have changed since
    /// the corresponding Call event.
    pub arguments: IndexMap<String, Value>,
    /// The returned value.
    pub value: Value,
    /// Whether the surrounding syntactic context destructures the return.
    pub multiple_values: bool,
}

/// Event generated when a variable is read.
#[derive(Debug)]
pub struct AccessEvent {
    pub id: EventId,
    pub name: String,
    pub value: Value,
}

/// Event generated immediately before a variable binding.
#[derive(Debug)]
pub struct AssignEvent {
    pub id: EventId,
    /// Symbolic shape of the assignment target.
    pub target: AssignSymbol,
    pub value: Value,
    /// The event that produced the right-hand side, if observed.
    pub value_event: Option<EventId>,
}

/// Event generated immediately before a name deletion.
#[derive(Debug)]
pub struct DeleteEvent {
    pub id: EventId,
    pub name: String,
}

/// A trace event. Payloads are shared so events are cheap to fan out.
#[derive(Debug, Clone)]
pub enum TraceEvent {
    Call(Rc<CallEvent>),
    Return(Rc<ReturnEvent>),
    Access(Rc<AccessEvent>),
    Assign(Rc<AssignEvent>),
    Delete(Rc<DeleteEvent>),
}

impl CallEvent {
    /// Full dotted name; built-ins omit the module prefix.
    pub fn full_name(&self) -> String {
        full_name(&self.module, &self.qual_name)
    }
}

impl ReturnEvent {
    pub fn full_name(&self) -> String {
        full_name(&self.module, &self.qual_name)
    }
}

fn full_name(module: &str, qual_name: &str) -> String {
    if module == "builtins" {
        qual_name.to_owned()
    } else {
        format!("{module}.{qual_name}")
    }
}

/// Consumer of the tracer's event slot.
///
/// Events arrive synchronously, one at a time, in textual execution order.
pub trait EventSink {
    fn push_event(&mut self, event: TraceEvent);
}

/// Sink that records every event, for tests and post-mortem inspection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Vec<TraceEvent>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}

impl EventSink for RecordingSink {
    fn push_event(&mut self, event: TraceEvent) {
        self.events.push(event);
    }
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn push_event(&mut self, _event: TraceEvent) {}
}
