#![doc = include_str!("../../../README.md")]

pub mod annotations;
pub mod ast;
pub mod builtins;
pub mod config;
pub mod error;
pub mod exception;
pub mod graph;
pub mod interp;
pub mod namespace;
pub mod operator;
pub mod parse;
pub mod record;
pub mod signature;
pub mod trace;
pub mod value;

pub use crate::{
    annotations::{
        Annotation, AnnotationDb, Annotator, MemoryAnnotationDb, Query, RemoteAnnotationDb,
        db::{RecordKind, SlotDef, SlotRef},
    },
    config::{Config, ConfigError},
    error::{BuilderError, InstrumentationError, RecordError, StoreError, TraceError},
    exception::{ExcType, Exception},
    graph::{
        AnnotationKind, EdgeData, FlowGraph, FlowGraphBuilder, NodeData, NodeKind, PortData,
        PortKind,
        graphml::{GraphMlError, read_graphml_str, write_graphml, write_graphml_str},
    },
    interp::ModuleRegistry,
    record::{
        DEFAULT_RECORD_MODULE, RecordOptions, Recording, record_script, record_source,
        run_untraced,
    },
    trace::{
        event::{EventId, EventSink, NullSink, RecordingSink, TraceEvent},
        object_tracker::ObjectTracker,
        tracer::Tracer,
    },
    value::Value,
};
