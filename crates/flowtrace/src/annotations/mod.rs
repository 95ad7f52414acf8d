//! Annotations: the record store contract and the resolution logic.

pub mod annotator;
pub mod db;
pub mod remote;

pub use annotator::Annotator;
pub use db::{Annotation, AnnotationDb, MemoryAnnotationDb, Query, SlotRef};
pub use remote::RemoteAnnotationDb;
