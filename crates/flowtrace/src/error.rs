//! Host-side errors, separated by pipeline stage.
//!
//! Keeping parse/instrumentation/runtime/builder failures distinct lets
//! callers handle user feedback and recovery accurately without string
//! matching.

use std::fmt;

use crate::ast::CodeRange;
use crate::exception::Exception;

/// The input program cannot be instrumented.
///
/// All variants are reported from `trace()` before execution begins.
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentationError {
    /// The source text failed to parse.
    Parse { message: String },
    /// A syntactic construct the pipeline does not support.
    Unsupported {
        construct: &'static str,
        position: CodeRange,
    },
    /// Chained comparisons (`a < b < c`) cannot be normalised to calls.
    ChainedComparison { position: CodeRange },
    /// Multiple assignment targets whose destructuring arities disagree.
    MixedArityTargets { position: CodeRange },
}

impl fmt::Display for InstrumentationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse { message } => write!(f, "parse error: {message}"),
            Self::Unsupported { construct, position } => {
                write!(f, "unsupported construct at {position}: {construct}")
            }
            Self::ChainedComparison { position } => {
                write!(f, "chained comparison at {position} cannot be traced")
            }
            Self::MixedArityTargets { position } => {
                write!(f, "assignment targets at {position} have mismatched arities")
            }
        }
    }
}

impl std::error::Error for InstrumentationError {}

/// A broken Call/Return pairing observed by the flow-graph builder.
///
/// This should be unreachable: the tracer guarantees properly nested
/// Call/Return pairs. It is asserted to catch instrumentation bugs rather
/// than silently producing a wrong graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderError {
    /// Qualified name carried by the offending Return event.
    pub qual_name: String,
    /// Qualified name the open context expected, if any context was open.
    pub expected: Option<String>,
}

impl fmt::Display for BuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expected {
            Some(expected) => write!(
                f,
                "mismatched trace events: Return for '{}' while '{}' is open",
                self.qual_name, expected
            ),
            None => write!(
                f,
                "mismatched trace events: Return for '{}' with no open call",
                self.qual_name
            ),
        }
    }
}

impl std::error::Error for BuilderError {}

/// Error from an annotation store implementation.
#[derive(Debug)]
pub enum StoreError {
    /// `get` matched more than one record.
    Ambiguous { matches: usize },
    /// The remote store could not be reached or answered malformed data.
    Remote { message: String },
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ambiguous { matches } => {
                write!(f, "annotation query matched {matches} records, expected one")
            }
            Self::Remote { message } => write!(f, "annotation store: {message}"),
            Self::Io(error) => write!(f, "annotation store: {error}"),
            Self::Json(error) => write!(f, "annotation store: {error}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::Json(error)
    }
}

/// Top-level error for one recording.
#[derive(Debug)]
pub enum RecordError {
    /// The program could not be instrumented (reported before execution).
    Instrumentation(InstrumentationError),
    /// The traced program raised; surfaced unchanged, partial graph
    /// discarded.
    Program(Exception),
    /// The builder observed an internal invariant violation.
    Builder(BuilderError),
    /// The annotation store failed.
    Store(StoreError),
    Io(std::io::Error),
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instrumentation(error) => write!(f, "{error}"),
            Self::Program(error) => write!(f, "{error}"),
            Self::Builder(error) => write!(f, "{error}"),
            Self::Store(error) => write!(f, "{error}"),
            Self::Io(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for RecordError {}

impl From<InstrumentationError> for RecordError {
    fn from(error: InstrumentationError) -> Self {
        Self::Instrumentation(error)
    }
}

impl From<Exception> for RecordError {
    fn from(error: Exception) -> Self {
        Self::Program(error)
    }
}

impl From<BuilderError> for RecordError {
    fn from(error: BuilderError) -> Self {
        Self::Builder(error)
    }
}

impl From<StoreError> for RecordError {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}

impl From<std::io::Error> for RecordError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

/// Error raised by `Tracer::trace`: either the program could not be
/// instrumented, or it ran and failed.
#[derive(Debug)]
pub enum TraceError {
    Instrumentation(InstrumentationError),
    Program(Exception),
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instrumentation(error) => write!(f, "{error}"),
            Self::Program(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for TraceError {}

impl From<InstrumentationError> for TraceError {
    fn from(error: InstrumentationError) -> Self {
        Self::Instrumentation(error)
    }
}

impl From<Exception> for TraceError {
    fn from(error: Exception) -> Self {
        Self::Program(error)
    }
}

impl From<TraceError> for RecordError {
    fn from(error: TraceError) -> Self {
        match error {
            TraceError::Instrumentation(e) => Self::Instrumentation(e),
            TraceError::Program(e) => Self::Program(e),
        }
    }
}
