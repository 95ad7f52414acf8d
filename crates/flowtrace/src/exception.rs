//! Exceptions raised by the traced program.
//!
//! These model the source language's own failure modes (`TypeError`,
//! `NameError`, ...). They are distinct from the host-side pipeline errors in
//! [`crate::error`]: an `Exception` means the *user's* program failed, and
//! the recorder surfaces it unchanged.

use std::fmt;

use crate::ast::CodeRange;

/// The kind of a runtime exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcType {
    TypeError,
    NameError,
    AttributeError,
    ValueError,
    KeyError,
    IndexError,
    ZeroDivisionError,
    ImportError,
    RecursionError,
}

impl ExcType {
    pub fn name(self) -> &'static str {
        match self {
            Self::TypeError => "TypeError",
            Self::NameError => "NameError",
            Self::AttributeError => "AttributeError",
            Self::ValueError => "ValueError",
            Self::KeyError => "KeyError",
            Self::IndexError => "IndexError",
            Self::ZeroDivisionError => "ZeroDivisionError",
            Self::ImportError => "ImportError",
            Self::RecursionError => "RecursionError",
        }
    }
}

/// A runtime exception with its message and, when known, the source
/// location of the expression that raised it.
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    pub exc_type: ExcType,
    pub message: String,
    pub position: Option<CodeRange>,
}

impl Exception {
    pub fn new(exc_type: ExcType, message: impl Into<String>) -> Self {
        Self {
            exc_type,
            message: message.into(),
            position: None,
        }
    }

    /// Attaches a source position if none was recorded closer to the raise.
    #[must_use]
    pub fn at(mut self, position: CodeRange) -> Self {
        if self.position.is_none() {
            self.position = Some(position);
        }
        self
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExcType::TypeError, message)
    }

    pub fn name_error(name: &str) -> Self {
        Self::new(ExcType::NameError, format!("name '{name}' is not defined"))
    }

    pub fn attribute_error(type_name: &str, attr: &str) -> Self {
        Self::new(
            ExcType::AttributeError,
            format!("'{type_name}' object has no attribute '{attr}'"),
        )
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ExcType::ValueError, message)
    }

    pub fn key_error(key: impl fmt::Display) -> Self {
        Self::new(ExcType::KeyError, format!("{key}"))
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(ExcType::IndexError, message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(ExcType::ZeroDivisionError, message)
    }

    pub fn import_error(module: &str) -> Self {
        Self::new(ExcType::ImportError, format!("no module named '{module}'"))
    }

    pub fn not_callable(type_name: &str) -> Self {
        Self::type_error(format!("'{type_name}' object is not callable"))
    }

    pub fn not_iterable(type_name: &str) -> Self {
        Self::type_error(format!("'{type_name}' object is not iterable"))
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(position) => {
                write!(f, "{}: {} ({position})", self.exc_type.name(), self.message)
            }
            None => write!(f, "{}: {}", self.exc_type.name(), self.message),
        }
    }
}

impl std::error::Error for Exception {}

/// Result type for everything the traced program itself can fail.
pub type RunResult<T> = Result<T, Exception>;
