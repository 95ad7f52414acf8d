//! Function signatures and the argument binding algorithm.
//!
//! One signature type serves two callers: the interpreter binds call-site
//! arguments into a fresh frame before executing a function body, and the
//! tracer's event-side binder reuses the same algorithm to reconstruct the
//! ordered argument map carried on Call events.

use indexmap::IndexMap;

use crate::value::Value;

/// A formal signature: positional-or-keyword parameters with trailing
/// defaults, an optional `*args`, keyword-only parameters, and an optional
/// `**kwargs`.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    pub args: Vec<String>,
    /// How many of `args` (from the end) have defaults.
    pub arg_defaults_count: usize,
    pub vararg: Option<String>,
    pub kwonly: Vec<String>,
    /// For each keyword-only parameter, an index into the defaults slice
    /// (after the positional defaults), or `None` if required.
    pub kwonly_default_map: Vec<Option<usize>>,
    pub kwarg: Option<String>,
}

/// Why a bind was rejected by a known signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    TooManyPositional { expected: usize, given: usize },
    MissingArgument { name: String },
    UnexpectedKeyword { name: String },
    DuplicateArgument { name: String },
}

impl BindError {
    /// Renders the error the way the source language's own `TypeError`
    /// message would read.
    pub fn message(&self, func_name: &str) -> String {
        match self {
            Self::TooManyPositional { expected, given } => format!(
                "{func_name}() takes {expected} positional arguments but {given} were given"
            ),
            Self::MissingArgument { name } => {
                format!("{func_name}() missing required argument: '{name}'")
            }
            Self::UnexpectedKeyword { name } => {
                format!("{func_name}() got an unexpected keyword argument '{name}'")
            }
            Self::DuplicateArgument { name } => {
                format!("{func_name}() got multiple values for argument '{name}'")
            }
        }
    }
}

impl Signature {
    /// Binds call-site arguments to parameters.
    ///
    /// Returns the bound map in parameter order: positional-or-keyword
    /// parameters, the `*args` tuple (if declared), keyword-only parameters,
    /// then the `**kwargs` dict (if declared). `defaults` holds the
    /// evaluated positional defaults followed by the keyword-only defaults.
    pub fn bind(
        &self,
        positional: Vec<Value>,
        keywords: IndexMap<String, Value>,
        defaults: &[Value],
    ) -> Result<IndexMap<String, Value>, BindError> {
        let mut bound: IndexMap<String, Value> = IndexMap::new();
        let npos = positional.len();
        let nargs = self.args.len();

        let mut positional = positional.into_iter();
        for name in self.args.iter().take(npos.min(nargs)) {
            // Safety of unwrap: bounded by npos above.
            bound.insert(name.clone(), positional.next().expect("bounded by npos"));
        }

        // Excess positional arguments go to *args or are an arity error.
        let extra: Vec<Value> = positional.collect();
        if !extra.is_empty() && self.vararg.is_none() {
            return Err(BindError::TooManyPositional {
                expected: nargs,
                given: npos,
            });
        }

        let mut kwargs_extra: IndexMap<String, Value> = IndexMap::new();
        let mut kwonly_bound: IndexMap<String, Value> = IndexMap::new();
        for (name, value) in keywords {
            if self.args.contains(&name) {
                if bound.contains_key(&name) {
                    return Err(BindError::DuplicateArgument { name });
                }
                bound.insert(name, value);
            } else if self.kwonly.contains(&name) {
                if kwonly_bound.contains_key(&name) {
                    return Err(BindError::DuplicateArgument { name });
                }
                kwonly_bound.insert(name, value);
            } else if self.kwarg.is_some() {
                kwargs_extra.insert(name, value);
            } else {
                return Err(BindError::UnexpectedKeyword { name });
            }
        }

        // Apply positional defaults for parameters still missing.
        let first_default = nargs - self.arg_defaults_count;
        for (index, name) in self.args.iter().enumerate() {
            if !bound.contains_key(name) {
                if index >= first_default {
                    bound.insert(name.clone(), defaults[index - first_default].clone());
                } else {
                    return Err(BindError::MissingArgument { name: name.clone() });
                }
            }
        }

        // Reorder to declaration order: `bound` may have keyword entries out
        // of positional order.
        let mut ordered: IndexMap<String, Value> = IndexMap::new();
        for name in &self.args {
            let value = bound.shift_remove(name).expect("all args bound above");
            ordered.insert(name.clone(), value);
        }

        if let Some(vararg) = &self.vararg {
            ordered.insert(vararg.clone(), Value::tuple(extra));
        }

        let kwonly_defaults = &defaults[self.arg_defaults_count..];
        for (index, name) in self.kwonly.iter().enumerate() {
            match kwonly_bound.shift_remove(name) {
                Some(value) => {
                    ordered.insert(name.clone(), value);
                }
                None => match self.kwonly_default_map[index] {
                    Some(default_index) => {
                        ordered.insert(name.clone(), kwonly_defaults[default_index].clone());
                    }
                    None => return Err(BindError::MissingArgument { name: name.clone() }),
                },
            }
        }

        if let Some(kwarg) = &self.kwarg {
            let mut dict: IndexMap<crate::value::HashKey, Value> = IndexMap::new();
            for (name, value) in kwargs_extra {
                dict.insert(crate::value::HashKey::Str(name.into()), value);
            }
            ordered.insert(
                kwarg.clone(),
                Value::Dict(std::rc::Rc::new(std::cell::RefCell::new(dict))),
            );
        }

        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(args: &[&str], defaults: usize) -> Signature {
        Signature {
            args: args.iter().map(|s| (*s).to_owned()).collect(),
            arg_defaults_count: defaults,
            ..Signature::default()
        }
    }

    #[test]
    fn binds_positional_in_order() {
        let bound = sig(&["a", "b"], 0)
            .bind(vec![Value::Int(1), Value::Int(2)], IndexMap::new(), &[])
            .unwrap();
        let names: Vec<&str> = bound.keys().map(String::as_str).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn keyword_binds_into_declaration_order() {
        let mut keywords = IndexMap::new();
        keywords.insert("a".to_owned(), Value::Int(1));
        let bound = sig(&["a", "b"], 1)
            .bind(vec![], keywords, &[Value::Int(9)])
            .unwrap();
        let names: Vec<&str> = bound.keys().map(String::as_str).collect();
        assert_eq!(names, ["a", "b"]);
        assert!(matches!(bound["b"], Value::Int(9)));
    }

    #[test]
    fn rejects_extra_positional_without_vararg() {
        let err = sig(&["a"], 0)
            .bind(vec![Value::Int(1), Value::Int(2)], IndexMap::new(), &[])
            .unwrap_err();
        assert_eq!(err, BindError::TooManyPositional { expected: 1, given: 2 });
    }

    #[test]
    fn vararg_collects_excess() {
        let signature = Signature {
            args: vec!["x".to_owned()],
            vararg: Some("rest".to_owned()),
            ..Signature::default()
        };
        let bound = signature
            .bind(
                vec![Value::Int(1), Value::Int(2), Value::Int(3)],
                IndexMap::new(),
                &[],
            )
            .unwrap();
        let Value::Tuple(rest) = &bound["rest"] else {
            panic!("expected tuple for *rest");
        };
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn unexpected_keyword_is_rejected() {
        let mut keywords = IndexMap::new();
        keywords.insert("zzz".to_owned(), Value::Int(1));
        let err = sig(&["a"], 1)
            .bind(vec![Value::Int(0)], keywords, &[Value::None])
            .unwrap_err();
        assert_eq!(err, BindError::UnexpectedKeyword { name: "zzz".to_owned() });
    }
}
