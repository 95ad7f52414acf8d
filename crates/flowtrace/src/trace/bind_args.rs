//! Event-side argument binding.
//!
//! Given a callable and the actual call-site argument lists, produce the
//! ordered name -> value map carried on Call and Return events. Bound
//! methods of user-defined types include the receiver as the first entry;
//! callables with a formal signature bind through it and then expand
//! variadic parameters into the map; opaque callables fall back to
//! positional names `"0"`, `"1"`, ...

use indexmap::IndexMap;

use crate::signature::{BindError, Signature};
use crate::value::{HashKey, Value};

/// The result of binding a call site.
#[derive(Debug)]
pub struct BoundArguments {
    /// Argument name -> value, in definition order.
    pub arguments: IndexMap<String, Value>,
    /// For each call-site positional argument, the key it landed under.
    ///
    /// Links positionally supplied argument events to their bound names.
    pub positional_names: Vec<String>,
}

/// The bind was rejected by a known signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArityMismatch {
    pub function: String,
    pub error: BindError,
}

impl ArityMismatch {
    pub fn message(&self) -> String {
        self.error.message(&self.function)
    }
}

/// Binds call-site arguments against the callable's signature.
pub fn bind_arguments(
    callable: &Value,
    positional: &[Value],
    keywords: &IndexMap<String, Value>,
) -> Result<BoundArguments, ArityMismatch> {
    match callable {
        Value::Function(function) => bind_with_signature(
            function.name(),
            &function.signature,
            &function.defaults,
            positional.to_vec(),
            keywords.clone(),
        ),
        Value::BoundMethod(method) => {
            // The receiver binds as the first parameter (`self`, or the
            // declared first parameter name).
            let function = &method.function;
            let mut full: Vec<Value> = Vec::with_capacity(positional.len() + 1);
            full.push(method.receiver.clone());
            full.extend_from_slice(positional);
            let mut bound = bind_with_signature(
                function.name(),
                &function.signature,
                &function.defaults,
                full,
                keywords.clone(),
            )?;
            // The receiver was not a call-site positional argument.
            if !bound.positional_names.is_empty() {
                bound.positional_names.remove(0);
            }
            Ok(bound)
        }
        Value::Class(class) => {
            // Constructors bind against `__init__` with the receiver
            // omitted; a class with no initialiser accepts no arguments.
            match class.lookup("__init__") {
                Some(Value::Function(init)) => {
                    let reduced = drop_first_parameter(&init.signature);
                    bind_with_signature(
                        &class.name,
                        &reduced,
                        &init.defaults,
                        positional.to_vec(),
                        keywords.clone(),
                    )
                }
                _ => bind_with_signature(
                    &class.name,
                    &Signature::default(),
                    &[],
                    positional.to_vec(),
                    keywords.clone(),
                ),
            }
        }
        Value::Builtin(builtin) => match builtin.signature() {
            Some(signature) => bind_with_signature(
                builtin.name(),
                &signature,
                &builtin.defaults(),
                positional.to_vec(),
                keywords.clone(),
            ),
            None => Ok(bind_opaque(positional, keywords)),
        },
        // Operator functions have no introspectable signature.
        _ => Ok(bind_opaque(positional, keywords)),
    }
}

/// Binding for callables with no introspectable signature: positional
/// arguments are named by index, keywords carried through by name.
fn bind_opaque(positional: &[Value], keywords: &IndexMap<String, Value>) -> BoundArguments {
    let mut arguments: IndexMap<String, Value> = IndexMap::new();
    let mut positional_names = Vec::with_capacity(positional.len());
    for (index, value) in positional.iter().enumerate() {
        let name = index.to_string();
        positional_names.push(name.clone());
        arguments.insert(name, value.clone());
    }
    for (name, value) in keywords {
        arguments.insert(name.clone(), value.clone());
    }
    BoundArguments {
        arguments,
        positional_names,
    }
}

fn bind_with_signature(
    function: &str,
    signature: &Signature,
    defaults: &[Value],
    positional: Vec<Value>,
    keywords: IndexMap<String, Value>,
) -> Result<BoundArguments, ArityMismatch> {
    let npos = positional.len();
    let bound = signature
        .bind(positional, keywords, defaults)
        .map_err(|error| ArityMismatch {
            function: function.to_owned(),
            error,
        })?;

    // Record where each positional argument landed before expansion.
    let mut positional_names = Vec::with_capacity(npos);
    for index in 0..npos {
        if index < signature.args.len() {
            positional_names.push(signature.args[index].clone());
        } else {
            // Into the positional variadic: keyed by index within it.
            positional_names.push((index - signature.args.len()).to_string());
        }
    }

    // Expand variadic parameters into the map: positional variadics as
    // small integer strings, keyword variadics under their original names.
    let mut arguments: IndexMap<String, Value> = IndexMap::new();
    for (name, value) in bound {
        if Some(&name) == signature.vararg.as_ref() {
            if let Value::Tuple(items) = &value {
                for (index, item) in items.iter().enumerate() {
                    arguments.insert(index.to_string(), item.clone());
                }
            }
        } else if Some(&name) == signature.kwarg.as_ref() {
            if let Value::Dict(map) = &value {
                for (key, item) in map.borrow().iter() {
                    if let HashKey::Str(key) = key {
                        arguments.insert(key.to_string(), item.clone());
                    }
                }
            }
        } else {
            arguments.insert(name, value);
        }
    }

    Ok(BoundArguments {
        arguments,
        positional_names,
    })
}

/// A copy of the signature without its first parameter (the receiver).
fn drop_first_parameter(signature: &Signature) -> Signature {
    let mut reduced = signature.clone();
    if !reduced.args.is_empty() {
        reduced.args.remove(0);
        reduced.arg_defaults_count = reduced.arg_defaults_count.min(reduced.args.len());
    }
    reduced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::Builtin;
    use crate::operator::OperatorFn;

    #[test]
    fn opaque_callables_number_their_arguments() {
        let bound = bind_arguments(
            &Value::Operator(OperatorFn::Getitem),
            &[Value::Int(1), Value::Int(2)],
            &IndexMap::new(),
        )
        .unwrap();
        let names: Vec<&str> = bound.arguments.keys().map(String::as_str).collect();
        assert_eq!(names, ["0", "1"]);
        assert_eq!(bound.positional_names, ["0", "1"]);
    }

    #[test]
    fn builtin_with_signature_binds_by_name() {
        let bound = bind_arguments(
            &Value::Builtin(Builtin::Sum),
            &[Value::list(vec![Value::Int(1)])],
            &IndexMap::new(),
        )
        .unwrap();
        let names: Vec<&str> = bound.arguments.keys().map(String::as_str).collect();
        assert_eq!(names, ["iterable", "start"]);
        assert_eq!(bound.positional_names, ["iterable"]);
    }

    #[test]
    fn opaque_keywords_carry_through_by_name() {
        let mut keywords = IndexMap::new();
        keywords.insert("key".to_owned(), Value::Int(7));
        let bound = bind_arguments(
            &Value::Builtin(Builtin::Print),
            &[Value::Int(1)],
            &keywords,
        )
        .unwrap();
        let names: Vec<&str> = bound.arguments.keys().map(String::as_str).collect();
        assert_eq!(names, ["0", "key"]);
    }

    #[test]
    fn known_signature_rejects_bad_arity() {
        let error = bind_arguments(
            &Value::Builtin(Builtin::Len),
            &[Value::Int(1), Value::Int(2)],
            &IndexMap::new(),
        )
        .unwrap_err();
        assert_eq!(error.function, "len");
    }
}
