//! Builtin functions.
//!
//! The registry backs bare-name lookups that miss every environment frame,
//! and supplies the callables the normaliser references directly
//! (`getattr`, `setattr`, `delattr`, `slice`).
//!
//! Each builtin optionally exposes a formal [`Signature`]. Builtins without
//! one are *opaque*: the event-side binder names their positional arguments
//! `"0"`, `"1"`, ... exactly like the original host's C functions with no
//! introspectable signature.

use std::cell::RefCell;
use std::rc::Rc;
use std::str::FromStr;

use indexmap::{IndexMap, IndexSet};
use strum::IntoEnumIterator;

use crate::exception::{Exception, RunResult};
use crate::signature::Signature;
use crate::value::{
    HashKey, SliceValue, Value, delattr_value, getattr_value, setattr_value,
};

/// The builtin functions available to every traced program.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::EnumIter,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Builtin {
    Print,
    Len,
    Range,
    Sum,
    Abs,
    Bool,
    Int,
    Float,
    Str,
    Repr,
    List,
    Tuple,
    Set,
    Dict,
    Type,
    Isinstance,
    Getattr,
    Setattr,
    Delattr,
    Hasattr,
    Slice,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Resolves a bare name to a builtin, used as the last lookup step.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::from_str(name).ok()
    }

    /// The formal signature, where the original host exposed one.
    pub fn signature(self) -> Option<Signature> {
        let simple = |names: &[&str], defaults: usize| {
            Some(Signature {
                args: names.iter().map(|s| (*s).to_owned()).collect(),
                arg_defaults_count: defaults,
                ..Signature::default()
            })
        };
        match self {
            Self::Len => simple(&["obj"], 0),
            Self::Sum => simple(&["iterable", "start"], 1),
            Self::Abs => simple(&["x"], 0),
            Self::Bool => simple(&["x"], 1),
            Self::Int => simple(&["x"], 1),
            Self::Float => simple(&["x"], 1),
            Self::Str => simple(&["object"], 1),
            Self::Repr => simple(&["obj"], 0),
            Self::List | Self::Tuple | Self::Set => simple(&["iterable"], 1),
            Self::Isinstance => simple(&["obj", "class_or_tuple"], 0),
            // No introspectable signature; arguments bind as "0", "1", ...
            Self::Print
            | Self::Range
            | Self::Dict
            | Self::Type
            | Self::Getattr
            | Self::Setattr
            | Self::Delattr
            | Self::Hasattr
            | Self::Slice => None,
        }
    }

    /// Default values matching [`Builtin::signature`].
    pub fn defaults(self) -> Vec<Value> {
        match self {
            Self::Sum => vec![Value::Int(0)],
            Self::Bool => vec![Value::Bool(false)],
            Self::Int => vec![Value::Int(0)],
            Self::Float => vec![Value::Float(0.0)],
            Self::Str => vec![Value::str("")],
            Self::List | Self::Tuple | Self::Set => vec![Value::tuple(vec![])],
            _ => vec![],
        }
    }

    /// All builtins as module attributes, for environment construction.
    pub fn all() -> IndexMap<String, Value> {
        Self::iter()
            .map(|builtin| (builtin.name().to_owned(), Value::Builtin(builtin)))
            .collect()
    }
}

fn arity(name: &str, got: usize, min: usize, max: usize) -> Exception {
    if min == max {
        Exception::type_error(format!("{name}() takes {min} arguments ({got} given)"))
    } else {
        Exception::type_error(format!(
            "{name}() takes {min} to {max} arguments ({got} given)"
        ))
    }
}

fn no_keywords(name: &str, keywords: &IndexMap<String, Value>) -> RunResult<()> {
    if keywords.is_empty() {
        Ok(())
    } else {
        Err(Exception::type_error(format!(
            "{name}() takes no keyword arguments"
        )))
    }
}

/// Invokes a builtin with evaluated call-site arguments.
pub fn call_builtin(
    builtin: Builtin,
    positional: Vec<Value>,
    keywords: IndexMap<String, Value>,
) -> RunResult<Value> {
    let name = builtin.name();
    match builtin {
        Builtin::Print => {
            no_keywords(name, &keywords)?;
            let parts: Vec<String> = positional.iter().map(Value::py_str).collect();
            println!("{}", parts.join(" "));
            Ok(Value::None)
        }
        Builtin::Len => {
            no_keywords(name, &keywords)?;
            let [obj] = take::<1>(name, positional)?;
            let len = match &obj {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.borrow().len(),
                Value::Tuple(items) => items.len(),
                Value::Dict(map) => map.borrow().len(),
                Value::Set(set) => set.borrow().len(),
                other => {
                    return Err(Exception::type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )));
                }
            };
            Ok(Value::Int(len as i64))
        }
        Builtin::Range => {
            no_keywords(name, &keywords)?;
            if positional.is_empty() || positional.len() > 3 {
                return Err(arity(name, positional.len(), 1, 3));
            }
            let ints: RunResult<Vec<i64>> = positional.iter().map(expect_int).collect();
            let ints = ints?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => unreachable!("length checked above"),
            };
            if step == 0 {
                return Err(Exception::value_error("range() arg 3 must not be zero"));
            }
            let mut items = Vec::new();
            let mut current = start;
            while (step > 0 && current < stop) || (step < 0 && current > stop) {
                items.push(Value::Int(current));
                current += step;
            }
            Ok(Value::list(items))
        }
        Builtin::Sum => {
            no_keywords(name, &keywords)?;
            if positional.is_empty() || positional.len() > 2 {
                return Err(arity(name, positional.len(), 1, 2));
            }
            let mut iter = positional.into_iter();
            let iterable = iter.next().expect("checked above");
            let mut total = iter.next().unwrap_or(Value::Int(0));
            for item in iterable.iterate()? {
                total = crate::operator::numeric_add(&total, &item)?;
            }
            Ok(total)
        }
        Builtin::Abs => {
            no_keywords(name, &keywords)?;
            let [x] = take::<1>(name, positional)?;
            match x {
                Value::Int(i) => Ok(Value::Int(i.abs())),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                Value::Bool(b) => Ok(Value::Int(i64::from(b))),
                other => Err(Exception::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    other.type_name()
                ))),
            }
        }
        Builtin::Bool => {
            no_keywords(name, &keywords)?;
            let value = take_at_most_one(name, positional)?;
            Ok(Value::Bool(value.is_some_and(|v| v.truthy())))
        }
        Builtin::Int => {
            no_keywords(name, &keywords)?;
            match take_at_most_one(name, positional)? {
                None => Ok(Value::Int(0)),
                Some(Value::Int(i)) => Ok(Value::Int(i)),
                Some(Value::Bool(b)) => Ok(Value::Int(i64::from(b))),
                Some(Value::Float(f)) => Ok(Value::Int(f.trunc() as i64)),
                Some(Value::Str(s)) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                    Exception::value_error(format!(
                        "invalid literal for int() with base 10: '{s}'"
                    ))
                }),
                Some(other) => Err(Exception::type_error(format!(
                    "int() argument must be a string or a number, not '{}'",
                    other.type_name()
                ))),
            }
        }
        Builtin::Float => {
            no_keywords(name, &keywords)?;
            match take_at_most_one(name, positional)? {
                None => Ok(Value::Float(0.0)),
                Some(Value::Int(i)) => Ok(Value::Float(i as f64)),
                Some(Value::Bool(b)) => Ok(Value::Float(f64::from(u8::from(b)))),
                Some(Value::Float(f)) => Ok(Value::Float(f)),
                Some(Value::Str(s)) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                    Exception::value_error(format!("could not convert string to float: '{s}'"))
                }),
                Some(other) => Err(Exception::type_error(format!(
                    "float() argument must be a string or a number, not '{}'",
                    other.type_name()
                ))),
            }
        }
        Builtin::Str => {
            no_keywords(name, &keywords)?;
            match take_at_most_one(name, positional)? {
                None => Ok(Value::str("")),
                Some(value) => Ok(Value::str(value.py_str())),
            }
        }
        Builtin::Repr => {
            no_keywords(name, &keywords)?;
            let [obj] = take::<1>(name, positional)?;
            Ok(Value::str(obj.py_repr()))
        }
        Builtin::List => {
            no_keywords(name, &keywords)?;
            match take_at_most_one(name, positional)? {
                None => Ok(Value::list(vec![])),
                Some(value) => Ok(Value::list(value.iterate()?)),
            }
        }
        Builtin::Tuple => {
            no_keywords(name, &keywords)?;
            match take_at_most_one(name, positional)? {
                None => Ok(Value::tuple(vec![])),
                Some(value) => Ok(Value::tuple(value.iterate()?)),
            }
        }
        Builtin::Set => {
            no_keywords(name, &keywords)?;
            let mut set: IndexSet<HashKey> = IndexSet::new();
            if let Some(value) = take_at_most_one(name, positional)? {
                for item in value.iterate()? {
                    set.insert(HashKey::from_value(&item)?);
                }
            }
            Ok(Value::Set(Rc::new(RefCell::new(set))))
        }
        Builtin::Dict => {
            if !positional.is_empty() {
                return Err(Exception::type_error(
                    "dict() supports keyword arguments only",
                ));
            }
            let mut map: IndexMap<HashKey, Value> = IndexMap::new();
            for (key, value) in keywords {
                map.insert(HashKey::Str(key.into()), value);
            }
            Ok(Value::Dict(Rc::new(RefCell::new(map))))
        }
        Builtin::Type => {
            no_keywords(name, &keywords)?;
            let [obj] = take::<1>(name, positional)?;
            match &obj {
                Value::Instance(instance) => {
                    Ok(Value::Class(Rc::clone(&instance.borrow().class)))
                }
                Value::Int(_) => Ok(Value::Builtin(Builtin::Int)),
                Value::Float(_) => Ok(Value::Builtin(Builtin::Float)),
                Value::Str(_) => Ok(Value::Builtin(Builtin::Str)),
                Value::Bool(_) => Ok(Value::Builtin(Builtin::Bool)),
                Value::List(_) => Ok(Value::Builtin(Builtin::List)),
                Value::Tuple(_) => Ok(Value::Builtin(Builtin::Tuple)),
                Value::Dict(_) => Ok(Value::Builtin(Builtin::Dict)),
                Value::Set(_) => Ok(Value::Builtin(Builtin::Set)),
                other => Ok(Value::str(other.type_name())),
            }
        }
        Builtin::Isinstance => {
            no_keywords(name, &keywords)?;
            let [obj, class_or_tuple] = take::<2>(name, positional)?;
            let classes = match &class_or_tuple {
                Value::Tuple(items) => items.to_vec(),
                other => vec![other.clone()],
            };
            let matched = classes.iter().any(|class| value_isinstance(&obj, class));
            Ok(Value::Bool(matched))
        }
        Builtin::Getattr => {
            no_keywords(name, &keywords)?;
            if positional.len() < 2 || positional.len() > 3 {
                return Err(arity(name, positional.len(), 2, 3));
            }
            let mut iter = positional.into_iter();
            let obj = iter.next().expect("checked above");
            let attr = expect_str(name, &iter.next().expect("checked above"))?;
            match getattr_value(&obj, &attr) {
                Ok(value) => Ok(value),
                Err(error) => match iter.next() {
                    Some(default) => Ok(default),
                    None => Err(error),
                },
            }
        }
        Builtin::Setattr => {
            no_keywords(name, &keywords)?;
            let [obj, attr, value] = take::<3>(name, positional)?;
            let attr = expect_str(name, &attr)?;
            setattr_value(&obj, &attr, value)?;
            Ok(Value::None)
        }
        Builtin::Delattr => {
            no_keywords(name, &keywords)?;
            let [obj, attr] = take::<2>(name, positional)?;
            let attr = expect_str(name, &attr)?;
            delattr_value(&obj, &attr)?;
            Ok(Value::None)
        }
        Builtin::Hasattr => {
            no_keywords(name, &keywords)?;
            let [obj, attr] = take::<2>(name, positional)?;
            let attr = expect_str(name, &attr)?;
            Ok(Value::Bool(getattr_value(&obj, &attr).is_ok()))
        }
        Builtin::Slice => {
            no_keywords(name, &keywords)?;
            if positional.is_empty() || positional.len() > 3 {
                return Err(arity(name, positional.len(), 1, 3));
            }
            let parts: RunResult<Vec<Option<i64>>> = positional
                .iter()
                .map(|v| match v {
                    Value::None => Ok(None),
                    other => expect_int(other).map(Some),
                })
                .collect();
            let parts = parts?;
            let slice = match parts.as_slice() {
                [stop] => SliceValue {
                    start: None,
                    stop: *stop,
                    step: None,
                },
                [start, stop] => SliceValue {
                    start: *start,
                    stop: *stop,
                    step: None,
                },
                [start, stop, step] => SliceValue {
                    start: *start,
                    stop: *stop,
                    step: *step,
                },
                _ => unreachable!("length checked above"),
            };
            Ok(Value::Slice(Rc::new(slice)))
        }
    }
}

/// `isinstance` check against one class value.
fn value_isinstance(obj: &Value, class: &Value) -> bool {
    match class {
        Value::Class(class) => match obj {
            Value::Instance(instance) => {
                let mro = instance.borrow().class.mro();
                mro.iter().any(|c| Rc::ptr_eq(c, class))
            }
            _ => false,
        },
        // Conversion builtins double as type surrogates.
        Value::Builtin(Builtin::Int) => matches!(obj, Value::Int(_)),
        Value::Builtin(Builtin::Float) => matches!(obj, Value::Float(_)),
        Value::Builtin(Builtin::Str) => matches!(obj, Value::Str(_)),
        Value::Builtin(Builtin::Bool) => matches!(obj, Value::Bool(_)),
        Value::Builtin(Builtin::List) => matches!(obj, Value::List(_)),
        Value::Builtin(Builtin::Tuple) => matches!(obj, Value::Tuple(_)),
        Value::Builtin(Builtin::Dict) => matches!(obj, Value::Dict(_)),
        Value::Builtin(Builtin::Set) => matches!(obj, Value::Set(_)),
        _ => false,
    }
}

fn take<const N: usize>(name: &str, positional: Vec<Value>) -> RunResult<[Value; N]> {
    let got = positional.len();
    positional
        .try_into()
        .map_err(|_| arity(name, got, N, N))
}

fn take_at_most_one(name: &str, positional: Vec<Value>) -> RunResult<Option<Value>> {
    if positional.len() > 1 {
        return Err(arity(name, positional.len(), 0, 1));
    }
    Ok(positional.into_iter().next())
}

fn expect_int(value: &Value) -> RunResult<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(Exception::type_error(format!(
            "an integer is required, not '{}'",
            other.type_name()
        ))),
    }
}

fn expect_str(name: &str, value: &Value) -> RunResult<String> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(Exception::type_error(format!(
            "{name}(): attribute name must be string, not '{}'",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names_round_trip() {
        for builtin in Builtin::iter() {
            assert_eq!(Builtin::from_name(builtin.name()), Some(builtin));
        }
    }

    #[test]
    fn range_produces_half_open_interval() {
        let result = call_builtin(
            Builtin::Range,
            vec![Value::Int(2), Value::Int(8), Value::Int(3)],
            IndexMap::new(),
        )
        .unwrap();
        let items = result.iterate().unwrap();
        let ints: Vec<i64> = items
            .iter()
            .map(|v| match v {
                Value::Int(i) => *i,
                _ => panic!("expected int"),
            })
            .collect();
        assert_eq!(ints, [2, 5]);
    }

    #[test]
    fn sum_adds_over_iterable() {
        let arg = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let result = call_builtin(Builtin::Sum, vec![arg], IndexMap::new()).unwrap();
        assert!(matches!(result, Value::Int(6)));
    }

    #[test]
    fn getattr_falls_back_to_default() {
        let result = call_builtin(
            Builtin::Getattr,
            vec![Value::Int(1), Value::str("missing"), Value::str("fallback")],
            IndexMap::new(),
        )
        .unwrap();
        assert_eq!(result.py_str(), "fallback");
    }

    #[test]
    fn opaque_builtins_have_no_signature() {
        assert!(Builtin::Getattr.signature().is_none());
        assert!(Builtin::Range.signature().is_none());
        assert!(Builtin::Sum.signature().is_some());
    }
}
