//! Runtime value model.
//!
//! Scalars are stored inline; aggregates live behind `Rc`. Instances of
//! user-defined classes are the only *trackable* values: the object tracker
//! holds `Weak` references to them, and dropping the last strong reference is
//! what reclaims an object identifier. Everything callable or module-like is
//! explicitly not trackable, mirroring the trace model's notion of "bare
//! callables".

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::{IndexMap, IndexSet};

use crate::ast::FunctionDef;
use crate::builtins::Builtin;
use crate::exception::{Exception, RunResult};
use crate::namespace::EnvRef;
use crate::operator::OperatorFn;
use crate::signature::Signature;

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    Dict(Rc<RefCell<IndexMap<HashKey, Value>>>),
    Set(Rc<RefCell<IndexSet<HashKey>>>),
    Slice(Rc<SliceValue>),
    Function(Rc<FunctionValue>),
    BoundMethod(Rc<BoundMethod>),
    Builtin(Builtin),
    Operator(OperatorFn),
    Class(Rc<ClassValue>),
    Instance(Rc<RefCell<InstanceValue>>),
    Module(Rc<ModuleValue>),
}

/// A `slice(start, stop, step)` object. Components are ints or `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceValue {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

/// A function defined by interpreted source (including lambdas and methods).
#[derive(Debug)]
pub struct FunctionValue {
    pub def: Rc<FunctionDef>,
    /// Module the function was defined in, stamped at definition time.
    pub module: String,
    pub signature: Signature,
    /// Evaluated default values, in declaration order (positional defaults
    /// followed by keyword-only defaults).
    pub defaults: Vec<Value>,
    /// Environment captured at definition time.
    pub env: EnvRef,
}

impl FunctionValue {
    pub fn qual_name(&self) -> &str {
        &self.def.qual_name
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }
}

/// A function bound to a receiver (an instance, or the class for
/// `@classmethod`).
#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub function: Rc<FunctionValue>,
}

/// A user-defined class.
#[derive(Debug)]
pub struct ClassValue {
    pub name: String,
    pub qual_name: String,
    pub module: String,
    pub bases: Vec<Rc<ClassValue>>,
    pub attrs: RefCell<IndexMap<String, Value>>,
}

impl ClassValue {
    /// Method resolution order: the class followed by its bases, depth-first,
    /// keeping the first occurrence of each class.
    pub fn mro(self: &Rc<Self>) -> Vec<Rc<Self>> {
        let mut order: Vec<Rc<Self>> = Vec::new();
        fn walk(class: &Rc<ClassValue>, order: &mut Vec<Rc<ClassValue>>) {
            if order.iter().any(|c| Rc::ptr_eq(c, class)) {
                return;
            }
            order.push(Rc::clone(class));
            for base in &class.bases {
                walk(base, order);
            }
        }
        walk(self, &mut order);
        order
    }

    /// Looks up an attribute through the MRO without binding it.
    pub fn lookup(self: &Rc<Self>, name: &str) -> Option<Value> {
        for class in self.mro() {
            if let Some(value) = class.attrs.borrow().get(name) {
                return Some(value.clone());
            }
        }
        None
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.module, self.qual_name)
    }
}

/// An instance of a user-defined class.
#[derive(Debug)]
pub struct InstanceValue {
    pub class: Rc<ClassValue>,
    pub attrs: IndexMap<String, Value>,
}

/// A module value: a named, ordered attribute map.
#[derive(Debug)]
pub struct ModuleValue {
    pub name: String,
    pub attrs: RefCell<IndexMap<String, Value>>,
}

/// A hashable value, usable as a dict key or set element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Bool(bool),
    Int(i64),
    /// Floats hash by bit pattern; good enough without numeric coercion.
    Float(u64),
    Str(Rc<str>),
    Tuple(Rc<[HashKey]>),
}

impl HashKey {
    pub fn from_value(value: &Value) -> RunResult<Self> {
        match value {
            Value::None => Ok(Self::None),
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Int(i) => Ok(Self::Int(*i)),
            Value::Float(f) => Ok(Self::Float(f.to_bits())),
            Value::Str(s) => Ok(Self::Str(Rc::clone(s))),
            Value::Tuple(items) => {
                let keys: RunResult<Vec<Self>> = items.iter().map(Self::from_value).collect();
                Ok(Self::Tuple(keys?.into()))
            }
            other => Err(Exception::type_error(format!(
                "unhashable type: '{}'",
                other.type_name()
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::None => Value::None,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Float(bits) => Value::Float(f64::from_bits(*bits)),
            Self::Str(s) => Value::Str(Rc::clone(s)),
            Self::Tuple(keys) => {
                let values: Vec<Value> = keys.iter().map(Self::to_value).collect();
                Value::Tuple(values.into())
            }
        }
    }
}

impl Value {
    pub fn str(text: impl AsRef<str>) -> Self {
        Self::Str(Rc::from(text.as_ref()))
    }

    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Self>) -> Self {
        Self::Tuple(items.into())
    }

    /// The type name, as the source language would report it.
    pub fn type_name(&self) -> String {
        match self {
            Self::None => "NoneType".to_owned(),
            Self::Bool(_) => "bool".to_owned(),
            Self::Int(_) => "int".to_owned(),
            Self::Float(_) => "float".to_owned(),
            Self::Str(_) => "str".to_owned(),
            Self::List(_) => "list".to_owned(),
            Self::Tuple(_) => "tuple".to_owned(),
            Self::Dict(_) => "dict".to_owned(),
            Self::Set(_) => "set".to_owned(),
            Self::Slice(_) => "slice".to_owned(),
            Self::Function(_) => "function".to_owned(),
            Self::BoundMethod(_) => "method".to_owned(),
            Self::Builtin(_) | Self::Operator(_) => "builtin_function_or_method".to_owned(),
            Self::Class(_) => "type".to_owned(),
            Self::Instance(instance) => instance.borrow().class.name.clone(),
            Self::Module(_) => "module".to_owned(),
        }
    }

    /// `(module, qualified name)` of the value's type.
    pub fn class_names(&self) -> (String, String) {
        match self {
            Self::Instance(instance) => {
                let class = Rc::clone(&instance.borrow().class);
                (class.module.clone(), class.qual_name.clone())
            }
            other => ("builtins".to_owned(), other.type_name()),
        }
    }

    /// Fully qualified type name; built-in types omit the module prefix.
    pub fn class_full_name(&self) -> String {
        let (module, qual_name) = self.class_names();
        if module == "builtins" {
            qual_name
        } else {
            format!("{module}.{qual_name}")
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Self::Function(_)
                | Self::BoundMethod(_)
                | Self::Builtin(_)
                | Self::Operator(_)
                | Self::Class(_)
        )
    }

    /// Function-, method-, module-, or type-like: values whose `getattr`
    /// lookups carry no interesting flow.
    pub fn is_function_like(&self) -> bool {
        self.is_callable() || matches!(self, Self::Module(_))
    }

    /// Whether the object tracker can hold a weak reference to this value.
    ///
    /// Only instances of user-defined classes qualify; scalars and built-in
    /// containers have no stable identity worth tracking, and callables are
    /// excluded deliberately.
    pub fn is_trackable(&self) -> bool {
        matches!(self, Self::Instance(_))
    }

    /// Memory address of a trackable value.
    pub fn address(&self) -> Option<usize> {
        match self {
            Self::Instance(instance) => Some(Rc::as_ptr(instance) as usize),
            _ => None,
        }
    }

    /// Weak reference to a trackable value.
    pub fn downgrade(&self) -> Option<Weak<RefCell<InstanceValue>>> {
        match self {
            Self::Instance(instance) => Some(Rc::downgrade(instance)),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.borrow().is_empty(),
            Self::Tuple(items) => !items.is_empty(),
            Self::Dict(map) => !map.borrow().is_empty(),
            Self::Set(set) => !set.borrow().is_empty(),
            _ => true,
        }
    }

    /// Value equality, as `==` in the source language. Instances compare by
    /// identity (user-defined `__eq__` is not modelled).
    pub fn py_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Bool(a), Self::Int(b)) | (Self::Int(b), Self::Bool(a)) => i64::from(*a) == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.py_eq(y))
            }
            (Self::Tuple(a), Self::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.py_eq(y))
            }
            (Self::Dict(a), Self::Dict(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other| v.py_eq(other)))
            }
            (Self::Set(a), Self::Set(b)) => *a.borrow() == *b.borrow(),
            (Self::Slice(a), Self::Slice(b)) => a == b,
            _ => self.is_identical(other),
        }
    }

    /// Identity, as `is` in the source language.
    pub fn is_identical(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Tuple(a), Self::Tuple(b)) => Rc::ptr_eq(a, b),
            (Self::Dict(a), Self::Dict(b)) => Rc::ptr_eq(a, b),
            (Self::Set(a), Self::Set(b)) => Rc::ptr_eq(a, b),
            (Self::Str(a), Self::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Slice(a), Self::Slice(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::BoundMethod(a), Self::BoundMethod(b)) => Rc::ptr_eq(a, b),
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Operator(a), Self::Operator(b)) => a == b,
            (Self::Class(a), Self::Class(b)) => Rc::ptr_eq(a, b),
            (Self::Instance(a), Self::Instance(b)) => Rc::ptr_eq(a, b),
            (Self::Module(a), Self::Module(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Elements of an iterable value, concretised.
    pub fn iterate(&self) -> RunResult<Vec<Self>> {
        match self {
            Self::List(items) => Ok(items.borrow().clone()),
            Self::Tuple(items) => Ok(items.to_vec()),
            Self::Set(set) => Ok(set.borrow().iter().map(HashKey::to_value).collect()),
            Self::Dict(map) => Ok(map.borrow().keys().map(HashKey::to_value).collect()),
            Self::Str(s) => Ok(s.chars().map(|c| Self::str(c.to_string())).collect()),
            other => Err(Exception::not_iterable(&other.type_name())),
        }
    }

    /// JSON projection of a primitive value, used for port payloads.
    ///
    /// Returns `None` for anything that is not JSON-representable: instances,
    /// callables, sets, dicts with non-string keys. Containers recurse.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Self::None => Some(serde_json::Value::Null),
            Self::Bool(b) => Some(serde_json::Value::Bool(*b)),
            Self::Int(i) => Some(serde_json::Value::from(*i)),
            Self::Float(f) => serde_json::Number::from_f64(*f).map(serde_json::Value::Number),
            Self::Str(s) => Some(serde_json::Value::String(s.to_string())),
            Self::List(items) => items
                .borrow()
                .iter()
                .map(Self::to_json)
                .collect::<Option<Vec<_>>>()
                .map(serde_json::Value::Array),
            Self::Tuple(items) => items
                .iter()
                .map(Self::to_json)
                .collect::<Option<Vec<_>>>()
                .map(serde_json::Value::Array),
            Self::Dict(map) => {
                let mut object = serde_json::Map::new();
                for (key, value) in map.borrow().iter() {
                    let HashKey::Str(name) = key else { return None };
                    object.insert(name.to_string(), value.to_json()?);
                }
                Some(serde_json::Value::Object(object))
            }
            _ => None,
        }
    }

    /// Informal string form, as `str()` would produce.
    pub fn py_str(&self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            other => other.py_repr(),
        }
    }

    /// Formal string form, as `repr()` would produce.
    pub fn py_repr(&self) -> String {
        match self {
            Self::None => "None".to_owned(),
            Self::Bool(true) => "True".to_owned(),
            Self::Bool(false) => "False".to_owned(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{f:.1}")
                } else {
                    f.to_string()
                }
            }
            Self::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Self::List(items) => {
                let parts: Vec<String> = items.borrow().iter().map(Self::py_repr).collect();
                format!("[{}]", parts.join(", "))
            }
            Self::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(Self::py_repr).collect();
                if parts.len() == 1 {
                    format!("({},)", parts[0])
                } else {
                    format!("({})", parts.join(", "))
                }
            }
            Self::Dict(map) => {
                let parts: Vec<String> = map
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.to_value().py_repr(), v.py_repr()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Self::Set(set) => {
                if set.borrow().is_empty() {
                    "set()".to_owned()
                } else {
                    let parts: Vec<String> = set
                        .borrow()
                        .iter()
                        .map(|k| k.to_value().py_repr())
                        .collect();
                    format!("{{{}}}", parts.join(", "))
                }
            }
            Self::Slice(slice) => {
                let part = |v: Option<i64>| v.map_or_else(|| "None".to_owned(), |i| i.to_string());
                format!(
                    "slice({}, {}, {})",
                    part(slice.start),
                    part(slice.stop),
                    part(slice.step)
                )
            }
            Self::Function(function) => {
                format!("<function {}>", function.qual_name())
            }
            Self::BoundMethod(method) => {
                format!("<bound method {}>", method.function.qual_name())
            }
            Self::Builtin(builtin) => format!("<built-in function {}>", builtin.name()),
            Self::Operator(op) => format!("<built-in function {}>", op.name()),
            Self::Class(class) => format!("<class '{}'>", class.full_name()),
            Self::Instance(instance) => {
                format!("<{} object>", instance.borrow().class.full_name())
            }
            Self::Module(module) => format!("<module '{}'>", module.name),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.py_str())
    }
}

/// Reads an attribute from a value, binding methods found on the class.
pub fn getattr_value(value: &Value, attr: &str) -> RunResult<Value> {
    match value {
        Value::Instance(instance) => {
            if let Some(found) = instance.borrow().attrs.get(attr) {
                return Ok(found.clone());
            }
            let class = Rc::clone(&instance.borrow().class);
            match class.lookup(attr) {
                Some(Value::Function(function)) => Ok(bind_function(value, &function)),
                Some(other) => Ok(other),
                None => Err(Exception::attribute_error(&class.name, attr)),
            }
        }
        Value::Class(class) => match class.lookup(attr) {
            Some(Value::Function(function)) if function.def.method_kind.is_class_bound() => {
                Ok(Value::BoundMethod(Rc::new(BoundMethod {
                    receiver: value.clone(),
                    function,
                })))
            }
            Some(other) => Ok(other),
            None => Err(Exception::attribute_error(&class.name, attr)),
        },
        Value::Module(module) => module
            .attrs
            .borrow()
            .get(attr)
            .cloned()
            .ok_or_else(|| Exception::attribute_error(&format!("module '{}'", module.name), attr)),
        other => Err(Exception::attribute_error(&other.type_name(), attr)),
    }
}

/// Binds a class-level function to an instance or class receiver according
/// to its method kind.
fn bind_function(receiver: &Value, function: &Rc<FunctionValue>) -> Value {
    match function.def.method_kind {
        crate::ast::MethodKind::Static => Value::Function(Rc::clone(function)),
        crate::ast::MethodKind::Class => {
            let class = match receiver {
                Value::Instance(instance) => Value::Class(Rc::clone(&instance.borrow().class)),
                other => other.clone(),
            };
            Value::BoundMethod(Rc::new(BoundMethod {
                receiver: class,
                function: Rc::clone(function),
            }))
        }
        crate::ast::MethodKind::Instance => Value::BoundMethod(Rc::new(BoundMethod {
            receiver: receiver.clone(),
            function: Rc::clone(function),
        })),
    }
}

/// Writes an attribute on a value.
pub fn setattr_value(value: &Value, attr: &str, new: Value) -> RunResult<()> {
    match value {
        Value::Instance(instance) => {
            instance.borrow_mut().attrs.insert(attr.to_owned(), new);
            Ok(())
        }
        Value::Class(class) => {
            class.attrs.borrow_mut().insert(attr.to_owned(), new);
            Ok(())
        }
        other => Err(Exception::type_error(format!(
            "cannot set attribute '{attr}' on '{}' object",
            other.type_name()
        ))),
    }
}

/// Deletes an attribute from a value.
pub fn delattr_value(value: &Value, attr: &str) -> RunResult<()> {
    match value {
        Value::Instance(instance) => {
            let removed = instance.borrow_mut().attrs.shift_remove(attr);
            if removed.is_some() {
                Ok(())
            } else {
                let class_name = instance.borrow().class.name.clone();
                Err(Exception::attribute_error(&class_name, attr))
            }
        }
        other => Err(Exception::type_error(format!(
            "cannot delete attribute '{attr}' on '{}' object",
            other.type_name()
        ))),
    }
}

impl crate::ast::MethodKind {
    /// Whether class-level access yields a method bound to the class.
    fn is_class_bound(self) -> bool {
        matches!(self, Self::Class)
    }
}
