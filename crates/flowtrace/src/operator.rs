//! The operator support module.
//!
//! Source syntax as functions: the normaliser rewrites unary, binary and
//! comparison operators, indexing, in-place operators, and container
//! literals into calls against this module, so a single call-tracing
//! mechanism covers them all. The module is injected into every traced
//! environment under the name `operator`.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use strum::IntoEnumIterator;

use crate::ast::{BinOpKind, CmpOpKind, UnaryOpKind};
use crate::exception::{Exception, RunResult};
use crate::value::{HashKey, SliceValue, Value};

/// A function in the operator support module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
pub enum OperatorFn {
    Add,
    Sub,
    Mul,
    Truediv,
    Floordiv,
    Mod,
    Pow,
    Lshift,
    Rshift,
    BitAnd,
    BitOr,
    BitXor,
    Neg,
    Pos,
    Invert,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Is,
    IsNot,
    Contains,
    Getitem,
    Setitem,
    Delitem,
    IAdd,
    ISub,
    IMul,
    ITruediv,
    IFloordiv,
    IMod,
    IPow,
    ILshift,
    IRshift,
    IBitAnd,
    IBitOr,
    IBitXor,
    /// `__list__(x, y, ...) == [x, y, ...]`
    ListLiteral,
    /// `__tuple__(x, y, ...) == (x, y, ...)`
    TupleLiteral,
    /// `__set__(x, y, ...) == {x, y, ...}`
    SetLiteral,
    /// `__dict__(a=x, b=y) == {'a': x, 'b': y}`
    DictLiteral,
}

impl OperatorFn {
    pub fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Truediv => "truediv",
            Self::Floordiv => "floordiv",
            Self::Mod => "mod",
            Self::Pow => "pow",
            Self::Lshift => "lshift",
            Self::Rshift => "rshift",
            Self::BitAnd => "and_",
            Self::BitOr => "or_",
            Self::BitXor => "xor",
            Self::Neg => "neg",
            Self::Pos => "pos",
            Self::Invert => "invert",
            Self::Not => "not_",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Is => "is_",
            Self::IsNot => "is_not",
            Self::Contains => "contains",
            Self::Getitem => "getitem",
            Self::Setitem => "setitem",
            Self::Delitem => "delitem",
            Self::IAdd => "iadd",
            Self::ISub => "isub",
            Self::IMul => "imul",
            Self::ITruediv => "itruediv",
            Self::IFloordiv => "ifloordiv",
            Self::IMod => "imod",
            Self::IPow => "ipow",
            Self::ILshift => "ilshift",
            Self::IRshift => "irshift",
            Self::IBitAnd => "iand",
            Self::IBitOr => "ior",
            Self::IBitXor => "ixor",
            Self::ListLiteral => "__list__",
            Self::TupleLiteral => "__tuple__",
            Self::SetLiteral => "__set__",
            Self::DictLiteral => "__dict__",
        }
    }

    /// The binary operator function for a surface form.
    pub fn for_binop(op: BinOpKind) -> Self {
        match op {
            BinOpKind::Add => Self::Add,
            BinOpKind::Sub => Self::Sub,
            BinOpKind::Mul => Self::Mul,
            BinOpKind::Div => Self::Truediv,
            BinOpKind::FloorDiv => Self::Floordiv,
            BinOpKind::Mod => Self::Mod,
            BinOpKind::Pow => Self::Pow,
            BinOpKind::MatMul => Self::Mul,
            BinOpKind::LShift => Self::Lshift,
            BinOpKind::RShift => Self::Rshift,
            BinOpKind::BitAnd => Self::BitAnd,
            BinOpKind::BitOr => Self::BitOr,
            BinOpKind::BitXor => Self::BitXor,
        }
    }

    /// The in-place operator function for a surface form.
    pub fn for_inplace(op: BinOpKind) -> Self {
        match op {
            BinOpKind::Add => Self::IAdd,
            BinOpKind::Sub => Self::ISub,
            BinOpKind::Mul => Self::IMul,
            BinOpKind::Div => Self::ITruediv,
            BinOpKind::FloorDiv => Self::IFloordiv,
            BinOpKind::Mod => Self::IMod,
            BinOpKind::Pow => Self::IPow,
            BinOpKind::MatMul => Self::IMul,
            BinOpKind::LShift => Self::ILshift,
            BinOpKind::RShift => Self::IRshift,
            BinOpKind::BitAnd => Self::IBitAnd,
            BinOpKind::BitOr => Self::IBitOr,
            BinOpKind::BitXor => Self::IBitXor,
        }
    }

    pub fn for_unary(op: UnaryOpKind) -> Self {
        match op {
            UnaryOpKind::Not => Self::Not,
            UnaryOpKind::Minus => Self::Neg,
            UnaryOpKind::Plus => Self::Pos,
            UnaryOpKind::Invert => Self::Invert,
        }
    }

    /// The comparison function for a surface form. `In`/`NotIn` also need
    /// operand swapping and negation, handled by the normaliser.
    pub fn for_compare(op: CmpOpKind) -> Self {
        match op {
            CmpOpKind::Eq => Self::Eq,
            CmpOpKind::NotEq => Self::Ne,
            CmpOpKind::Lt => Self::Lt,
            CmpOpKind::LtE => Self::Le,
            CmpOpKind::Gt => Self::Gt,
            CmpOpKind::GtE => Self::Ge,
            CmpOpKind::Is => Self::Is,
            CmpOpKind::IsNot => Self::IsNot,
            CmpOpKind::In | CmpOpKind::NotIn => Self::Contains,
        }
    }

    /// All operator functions as module attributes.
    pub fn module_attrs() -> IndexMap<String, Value> {
        Self::iter()
            .map(|op| (op.name().to_owned(), Value::Operator(op)))
            .collect()
    }
}

fn binary_args(name: &str, positional: Vec<Value>) -> RunResult<(Value, Value)> {
    let got = positional.len();
    let array: Result<[Value; 2], _> = positional.try_into();
    match array {
        Ok([a, b]) => Ok((a, b)),
        Err(_) => Err(Exception::type_error(format!(
            "{name}() takes 2 arguments ({got} given)"
        ))),
    }
}

fn unary_arg(name: &str, positional: Vec<Value>) -> RunResult<Value> {
    let got = positional.len();
    let array: Result<[Value; 1], _> = positional.try_into();
    match array {
        Ok([a]) => Ok(a),
        Err(_) => Err(Exception::type_error(format!(
            "{name}() takes 1 argument ({got} given)"
        ))),
    }
}

/// Invokes an operator function with evaluated call-site arguments.
pub fn call_operator(
    op: OperatorFn,
    positional: Vec<Value>,
    keywords: IndexMap<String, Value>,
) -> RunResult<Value> {
    let name = op.name();
    if !keywords.is_empty() && op != OperatorFn::DictLiteral {
        return Err(Exception::type_error(format!(
            "{name}() takes no keyword arguments"
        )));
    }
    match op {
        OperatorFn::Add | OperatorFn::IAdd => {
            let (a, b) = binary_args(name, positional)?;
            if op == OperatorFn::IAdd {
                if let Value::List(items) = &a {
                    let extension = b.iterate()?;
                    items.borrow_mut().extend(extension);
                    return Ok(a);
                }
            }
            add(&a, &b)
        }
        OperatorFn::Sub | OperatorFn::ISub => {
            let (a, b) = binary_args(name, positional)?;
            arithmetic(name, &a, &b, i64::checked_sub, |x, y| x - y)
        }
        OperatorFn::Mul | OperatorFn::IMul => {
            let (a, b) = binary_args(name, positional)?;
            mul(&a, &b)
        }
        OperatorFn::Truediv | OperatorFn::ITruediv => {
            let (a, b) = binary_args(name, positional)?;
            let x = expect_number(name, &a)?;
            let y = expect_number(name, &b)?;
            if y == 0.0 {
                return Err(Exception::zero_division("division by zero"));
            }
            Ok(Value::Float(x / y))
        }
        OperatorFn::Floordiv | OperatorFn::IFloordiv => {
            let (a, b) = binary_args(name, positional)?;
            match (&a, &b) {
                (Value::Int(x), Value::Int(y)) => {
                    if *y == 0 {
                        Err(Exception::zero_division("integer division or modulo by zero"))
                    } else {
                        Ok(Value::Int(floor_div(*x, *y)))
                    }
                }
                _ => {
                    let x = expect_number(name, &a)?;
                    let y = expect_number(name, &b)?;
                    if y == 0.0 {
                        Err(Exception::zero_division("float floor division by zero"))
                    } else {
                        Ok(Value::Float((x / y).floor()))
                    }
                }
            }
        }
        OperatorFn::Mod | OperatorFn::IMod => {
            let (a, b) = binary_args(name, positional)?;
            match (&a, &b) {
                (Value::Int(x), Value::Int(y)) => {
                    if *y == 0 {
                        Err(Exception::zero_division("integer division or modulo by zero"))
                    } else {
                        Ok(Value::Int(floor_mod(*x, *y)))
                    }
                }
                _ => {
                    let x = expect_number(name, &a)?;
                    let y = expect_number(name, &b)?;
                    if y == 0.0 {
                        Err(Exception::zero_division("float modulo"))
                    } else {
                        Ok(Value::Float(x - (x / y).floor() * y))
                    }
                }
            }
        }
        OperatorFn::Pow | OperatorFn::IPow => {
            let (a, b) = binary_args(name, positional)?;
            match (&a, &b) {
                (Value::Int(x), Value::Int(y)) if *y >= 0 => {
                    let exp = u32::try_from(*y).map_err(|_| {
                        Exception::value_error("exponent too large")
                    })?;
                    x.checked_pow(exp)
                        .map(Value::Int)
                        .ok_or_else(|| Exception::value_error("integer overflow in pow()"))
                }
                _ => {
                    let x = expect_number(name, &a)?;
                    let y = expect_number(name, &b)?;
                    Ok(Value::Float(x.powf(y)))
                }
            }
        }
        OperatorFn::Lshift | OperatorFn::ILshift => {
            let (a, b) = binary_args(name, positional)?;
            bitwise(name, &a, &b, |x, y| x << (y & 63))
        }
        OperatorFn::Rshift | OperatorFn::IRshift => {
            let (a, b) = binary_args(name, positional)?;
            bitwise(name, &a, &b, |x, y| x >> (y & 63))
        }
        OperatorFn::BitAnd | OperatorFn::IBitAnd => {
            let (a, b) = binary_args(name, positional)?;
            bitwise(name, &a, &b, |x, y| x & y)
        }
        OperatorFn::BitOr | OperatorFn::IBitOr => {
            let (a, b) = binary_args(name, positional)?;
            bitwise(name, &a, &b, |x, y| x | y)
        }
        OperatorFn::BitXor | OperatorFn::IBitXor => {
            let (a, b) = binary_args(name, positional)?;
            bitwise(name, &a, &b, |x, y| x ^ y)
        }
        OperatorFn::Neg => {
            let a = unary_arg(name, positional)?;
            match a {
                Value::Int(i) => Ok(Value::Int(-i)),
                Value::Float(f) => Ok(Value::Float(-f)),
                Value::Bool(b) => Ok(Value::Int(-i64::from(b))),
                other => Err(bad_unary("-", &other)),
            }
        }
        OperatorFn::Pos => {
            let a = unary_arg(name, positional)?;
            match a {
                Value::Int(_) | Value::Float(_) => Ok(a),
                Value::Bool(b) => Ok(Value::Int(i64::from(b))),
                other => Err(bad_unary("+", &other)),
            }
        }
        OperatorFn::Invert => {
            let a = unary_arg(name, positional)?;
            match a {
                Value::Int(i) => Ok(Value::Int(!i)),
                Value::Bool(b) => Ok(Value::Int(!i64::from(b))),
                other => Err(bad_unary("~", &other)),
            }
        }
        OperatorFn::Not => {
            let a = unary_arg(name, positional)?;
            Ok(Value::Bool(!a.truthy()))
        }
        OperatorFn::Eq => {
            let (a, b) = binary_args(name, positional)?;
            Ok(Value::Bool(a.py_eq(&b)))
        }
        OperatorFn::Ne => {
            let (a, b) = binary_args(name, positional)?;
            Ok(Value::Bool(!a.py_eq(&b)))
        }
        OperatorFn::Lt | OperatorFn::Le | OperatorFn::Gt | OperatorFn::Ge => {
            let (a, b) = binary_args(name, positional)?;
            let ordering = compare(name, &a, &b)?;
            let result = match op {
                OperatorFn::Lt => ordering.is_lt(),
                OperatorFn::Le => ordering.is_le(),
                OperatorFn::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(result))
        }
        OperatorFn::Is => {
            let (a, b) = binary_args(name, positional)?;
            Ok(Value::Bool(a.is_identical(&b)))
        }
        OperatorFn::IsNot => {
            let (a, b) = binary_args(name, positional)?;
            Ok(Value::Bool(!a.is_identical(&b)))
        }
        OperatorFn::Contains => {
            let (container, item) = binary_args(name, positional)?;
            contains(&container, &item)
        }
        OperatorFn::Getitem => {
            let (obj, index) = binary_args(name, positional)?;
            getitem(&obj, &index)
        }
        OperatorFn::Setitem => {
            let got = positional.len();
            let array: Result<[Value; 3], _> = positional.try_into();
            let Ok([obj, index, value]) = array else {
                return Err(Exception::type_error(format!(
                    "setitem() takes 3 arguments ({got} given)"
                )));
            };
            setitem(&obj, &index, value)?;
            Ok(Value::None)
        }
        OperatorFn::Delitem => {
            let (obj, index) = binary_args(name, positional)?;
            delitem(&obj, &index)?;
            Ok(Value::None)
        }
        OperatorFn::ListLiteral => Ok(Value::list(positional)),
        OperatorFn::TupleLiteral => Ok(Value::tuple(positional)),
        OperatorFn::SetLiteral => {
            let mut set: IndexSet<HashKey> = IndexSet::new();
            for item in positional {
                set.insert(HashKey::from_value(&item)?);
            }
            Ok(Value::Set(Rc::new(RefCell::new(set))))
        }
        OperatorFn::DictLiteral => {
            if !positional.is_empty() {
                return Err(Exception::type_error(
                    "__dict__() takes keyword arguments only",
                ));
            }
            let mut map: IndexMap<HashKey, Value> = IndexMap::new();
            for (key, value) in keywords {
                map.insert(HashKey::Str(key.into()), value);
            }
            Ok(Value::Dict(Rc::new(RefCell::new(map))))
        }
    }
}

/// Addition that also serves `sum()`.
pub fn numeric_add(a: &Value, b: &Value) -> RunResult<Value> {
    add(a, b)
}

fn add(a: &Value, b: &Value) -> RunResult<Value> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => {
            let mut joined = x.to_string();
            joined.push_str(y);
            Ok(Value::str(joined))
        }
        (Value::List(x), Value::List(y)) => {
            let mut items = x.borrow().clone();
            items.extend(y.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (Value::Tuple(x), Value::Tuple(y)) => {
            let mut items = x.to_vec();
            items.extend(y.iter().cloned());
            Ok(Value::tuple(items))
        }
        _ => arithmetic("add", a, b, i64::checked_add, |x, y| x + y),
    }
}

fn mul(a: &Value, b: &Value) -> RunResult<Value> {
    match (a, b) {
        (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
            let count = usize::try_from(*n).unwrap_or(0);
            Ok(Value::str(s.repeat(count)))
        }
        (Value::List(items), Value::Int(n)) | (Value::Int(n), Value::List(items)) => {
            let count = usize::try_from(*n).unwrap_or(0);
            let base = items.borrow().clone();
            let mut repeated = Vec::with_capacity(base.len() * count);
            for _ in 0..count {
                repeated.extend(base.iter().cloned());
            }
            Ok(Value::list(repeated))
        }
        _ => arithmetic("mul", a, b, i64::checked_mul, |x, y| x * y),
    }
}

fn arithmetic(
    name: &str,
    a: &Value,
    b: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> RunResult<Value> {
    match (coerce_int(a), coerce_int(b)) {
        (Some(x), Some(y)) => int_op(x, y)
            .map(Value::Int)
            .ok_or_else(|| Exception::value_error(format!("integer overflow in {name}()"))),
        _ => {
            let x = expect_number(name, a)?;
            let y = expect_number(name, b)?;
            Ok(Value::Float(float_op(x, y)))
        }
    }
}

fn bitwise(name: &str, a: &Value, b: &Value, op: fn(i64, i64) -> i64) -> RunResult<Value> {
    match (coerce_int(a), coerce_int(b)) {
        (Some(x), Some(y)) => Ok(Value::Int(op(x, y))),
        _ => Err(Exception::type_error(format!(
            "unsupported operand type(s) for {name}: '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// Integer division with the result floored, the sign convention of the
/// source language.
fn floor_div(x: i64, y: i64) -> i64 {
    let quotient = x / y;
    let remainder = x % y;
    if remainder != 0 && (remainder < 0) != (y < 0) {
        quotient - 1
    } else {
        quotient
    }
}

/// Modulo where the result takes the sign of the divisor.
fn floor_mod(x: i64, y: i64) -> i64 {
    let remainder = x % y;
    if remainder != 0 && (remainder < 0) != (y < 0) {
        remainder + y
    } else {
        remainder
    }
}

fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn expect_number(name: &str, value: &Value) -> RunResult<f64> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        Value::Bool(b) => Ok(f64::from(u8::from(*b))),
        other => Err(Exception::type_error(format!(
            "unsupported operand type for {name}(): '{}'",
            other.type_name()
        ))),
    }
}

fn bad_unary(symbol: &str, value: &Value) -> Exception {
    Exception::type_error(format!(
        "bad operand type for unary {symbol}: '{}'",
        value.type_name()
    ))
}

fn compare(name: &str, a: &Value, b: &Value) -> RunResult<std::cmp::Ordering> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        _ => {
            let x = expect_number(name, a)?;
            let y = expect_number(name, b)?;
            x.partial_cmp(&y)
                .ok_or_else(|| Exception::value_error("comparison with NaN"))
        }
    }
}

fn contains(container: &Value, item: &Value) -> RunResult<Value> {
    let found = match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => haystack.contains(needle.as_ref()),
            other => {
                return Err(Exception::type_error(format!(
                    "'in <string>' requires string as left operand, not '{}'",
                    other.type_name()
                )));
            }
        },
        Value::List(items) => items.borrow().iter().any(|v| v.py_eq(item)),
        Value::Tuple(items) => items.iter().any(|v| v.py_eq(item)),
        Value::Set(set) => HashKey::from_value(item)
            .map(|key| set.borrow().contains(&key))
            .unwrap_or(false),
        Value::Dict(map) => HashKey::from_value(item)
            .map(|key| map.borrow().contains_key(&key))
            .unwrap_or(false),
        other => return Err(Exception::not_iterable(&other.type_name())),
    };
    Ok(Value::Bool(found))
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let adjusted = if index < 0 { index + len } else { index };
    if adjusted < 0 || adjusted >= len {
        None
    } else {
        Some(adjusted as usize)
    }
}

/// Resolves a slice over a sequence of the given length into concrete
/// start/end/step indices, clamping like the source language.
fn slice_bounds(slice: &SliceValue, len: usize) -> (i64, i64, i64) {
    let len = len as i64;
    let step = slice.step.unwrap_or(1);
    let clamp = |value: i64| -> i64 {
        let adjusted = if value < 0 { value + len } else { value };
        adjusted.clamp(if step < 0 { -1 } else { 0 }, len)
    };
    let start = match slice.start {
        Some(start) => clamp(start),
        None if step < 0 => len - 1,
        None => 0,
    };
    let stop = match slice.stop {
        Some(stop) => clamp(stop),
        None if step < 0 => -1,
        None => len,
    };
    (start, stop, step)
}

fn slice_indices(slice: &SliceValue, len: usize) -> RunResult<Vec<usize>> {
    let (start, stop, step) = slice_bounds(slice, len);
    if step == 0 {
        return Err(Exception::value_error("slice step cannot be zero"));
    }
    let mut indices = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        if current >= 0 && current < len as i64 {
            indices.push(current as usize);
        }
        current += step;
    }
    Ok(indices)
}

fn getitem(obj: &Value, index: &Value) -> RunResult<Value> {
    match (obj, index) {
        (Value::List(items), Value::Slice(slice)) => {
            let items = items.borrow();
            let selected: Vec<Value> = slice_indices(slice, items.len())?
                .into_iter()
                .map(|i| items[i].clone())
                .collect();
            Ok(Value::list(selected))
        }
        (Value::Tuple(items), Value::Slice(slice)) => {
            let selected: Vec<Value> = slice_indices(slice, items.len())?
                .into_iter()
                .map(|i| items[i].clone())
                .collect();
            Ok(Value::tuple(selected))
        }
        (Value::Str(s), Value::Slice(slice)) => {
            let chars: Vec<char> = s.chars().collect();
            let selected: String = slice_indices(slice, chars.len())?
                .into_iter()
                .map(|i| chars[i])
                .collect();
            Ok(Value::str(selected))
        }
        (Value::List(items), _) => {
            let items = items.borrow();
            let i = index_for(index, items.len(), "list")?;
            Ok(items[i].clone())
        }
        (Value::Tuple(items), _) => {
            let i = index_for(index, items.len(), "tuple")?;
            Ok(items[i].clone())
        }
        (Value::Str(s), _) => {
            let chars: Vec<char> = s.chars().collect();
            let i = index_for(index, chars.len(), "string")?;
            Ok(Value::str(chars[i].to_string()))
        }
        (Value::Dict(map), _) => {
            let key = HashKey::from_value(index)?;
            map.borrow()
                .get(&key)
                .cloned()
                .ok_or_else(|| Exception::key_error(index.py_repr()))
        }
        (other, _) => Err(Exception::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn setitem(obj: &Value, index: &Value, value: Value) -> RunResult<()> {
    match obj {
        Value::List(items) => {
            let len = items.borrow().len();
            let i = index_for(index, len, "list")?;
            items.borrow_mut()[i] = value;
            Ok(())
        }
        Value::Dict(map) => {
            let key = HashKey::from_value(index)?;
            map.borrow_mut().insert(key, value);
            Ok(())
        }
        other => Err(Exception::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn delitem(obj: &Value, index: &Value) -> RunResult<()> {
    match obj {
        Value::List(items) => {
            let len = items.borrow().len();
            let i = index_for(index, len, "list")?;
            items.borrow_mut().remove(i);
            Ok(())
        }
        Value::Dict(map) => {
            let key = HashKey::from_value(index)?;
            map.borrow_mut()
                .shift_remove(&key)
                .map(|_| ())
                .ok_or_else(|| Exception::key_error(index.py_repr()))
        }
        other => Err(Exception::type_error(format!(
            "'{}' object does not support item deletion",
            other.type_name()
        ))),
    }
}

fn index_for(index: &Value, len: usize, kind: &str) -> RunResult<usize> {
    match index {
        Value::Int(i) => normalize_index(*i, len)
            .ok_or_else(|| Exception::index_error(format!("{kind} index out of range"))),
        Value::Bool(b) => normalize_index(i64::from(*b), len)
            .ok_or_else(|| Exception::index_error(format!("{kind} index out of range"))),
        other => Err(Exception::type_error(format!(
            "{kind} indices must be integers, not '{}'",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(op: OperatorFn, args: Vec<Value>) -> RunResult<Value> {
        call_operator(op, args, IndexMap::new())
    }

    #[test]
    fn truediv_always_floats() {
        let result = call(OperatorFn::Truediv, vec![Value::Int(7), Value::Int(2)]).unwrap();
        assert!(matches!(result, Value::Float(f) if (f - 3.5).abs() < 1e-9));
    }

    #[test]
    fn floordiv_floors_toward_negative_infinity() {
        let result = call(OperatorFn::Floordiv, vec![Value::Int(-7), Value::Int(2)]).unwrap();
        assert!(matches!(result, Value::Int(-4)));
    }

    #[test]
    fn contains_checks_membership() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let result = call(OperatorFn::Contains, vec![list, Value::Int(2)]).unwrap();
        assert!(matches!(result, Value::Bool(true)));
    }

    #[test]
    fn getitem_supports_negative_indices() {
        let list = Value::list(vec![Value::Int(10), Value::Int(20), Value::Int(30)]);
        let result = call(OperatorFn::Getitem, vec![list, Value::Int(-1)]).unwrap();
        assert!(matches!(result, Value::Int(30)));
    }

    #[test]
    fn getitem_slices_lists() {
        let list = Value::list(vec![
            Value::Int(0),
            Value::Int(1),
            Value::Int(2),
            Value::Int(3),
        ]);
        let slice = Value::Slice(Rc::new(SliceValue {
            start: Some(1),
            stop: Some(3),
            step: None,
        }));
        let result = call(OperatorFn::Getitem, vec![list, slice]).unwrap();
        let items = result.iterate().unwrap();
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Value::Int(1)));
    }

    #[test]
    fn iadd_extends_lists_in_place() {
        let list = Value::list(vec![Value::Int(1)]);
        let result = call(
            OperatorFn::IAdd,
            vec![list.clone(), Value::list(vec![Value::Int(2)])],
        )
        .unwrap();
        assert!(result.is_identical(&list));
        assert_eq!(list.iterate().unwrap().len(), 2);
    }

    #[test]
    fn literal_constructors_build_containers() {
        let as_list = call(OperatorFn::ListLiteral, vec![Value::Int(1), Value::Int(2)]).unwrap();
        assert!(matches!(as_list, Value::List(_)));
        let as_tuple = call(OperatorFn::TupleLiteral, vec![Value::Int(1)]).unwrap();
        assert!(matches!(as_tuple, Value::Tuple(_)));
    }
}
