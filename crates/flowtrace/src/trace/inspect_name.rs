//! Inspect module and qualified names of callables and types.

use crate::value::Value;

/// `(module, qualified name)` of a callable value.
///
/// Falls back through the bound-method receiver's type and then the class of
/// the callable when the callable carries no name of its own. Builtins and
/// the operator support module report their canonical module names.
pub fn callable_names(value: &Value) -> (String, String) {
    match value {
        Value::Function(function) => (function.module.clone(), function.qual_name().to_owned()),
        Value::BoundMethod(method) => {
            let function = &method.function;
            // Method names already carry the defining class; the receiver's
            // type only matters when the defining class is anonymous, which
            // cannot happen for parsed definitions.
            (function.module.clone(), function.qual_name().to_owned())
        }
        Value::Builtin(builtin) => ("builtins".to_owned(), builtin.name().to_owned()),
        Value::Operator(op) => ("operator".to_owned(), op.name().to_owned()),
        Value::Class(class) => (class.module.clone(), class.qual_name.clone()),
        // Not a recognisable callable: defer to the value's class.
        other => other.class_names(),
    }
}

/// Full dotted name of a callable; built-in modules omit the prefix.
pub fn callable_full_name(value: &Value) -> String {
    let (module, qual_name) = callable_names(value);
    if module == "builtins" {
        qual_name
    } else {
        format!("{module}.{qual_name}")
    }
}

/// `(module, qualified name)` of the value's type.
pub fn class_names(value: &Value) -> (String, String) {
    value.class_names()
}

/// Full dotted name of the value's type; built-in types omit the prefix.
pub fn class_full_name(value: &Value) -> String {
    value.class_full_name()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::Builtin;
    use crate::operator::OperatorFn;

    #[test]
    fn builtins_use_canonical_module() {
        let (module, qual_name) = callable_names(&Value::Builtin(Builtin::Len));
        assert_eq!(module, "builtins");
        assert_eq!(qual_name, "len");
        assert_eq!(callable_full_name(&Value::Builtin(Builtin::Len)), "len");
    }

    #[test]
    fn operator_functions_report_their_module() {
        let (module, qual_name) = callable_names(&Value::Operator(OperatorFn::Getitem));
        assert_eq!(module, "operator");
        assert_eq!(qual_name, "getitem");
        assert_eq!(
            callable_full_name(&Value::Operator(OperatorFn::Getitem)),
            "operator.getitem"
        );
    }

    #[test]
    fn scalars_fall_back_to_their_class() {
        let (module, qual_name) = callable_names(&Value::Int(3));
        assert_eq!(module, "builtins");
        assert_eq!(qual_name, "int");
    }
}
