//! Annotation lookup for runtime values, callables and types.
//!
//! Adds the language-specific logic on top of the store: method resolution
//! over the receiver's ancestor chain, best-match selection under a partial
//! order, and memoisation so repeated lookups during tracing stay cheap.

use std::rc::Rc;

use ahash::AHashMap;
use indexmap::IndexMap;
use log::warn;

use crate::annotations::db::{Annotation, AnnotationDb, Query};
use crate::trace::inspect_name::callable_full_name;
use crate::value::{ClassValue, Value};

/// One entry in a value's ancestor chain.
#[derive(Debug, Clone)]
enum AncestorClass {
    User(Rc<ClassValue>),
    Builtin(String),
}

impl AncestorClass {
    fn package(&self) -> String {
        match self {
            Self::User(class) => class
                .module
                .split('.')
                .next()
                .unwrap_or(&class.module)
                .to_owned(),
            Self::Builtin(_) => "builtins".to_owned(),
        }
    }

    /// Whether `self` is a superclass of (or equal to) `other`.
    fn is_superclass_of(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::User(ancestor), Self::User(class)) => {
                class.mro().iter().any(|c| Rc::ptr_eq(c, ancestor))
            }
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            _ => false,
        }
    }
}

/// The full ancestor chain of a value's type, keyed by full type name.
fn ancestor_chain(value: &Value) -> IndexMap<String, AncestorClass> {
    let mut chain = IndexMap::new();
    match value {
        Value::Instance(instance) => {
            for class in instance.borrow().class.mro() {
                chain.insert(class.full_name(), AncestorClass::User(class));
            }
        }
        other => {
            let name = other.class_full_name();
            chain.insert(name.clone(), AncestorClass::Builtin(name));
        }
    }
    chain
}

/// Looks up annotations for values and callables.
pub struct Annotator {
    db: Box<dyn AnnotationDb>,
    func_cache: AHashMap<(String, Option<String>), Option<Rc<Annotation>>>,
    type_cache: AHashMap<String, Option<Rc<Annotation>>>,
}

impl Annotator {
    pub fn new(db: Box<dyn AnnotationDb>) -> Self {
        Self {
            db,
            func_cache: AHashMap::new(),
            type_cache: AHashMap::new(),
        }
    }

    /// Finds the annotation for a callable.
    ///
    /// Bound methods resolve class-scoped function records over the
    /// receiver's ancestor chain first, then fall back to the plain
    /// function lookup.
    pub fn notate_function(&mut self, function: &Value) -> Option<Rc<Annotation>> {
        let receiver_type = match function {
            Value::BoundMethod(method) => Some(method.receiver.class_full_name()),
            _ => None,
        };
        let cache_key = (callable_full_name(function), receiver_type);
        if let Some(cached) = self.func_cache.get(&cache_key) {
            return cached.clone();
        }

        let mut note = None;
        if let Value::BoundMethod(method) = function {
            let chain = ancestor_chain(&method.receiver);
            let extra = Query::new()
                .with("kind", "function")
                .with("method", method.function.name());
            note = self.resolve_type(&chain, &extra);
        }
        if note.is_none() {
            let name = callable_full_name(function);
            let package = name.split('.').next().unwrap_or(&name).to_owned();
            let query = Query::new()
                .with("language", "python")
                .with("package", package.as_str())
                .with("kind", "function")
                .with("function", name.as_str());
            note = self.query(&query, &package).into_iter().next();
        }

        self.func_cache.insert(cache_key, note.clone());
        note
    }

    /// Finds the annotation for a value, based on its type.
    pub fn notate_value(&mut self, value: &Value) -> Option<Rc<Annotation>> {
        let cache_key = value.class_full_name();
        if let Some(cached) = self.type_cache.get(&cache_key) {
            return cached.clone();
        }
        let chain = ancestor_chain(value);
        let note = self.resolve_type(&chain, &Query::new().with("kind", "type"));
        self.type_cache.insert(cache_key, note.clone());
        note
    }

    /// Finds the best annotation over an ancestor chain.
    ///
    /// A record is a candidate when every class it declares appears in the
    /// chain. Among candidates, the best is a maximal element of the
    /// partial order: A comes before B iff every class in A is a
    /// superclass of some class in B. Without a maximal element the
    /// choice is arbitrary but deterministic (chain and load order).
    fn resolve_type(
        &mut self,
        subclasses: &IndexMap<String, AncestorClass>,
        extra: &Query,
    ) -> Option<Rc<Annotation>> {
        let mut best: Option<Rc<Annotation>> = None;
        for ancestor in subclasses.values() {
            let package = ancestor.package();
            let mut query = Query::new()
                .with("language", "python")
                .with("package", package.as_str());
            for (field, value) in &extra.0 {
                query.0.insert(field.clone(), value.clone());
            }
            for note in self.query(&query, &package) {
                let candidate = note
                    .class
                    .iter()
                    .all(|name| subclasses.contains_key(name));
                if !candidate {
                    continue;
                }
                let replace = match &best {
                    None => true,
                    Some(current) => annotation_le(subclasses, current, &note),
                };
                if replace {
                    best = Some(note);
                }
            }
        }
        best
    }

    /// Queries the store, loading the package's records on demand. Store
    /// failures degrade to missing annotations.
    fn query(&mut self, query: &Query, package: &str) -> Vec<Rc<Annotation>> {
        if let Err(error) = self.db.load_package("python", package) {
            warn!("annotation load for package '{package}' failed: {error}");
        }
        self.db.filter(query)
    }
}

/// `first` ≼ `second` iff every class in `first` is a superclass of some
/// class in `second`.
fn annotation_le(
    subclasses: &IndexMap<String, AncestorClass>,
    first: &Annotation,
    second: &Annotation,
) -> bool {
    first.class.iter().all(|c1| {
        second.class.iter().any(|c2| {
            match (subclasses.get(c1), subclasses.get(c2)) {
                (Some(a), Some(b)) => a.is_superclass_of(b),
                _ => false,
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::annotations::db::MemoryAnnotationDb;
    use crate::value::InstanceValue;

    fn class(name: &str, bases: Vec<Rc<ClassValue>>) -> Rc<ClassValue> {
        Rc::new(ClassValue {
            name: name.to_owned(),
            qual_name: name.to_owned(),
            module: "shop".to_owned(),
            bases,
            attrs: RefCell::new(IndexMap::new()),
        })
    }

    fn instance(class: &Rc<ClassValue>) -> Value {
        Value::Instance(Rc::new(RefCell::new(InstanceValue {
            class: Rc::clone(class),
            attrs: IndexMap::new(),
        })))
    }

    fn annotator(json: &str) -> Annotator {
        let mut db = MemoryAnnotationDb::new();
        db.load_str(json).unwrap();
        Annotator::new(Box::new(db))
    }

    #[test]
    fn most_derived_class_wins() {
        // C <- B <- A; records for A and B both match an A instance.
        let c = class("C", vec![]);
        let b = class("B", vec![Rc::clone(&c)]);
        let a = class("A", vec![Rc::clone(&b)]);
        let mut annotator = annotator(
            r#"[
                {"language": "python", "package": "shop", "id": "b",
                 "kind": "type", "class": "shop.B"},
                {"language": "python", "package": "shop", "id": "a",
                 "kind": "type", "class": "shop.A"}
            ]"#,
        );
        let note = annotator.notate_value(&instance(&a)).unwrap();
        assert_eq!(note.id, "a");
    }

    #[test]
    fn incomparable_records_choose_deterministically() {
        let left = class("Left", vec![]);
        let right = class("Right", vec![]);
        let both = class("Both", vec![Rc::clone(&left), Rc::clone(&right)]);
        let source = r#"[
            {"language": "python", "package": "shop", "id": "left",
             "kind": "type", "class": "shop.Left"},
            {"language": "python", "package": "shop", "id": "right",
             "kind": "type", "class": "shop.Right"}
        ]"#;
        let mut first = annotator(source);
        let mut second = annotator(source);
        let choice_one = first.notate_value(&instance(&both)).unwrap();
        let choice_two = second.notate_value(&instance(&both)).unwrap();
        assert_eq!(choice_one.id, choice_two.id);
    }

    #[test]
    fn base_only_records_match_subclasses() {
        let base = class("Base", vec![]);
        let derived = class("Derived", vec![Rc::clone(&base)]);
        let mut annotator = annotator(
            r#"[
                {"language": "python", "package": "shop", "id": "base",
                 "kind": "type", "class": "shop.Base"}
            ]"#,
        );
        let note = annotator.notate_value(&instance(&derived)).unwrap();
        assert_eq!(note.id, "base");
    }

    #[test]
    fn builtin_values_resolve_against_builtin_records() {
        let mut annotator = annotator(
            r#"[
                {"language": "python", "package": "builtins", "id": "int",
                 "kind": "type", "class": "int"}
            ]"#,
        );
        let note = annotator.notate_value(&Value::Int(3)).unwrap();
        assert_eq!(note.key(), "python/builtins/int");
    }

    #[test]
    fn missing_annotations_are_none_and_memoised() {
        let mut annotator = annotator("[]");
        assert!(annotator.notate_value(&Value::Int(3)).is_none());
        assert!(annotator.notate_value(&Value::Int(4)).is_none());
    }

    #[test]
    fn records_declaring_unrelated_classes_are_not_candidates() {
        let a = class("A", vec![]);
        let mut annotator = annotator(
            r#"[
                {"language": "python", "package": "shop", "id": "other",
                 "kind": "type", "class": "shop.Unrelated"}
            ]"#,
        );
        assert!(annotator.notate_value(&instance(&a)).is_none());
    }
}
