//! Lexical environments.
//!
//! A classic chain of frames: function locals point at their defining
//! environment, which bottoms out at the module globals. Reads walk the
//! chain; writes always bind locally, matching the source language's
//! assignment scoping for the supported subset (no `global`/`nonlocal`).

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::value::Value;

pub type EnvRef = Rc<RefCell<Scope>>;

/// One environment frame.
#[derive(Debug)]
pub struct Scope {
    vars: IndexMap<String, Value>,
    parent: Option<EnvRef>,
}

impl Scope {
    /// A root (module-level) environment.
    pub fn root() -> EnvRef {
        Rc::new(RefCell::new(Self {
            vars: IndexMap::new(),
            parent: None,
        }))
    }

    /// A root environment seeded with initial bindings.
    pub fn root_with(vars: IndexMap<String, Value>) -> EnvRef {
        Rc::new(RefCell::new(Self { vars, parent: None }))
    }

    /// A child frame whose reads fall through to `parent`.
    pub fn child(parent: &EnvRef) -> EnvRef {
        Rc::new(RefCell::new(Self {
            vars: IndexMap::new(),
            parent: Some(Rc::clone(parent)),
        }))
    }

    pub fn get(env: &EnvRef, name: &str) -> Option<Value> {
        let scope = env.borrow();
        if let Some(value) = scope.vars.get(name) {
            return Some(value.clone());
        }
        scope.parent.as_ref().and_then(|parent| Self::get(parent, name))
    }

    /// Binds a name in this frame.
    pub fn set(env: &EnvRef, name: &str, value: Value) {
        env.borrow_mut().vars.insert(name.to_owned(), value);
    }

    /// Removes a name from this frame. Returns whether it was bound here.
    pub fn remove(env: &EnvRef, name: &str) -> bool {
        env.borrow_mut().vars.shift_remove(name).is_some()
    }

    /// Snapshot of this frame's own bindings (not the chain).
    pub fn bindings(env: &EnvRef) -> IndexMap<String, Value> {
        env.borrow().vars.clone()
    }
}
