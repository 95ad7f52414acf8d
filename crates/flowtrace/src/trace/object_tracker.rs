//! Object identity by weak reference.
//!
//! The tracker assigns stable string identifiers to trackable live values.
//! It never holds a strong reference: each entry pairs the value's memory
//! address with a `Weak` handle, so an object is observed as reclaimed the
//! moment its last strong reference drops. Dead pairs are purged from both
//! maps on every mutating operation; reclamation runs deterministically on
//! the executing thread, so no lock is needed (see DESIGN.md).

use std::cell::RefCell;
use std::rc::Weak;

use ahash::AHashMap;

use crate::value::{InstanceValue, Value};

/// Allows object lookup by ID without keeping the object alive.
///
/// IDs are decimal strings from a monotonic counter, unique for the lifetime
/// of the tracker; unlike raw addresses they are never recycled.
#[derive(Debug, Default)]
pub struct ObjectTracker {
    /// Map: memory address -> object ID.
    mem_map: AHashMap<usize, String>,
    /// Map: object ID -> weak reference.
    ref_map: AHashMap<String, Weak<RefCell<InstanceValue>>>,
    /// Running counter used to generate object IDs.
    id_count: u64,
}

impl ObjectTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether it is possible to track the given value.
    ///
    /// Scalars, strings and built-in containers are not trackable, nor is
    /// anything callable or module-like.
    #[must_use]
    pub fn is_trackable(value: &Value) -> bool {
        value.is_trackable()
    }

    /// Whether the given value is currently tracked.
    pub fn is_tracked(&self, value: &Value) -> bool {
        value
            .address()
            .is_some_and(|address| self.mem_map.contains_key(&address))
    }

    /// The ID of a tracked value, or `None` if untracked or untrackable.
    pub fn get_id(&self, value: &Value) -> Option<String> {
        let address = value.address()?;
        let id = self.mem_map.get(&address)?;
        // A dead entry whose address was reused must not resurrect the old
        // ID; confirm the weak reference still points at this value.
        let weak = self.ref_map.get(id)?;
        if weak.strong_count() == 0 {
            return None;
        }
        Some(id.clone())
    }

    /// Looks up a tracked object by ID.
    ///
    /// Returns `None` if the ID is unknown or the object has been reclaimed.
    pub fn get_object(&self, id: &str) -> Option<Value> {
        let weak = self.ref_map.get(id)?;
        weak.upgrade().map(Value::Instance)
    }

    /// Starts tracking a value, returning its ID.
    ///
    /// Idempotent: a value already tracked returns the same ID. Untrackable
    /// values return `None`.
    pub fn track(&mut self, value: &Value) -> Option<String> {
        let address = value.address()?;
        let weak = value.downgrade()?;
        self.purge_dead();

        if let Some(id) = self.mem_map.get(&address) {
            return Some(id.clone());
        }

        self.id_count += 1;
        let id = self.id_count.to_string();
        self.mem_map.insert(address, id.clone());
        self.ref_map.insert(id.clone(), weak);
        Some(id)
    }

    /// Tracks the value if trackable, otherwise returns `None`.
    pub fn maybe_track(&mut self, value: &Value) -> Option<String> {
        if Self::is_trackable(value) {
            self.track(value)
        } else {
            None
        }
    }

    /// Removes entries whose objects have been reclaimed.
    ///
    /// Plays the finalizer role: both the address entry and the ID entry of
    /// a dead object are dropped together, and the ID is never reused.
    fn purge_dead(&mut self) {
        let mut dead: Vec<String> = Vec::new();
        for (id, weak) in &self.ref_map {
            if weak.strong_count() == 0 {
                dead.push(id.clone());
            }
        }
        for id in dead {
            self.ref_map.remove(&id);
            self.mem_map.retain(|_, mapped| mapped != &id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use indexmap::IndexMap;

    use crate::value::{ClassValue, InstanceValue};

    fn make_instance() -> Value {
        let class = Rc::new(ClassValue {
            name: "Widget".to_owned(),
            qual_name: "Widget".to_owned(),
            module: "shop".to_owned(),
            bases: vec![],
            attrs: RefCell::new(IndexMap::new()),
        });
        Value::Instance(Rc::new(RefCell::new(InstanceValue {
            class,
            attrs: IndexMap::new(),
        })))
    }

    #[test]
    fn track_is_idempotent() {
        let mut tracker = ObjectTracker::new();
        let value = make_instance();
        let first = tracker.track(&value).unwrap();
        let second = tracker.track(&value).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn distinct_objects_get_distinct_ids() {
        let mut tracker = ObjectTracker::new();
        let a = make_instance();
        let b = make_instance();
        assert_ne!(tracker.track(&a), tracker.track(&b));
    }

    #[test]
    fn untrackable_values_are_rejected() {
        let mut tracker = ObjectTracker::new();
        assert_eq!(tracker.track(&Value::Int(5)), None);
        assert_eq!(tracker.maybe_track(&Value::str("abc")), None);
        assert_eq!(tracker.maybe_track(&Value::list(vec![])), None);
    }

    #[test]
    fn reclaimed_objects_disappear() {
        let mut tracker = ObjectTracker::new();
        let value = make_instance();
        let id = tracker.track(&value).unwrap();
        assert!(tracker.get_object(&id).is_some());
        drop(value);
        assert!(tracker.get_object(&id).is_none());
    }

    #[test]
    fn ids_are_not_reused_after_reclamation() {
        let mut tracker = ObjectTracker::new();
        let first = make_instance();
        let first_id = tracker.track(&first).unwrap();
        drop(first);
        let second = make_instance();
        let second_id = tracker.track(&second).unwrap();
        assert_ne!(first_id, second_id);
    }

    #[test]
    fn get_id_returns_none_for_untracked() {
        let tracker = ObjectTracker::new();
        let value = make_instance();
        assert_eq!(tracker.get_id(&value), None);
    }
}
