//! Observers
//!
//! An [`Observer`] is the wrapping marker attached to a composite value.
//! Observing a record arms interception on each of its fields (a private
//! dep per field, a cached child observer for composite field values);
//! observing a list arms its structural mutators. Nested composites are
//! observed recursively unless the shallow mode is requested.
//!
//! # Idempotence
//!
//! The marker lives inside the container itself, so `observe` on an
//! already-wrapped value returns the existing observer. Primitives and
//! sealed (not-extensible) containers are refused.
//!
//! # Explicit mutation helpers
//!
//! Interception cannot cover two mutations: adding a brand-new record field
//! and assigning a list element by index. [`set_reactive`] and
//! [`delete_reactive`] are the reactive escape hatches for those cases.

use std::cell::Cell;
use std::rc::Rc;

use super::dep::Dep;
use super::value::{List, Record, Value};

/// The per-container observation state: one container-level dep (notified
/// on structural change) and a count of root bindings using this container
/// as their top-level state.
pub struct Observer {
    dep: Rc<Dep>,
    vm_count: Cell<usize>,
    shallow: bool,
}

impl Observer {
    fn new(shallow: bool) -> Rc<Self> {
        Rc::new(Self {
            dep: Dep::new(),
            vm_count: Cell::new(0),
            shallow,
        })
    }

    /// The container-level dep, notified on list mutation and reactive
    /// field addition/removal.
    pub fn dep(&self) -> &Rc<Dep> {
        &self.dep
    }

    /// How many root bindings use this container as top-level state.
    pub fn vm_count(&self) -> usize {
        self.vm_count.get()
    }

    pub fn is_shallow(&self) -> bool {
        self.shallow
    }

    fn bump_vm_count(&self) {
        self.vm_count.set(self.vm_count.get() + 1);
    }
}

/// Observe a value, recursively. Returns the (new or existing) observer,
/// or `None` for primitives and sealed containers.
pub fn observe(value: &Value) -> Option<Rc<Observer>> {
    observe_with(value, false)
}

/// Observe a value without descending into nested composites.
pub fn observe_shallow(value: &Value) -> Option<Rc<Observer>> {
    observe_with(value, true)
}

/// Observe a value used as the top-level state of a root binding.
///
/// The root-binding count guards `set_reactive`/`delete_reactive` against
/// structural mutation of root state.
pub fn observe_root(value: &Value) -> Option<Rc<Observer>> {
    let ob = observe(value)?;
    ob.bump_vm_count();
    Some(ob)
}

fn observe_with(value: &Value, shallow: bool) -> Option<Rc<Observer>> {
    match value {
        Value::Record(record) => observe_record(record, shallow),
        Value::List(list) => observe_list(list, shallow),
        _ => None,
    }
}

fn observe_record(record: &Record, shallow: bool) -> Option<Rc<Observer>> {
    if let Some(ob) = record.observer() {
        return Some(ob);
    }
    if record.is_sealed() {
        return None;
    }
    let ob = Observer::new(shallow);
    // Attach the marker before walking so cyclic structures terminate.
    *record.inner.ob.borrow_mut() = Some(Rc::clone(&ob));
    for key in record.keys() {
        intercept_field(record, &key, shallow);
    }
    Some(ob)
}

fn observe_list(list: &List, shallow: bool) -> Option<Rc<Observer>> {
    if let Some(ob) = list.observer() {
        return Some(ob);
    }
    if list.is_sealed() {
        return None;
    }
    let ob = Observer::new(shallow);
    *list.inner.ob.borrow_mut() = Some(Rc::clone(&ob));
    if !shallow {
        for item in list.to_vec() {
            observe_with(&item, false);
        }
    }
    Some(ob)
}

/// Arm interception on one record field: allocate its dep and observe its
/// value. Fixed fields are skipped entirely.
fn intercept_field(record: &Record, key: &str, shallow: bool) {
    let value = {
        let fields = record.inner.fields.borrow();
        match fields.get(key) {
            Some(field) if field.fixed => return,
            Some(field) => field.value.clone(),
            None => return,
        }
    };
    // Observe the child outside the fields borrow; the walk may reach back
    // into this record through a cycle.
    let child_ob = if shallow { None } else { observe_with(&value, false) };
    let mut fields = record.inner.fields.borrow_mut();
    if let Some(field) = fields.get_mut(key) {
        field.dep = Some(Dep::new());
        field.child_ob = child_ob;
    }
}

// ----------------------------------------------------------------------------
// Explicit reactive mutation
// ----------------------------------------------------------------------------

/// A mutation key: a record field name or a list index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Field(String),
    Index(usize),
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Key::Field(key.to_string())
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Key::Field(key)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

/// Reactively set a member that interception cannot cover.
///
/// - List + index: splice-replace (extends the list when the index is past
///   the end), which notifies through the list's own dep.
/// - Record + existing field: plain write, interception notifies.
/// - Record + new field on an observed record: installs fresh interception
///   for the member and notifies the record's container dep. Refused (with
///   a diagnostic) on containers used as root state.
/// - Record + new field on an unobserved record: plain write, nothing to
///   notify. This mutation cannot be made reactive after the fact.
///
/// Primitive targets are a diagnostic-only condition: the value is returned
/// unchanged and nothing else happens.
pub fn set_reactive(target: &Value, key: impl Into<Key>, value: Value) -> Value {
    match (target, key.into()) {
        (Value::List(list), Key::Index(index)) => {
            list.set(index, value.clone());
            value
        }
        (Value::Record(record), Key::Field(key)) => {
            if record.contains(&key) {
                record.set(&key, value.clone());
                return value;
            }
            let Some(ob) = record.observer() else {
                // Unobserved target: plain assignment, no notification.
                record.define(&key, value.clone());
                return value;
            };
            if ob.vm_count() > 0 {
                tracing::warn!(
                    %key,
                    "refusing to add a reactive field to root state; declare it up front instead"
                );
                return value;
            }
            record.define(&key, value.clone());
            intercept_field(record, &key, ob.is_shallow());
            ob.dep().notify();
            value
        }
        (target, key) => {
            tracing::warn!(
                ?key,
                target = ?target,
                "cannot set a reactive member on this target"
            );
            value
        }
    }
}

/// Reactively delete a member. Returns the removed value.
///
/// Notifies the container dep only when the member existed and the target
/// is observed. Primitive targets are a diagnostic-only condition.
pub fn delete_reactive(target: &Value, key: impl Into<Key>) -> Option<Value> {
    match (target, key.into()) {
        (Value::List(list), Key::Index(index)) => {
            if index < list.len() {
                list.splice(index, 1, Vec::new()).into_iter().next()
            } else {
                None
            }
        }
        (Value::Record(record), Key::Field(key)) => {
            if !record.contains(&key) {
                return None;
            }
            if let Some(ob) = record.observer() {
                if ob.vm_count() > 0 {
                    tracing::warn!(%key, "refusing to delete a field of root state");
                    return None;
                }
            }
            let removed = record.remove(&key);
            if let Some(ob) = record.observer() {
                ob.dep().notify();
            }
            removed
        }
        (target, key) => {
            tracing::warn!(?key, target = ?target, "cannot delete a reactive member on this target");
            None
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
